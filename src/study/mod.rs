pub mod deck;
pub mod srs;

pub use deck::{FlashcardDeck, FlashcardRecord};
pub use srs::{calculate_next_review, get_due_cards, get_weak_cards};
