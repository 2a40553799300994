//! SM-2 spaced repetition.
//!
//! Everything here is a pure function of its inputs; the caller supplies
//! `now` so schedules are reproducible.

use chrono::{DateTime, Duration, Utc};

use super::deck::{FlashcardDeck, FlashcardRecord};

pub const MIN_EASE_FACTOR: f64 = 1.3;
pub const INITIAL_EASE_FACTOR: f64 = 2.5;
pub const MAX_QUALITY: u8 = 5;
/// Ratings at or above this count as a correct recall.
pub const PASSING_QUALITY: u8 = 3;

/// Applies one review with `quality` in 0..=5 (values above 5 are treated as 5).
pub fn calculate_next_review(card: &FlashcardRecord, quality: u8, now: DateTime<Utc>) -> FlashcardRecord {
    let quality = quality.min(MAX_QUALITY);
    let mut next = card.clone();

    if quality >= PASSING_QUALITY {
        next.interval_days = match card.repetition_count {
            0 => 1,
            1 => 6,
            _ => (f64::from(card.interval_days) * card.ease_factor).round() as u32,
        };
        next.repetition_count += 1;
        next.correct_count += 1;
    } else {
        next.repetition_count = 0;
        next.interval_days = 1;
        next.incorrect_count += 1;
    }

    let miss = f64::from(MAX_QUALITY - quality);
    next.ease_factor = (card.ease_factor + (0.1 - miss * (0.08 + miss * 0.02))).max(MIN_EASE_FACTOR);
    next.due_at = now + Duration::days(i64::from(next.interval_days));
    next
}

/// Cards whose review is due at `now`.
pub fn get_due_cards(deck: &FlashcardDeck, now: DateTime<Utc>) -> Vec<&FlashcardRecord> {
    deck.cards.iter().filter(|card| card.due_at <= now).collect()
}

/// Cards missed more often than recalled, most-missed first.
pub fn get_weak_cards(deck: &FlashcardDeck) -> Vec<&FlashcardRecord> {
    let mut weak: Vec<&FlashcardRecord> = deck
        .cards
        .iter()
        .filter(|card| card.incorrect_count > card.correct_count)
        .collect();
    weak.sort_by(|a, b| b.incorrect_count.cmp(&a.incorrect_count));
    weak
}
