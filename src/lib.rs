pub mod audio;
pub mod config;
pub mod error;
pub mod kernel;
pub mod media;
pub mod services;
pub mod study;
pub mod transport;

// Re-export the entry points a UI layer needs
pub use kernel::session::{CallHandle, CallSessionManager, Collaborators, SessionProfile};
pub use kernel::state::{CallSnapshot, CallState, FinalState};
