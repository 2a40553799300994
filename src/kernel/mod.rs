pub mod broadcast;
pub mod cancel;
pub mod event;
pub mod history;
pub mod session;
pub mod state;
pub mod time;
