pub mod loopback;
pub mod tts;

pub use tts::{HttpSpeechSynthesizer, SpeechSynthesizer};
