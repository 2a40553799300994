//! Session tuning knobs, with defaults matching the browser client and
//! optional TOML overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Above this the frame interval rounds down to zero milliseconds.
pub const MAX_SCREEN_SHARE_FPS: u32 = 1000;

/// Sample rates and buffer sizes for the two audio graphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Microphone capture rate (Hz).
    pub input_sample_rate: u32,
    /// Rate of every buffer played on the output chain (Hz).
    pub output_sample_rate: u32,
    /// Frames per chunk handed to the transport by the capture processor.
    pub processor_buffer_size: usize,
    pub channels: u16,
    /// Length of one render block on the output chain.
    pub render_block_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            processor_buffer_size: 4096,
            channels: 1,
            render_block_ms: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// How long the call rings before connecting.
    pub ringing_delay_ms: u64,
    /// Pause used for broadcast segments that carry no audio.
    pub silent_segment_ms: u64,
    pub screen_share_fps: u32,
    pub jpeg_quality: u8,
    /// Input level (RMS) above which the user counts as speaking.
    pub speaking_threshold: f32,
    pub speaking_timeout_ms: u64,
    pub output_volume: f32,
    pub camera_enabled: bool,
    /// Report finished call time to the usage meter.
    pub report_usage: bool,
    pub audio: AudioConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ringing_delay_ms: 2000,
            silent_segment_ms: 1000,
            screen_share_fps: 5,
            jpeg_quality: 70,
            speaking_threshold: 0.03,
            speaking_timeout_ms: 1500,
            output_volume: 1.0,
            camera_enabled: false,
            report_usage: true,
            audio: AudioConfig::default(),
        }
    }
}

impl CallConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_SCREEN_SHARE_FPS).contains(&self.screen_share_fps) {
            return Err(ConfigError::Invalid(format!(
                "screen_share_fps must be in 1..={MAX_SCREEN_SHARE_FPS}"
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid("jpeg_quality must be in 1..=100".into()));
        }
        if !(0.0..=1.0).contains(&self.output_volume) {
            return Err(ConfigError::Invalid("output_volume must be in 0.0..=1.0".into()));
        }
        if self.audio.channels == 0 || self.audio.processor_buffer_size == 0 {
            return Err(ConfigError::Invalid("audio channels and buffer size must be > 0".into()));
        }
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(ConfigError::Invalid("sample rates must be > 0".into()));
        }
        Ok(())
    }

    pub fn ringing_delay(&self) -> Duration {
        Duration::from_millis(self.ringing_delay_ms)
    }

    pub fn silent_segment(&self) -> Duration {
        Duration::from_millis(self.silent_segment_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis((1000 / u64::from(self.screen_share_fps.max(1))).max(1))
    }

    pub fn speaking_timeout(&self) -> Duration {
        Duration::from_millis(self.speaking_timeout_ms)
    }
}
