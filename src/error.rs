use thiserror::Error;

/// Host media acquisition failures (getUserMedia / getDisplayMedia).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("no device available for {0}")]
    NoDevice(&'static str),
    #[error("capture failed: {0}")]
    Capture(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("session closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// Malformed audio payloads. Never fatal to a call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("pcm16 payload has odd length {0}")]
    OddLength(usize),
    #[error("pcm16 payload of {frames} samples does not divide into {channels} channels")]
    ChannelMismatch { frames: usize, channels: u16 },
    #[error("unsupported channel count 0")]
    NoChannels,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("audio output device error: {0}")]
    Device(String),
    #[error("frame encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("speech service returned status {0}")]
    Status(u16),
    #[error("speech service returned no audio")]
    Empty,
}

