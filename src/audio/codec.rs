use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Encoded media payload handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// Base64 of the raw bytes.
    pub data: String,
    pub mime_type: String,
}

/// Decoded, playable audio. Planar: one `Vec<f32>` per channel, samples in -1.0..1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self { sample_rate, channels: vec![samples] }
    }

    pub fn silence(sample_rate: u32, frames: usize) -> Self {
        Self::mono(sample_rate, vec![0.0; frames])
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    /// Interleaves frames `start..end` into `out`.
    pub fn interleave_into(&self, start: usize, end: usize, out: &mut Vec<f32>) {
        out.clear();
        for frame in start..end.min(self.frames()) {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
    }
}

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(base64: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(base64.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Interprets little-endian PCM16 bytes as an interleaved buffer with
/// `channels` channels.
pub fn decode_audio_data(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::NoChannels);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let n = channels as usize;
    if samples.len() % n != 0 {
        return Err(DecodeError::ChannelMismatch { frames: samples.len(), channels });
    }

    let frame_count = samples.len() / n;
    let mut planar = vec![Vec::with_capacity(frame_count); n];
    for frame in samples.chunks_exact(n) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(f32::from(sample) / 32768.0);
        }
    }
    Ok(AudioBuffer { sample_rate, channels: planar })
}

/// Quantizes float samples to PCM16 little-endian bytes.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&scaled.to_le_bytes());
    }
    bytes
}

/// Packs captured microphone samples for realtime transmission.
pub fn create_audio_blob(samples: &[f32], sample_rate: u32) -> Blob {
    Blob {
        data: encode(&pcm16_bytes(samples)),
        mime_type: format!("audio/pcm;rate={}", sample_rate),
    }
}
