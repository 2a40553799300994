//! In-process collaborators: a silent microphone, a solid-colour display, a
//! speaker that consumes audio in real time, and an echoing transport. They
//! let the session run end to end without host devices or a backend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::audio::pipeline::AudioSink;
use crate::error::{AudioError, MediaError, TransportError};
use crate::kernel::event::ServerEvent;
use crate::media::{DisplayStream, FrameSource, MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
use crate::transport::{LiveSession, OpenRequest, RealtimeInput, Transport, TransportEvent};

const MIC_BLOCK: Duration = Duration::from_millis(20);

/// Consumes audio at the rate it would play and remembers how much it got.
#[derive(Debug, Default)]
pub struct PacedSink {
    frames: AtomicU64,
}

impl PacedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AudioSink for PacedSink {
    async fn write(&self, frames: &[f32], channels: u16, sample_rate: u32) -> Result<(), AudioError> {
        if channels == 0 || sample_rate == 0 {
            return Err(AudioError::Device("invalid output format".into()));
        }
        let count = frames.len() as u64 / u64::from(channels);
        self.frames.fetch_add(count, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs_f64(count as f64 / f64::from(sample_rate))).await;
        Ok(())
    }
}

pub struct SolidFrames(RgbImage);

impl SolidFrames {
    pub fn new(width: u32, height: u32, colour: [u8; 3]) -> Self {
        Self(RgbImage::from_pixel(width, height, Rgb(colour)))
    }
}

impl FrameSource for SolidFrames {
    fn grab(&self) -> Option<RgbImage> {
        Some(self.0.clone())
    }
}

/// Always grants access. The microphone produces silence in real time until
/// its track is stopped.
#[derive(Debug, Default)]
pub struct LoopbackDevices;

#[async_trait]
impl MediaDevices for LoopbackDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if !constraints.audio {
            return Err(MediaError::NoDevice("audio"));
        }
        let microphone = MediaTrack::new(TrackKind::Audio, "loopback microphone");
        let mut tracks = vec![microphone.clone()];
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, "loopback camera"));
        }

        let (tx, rx) = mpsc::channel(8);
        let block = (constraints.sample_rate as u64 * MIC_BLOCK.as_millis() as u64 / 1000) as usize;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MIC_BLOCK);
            loop {
                tokio::select! {
                    _ = microphone.ended() => break,
                    _ = ticker.tick() => {
                        if tx.send(vec![0.0; block]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("loopback microphone stopped");
        });
        Ok(MediaStream::new(tracks, Some(rx)))
    }

    async fn get_display_media(&self) -> Result<DisplayStream, MediaError> {
        Ok(DisplayStream::new(
            MediaTrack::new(TrackKind::Video, "loopback display"),
            Box::new(SolidFrames::new(320, 180, [32, 96, 160])),
        ))
    }
}

/// Opens immediately and answers every text input with an output
/// transcription of the same text.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    sent: Arc<AtomicU64>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inputs received across every session opened so far.
    pub fn inputs_received(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(
        &self,
        request: OpenRequest,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn LiveSession>, TransportError> {
        debug!("loopback session for {} ({:?})", request.persona, request.mode);
        events.send(TransportEvent::Opened).map_err(|_| TransportError::Closed)?;
        Ok(Box::new(EchoSession { events, sent: self.sent.clone(), closed: AtomicBool::new(false) }))
    }
}

struct EchoSession {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl LiveSession for EchoSession {
    fn send_realtime_input(&self, input: RealtimeInput) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        if let RealtimeInput::Text(text) = input {
            let echo = TransportEvent::Message(ServerEvent::OutputTranscription { text });
            self.events.send(echo).map_err(|e| TransportError::Send(e.to_string()))?;
        }
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            let _ = self.events.send(TransportEvent::Closed("closed locally".into()));
        }
    }
}
