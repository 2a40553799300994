//! Host media devices: microphone/camera capture and display capture.
//!
//! Streams own their tracks. A track is live until it is stopped locally or
//! ended by the host (device unplugged, user revoked sharing); both look the
//! same to consumers.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub id: Uuid,
    pub kind: TrackKind,
    pub label: String,
    ended: CancellationToken,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            label: label.into(),
            ended: CancellationToken::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        !self.ended.is_cancelled()
    }

    pub fn stop(&self) {
        self.ended.cancel();
    }

    /// Resolves once the track has ended for any reason.
    pub async fn ended(&self) {
        self.ended.cancelled().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    /// Rate the microphone samples must be delivered at.
    pub sample_rate: u32,
}

/// Microphone (and optionally camera) capture.
#[derive(Debug)]
pub struct MediaStream {
    pub id: Uuid,
    tracks: Vec<MediaTrack>,
    samples: Option<mpsc::Receiver<Vec<f32>>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>, samples: Option<mpsc::Receiver<Vec<f32>>>) -> Self {
        Self { id: Uuid::new_v4(), tracks, samples }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn has_live_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video && t.is_live())
    }

    /// Hands the microphone sample feed to the capture graph. Only the first
    /// call returns it.
    pub fn take_samples(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.samples.take()
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Grabs the current contents of a shared display.
pub trait FrameSource: Send + Sync {
    fn grab(&self) -> Option<image::RgbImage>;
}

pub struct DisplayStream {
    pub track: MediaTrack,
    pub frames: Box<dyn FrameSource>,
}

impl DisplayStream {
    pub fn new(track: MediaTrack, frames: Box<dyn FrameSource>) -> Self {
        Self { track, frames }
    }

    pub fn stop(&self) {
        self.track.stop();
    }
}

impl std::fmt::Debug for DisplayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayStream").field("track", &self.track).finish()
    }
}

/// Permission-gated access to capture devices. Either call may be rejected.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;
    async fn get_display_media(&self) -> Result<DisplayStream, MediaError>;
}
