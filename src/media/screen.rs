use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::devices::DisplayStream;
use crate::audio::codec::{encode, Blob};
use crate::error::MediaError;

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Blob, MediaError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgb8)
        .map_err(|e| MediaError::Capture(e.to_string()))?;
    Ok(Blob { data: encode(&bytes), mime_type: "image/jpeg".to_string() })
}

/// Periodically samples a display stream and hands out JPEG frames.
pub struct ScreenCapture {
    track: crate::media::MediaTrack,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScreenCapture {
    /// `on_ended` runs if the host ends the share (user revoked it) before
    /// `stop` is called.
    pub fn start<F, E>(
        stream: DisplayStream,
        interval: Duration,
        quality: u8,
        cancel: CancellationToken,
        on_frame: F,
        on_ended: E,
    ) -> Self
    where
        F: Fn(Blob) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let track = stream.track.clone();
        let task = {
            let cancel = cancel.clone();
            let mut on_ended = Some(on_ended);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = stream.track.ended() => {
                            debug!("display track ended by host");
                            if let Some(on_ended) = on_ended.take().filter(|_| !cancel.is_cancelled()) {
                                on_ended();
                            }
                            break;
                        }
                        _ = ticker.tick() => {
                            // Capture failures degrade to a skipped frame.
                            let Some(frame) = stream.frames.grab() else { continue };
                            match encode_jpeg(&frame, quality) {
                                Ok(blob) => on_frame(blob),
                                Err(e) => warn!("dropping screen frame: {}", e),
                            }
                        }
                    }
                }
            })
        };
        Self { track, cancel, task }
    }

    pub fn is_live(&self) -> bool {
        self.track.is_live() && !self.cancel.is_cancelled()
    }

    pub fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
        self.track.stop();
    }
}
