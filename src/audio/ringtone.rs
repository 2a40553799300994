use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::codec::AudioBuffer;
use super::pipeline::{render, AnalyserNode, AudioContext, AudioSink, GainNode, RenderTarget};

const RING_LOW_HZ: f32 = 440.0;
const RING_HIGH_HZ: f32 = 480.0;
const RING_LENGTH: Duration = Duration::from_millis(1500);
/// 1.5 s ring followed by 2 s of silence.
const RING_PERIOD: Duration = Duration::from_millis(3500);
const MAX_RINGS: u32 = 2;
const RING_PEAK: f32 = 0.15;
const RAMP: Duration = Duration::from_millis(10);

/// Two summed sines with short linear attack/release ramps.
pub fn dual_tone(low_hz: f32, high_hz: f32, length: Duration, sample_rate: u32) -> AudioBuffer {
    let frames = (length.as_secs_f32() * sample_rate as f32) as usize;
    let ramp = ((RAMP.as_secs_f32() * sample_rate as f32) as usize).max(1);
    let rate = sample_rate as f32;
    let samples = (0..frames)
        .map(|i| {
            let t = i as f32 / rate;
            let envelope = if i < ramp {
                i as f32 / ramp as f32
            } else if i + ramp > frames {
                (frames - i) as f32 / ramp as f32
            } else {
                1.0
            };
            let tone = ((TAU * low_hz * t).sin() + (TAU * high_hz * t).sin()) * 0.5;
            tone * RING_PEAK * envelope
        })
        .collect();
    AudioBuffer::mono(sample_rate, samples)
}

/// Local ringback played while a call is in `ringing`.
pub struct Ringtone {
    sink: Arc<dyn AudioSink>,
    sample_rate: u32,
    active: Option<CancellationToken>,
}

impl Ringtone {
    pub fn new(sink: Arc<dyn AudioSink>, sample_rate: u32) -> Self {
        Self { sink, sample_rate, active: None }
    }

    pub fn is_ringing(&self) -> bool {
        self.active.as_ref().map(|c| !c.is_cancelled()).unwrap_or(false)
    }

    /// No-op while already ringing.
    pub fn start(&mut self) {
        if self.is_ringing() {
            return;
        }
        let cancel = CancellationToken::new();
        self.active = Some(cancel.clone());

        let context = AudioContext::new(self.sample_rate);
        let target = RenderTarget {
            gain: GainNode::new(1.0),
            analyser: AnalyserNode::new(),
            gate: context.gate(),
            sink: self.sink.clone(),
            block_frames: (self.sample_rate / 50).max(1) as usize,
        };
        let tone = dual_tone(RING_LOW_HZ, RING_HIGH_HZ, RING_LENGTH, self.sample_rate);

        tokio::spawn(async move {
            // Keeps the gate's sender alive for the whole pattern.
            let _context = context;
            let mut period = tokio::time::interval(RING_PERIOD);
            for ring in 0..MAX_RINGS {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = period.tick() => {}
                }
                debug!("ring {}", ring + 1);
                render(tone.clone(), None, target.clone(), cancel.clone()).await;
            }
            cancel.cancel();
        });
    }

    pub fn stop(&mut self) {
        if let Some(cancel) = self.active.take() {
            cancel.cancel();
        }
    }
}

impl Drop for Ringtone {
    fn drop(&mut self) {
        self.stop();
    }
}
