//! Capture and playback graphs.
//!
//! Capture: microphone samples -> gain (mute) -> analyser (level) -> chunking
//! processor -> PCM16 blobs for the transport.
//!
//! Playback: buffer sources -> shared output gain -> analyser -> sink. Every
//! AI-voiced buffer goes through the same gain node, so one volume control
//! governs live turns and broadcast segments alike.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::{create_audio_blob, AudioBuffer, Blob};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Output device. `write` resolves once the device has consumed the block,
/// which paces rendering in real time.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn write(&self, frames: &[f32], channels: u16, sample_rate: u32) -> Result<(), AudioError>;
}

/// A processing context that can be suspended without tearing down the
/// nodes wired into it.
#[derive(Debug)]
pub struct AudioContext {
    sample_rate: u32,
    running: watch::Sender<bool>,
}

impl AudioContext {
    pub fn new(sample_rate: u32) -> Self {
        let (running, _) = watch::channel(true);
        Self { sample_rate, running }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn suspend(&self) {
        self.running.send_replace(false);
    }

    pub fn resume(&self) {
        self.running.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn gate(&self) -> ContextGate {
        ContextGate(self.running.subscribe())
    }
}

/// Lets a node task wait while its context is suspended.
#[derive(Debug, Clone)]
pub struct ContextGate(watch::Receiver<bool>);

impl ContextGate {
    pub fn is_running(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn running(&mut self) {
        // A dropped context means the graph is going away; don't block on it.
        let _ = self.0.wait_for(|running| *running).await;
    }
}

#[derive(Debug, Clone)]
pub struct GainNode(Arc<AtomicU32>);

impl GainNode {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    pub fn value(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set_value(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn apply(&self, samples: &mut [f32]) {
        let gain = self.value();
        if gain != 1.0 {
            samples.iter_mut().for_each(|s| *s *= gain);
        }
    }
}

/// Level meter: RMS of the most recent block that passed through.
#[derive(Debug, Clone, Default)]
pub struct AnalyserNode(Arc<AtomicU32>);

impl AnalyserNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, samples: &[f32]) {
        self.0.store(rms(samples).to_bits(), Ordering::Relaxed);
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.0.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sq_sum: f32 = samples.iter().map(|&x| x * x).sum();
    (sq_sum / samples.len() as f32).sqrt()
}

/// Regroups an arbitrary stream of sample chunks into fixed-size frames.
#[derive(Debug)]
pub struct ChunkProcessor {
    size: usize,
    pending: Vec<f32>,
}

impl ChunkProcessor {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1), pending: Vec::with_capacity(size) }
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let mut ready = Vec::new();
        while self.pending.len() >= self.size {
            ready.push(self.pending.drain(..self.size).collect());
        }
        ready
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Clone)]
pub struct CapturedChunk {
    pub blob: Blob,
    /// Analyser level of the chunk, after the mute gain.
    pub level: f32,
}

/// Microphone graph. Owns the task that drains the microphone track.
pub struct CaptureChain {
    context: AudioContext,
    gain: GainNode,
    analyser: AnalyserNode,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CaptureChain {
    pub fn connect<F>(
        mut source: mpsc::Receiver<Vec<f32>>,
        config: &AudioConfig,
        cancel: CancellationToken,
        on_chunk: F,
    ) -> Self
    where
        F: Fn(CapturedChunk) + Send + 'static,
    {
        let context = AudioContext::new(config.input_sample_rate);
        let gain = GainNode::new(1.0);
        let analyser = AnalyserNode::new();
        let mut processor = ChunkProcessor::new(config.processor_buffer_size);
        let sample_rate = config.input_sample_rate;

        let task = {
            let mut gate = context.gate();
            let gain = gain.clone();
            let analyser = analyser.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let mut samples = tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = source.recv() => match next {
                            Some(samples) => samples,
                            None => {
                                debug!("microphone track ended");
                                break;
                            }
                        },
                    };
                    // Samples captured while suspended are discarded.
                    if !gate.is_running() {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = gate.running() => {}
                        }
                        continue;
                    }
                    gain.apply(&mut samples);
                    for frame in processor.push(&samples) {
                        analyser.record(&frame);
                        on_chunk(CapturedChunk {
                            blob: create_audio_blob(&frame, sample_rate),
                            level: analyser.level(),
                        });
                    }
                }
            })
        };

        Self { context, gain, analyser, cancel, task }
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn gain(&self) -> &GainNode {
        &self.gain
    }

    pub fn analyser(&self) -> &AnalyserNode {
        &self.analyser
    }

    pub fn disconnect(self) {
        self.cancel.cancel();
        self.task.abort();
        self.analyser.reset();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEnd {
    Completed,
    Stopped,
    Failed(AudioError),
}

/// A started buffer source. Dropping the handle does not stop playback.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    id: SourceId,
    cancel: CancellationToken,
}

impl SourceHandle {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Everything a render task needs from the graph it plays into.
#[derive(Clone)]
pub(crate) struct RenderTarget {
    pub gain: GainNode,
    pub analyser: AnalyserNode,
    pub gate: ContextGate,
    pub sink: Arc<dyn AudioSink>,
    pub block_frames: usize,
}

pub(crate) async fn render(
    buffer: AudioBuffer,
    start_at: Option<Instant>,
    mut target: RenderTarget,
    cancel: CancellationToken,
) -> PlaybackEnd {
    if let Some(at) = start_at {
        tokio::select! {
            _ = cancel.cancelled() => return PlaybackEnd::Stopped,
            _ = tokio::time::sleep_until(at) => {}
        }
    }

    let total = buffer.frames();
    let channels = buffer.channel_count();
    let block_frames = target.block_frames.max(1);
    let mut block = Vec::with_capacity(block_frames * channels as usize);
    let mut frame = 0;
    while frame < total {
        tokio::select! {
            _ = cancel.cancelled() => return PlaybackEnd::Stopped,
            _ = target.gate.running() => {}
        }
        let end = (frame + block_frames).min(total);
        buffer.interleave_into(frame, end, &mut block);
        target.gain.apply(&mut block);
        target.analyser.record(&block);
        tokio::select! {
            _ = cancel.cancelled() => return PlaybackEnd::Stopped,
            written = target.sink.write(&block, channels, buffer.sample_rate) => {
                if let Err(e) = written {
                    warn!("audio sink rejected block: {}", e);
                    target.analyser.reset();
                    return PlaybackEnd::Failed(e);
                }
            }
        }
        frame = end;
    }
    target.analyser.reset();
    PlaybackEnd::Completed
}

/// Output graph shared by live-turn audio and broadcast segments.
pub struct PlaybackChain {
    context: AudioContext,
    gain: GainNode,
    analyser: AnalyserNode,
    sink: Arc<dyn AudioSink>,
    block_frames: usize,
    next_start: Option<Instant>,
    cancel: CancellationToken,
    next_id: Arc<AtomicU64>,
}

impl PlaybackChain {
    pub fn new(sink: Arc<dyn AudioSink>, config: &AudioConfig, volume: f32, cancel: CancellationToken) -> Self {
        let sample_rate = config.output_sample_rate;
        let block_frames = (sample_rate as u64 * config.render_block_ms / 1000).max(1) as usize;
        Self {
            context: AudioContext::new(sample_rate),
            gain: GainNode::new(volume),
            analyser: AnalyserNode::new(),
            sink,
            block_frames,
            next_start: None,
            cancel,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn gain(&self) -> &GainNode {
        &self.gain
    }

    pub fn analyser(&self) -> &AnalyserNode {
        &self.analyser
    }

    /// Plays `buffer` now. `on_ended` runs exactly once, however playback ends.
    pub fn start<F>(&mut self, buffer: AudioBuffer, on_ended: F) -> SourceHandle
    where
        F: FnOnce(SourceId, PlaybackEnd) + Send + 'static,
    {
        self.spawn_source(buffer, None, on_ended)
    }

    /// Plays `buffer` gaplessly after everything previously queued.
    pub fn enqueue<F>(&mut self, buffer: AudioBuffer, on_ended: F) -> SourceHandle
    where
        F: FnOnce(SourceId, PlaybackEnd) + Send + 'static,
    {
        let now = Instant::now();
        let start_at = match self.next_start {
            Some(at) if at > now => at,
            _ => now,
        };
        self.next_start = Some(start_at + buffer.duration());
        self.spawn_source(buffer, Some(start_at), on_ended)
    }

    /// Forgets the gapless schedule, e.g. after the queue was interrupted.
    pub fn reset_queue(&mut self) {
        self.next_start = None;
    }

    pub fn disconnect(self) {
        self.cancel.cancel();
        self.analyser.reset();
    }

    fn spawn_source<F>(&mut self, buffer: AudioBuffer, start_at: Option<Instant>, on_ended: F) -> SourceHandle
    where
        F: FnOnce(SourceId, PlaybackEnd) + Send + 'static,
    {
        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = self.cancel.child_token();
        let target = RenderTarget {
            gain: self.gain.clone(),
            analyser: self.analyser.clone(),
            gate: self.context.gate(),
            sink: self.sink.clone(),
            block_frames: self.block_frames,
        };
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let end = render(buffer, start_at, target, task_cancel).await;
            on_ended(id, end);
        });
        SourceHandle { id, cancel }
    }
}
