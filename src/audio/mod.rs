pub mod codec;
pub mod pipeline;
pub mod ringtone;

pub use codec::{create_audio_blob, decode, decode_audio_data, encode, AudioBuffer, Blob};
pub use pipeline::{
    AnalyserNode, AudioContext, AudioSink, CaptureChain, CapturedChunk, GainNode, PlaybackChain,
    PlaybackEnd, SourceHandle, SourceId,
};
pub use ringtone::Ringtone;
