use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::broadcast::Segment;
use super::cancel::CallEpoch;
use super::state::{FinalState, SessionMode};
use crate::audio::codec::Blob;
use crate::audio::pipeline::{CapturedChunk, PlaybackEnd, SourceId};
use crate::error::{MediaError, TransportError};
use crate::media::{DisplayStream, MediaStream};
use crate::transport::{LiveSession, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Streamed events from the AI backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// What the backend heard the user say.
    InputTranscription { text: String },
    /// Text of what the backend is saying.
    OutputTranscription { text: String },
    /// Base64 PCM16 at the output sample rate.
    Audio { data: String },
    /// The user barged in; queued output must stop.
    Interrupted,
    TurnComplete,
    ToolCall(ToolCall),
    Sentiment(Sentiment),
    SpeakerDetected { speaker: String },
}

/// One-line user-visible notices (toasts).
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info(String),
    Error(String),
    /// Tool calls the session does not handle itself.
    ToolCall(ToolCall),
}

/// Arguments of `start_call`.
#[derive(Debug, Clone, Default)]
pub struct StartCall {
    pub broadcast_script: Vec<Segment>,
    pub initial_text: Option<String>,
    pub instruction_override: Option<String>,
    pub conversation_context: Option<String>,
    /// Overrides the profile's mode for this call only.
    pub mode: Option<SessionMode>,
}

impl StartCall {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn broadcast(script: Vec<Segment>) -> Self {
        Self { broadcast_script: script, ..Self::default() }
    }

    pub fn with_initial_text(mut self, text: impl Into<String>) -> Self {
        self.initial_text = Some(text.into());
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction_override = Some(instruction.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.conversation_context = Some(context.into());
        self
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Transcripts handed to the call-end callback in meeting mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FinalTranscript {
    pub original: String,
    pub interpretation: String,
    pub speaker_names: std::collections::BTreeMap<String, String>,
}

pub type CallEndCallback = Box<dyn FnMut(FinalTranscript) + Send>;

/// Public operations, as delivered to the session actor.
pub(crate) enum Command {
    StartCall(StartCall),
    PauseCall,
    ResumeCall,
    EndCall(FinalState),
    SendImage(Blob),
    SendText(String),
    StartScreenShare,
    StopScreenShare,
    ToggleMute,
    ToggleSpeaker,
    ToggleCamera,
    SetOutputVolume(f32),
    SetMode(SessionMode),
    SetSpeakerName { speaker: String, name: String },
    SetOnCallEnd(CallEndCallback),
    Shutdown,
}

pub(crate) struct Request {
    pub command: Command,
    pub ack: oneshot::Sender<()>,
}

/// Completions of work the actor spawned. Each carries the epoch (or share
/// id) it was started under so stale results can be rejected.
pub(crate) enum Internal {
    RingElapsed(CallEpoch),
    MediaAcquired(CallEpoch, Result<MediaStream, MediaError>),
    TransportOpened(CallEpoch, Result<Box<dyn LiveSession>, TransportError>),
    Transport(CallEpoch, TransportEvent),
    Captured(CallEpoch, CapturedChunk),
    LiveSourceEnded(CallEpoch, SourceId),
    SegmentEnded(CallEpoch, usize, PlaybackEnd),
    DurationTick(CallEpoch),
    ScreenShareAcquired(u64, Result<DisplayStream, MediaError>),
    ScreenFrame(u64, Blob),
    ScreenShareEnded(u64),
}
