use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::event::Sentiment;

/// Lifecycle of the single call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    /// Local ringback, nothing acquired yet.
    Ringing,
    /// Acquiring media and opening the transport.
    Connecting,
    Connected,
    /// Audio contexts suspended, duration clock stopped, graph kept wired.
    Paused,
    /// Transient, only observable from inside teardown.
    Disconnecting,
    /// Ended by the session itself (broadcast finished, `end_call` tool).
    Standby,
}

impl CallState {
    /// States `end_call` may tear down from.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Ringing | Self::Connecting | Self::Connected | Self::Paused)
    }

    /// States in which the session owns a transport handle.
    pub fn holds_transport(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Paused)
    }

    pub fn is_resting(self) -> bool {
        matches!(self, Self::Idle | Self::Standby)
    }
}

/// Where a call ends up after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    #[default]
    Idle,
    Standby,
}

impl From<FinalState> for CallState {
    fn from(value: FinalState) -> Self {
        match value {
            FinalState::Idle => CallState::Idle,
            FinalState::Standby => CallState::Standby,
        }
    }
}

/// Requests that move the call between states. The graph decides whether
/// they apply; anything it rejects is a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRequest {
    Start,
    RingElapsed,
    Established,
    AcquisitionFailed,
    Pause,
    Resume,
    End,
    TransportFailed,
    TeardownComplete(FinalState),
}

pub struct CallGraph;

impl CallGraph {
    /// Pure function: (current state, request) -> next state.
    /// Returns None if the request does not apply in `current`.
    pub fn transition(current: CallState, request: CallRequest) -> Option<CallState> {
        use CallRequest::*;
        use CallState::*;

        match (current, request) {
            (Idle | Standby, Start) => Some(Ringing),
            (Ringing, RingElapsed) => Some(Connecting),
            (Connecting, Established) => Some(Connected),
            (Connected, Pause) => Some(Paused),
            (Paused, Resume) => Some(Connected),

            // Every way out funnels through the same teardown.
            (Ringing | Connecting | Connected | Paused, End) => Some(Disconnecting),
            (Connecting, AcquisitionFailed) => Some(Disconnecting),
            (Connecting | Connected | Paused, TransportFailed) => Some(Disconnecting),
            (Disconnecting, TeardownComplete(final_state)) => Some(final_state.into()),

            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Default,
    Study,
    News,
    Quiz,
    Debate,
    Translator,
    /// Transcribes the conversation; the only mode that produces a final
    /// transcript at call end.
    Meeting,
}

impl SessionMode {
    pub fn produces_transcript(self) -> bool {
        self == Self::Meeting
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Offline,
    Online,
    Connected,
}

/// Which owned handles are currently held. Everything is false at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeldResources {
    pub transport: bool,
    pub input_stream: bool,
    pub capture_graph: bool,
    pub playback_graph: bool,
    pub screen_stream: bool,
    pub broadcast_source: bool,
    pub live_sources: usize,
    pub duration_timer: bool,
    pub ringtone: bool,
}

impl HeldResources {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything the UI renders about the call. Published after every step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub state: CallState,
    pub mode: SessionMode,
    pub connection_status: ConnectionStatus,
    pub duration_seconds: u64,
    pub is_muted: bool,
    pub is_speaker_on: bool,
    pub is_camera_on: bool,
    pub is_camera_enabled: bool,
    pub is_screen_sharing: bool,
    pub is_user_speaking: bool,
    pub is_ai_speaking: bool,
    /// Microphone level, 0.0..1.0.
    pub volume: f32,
    /// AI output level, 0.0..1.0.
    pub ai_volume: f32,
    pub output_volume: f32,
    /// Persona whose broadcast segment is playing.
    pub speaking_persona: Option<String>,
    pub broadcast_index: usize,
    pub is_broadcasting: bool,
    pub live_input_transcription: String,
    pub live_output_transcription: String,
    pub polished_original_transcript: String,
    pub english_interpretation: String,
    pub detected_speakers: BTreeSet<String>,
    pub sentiment: Option<Sentiment>,
    pub resources: HeldResources,
}

impl CallSnapshot {
    pub fn new(output_volume: f32, camera_on: bool) -> Self {
        Self {
            is_speaker_on: true,
            is_camera_on: camera_on,
            output_volume,
            ..Self::default()
        }
    }

    /// Clears session-scoped values; device preferences (mute, speaker,
    /// camera, volume) survive across calls.
    pub fn reset_session(&mut self) {
        self.connection_status = ConnectionStatus::Offline;
        self.duration_seconds = 0;
        self.is_user_speaking = false;
        self.is_ai_speaking = false;
        self.is_camera_enabled = false;
        self.volume = 0.0;
        self.ai_volume = 0.0;
        self.speaking_persona = None;
        self.broadcast_index = 0;
        self.is_broadcasting = false;
        self.live_input_transcription.clear();
        self.live_output_transcription.clear();
        self.polished_original_transcript.clear();
        self.english_interpretation.clear();
        self.detected_speakers.clear();
        self.sentiment = None;
    }
}
