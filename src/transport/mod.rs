//! Remote AI session collaborator.
//!
//! `Transport::open` resolves once the session is established. Lifecycle
//! callbacks (open, message, error, close) are delivered as `TransportEvent`s
//! on the channel passed to `open`, so the session actor sees them in order
//! with everything else it handles.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::codec::Blob;
use crate::error::TransportError;
use crate::kernel::event::ServerEvent;
use crate::kernel::state::SessionMode;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub persona: String,
    pub voice_name: String,
    pub mode: SessionMode,
    pub instruction_override: Option<String>,
    pub conversation_context: Option<String>,
    /// Ask the backend for input/output transcriptions.
    pub transcription: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeInput {
    Media(Blob),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(ServerEvent),
    /// Fatal; the session tears the call down.
    Error(String),
    /// Remote close. Reported, never fatal on its own.
    Closed(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        request: OpenRequest,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn LiveSession>, TransportError>;
}

/// An open remote session. Exclusively owned by the call session.
pub trait LiveSession: Send + Sync {
    fn send_realtime_input(&self, input: RealtimeInput) -> Result<(), TransportError>;
    fn close(&self);
}
