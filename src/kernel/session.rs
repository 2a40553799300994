//! The call session manager.
//!
//! One actor task owns every piece of call state and every acquired handle.
//! Public operations arrive as `Command`s from `CallHandle`s; async work the
//! actor spawns (ring delay, media acquisition, transport open, playback,
//! capture, timers) reports back as epoch-tagged `Internal` events, so a
//! completion that belongs to a call the user already hung up is recognised
//! and its resource released instead of applied.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broadcast::{BroadcastPlayer, SegmentAction};
use super::cancel::{CallEpoch, CancellationRegistry};
use super::event::{
    CallEndCallback, Command, FinalTranscript, Internal, Notice, Request, ServerEvent, StartCall,
};
use super::history::{CallHistorySink, CallRecord, UsageMeter};
use super::state::{
    CallGraph, CallRequest, CallSnapshot, CallState, ConnectionStatus, FinalState, HeldResources,
    SessionMode,
};
use super::time::DurationClock;
use crate::audio::codec::{decode, decode_audio_data, Blob};
use crate::audio::pipeline::{AudioSink, CaptureChain, PlaybackChain, PlaybackEnd, SourceHandle, SourceId};
use crate::audio::ringtone::Ringtone;
use crate::config::CallConfig;
use crate::error::{MediaError, TransportError};
use crate::media::{DisplayStream, MediaConstraints, MediaDevices, MediaStream, ScreenCapture};
use crate::transport::{LiveSession, OpenRequest, RealtimeInput, Transport, TransportEvent};

const END_CALL_TOOL: &str = "end_call";
const NOTICE_CAPACITY: usize = 32;

/// Host-provided collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub media: Arc<dyn MediaDevices>,
    pub transport: Arc<dyn Transport>,
    /// Output device for AI voice, broadcast segments and the ringtone.
    pub speaker: Arc<dyn AudioSink>,
    pub history: Arc<dyn CallHistorySink>,
    pub usage: Option<Arc<dyn UsageMeter>>,
}

/// Who the user is talking to.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProfile {
    pub persona: String,
    pub voice_name: String,
    pub mode: SessionMode,
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            persona: "Companion".to_string(),
            voice_name: "Zephyr".to_string(),
            mode: SessionMode::Default,
        }
    }
}

/// The remote session, as seen from the call. `Opening` is held from
/// `connecting` until the open resolves; sends made meanwhile are queued.
enum TransportSlot {
    Closed,
    Opening { queued: Vec<RealtimeInput> },
    Open(Box<dyn LiveSession>),
}

impl TransportSlot {
    fn is_present(&self) -> bool {
        !matches!(self, TransportSlot::Closed)
    }
}

/// Which producer owns the shared output gain right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveOutput {
    Idle,
    LiveTurn,
    Broadcast,
}

enum ScreenShare {
    Off,
    /// Waiting on the host's display picker.
    Starting(u64),
    On { id: u64, capture: ScreenCapture },
}

pub struct CallSessionManager {
    config: CallConfig,
    profile: SessionProfile,
    collaborators: Collaborators,

    view: CallSnapshot,
    snapshot_tx: watch::Sender<CallSnapshot>,
    notices: broadcast::Sender<Notice>,
    internal_tx: mpsc::UnboundedSender<Internal>,

    registry: CancellationRegistry,
    pending: Option<StartCall>,
    call_mode: SessionMode,

    ringtone: Ringtone,
    transport: TransportSlot,
    input_stream: Option<MediaStream>,
    capture: Option<CaptureChain>,
    playback: Option<PlaybackChain>,
    output: ActiveOutput,
    live_sources: HashMap<SourceId, SourceHandle>,
    broadcast: BroadcastPlayer,
    broadcast_source: Option<SourceHandle>,
    clock: DurationClock,
    ticker: Option<CancellationToken>,
    screen: ScreenShare,
    next_share_id: u64,
    last_loud: Option<Instant>,

    speaker_names: BTreeMap<String, String>,
    on_call_end: Option<CallEndCallback>,
}

impl CallSessionManager {
    /// Starts the actor. Exactly one should exist per process; every UI
    /// surface shares clones of the returned handle.
    pub fn spawn(
        config: CallConfig,
        profile: SessionProfile,
        collaborators: Collaborators,
    ) -> (CallHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);

        let mut view = CallSnapshot::new(config.output_volume, config.camera_enabled);
        view.mode = profile.mode;
        let (snapshot_tx, snapshot_rx) = watch::channel(view.clone());

        let manager = Self {
            ringtone: Ringtone::new(collaborators.speaker.clone(), config.audio.output_sample_rate),
            call_mode: profile.mode,
            config,
            profile,
            collaborators,
            view,
            snapshot_tx,
            notices: notice_tx.clone(),
            internal_tx,
            registry: CancellationRegistry::new(),
            pending: None,
            transport: TransportSlot::Closed,
            input_stream: None,
            capture: None,
            playback: None,
            output: ActiveOutput::Idle,
            live_sources: HashMap::new(),
            broadcast: BroadcastPlayer::new(),
            broadcast_source: None,
            clock: DurationClock::new(),
            ticker: None,
            screen: ScreenShare::Off,
            next_share_id: 0,
            last_loud: None,
            speaker_names: BTreeMap::new(),
            on_call_end: None,
        };

        let task = tokio::spawn(manager.run(command_rx, internal_rx));
        let handle = CallHandle { commands: command_tx, snapshot: snapshot_rx, notices: notice_tx };
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Request>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!("call session manager started");
        loop {
            let keep_running = tokio::select! {
                biased;
                request = commands.recv() => match request {
                    Some(Request { command, ack }) => {
                        let keep_running = self.handle_command(command);
                        self.publish();
                        let _ = ack.send(());
                        keep_running
                    }
                    None => {
                        // Every handle dropped: treat like application unload.
                        self.teardown(CallRequest::End, FinalState::Idle);
                        self.publish();
                        false
                    }
                },
                Some(event) = internal.recv() => {
                    self.handle_internal(event);
                    self.publish();
                    true
                }
            };
            if !keep_running {
                break;
            }
        }
        info!("call session manager stopped");
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartCall(args) => self.start_call(args),
            Command::PauseCall => self.pause_call(),
            Command::ResumeCall => self.resume_call(),
            Command::EndCall(final_state) => self.teardown(CallRequest::End, final_state),
            Command::SendImage(blob) => {
                if self.transport.is_present() {
                    self.send_input(RealtimeInput::Media(blob));
                    self.notify(Notice::Info("Image sent to live session.".into()));
                }
            }
            Command::SendText(text) => {
                if !text.trim().is_empty() {
                    self.send_input(RealtimeInput::Text(text));
                }
            }
            Command::StartScreenShare => self.start_screen_share(),
            Command::StopScreenShare => self.stop_screen_share(),
            Command::ToggleMute => {
                self.view.is_muted = !self.view.is_muted;
                if let Some(capture) = &self.capture {
                    capture.gain().set_value(if self.view.is_muted { 0.0 } else { 1.0 });
                }
            }
            Command::ToggleSpeaker => {
                self.view.is_speaker_on = !self.view.is_speaker_on;
                self.apply_output_gain();
            }
            Command::ToggleCamera => {
                if self.view.state == CallState::Connected {
                    self.notify(Notice::Info("Camera changes take effect on the next call.".into()));
                }
                self.view.is_camera_on = !self.view.is_camera_on;
            }
            Command::SetOutputVolume(volume) => {
                self.view.output_volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
                self.apply_output_gain();
            }
            Command::SetMode(mode) => {
                self.profile.mode = mode;
                if self.view.state.is_resting() {
                    self.view.mode = mode;
                    self.call_mode = mode;
                }
            }
            Command::SetSpeakerName { speaker, name } => {
                self.speaker_names.insert(speaker, name);
            }
            Command::SetOnCallEnd(callback) => self.on_call_end = Some(callback),
            Command::Shutdown => {
                self.teardown(CallRequest::End, FinalState::Idle);
                return false;
            }
        }
        true
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::RingElapsed(epoch) => self.on_ring_elapsed(epoch),
            Internal::MediaAcquired(epoch, result) => self.on_media_acquired(epoch, result),
            Internal::TransportOpened(epoch, result) => self.on_transport_opened(epoch, result),
            Internal::Transport(epoch, event) => {
                if self.registry.is_current(epoch) {
                    self.on_transport_event(event);
                }
            }
            Internal::Captured(epoch, chunk) => {
                if !self.registry.is_current(epoch) || self.view.state != CallState::Connected {
                    return;
                }
                self.view.volume = chunk.level;
                self.detect_speaking(chunk.level);
                self.refresh_ai_volume();
                // Scripted broadcasts carry no spoken turns upstream.
                if !self.view.is_muted && self.output != ActiveOutput::Broadcast {
                    self.send_input(RealtimeInput::Media(chunk.blob));
                }
            }
            Internal::LiveSourceEnded(epoch, id) => {
                if !self.registry.is_current(epoch) {
                    return;
                }
                self.live_sources.remove(&id);
                if self.live_sources.is_empty() && self.output == ActiveOutput::LiveTurn {
                    self.output = ActiveOutput::Idle;
                    self.view.is_ai_speaking = false;
                }
            }
            Internal::SegmentEnded(epoch, cursor, end) => self.on_segment_ended(epoch, cursor, end),
            Internal::DurationTick(epoch) => {
                if self.registry.is_current(epoch) && self.view.state == CallState::Connected {
                    self.view.duration_seconds = self.clock.whole_seconds();
                    self.refresh_ai_volume();
                }
            }
            Internal::ScreenShareAcquired(id, result) => self.on_screen_share_acquired(id, result),
            Internal::ScreenFrame(id, blob) => {
                if matches!(self.screen, ScreenShare::On { id: current, .. } if current == id) {
                    self.send_input(RealtimeInput::Media(blob));
                }
            }
            Internal::ScreenShareEnded(id) => {
                if matches!(self.screen, ScreenShare::On { id: current, .. } if current == id) {
                    self.stop_screen_share();
                }
            }
        }
    }

    // ---- lifecycle ----

    fn start_call(&mut self, args: StartCall) {
        let Some(next) = CallGraph::transition(self.view.state, CallRequest::Start) else {
            debug!("start_call ignored in {:?}", self.view.state);
            return;
        };
        let scope = self.registry.begin();
        let epoch = scope.epoch;

        self.call_mode = args.mode.unwrap_or(self.profile.mode);
        self.view.reset_session();
        self.view.mode = self.call_mode;
        self.pending = Some(args);
        self.view.state = next;
        self.ringtone.start();
        info!("call {} ringing (mode {:?})", epoch.0, self.call_mode);

        let delay = self.config.ringing_delay();
        let cancel = scope.child();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Internal::RingElapsed(epoch));
                }
            }
        });
    }

    fn on_ring_elapsed(&mut self, epoch: CallEpoch) {
        if !self.registry.is_current(epoch) {
            return;
        }
        let Some(next) = CallGraph::transition(self.view.state, CallRequest::RingElapsed) else {
            return;
        };
        self.ringtone.stop();
        self.view.state = next;
        self.transport = TransportSlot::Opening { queued: Vec::new() };

        let script = self
            .pending
            .as_mut()
            .map(|args| std::mem::take(&mut args.broadcast_script))
            .unwrap_or_default();
        if self.broadcast.load(script) {
            self.output = ActiveOutput::Broadcast;
            self.view.is_broadcasting = true;
            debug!("broadcast of {} segments queued", self.broadcast.len());
        }
        info!("call {} connecting", epoch.0);

        let constraints = MediaConstraints {
            audio: true,
            video: self.view.is_camera_on,
            sample_rate: self.config.audio.input_sample_rate,
        };
        let media = self.collaborators.media.clone();
        let tx = self.internal_tx.clone();
        // Not cancellable: a stream granted after hang-up must still come
        // back here so its tracks get stopped.
        tokio::spawn(async move {
            let result = media.get_user_media(constraints).await;
            if let Err(mpsc::error::SendError(Internal::MediaAcquired(_, Ok(stream)))) =
                tx.send(Internal::MediaAcquired(epoch, result))
            {
                stream.stop();
            }
        });
    }

    fn on_media_acquired(&mut self, epoch: CallEpoch, result: Result<MediaStream, MediaError>) {
        if !self.registry.is_current(epoch) || self.view.state != CallState::Connecting {
            if let Ok(stream) = result {
                debug!("releasing media stream from abandoned call {}", epoch.0);
                stream.stop();
            }
            return;
        }

        let mut stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                error!("media acquisition failed: {}", e);
                self.notify(Notice::Error("Failed to start call. Please check microphone permissions.".into()));
                self.teardown(CallRequest::AcquisitionFailed, FinalState::Idle);
                return;
            }
        };
        let Some(scope) = self.registry.current().cloned() else {
            stream.stop();
            return;
        };

        self.view.is_camera_enabled = stream.has_live_video();
        self.playback = Some(PlaybackChain::new(
            self.collaborators.speaker.clone(),
            &self.config.audio,
            self.output_gain(),
            scope.child(),
        ));
        if let Some(samples) = stream.take_samples() {
            let tx = self.internal_tx.clone();
            let capture = CaptureChain::connect(samples, &self.config.audio, scope.child(), move |chunk| {
                let _ = tx.send(Internal::Captured(epoch, chunk));
            });
            if self.view.is_muted {
                capture.gain().set_value(0.0);
            }
            self.capture = Some(capture);
        }
        self.input_stream = Some(stream);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        {
            let tx = self.internal_tx.clone();
            let cancel = scope.child();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = events_rx.recv() => match event {
                            Some(event) => {
                                if tx.send(Internal::Transport(epoch, event)).is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        let request = self.open_request();
        let transport = self.collaborators.transport.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = transport.open(request, events_tx).await;
            if let Err(mpsc::error::SendError(Internal::TransportOpened(_, Ok(session)))) =
                tx.send(Internal::TransportOpened(epoch, result))
            {
                session.close();
            }
        });
    }

    fn open_request(&self) -> OpenRequest {
        let args = self.pending.as_ref();
        OpenRequest {
            persona: self.profile.persona.clone(),
            voice_name: self.profile.voice_name.clone(),
            mode: self.call_mode,
            instruction_override: args.and_then(|a| a.instruction_override.clone()),
            conversation_context: args.and_then(|a| a.conversation_context.clone()),
            transcription: true,
        }
    }

    fn on_transport_opened(&mut self, epoch: CallEpoch, result: Result<Box<dyn LiveSession>, TransportError>) {
        if !self.registry.is_current(epoch) || self.view.state != CallState::Connecting {
            if let Ok(session) = result {
                debug!("closing transport opened for abandoned call {}", epoch.0);
                session.close();
            }
            return;
        }

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                error!("transport open failed: {}", e);
                self.notify(Notice::Error(format!("Connection error: {}", e)));
                self.teardown(CallRequest::TransportFailed, FinalState::Idle);
                return;
            }
        };
        let queued = match std::mem::replace(&mut self.transport, TransportSlot::Open(session)) {
            TransportSlot::Opening { queued } => queued,
            _ => Vec::new(),
        };
        for input in queued {
            self.send_input(input);
        }

        let Some(next) = CallGraph::transition(self.view.state, CallRequest::Established) else {
            return;
        };
        self.view.state = next;
        self.view.connection_status = ConnectionStatus::Connected;
        self.view.duration_seconds = 0;
        self.clock.start();
        self.start_ticker(epoch);
        info!("call {} connected", epoch.0);

        if self.output == ActiveOutput::Broadcast {
            self.play_next_segment(epoch);
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.view.connection_status == ConnectionStatus::Offline {
                    self.view.connection_status = ConnectionStatus::Online;
                }
                if let Some(text) = self.pending.as_mut().and_then(|a| a.initial_text.take()) {
                    if !text.trim().is_empty() {
                        self.send_input(RealtimeInput::Text(text));
                    }
                }
            }
            TransportEvent::Message(message) => self.on_server_event(message),
            TransportEvent::Error(message) => {
                error!("live session error: {}", message);
                self.notify(Notice::Error(format!("Connection error: {}", message)));
                self.teardown(CallRequest::TransportFailed, FinalState::Idle);
            }
            TransportEvent::Closed(reason) => {
                info!("live session closed: {}", reason);
                self.view.connection_status = ConnectionStatus::Offline;
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        let meeting = self.call_mode.produces_transcript();
        match event {
            ServerEvent::InputTranscription { text } => {
                self.view.live_input_transcription.push_str(&text);
                if meeting {
                    self.view.polished_original_transcript.push_str(&text);
                }
            }
            ServerEvent::OutputTranscription { text } => {
                self.view.live_output_transcription.push_str(&text);
                if meeting {
                    self.view.english_interpretation.push_str(&text);
                }
            }
            ServerEvent::Audio { data } => self.enqueue_live_audio(&data),
            ServerEvent::Interrupted => {
                debug!("interrupted; stopping {} live sources", self.live_sources.len());
                self.stop_live_sources();
            }
            ServerEvent::TurnComplete => {
                self.view.live_input_transcription.clear();
                self.view.live_output_transcription.clear();
            }
            ServerEvent::ToolCall(call) if call.name == END_CALL_TOOL => {
                info!("session requested end of call");
                self.teardown(CallRequest::End, FinalState::Standby);
            }
            ServerEvent::ToolCall(call) => self.notify(Notice::ToolCall(call)),
            ServerEvent::Sentiment(sentiment) => self.view.sentiment = Some(sentiment),
            ServerEvent::SpeakerDetected { speaker } => {
                self.view.detected_speakers.insert(speaker);
            }
        }
    }

    fn pause_call(&mut self) {
        let Some(next) = CallGraph::transition(self.view.state, CallRequest::Pause) else {
            return;
        };
        self.view.state = next;
        self.suspend_graphs(true);
        self.clock.pause();
        self.stop_ticker();
        self.view.duration_seconds = self.clock.whole_seconds();
        info!("call paused at {}s", self.view.duration_seconds);
    }

    fn resume_call(&mut self) {
        let Some(next) = CallGraph::transition(self.view.state, CallRequest::Resume) else {
            return;
        };
        self.view.state = next;
        self.suspend_graphs(false);
        self.clock.start();
        if let Some(epoch) = self.registry.current().map(|s| s.epoch) {
            self.start_ticker(epoch);
        }
        info!("call resumed");
    }

    /// The single exit path. Releases everything in a fixed order and
    /// settles in `final_state`. A no-op unless the graph accepts `request`
    /// from the current state.
    fn teardown(&mut self, request: CallRequest, final_state: FinalState) {
        let Some(disconnecting) = CallGraph::transition(self.view.state, request) else {
            debug!("teardown ignored in {:?}", self.view.state);
            return;
        };
        info!("tearing down call from {:?} to {:?}", self.view.state, final_state);
        self.view.state = disconnecting;

        self.ringtone.stop();

        if let Some(source) = self.broadcast_source.take() {
            source.stop();
        }
        self.broadcast.stop();

        self.stop_live_sources();
        self.output = ActiveOutput::Idle;

        self.stop_ticker();
        let elapsed = self.clock.take();

        self.stop_screen_share();

        if let Some(stream) = self.input_stream.take() {
            stream.stop();
        }
        if let Some(capture) = self.capture.take() {
            capture.disconnect();
        }
        if let Some(playback) = self.playback.take() {
            playback.disconnect();
        }

        if let TransportSlot::Open(session) = std::mem::replace(&mut self.transport, TransportSlot::Closed) {
            session.close();
        }
        self.registry.cancel_current();
        self.pending = None;

        if self.call_mode.produces_transcript() {
            if let Some(callback) = self.on_call_end.as_mut() {
                callback(FinalTranscript {
                    original: self.view.polished_original_transcript.clone(),
                    interpretation: self.view.english_interpretation.clone(),
                    speaker_names: self.speaker_names.clone(),
                });
            }
        }

        let seconds = elapsed.as_secs();
        if seconds > 0 {
            self.collaborators.history.record(CallRecord::outgoing(Utc::now(), seconds));
            if self.config.report_usage {
                if let Some(usage) = &self.collaborators.usage {
                    usage.report_usage(seconds);
                }
            }
            info!("call lasted {}s", seconds);
        }

        self.view.reset_session();
        self.last_loud = None;
        self.call_mode = self.profile.mode;
        self.view.mode = self.profile.mode;
        self.view.state = CallGraph::transition(disconnecting, CallRequest::TeardownComplete(final_state))
            .unwrap_or_else(|| final_state.into());
    }

    // ---- output ----

    fn output_gain(&self) -> f32 {
        if self.view.is_speaker_on {
            self.view.output_volume
        } else {
            0.0
        }
    }

    fn apply_output_gain(&self) {
        if let Some(playback) = &self.playback {
            playback.gain().set_value(self.output_gain());
        }
    }

    fn enqueue_live_audio(&mut self, data: &str) {
        if self.output == ActiveOutput::Broadcast {
            debug!("dropping live audio while a broadcast owns the output");
            return;
        }
        let Some(epoch) = self.registry.current().map(|s| s.epoch) else {
            return;
        };
        let rate = self.config.audio.output_sample_rate;
        let channels = self.config.audio.channels;
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        let buffer = match decode(data).and_then(|bytes| decode_audio_data(&bytes, rate, channels)) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("dropping undecodable live audio: {}", e);
                return;
            }
        };

        let tx = self.internal_tx.clone();
        let source = playback.enqueue(buffer, move |id, _| {
            let _ = tx.send(Internal::LiveSourceEnded(epoch, id));
        });
        self.live_sources.insert(source.id(), source);
        self.output = ActiveOutput::LiveTurn;
        self.view.is_ai_speaking = true;
    }

    fn stop_live_sources(&mut self) {
        for (_, source) in self.live_sources.drain() {
            source.stop();
        }
        if let Some(playback) = self.playback.as_mut() {
            playback.reset_queue();
        }
        if self.output == ActiveOutput::LiveTurn {
            self.output = ActiveOutput::Idle;
            self.view.is_ai_speaking = false;
        }
    }

    fn play_next_segment(&mut self, epoch: CallEpoch) {
        let rate = self.config.audio.output_sample_rate;
        let channels = self.config.audio.channels;
        let silence = self.config.silent_segment();
        if self.playback.is_none() {
            return;
        }

        match self.broadcast.next_action(rate, channels, silence) {
            SegmentAction::Play { cursor, speaker_id, buffer } => {
                let Some(playback) = self.playback.as_mut() else {
                    return;
                };
                debug!("broadcast segment {} by {}", cursor, speaker_id);
                let tx = self.internal_tx.clone();
                let source = playback.start(buffer, move |_, end| {
                    let _ = tx.send(Internal::SegmentEnded(epoch, cursor, end));
                });
                self.broadcast_source = Some(source);
                self.view.speaking_persona = Some(speaker_id);
                self.view.broadcast_index = cursor;
                self.view.is_ai_speaking = true;
            }
            SegmentAction::Finished => {
                info!("broadcast finished");
                self.teardown(CallRequest::End, FinalState::Standby);
            }
            SegmentAction::Idle => {}
        }
    }

    fn on_segment_ended(&mut self, epoch: CallEpoch, cursor: usize, end: PlaybackEnd) {
        if !self.registry.is_current(epoch) {
            return;
        }
        match end {
            // Only teardown stops a segment; it must not advance the cursor.
            PlaybackEnd::Stopped => return,
            PlaybackEnd::Failed(e) => warn!("broadcast segment {} failed to play: {}", cursor, e),
            PlaybackEnd::Completed => {}
        }
        if self.broadcast.segment_finished(cursor) {
            self.broadcast_source = None;
            self.view.broadcast_index = self.broadcast.cursor();
            self.view.is_ai_speaking = false;
            self.play_next_segment(epoch);
        }
    }

    // ---- input ----

    fn send_input(&mut self, input: RealtimeInput) {
        match &mut self.transport {
            TransportSlot::Closed => debug!("no live session; dropping input"),
            TransportSlot::Opening { queued } => queued.push(input),
            TransportSlot::Open(session) => {
                if let Err(e) = session.send_realtime_input(input) {
                    warn!("live session rejected input: {}", e);
                }
            }
        }
    }

    fn detect_speaking(&mut self, level: f32) {
        let now = Instant::now();
        if level > self.config.speaking_threshold {
            self.last_loud = Some(now);
            self.view.is_user_speaking = true;
        } else if let Some(last) = self.last_loud {
            if now.duration_since(last) >= self.config.speaking_timeout() {
                self.last_loud = None;
                self.view.is_user_speaking = false;
            }
        }
    }

    fn refresh_ai_volume(&mut self) {
        self.view.ai_volume = self.playback.as_ref().map(|p| p.analyser().level()).unwrap_or(0.0);
    }

    fn suspend_graphs(&self, suspend: bool) {
        let contexts = self
            .capture
            .iter()
            .map(|c| c.context())
            .chain(self.playback.iter().map(|p| p.context()));
        for context in contexts {
            if suspend {
                context.suspend();
            } else {
                context.resume();
            }
        }
    }

    // ---- screen share ----

    fn start_screen_share(&mut self) {
        if !matches!(self.screen, ScreenShare::Off) {
            return;
        }
        if !self.view.state.is_active() {
            debug!("screen share requires an active call");
            return;
        }
        self.next_share_id += 1;
        let id = self.next_share_id;
        self.screen = ScreenShare::Starting(id);

        let media = self.collaborators.media.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = media.get_display_media().await;
            if let Err(mpsc::error::SendError(Internal::ScreenShareAcquired(_, Ok(stream)))) =
                tx.send(Internal::ScreenShareAcquired(id, result))
            {
                stream.stop();
            }
        });
    }

    fn on_screen_share_acquired(&mut self, id: u64, result: Result<DisplayStream, MediaError>) {
        if !matches!(self.screen, ScreenShare::Starting(current) if current == id) {
            if let Ok(stream) = result {
                stream.stop();
            }
            return;
        }
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("screen share failed: {}", e);
                self.screen = ScreenShare::Off;
                self.notify(Notice::Info("Could not start screen sharing.".into()));
                return;
            }
        };
        let Some(scope) = self.registry.current().cloned() else {
            stream.stop();
            self.screen = ScreenShare::Off;
            return;
        };

        let frames = self.internal_tx.clone();
        let ended = self.internal_tx.clone();
        let capture = ScreenCapture::start(
            stream,
            self.config.frame_interval(),
            self.config.jpeg_quality,
            scope.child(),
            move |blob: Blob| {
                let _ = frames.send(Internal::ScreenFrame(id, blob));
            },
            move || {
                let _ = ended.send(Internal::ScreenShareEnded(id));
            },
        );
        self.screen = ScreenShare::On { id, capture };
        self.view.is_screen_sharing = true;
        self.notify(Notice::Info("Screen sharing started.".into()));
    }

    fn stop_screen_share(&mut self) {
        match std::mem::replace(&mut self.screen, ScreenShare::Off) {
            ScreenShare::Off | ScreenShare::Starting(_) => {}
            ScreenShare::On { capture, .. } => {
                capture.stop();
                self.view.is_screen_sharing = false;
                self.notify(Notice::Info("Screen sharing stopped.".into()));
            }
        }
    }

    // ---- timers ----

    fn start_ticker(&mut self, epoch: CallEpoch) {
        self.stop_ticker();
        let Some(scope) = self.registry.current() else {
            return;
        };
        let cancel = scope.child();
        let tx = self.internal_tx.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(Internal::DurationTick(epoch)).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.ticker = Some(cancel);
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }

    // ---- publishing ----

    fn notify(&self, notice: Notice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn held_resources(&self) -> HeldResources {
        HeldResources {
            transport: self.transport.is_present(),
            input_stream: self.input_stream.is_some(),
            capture_graph: self.capture.is_some(),
            playback_graph: self.playback.is_some(),
            screen_stream: matches!(self.screen, ScreenShare::On { .. }),
            broadcast_source: self.broadcast_source.is_some(),
            live_sources: self.live_sources.len(),
            duration_timer: self.ticker.is_some(),
            ringtone: self.ringtone.is_ringing(),
        }
    }

    fn publish(&mut self) {
        self.view.resources = self.held_resources();
        let next = &self.view;
        self.snapshot_tx.send_if_modified(|current| {
            if current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
    }
}

/// Cloneable handle to the session actor. Every operation resolves once the
/// actor has applied it and published the resulting snapshot.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<Request>,
    snapshot: watch::Receiver<CallSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl CallHandle {
    async fn send(&self, command: Command) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Request { command, ack }).is_err() {
            debug!("call session manager is gone");
            return;
        }
        let _ = done.await;
    }

    pub async fn start_call(&self, args: StartCall) {
        self.send(Command::StartCall(args)).await
    }

    /// Starts a transcribing call in meeting mode.
    pub async fn start_meeting(&self, language: &str, interpretation: bool) {
        let mut instruction = format!("You are in Meeting Mode. The primary language is {}. ", language);
        if interpretation {
            instruction.push_str("Provide live English interpretation. ");
        }
        instruction.push_str("Your task is to transcribe the conversation accurately.");
        self.start_call(StartCall::live().with_instruction(instruction).with_mode(SessionMode::Meeting))
            .await
    }

    pub async fn pause_call(&self) {
        self.send(Command::PauseCall).await
    }

    pub async fn resume_call(&self) {
        self.send(Command::ResumeCall).await
    }

    /// Safe from any state; repeated calls are no-ops.
    pub async fn end_call(&self, final_state: FinalState) {
        self.send(Command::EndCall(final_state)).await
    }

    /// Dropped silently if no live session is open.
    pub async fn send_image(&self, base64: impl Into<String>, mime_type: impl Into<String>) {
        let blob = Blob { data: base64.into(), mime_type: mime_type.into() };
        self.send(Command::SendImage(blob)).await
    }

    pub async fn send_text_to_live_session(&self, text: impl Into<String>) {
        self.send(Command::SendText(text.into())).await
    }

    pub async fn start_screen_share(&self) {
        self.send(Command::StartScreenShare).await
    }

    pub async fn stop_screen_share(&self) {
        self.send(Command::StopScreenShare).await
    }

    pub async fn toggle_mute(&self) {
        self.send(Command::ToggleMute).await
    }

    pub async fn toggle_speaker(&self) {
        self.send(Command::ToggleSpeaker).await
    }

    pub async fn toggle_camera(&self) {
        self.send(Command::ToggleCamera).await
    }

    pub async fn set_output_volume(&self, volume: f32) {
        self.send(Command::SetOutputVolume(volume)).await
    }

    /// Applies to the next call if one is in progress.
    pub async fn set_mode(&self, mode: SessionMode) {
        self.send(Command::SetMode(mode)).await
    }

    pub async fn set_speaker_name(&self, speaker: impl Into<String>, name: impl Into<String>) {
        self.send(Command::SetSpeakerName { speaker: speaker.into(), name: name.into() }).await
    }

    pub async fn set_on_call_end<F>(&self, callback: F)
    where
        F: FnMut(FinalTranscript) + Send + 'static,
    {
        self.send(Command::SetOnCallEnd(Box::new(callback))).await
    }

    /// Ends any call and stops the actor.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown).await
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Waits until a published snapshot satisfies `predicate`. Returns the
    /// last snapshot if the actor stops first.
    pub async fn wait_for<F>(&self, predicate: F) -> CallSnapshot
    where
        F: Fn(&CallSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let result = rx.wait_for(|snapshot| predicate(snapshot)).await.map(|s| s.clone());
        match result {
            Ok(snapshot) => snapshot,
            Err(_) => rx.borrow().clone(),
        }
    }
}
