#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use companion::config::CallConfig;
use companion::error::{MediaError, TransportError};
use companion::kernel::history::{CallHistory, UsageTally};
use companion::media::{DisplayStream, MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind};
use companion::services::loopback::{PacedSink, SolidFrames};
use companion::transport::{LiveSession, OpenRequest, RealtimeInput, Transport, TransportEvent};
use companion::{CallHandle, CallSessionManager, Collaborators, SessionProfile};

/// Media host whose answers the test controls.
#[derive(Default)]
pub struct FakeDevices {
    pub deny_user_media: bool,
    pub deny_display: bool,
    /// When set, `get_user_media` waits for a permit.
    pub gate: Option<Arc<Semaphore>>,
    pub user_media_requests: AtomicUsize,
    pub display_requests: AtomicUsize,
    tracks: Mutex<Vec<MediaTrack>>,
    display_tracks: Mutex<Vec<MediaTrack>>,
    microphones: Mutex<Vec<mpsc::Sender<Vec<f32>>>>,
}

impl FakeDevices {
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Self { gate: Some(gate.clone()), ..Self::default() }, gate)
    }

    pub fn denying() -> Self {
        Self { deny_user_media: true, ..Self::default() }
    }

    pub fn denying_display() -> Self {
        Self { deny_display: true, ..Self::default() }
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks().iter().filter(|t| t.is_live()).count()
    }

    pub fn display_tracks(&self) -> Vec<MediaTrack> {
        self.display_tracks.lock().unwrap().clone()
    }

    /// Feeds samples into the most recently granted microphone.
    pub async fn speak(&self, samples: Vec<f32>) {
        let mic = self.microphones.lock().unwrap().last().cloned();
        if let Some(mic) = mic {
            let _ = mic.send(samples).await;
        }
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        self.user_media_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.deny_user_media {
            return Err(MediaError::PermissionDenied("microphone".into()));
        }
        let mut tracks = vec![MediaTrack::new(TrackKind::Audio, "fake mic")];
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, "fake camera"));
        }
        self.tracks.lock().unwrap().extend(tracks.iter().cloned());

        let (tx, rx) = mpsc::channel(16);
        self.microphones.lock().unwrap().push(tx);
        Ok(MediaStream::new(tracks, Some(rx)))
    }

    async fn get_display_media(&self) -> Result<DisplayStream, MediaError> {
        self.display_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_display {
            return Err(MediaError::PermissionDenied("display".into()));
        }
        let track = MediaTrack::new(TrackKind::Video, "fake display");
        self.display_tracks.lock().unwrap().push(track.clone());
        Ok(DisplayStream::new(track, Box::new(SolidFrames::new(16, 16, [200, 40, 40]))))
    }
}

/// Backend stand-in that records everything the session sends.
#[derive(Default)]
pub struct FakeTransport {
    pub fail_open: bool,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<RealtimeInput>>>,
    requests: Mutex<Vec<OpenRequest>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl FakeTransport {
    pub fn failing() -> Self {
        Self { fail_open: true, ..Self::default() }
    }

    pub fn inputs(&self) -> Vec<RealtimeInput> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.inputs()
            .into_iter()
            .filter_map(|i| match i {
                RealtimeInput::Text(text) => Some(text),
                RealtimeInput::Media(_) => None,
            })
            .collect()
    }

    pub fn media_with_mime(&self, prefix: &str) -> usize {
        self.inputs()
            .iter()
            .filter(|i| matches!(i, RealtimeInput::Media(blob) if blob.mime_type.starts_with(prefix)))
            .count()
    }

    pub fn requests(&self) -> Vec<OpenRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Delivers an event as if the backend had sent it.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(
        &self,
        request: OpenRequest,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn LiveSession>, TransportError> {
        self.requests.lock().unwrap().push(request);
        if self.fail_open {
            return Err(TransportError::Connect("refused".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Opened);
        *self.events.lock().unwrap() = Some(events);
        Ok(Box::new(FakeSession { inputs: self.inputs.clone(), closed: self.closed.clone() }))
    }
}

struct FakeSession {
    inputs: Arc<Mutex<Vec<RealtimeInput>>>,
    closed: Arc<AtomicUsize>,
}

impl LiveSession for FakeSession {
    fn send_realtime_input(&self, input: RealtimeInput) -> Result<(), TransportError> {
        self.inputs.lock().unwrap().push(input);
        Ok(())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub calls: CallHandle,
    pub devices: Arc<FakeDevices>,
    pub transport: Arc<FakeTransport>,
    pub speaker: Arc<PacedSink>,
    pub history: Arc<CallHistory>,
    pub usage: Arc<UsageTally>,
}

pub fn harness(devices: FakeDevices, transport: FakeTransport) -> Harness {
    harness_with(CallConfig::default(), devices, transport)
}

pub fn harness_with(config: CallConfig, devices: FakeDevices, transport: FakeTransport) -> Harness {
    let devices = Arc::new(devices);
    let transport = Arc::new(transport);
    let speaker = Arc::new(PacedSink::new());
    let history = Arc::new(CallHistory::default());
    let usage = Arc::new(UsageTally::new());
    let collaborators = Collaborators {
        media: devices.clone(),
        transport: transport.clone(),
        speaker: speaker.clone(),
        history: history.clone(),
        usage: Some(usage.clone()),
    };
    let (calls, _task) = CallSessionManager::spawn(config, SessionProfile::default(), collaborators);
    Harness { calls, devices, transport, speaker, history, usage }
}

/// Lets spawned tasks and the actor drain their queues.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}
