use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use peercall_lib::peer::{
    CallStatus, IceCandidate, LocalMedia, MediaSession, MediaSessionFactory, MediaSource,
    RemoteStream, SdpType, SessionDescription, SessionEvent, SignalingState, SyntheticMediaSource,
};
use peercall_lib::signaling::{Envelope, SignalingConnector, SignalingTransport, TransportEvent};
use peercall_lib::view::CallView;
use peercall_lib::{CallError, EventSink, MediaSessionError, SignalingError};
use webrtc::track::track_local::TrackLocal;

/// Вызовы, которые фейковая сессия получила от драйвера
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    Rollback,
    AddCandidate(String),
    AddTrack,
    Close,
}

#[allow(dead_code)]
pub struct FakeSession {
    pub events: EventSink,
    pub calls: Mutex<Vec<SessionCall>>,
    state: Mutex<(SignalingState, bool)>,
    negotiation_on_track: bool,
    counter: Mutex<u32>,
}

#[allow(dead_code)]
impl FakeSession {
    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn state(&self) -> SignalingState {
        self.state.lock().unwrap().0
    }

    fn record(&self, call: SessionCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next(&self) -> u32 {
        let mut n = self.counter.lock().unwrap();
        *n += 1;
        *n
    }
}

#[async_trait]
impl MediaSession for FakeSession {
    async fn create_offer(&self) -> Result<SessionDescription, MediaSessionError> {
        self.record(SessionCall::CreateOffer);
        Ok(SessionDescription::offer(format!("v=0 local offer {}", self.next())))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaSessionError> {
        self.record(SessionCall::CreateAnswer);
        Ok(SessionDescription::answer(format!("v=0 local answer {}", self.next())))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaSessionError> {
        self.record(SessionCall::SetLocal(desc.sdp_type));
        let mut state = self.state.lock().unwrap();
        state.0 = match (desc.sdp_type, state.0) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
            (t, s) => return Err(MediaSessionError::InvalidState(format!("set local {t} in {s:?}"))),
        };
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaSessionError> {
        self.record(SessionCall::SetRemote(desc.sdp_type));
        let mut state = self.state.lock().unwrap();
        state.0 = match (desc.sdp_type, state.0) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (t, s) => return Err(MediaSessionError::InvalidState(format!("set remote {t} in {s:?}"))),
        };
        state.1 = true;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), MediaSessionError> {
        self.record(SessionCall::Rollback);
        let mut state = self.state.lock().unwrap();
        if state.0 == SignalingState::HaveLocalOffer {
            state.0 = SignalingState::Stable;
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), MediaSessionError> {
        if !self.state.lock().unwrap().1 {
            return Err(MediaSessionError::InvalidState("remote description is not set".into()));
        }
        self.record(SessionCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, _track: Arc<dyn TrackLocal + Send + Sync>) -> Result<(), MediaSessionError> {
        self.record(SessionCall::AddTrack);
        if self.negotiation_on_track {
            self.events.emit_session(SessionEvent::NegotiationNeeded);
        }
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state()
    }

    async fn close(&self) {
        self.record(SessionCall::Close);
        self.state.lock().unwrap().0 = SignalingState::Closed;
    }
}

#[allow(dead_code)]
#[derive(Default)]
pub struct FakeFactory {
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
    /// Fire negotiation-needed from `add_track`, like a real peer connection.
    pub negotiation_on_track: bool,
}

#[allow(dead_code)]
impl FakeFactory {
    pub fn offering() -> Arc<Self> {
        Arc::new(Self {
            negotiation_on_track: true,
            ..Default::default()
        })
    }

    pub fn quiet() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }
}

#[async_trait]
impl MediaSessionFactory for FakeFactory {
    async fn create(&self, events: EventSink) -> Result<Arc<dyn MediaSession>, MediaSessionError> {
        let session = Arc::new(FakeSession {
            events,
            calls: Mutex::new(Vec::new()),
            state: Mutex::new((SignalingState::Stable, false)),
            negotiation_on_track: self.negotiation_on_track,
            counter: Mutex::new(0),
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

#[allow(dead_code)]
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<Envelope>>,
    pub closed: AtomicBool,
}

#[async_trait]
impl SignalingTransport for FakeTransport {
    async fn send(&self, envelope: &Envelope) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Relay stand-in: hands out [`FakeTransport`]s and lets the test play the remote peer.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeConnector {
    pub addresses: Mutex<Vec<String>>,
    pub transports: Mutex<Vec<Arc<FakeTransport>>>,
    sinks: Mutex<Vec<EventSink>>,
    pub refuse: bool,
}

#[allow(dead_code)]
impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            refuse: true,
            ..Default::default()
        })
    }

    /// Envelopes sent on the most recent connection.
    pub fn sent(&self) -> Vec<Envelope> {
        self.transports
            .lock()
            .unwrap()
            .last()
            .map(|t| t.sent.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        Arc::clone(&self.transports.lock().unwrap()[index])
    }

    /// Delivers an envelope from the remote peer on the most recent connection.
    pub fn deliver(&self, envelope: Envelope) {
        self.emit(TransportEvent::Message(envelope));
    }

    pub fn emit(&self, event: TransportEvent) {
        let sinks = self.sinks.lock().unwrap();
        let sink = sinks.last().expect("no connection yet");
        sink.emit_transport(event);
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn connect(
        &self,
        address: &str,
        events: EventSink,
    ) -> Result<Arc<dyn SignalingTransport>, SignalingError> {
        self.addresses.lock().unwrap().push(address.to_string());
        if self.refuse {
            return Err(SignalingError::Closed);
        }
        events.emit_transport(TransportEvent::Opened);
        let transport = Arc::new(FakeTransport::default());
        self.transports.lock().unwrap().push(Arc::clone(&transport));
        self.sinks.lock().unwrap().push(events);
        Ok(transport)
    }
}

/// Что пришло в слой представления
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum ViewCall {
    Local(Option<String>),
    Remote(Option<String>),
    Status(CallStatus),
}

#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingView {
    pub calls: Mutex<Vec<ViewCall>>,
}

#[allow(dead_code)]
impl RecordingView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ViewCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl CallView for RecordingView {
    fn set_local_stream(&self, stream: Option<LocalMedia>) {
        self.calls
            .lock()
            .unwrap()
            .push(ViewCall::Local(stream.map(|s| s.stream_id)));
    }

    fn set_remote_stream(&self, stream: Option<RemoteStream>) {
        self.calls
            .lock()
            .unwrap()
            .push(ViewCall::Remote(stream.map(|s| s.stream_id)));
    }

    fn on_status(&self, status: CallStatus) {
        self.calls.lock().unwrap().push(ViewCall::Status(status));
    }
}

/// Camera/microphone denied.
#[allow(dead_code)]
pub struct DeniedSource;

#[async_trait]
impl MediaSource for DeniedSource {
    async fn acquire(&self) -> Result<LocalMedia, CallError> {
        Err(CallError::MediaAcquisition("permission denied".into()))
    }
}

#[allow(dead_code)]
pub fn audio_only() -> Arc<dyn MediaSource> {
    Arc::new(SyntheticMediaSource::new(false))
}
