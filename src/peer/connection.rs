use crate::error::MediaSessionError;
use crate::logger::dump_selected_pair;
use crate::peer::media::{MediaSession, MediaSessionFactory, SessionEvent};
use crate::peer::types::{
    ConnectionState, IceCandidate, RemoteStream, SdpType, ServerConfig, SessionDescription,
    SignalingState,
};
use crate::session::EventSink;
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Создаёт peer connection на `webrtc` для каждого звонка
#[derive(Debug, Clone)]
pub struct WebrtcSessionFactory {
    ice_servers: Vec<ServerConfig>,
}

impl WebrtcSessionFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl MediaSessionFactory for WebrtcSessionFactory {
    async fn create(&self, events: EventSink) -> Result<Arc<dyn MediaSession>, MediaSessionError> {
        let pc = new_peer(&self.ice_servers, events).await?;
        Ok(Arc::new(WebrtcSession {
            pc,
            closed: AtomicBool::new(false),
        }))
    }
}

/// создаём Peer и регистрируем все обработчики; дальше он общается с драйвером только через `events`
async fn new_peer(
    servers: &[ServerConfig],
    events: EventSink,
) -> Result<Arc<RTCPeerConnection>, MediaSessionError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);
    debug!(epoch = events.epoch(), "Peer connection created");

    let sink = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        sink.emit_session(SessionEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let candidate = match cand {
            Some(c) => match c.to_json() {
                Ok(init) => Some(IceCandidate::from(init)),
                Err(e) => {
                    warn!(error = %e, "Failed to serialize local candidate");
                    return Box::pin(async {});
                }
            },
            // конец сбора
            None => None,
        };
        sink.emit_session(SessionEvent::IceCandidate(candidate));
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_signaling_state_change(Box::new(move |st: RTCSignalingState| {
        sink.emit_session(SessionEvent::SignalingStateChange(st.into()));
        Box::pin(async {})
    }));

    // Weak: the handler lives inside the connection it inspects
    let weak_pc = Arc::downgrade(&pc);
    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(state = ?st, "Peer connection state changed");
        if matches!(
            st,
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
        ) {
            if let Some(pc) = weak_pc.upgrade() {
                let moment = format!("{st:?}").to_uppercase();
                tokio::spawn(async move {
                    dump_selected_pair(&pc, &moment).await;
                });
            }
        }
        sink.emit_session(SessionEvent::ConnectionStateChange(ConnectionState::from(st)));
        Box::pin(async {})
    }));

    let sink = events;
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
        let mut stream = RemoteStream::new(track.stream_id(), track.id(), &track.kind().to_string());
        stream.track = Some(track);
        sink.emit_session(SessionEvent::Track(stream));
        Box::pin(async {})
    }));

    Ok(pc)
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

struct WebrtcSession {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl WebrtcSession {
    fn ensure_open(&self) -> Result<(), MediaSessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MediaSessionError::Closed);
        }
        Ok(())
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, MediaSessionError> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(MediaSessionError::InvalidState(
                "rollback is not a description to apply".into(),
            ))
        }
    };
    Ok(rtc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, MediaSessionError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(MediaSessionError::Failed("description without a type".into()))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl MediaSession for WebrtcSession {
    async fn create_offer(&self) -> Result<SessionDescription, MediaSessionError> {
        self.ensure_open()?;
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaSessionError> {
        self.ensure_open()?;
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaSessionError> {
        self.ensure_open()?;
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaSessionError> {
        self.ensure_open()?;
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), MediaSessionError> {
        self.ensure_open()?;
        let Some(pending) = self.pc.pending_local_description().await else {
            debug!("Nothing to roll back");
            return Ok(());
        };
        // the public constructors cannot build a rollback; it still has to carry a parsable sdp
        let rollback: RTCSessionDescription = serde_json::from_value(serde_json::json!({
            "type": "rollback",
            "sdp": pending.sdp,
        }))
        .map_err(|e| MediaSessionError::Failed(e.to_string()))?;
        self.pc.set_local_description(rollback).await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), MediaSessionError> {
        self.ensure_open()?;
        // ErrNoRemoteDescription maps to InvalidState
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<(), MediaSessionError> {
        self.ensure_open()?;
        let sender = self.pc.add_track(track).await?;
        // RTCP has to be read for the interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
            debug!("RTCP reader stopped");
        });
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        if self.closed.load(Ordering::Acquire) {
            return SignalingState::Closed;
        }
        self.pc.signaling_state().into()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing peer connection");
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Peer connection close failed");
        }
    }
}
