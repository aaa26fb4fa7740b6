use crate::error::{CallError, MediaSessionError};
use crate::peer::types::{
    ConnectionState, IceCandidate, LocalMedia, RemoteStream, SessionDescription, SignalingState,
};
use crate::session::EventSink;
use crate::utils::random_id;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// События, которые peer connection отдаёт наружу
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    NegotiationNeeded,
    /// `None` marks the end of candidate gathering.
    IceCandidate(Option<IceCandidate>),
    SignalingStateChange(SignalingState),
    ConnectionStateChange(ConnectionState),
    Track(RemoteStream),
}

/// Операции над транспортной сессией, которыми управляет координатор.
///
/// Implementations report their events through the [`EventSink`] handed to
/// [`MediaSessionFactory::create`]; the sink is tagged with the call epoch so that anything arriving
/// after `close` is discarded by the driver.
#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaSessionError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaSessionError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaSessionError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaSessionError>;

    /// Drops an uncommitted local offer, returning to `stable`. A no-op when there is none.
    async fn rollback(&self) -> Result<(), MediaSessionError>;

    /// Fails with [`MediaSessionError::InvalidState`] while no remote description is set.
    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), MediaSessionError>;

    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<(), MediaSessionError>;

    fn signaling_state(&self) -> SignalingState;

    /// Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait MediaSessionFactory: Send + Sync {
    async fn create(&self, events: EventSink) -> Result<Arc<dyn MediaSession>, MediaSessionError>;
}

/// Источник локальных медиа (камера/микрофон)
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Errors are reported as [`CallError::MediaAcquisition`].
    async fn acquire(&self) -> Result<LocalMedia, CallError>;
}

/// Opus + VP8 tracks with nothing capturing into them. Enough to negotiate a real audio/video
/// session without devices.
#[derive(Debug, Clone)]
pub struct SyntheticMediaSource {
    video: bool,
}

impl SyntheticMediaSource {
    pub fn new(video: bool) -> Self {
        Self { video }
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self) -> Result<LocalMedia, CallError> {
        let stream_id = format!("peercall-{}", random_id());

        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = vec![Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            stream_id.clone(),
        ))];

        if self.video {
            tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            )));
        }

        info!(%stream_id, tracks = tracks.len(), "Local media acquired");
        Ok(LocalMedia { stream_id, tracks })
    }
}
