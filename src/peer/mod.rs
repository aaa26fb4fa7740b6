pub mod connection;
pub mod ice;
pub mod media;
pub mod negotiation;
pub mod state;
pub mod types;

pub use connection::WebrtcSessionFactory;
pub use media::{MediaSession, MediaSessionFactory, MediaSource, SessionEvent, SyntheticMediaSource};
pub use negotiation::{CallEvent, Coordinator, Effect, Operation, Outcome};
pub use state::{OfferPhase, SessionState};
pub use types::{
    CallStatus, ConnectionState, IceCandidate, LocalMedia, RemoteStream, SdpType, ServerConfig,
    SessionDescription, SessionHandle, SessionId, SignalingState,
};
