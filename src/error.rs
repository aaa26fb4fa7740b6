use thiserror::Error;

/// Ошибки верхнего уровня звонка
#[derive(Debug, Error)]
pub enum CallError {
    #[error("session id must not be empty")]
    EmptySessionId,

    #[error("local media unavailable: {0}")]
    MediaAcquisition(String),

    #[error("media session: {0}")]
    MediaSession(#[from] MediaSessionError),

    #[error("signaling: {0}")]
    Signaling(#[from] SignalingError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("call driver is no longer running")]
    Stopped,
}

/// Ошибки операций над peer connection.
///
/// `InvalidState` is what the adapter reports when an operation is not allowed in the current
/// signaling state (for example adding a candidate before any remote description exists).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaSessionError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("session is closed")]
    Closed,

    #[error("{0}")]
    Failed(String),
}

impl From<webrtc::Error> for MediaSessionError {
    fn from(err: webrtc::Error) -> Self {
        match err {
            webrtc::Error::ErrConnectionClosed => MediaSessionError::Closed,
            webrtc::Error::ErrNoRemoteDescription => {
                MediaSessionError::InvalidState(err.to_string())
            }
            other => MediaSessionError::Failed(other.to_string()),
        }
    }
}

/// Ошибки сигнального канала и формата конвертов
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown envelope type {0}")]
    UnknownKind(u64),

    #[error("envelope type {kind} carries an invalid payload: {reason}")]
    InvalidPayload { kind: u8, reason: String },

    #[error("signaling channel is closed")]
    Closed,
}
