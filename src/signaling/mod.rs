pub mod envelope;
pub mod ws;

pub use envelope::{decode, encode, Envelope, EnvelopeKind};

use crate::error::SignalingError;
use crate::peer::types::SessionId;
use crate::session::EventSink;
use async_trait::async_trait;
use std::sync::Arc;

/// События сигнального канала
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(Envelope),
    Closed,
}

/// Открытый канал до relay. Каждое `send` уходит одним целым сообщением.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<(), SignalingError>;

    /// Idempotent.
    async fn close(&self);
}

/// Фабрика каналов: `connect(address) -> channel`.
///
/// The connector reports `Opened`, every inbound envelope and `Closed` through `events`.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        events: EventSink,
    ) -> Result<Arc<dyn SignalingTransport>, SignalingError>;
}

/// `<relay>/ws/<session id>`, the id is used verbatim
pub fn relay_address(relay: &str, session_id: &SessionId) -> String {
    format!("{}/ws/{}", relay.trim_end_matches('/'), session_id)
}
