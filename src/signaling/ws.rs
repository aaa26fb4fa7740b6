use crate::error::SignalingError;
use crate::session::EventSink;
use crate::signaling::{decode, encode, Envelope, SignalingConnector, SignalingTransport, TransportEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// Период ping-кадров; должен быть меньше таймаута чтения на стороне relay (60 с)
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);

/// WebSocket клиент до relay
#[derive(Debug, Clone)]
pub struct WsConnector {
    ping_period: Duration,
}

impl WsConnector {
    pub fn new(ping_period: Duration) -> Self {
        Self { ping_period }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_PING_PERIOD)
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(
        &self,
        address: &str,
        events: EventSink,
    ) -> Result<Arc<dyn SignalingTransport>, SignalingError> {
        info!(%address, "Connecting to signaling relay");
        let (stream, _response) = connect_async(address).await?;
        info!(%address, "WebSocket connected");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        // Opened must be queued before anything the reader delivers
        events.emit_transport(TransportEvent::Opened);

        let ping_period = self.ping_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(msg) = outgoing else { break };
                        let closing = matches!(msg, Message::Close(_));
                        if let Err(e) = sink.send(msg).await {
                            warn!(error = %e, "Signaling write failed");
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                            warn!(error = %e, "Signaling ping failed");
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
            debug!("Signaling writer stopped");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match decode(text.as_str()) {
                        Ok(envelope) => {
                            debug!(kind = %envelope.kind(), "Envelope received");
                            if !events.emit_transport(TransportEvent::Message(envelope)) {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Skipping malformed envelope"),
                    },
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Relay closed the signaling channel");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Signaling read failed");
                        break;
                    }
                }
            }
            events.emit_transport(TransportEvent::Closed);
        });

        Ok(Arc::new(WsTransport {
            out_tx,
            closed: AtomicBool::new(false),
            reader: reader.abort_handle(),
        }))
    }
}

struct WsTransport {
    out_tx: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
    reader: AbortHandle,
}

#[async_trait]
impl SignalingTransport for WsTransport {
    async fn send(&self, envelope: &Envelope) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SignalingError::Closed);
        }
        let text = encode(envelope)?;
        self.out_tx
            .send(Message::text(text))
            .map_err(|_| SignalingError::Closed)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // local close is not a lost channel, so the reader must not report Closed
        self.reader.abort();
        let _ = self.out_tx.send(Message::Close(None));
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
