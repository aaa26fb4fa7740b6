//! Драйвер звонка.
//!
//! One task owns the [`Coordinator`] and drains a single queue fed by user commands, the media
//! session, the signaling channel and deferred re-checks. Effects returned by the coordinator are
//! executed here; the outcome of each operation goes to a local backlog that is fully processed
//! before the next queued event is taken. Every event produced by a collaborator is tagged with
//! the epoch of the call it belongs to and dropped once that call is gone.

use crate::error::CallError;
use crate::peer::media::{MediaSession, MediaSessionFactory, MediaSource, SessionEvent};
use crate::peer::negotiation::{CallEvent, Coordinator, Effect, Operation, Outcome};
use crate::peer::types::{SessionHandle, SessionId};
use crate::signaling::{relay_address, Envelope, SignalingConnector, SignalingTransport, TransportEvent};
use crate::view::CallView;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub(crate) enum Command {
    Start(oneshot::Sender<Result<(), CallError>>),
    Hangup(oneshot::Sender<()>),
    Barrier(oneshot::Sender<()>),
}

pub(crate) enum Inbound {
    Command(Command),
    Session { epoch: u64, event: SessionEvent },
    Transport { epoch: u64, event: TransportEvent },
    Deferred { epoch: u64, event: CallEvent },
}

/// Канал, через который коллабораторы одного звонка сообщают о событиях.
///
/// The `emit_*` methods return `false` once the driver is gone.
#[derive(Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn emit_session(&self, event: SessionEvent) -> bool {
        self.tx
            .send(Inbound::Session {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }

    pub fn emit_transport(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Inbound::Transport {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").field("epoch", &self.epoch).finish()
    }
}

/// Внешние зависимости звонка
pub struct Collaborators {
    pub source: Arc<dyn MediaSource>,
    pub factory: Arc<dyn MediaSessionFactory>,
    pub connector: Arc<dyn SignalingConnector>,
    pub view: Arc<dyn CallView>,
}

/// Управление звонком из слоя представления
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl CallHandle {
    /// Acquires media, creates the media session and connects to the relay. Starting while a call
    /// is active does nothing.
    pub async fn start_call(&self) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Start(reply))?;
        rx.await.map_err(|_| CallError::Stopped)?
    }

    /// Safe in any state, including with no call.
    pub async fn hangup_call(&self) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Hangup(reply))?;
        rx.await.map_err(|_| CallError::Stopped)
    }

    /// Resolves once everything queued before it, including re-checks those events scheduled, has
    /// been handled.
    pub async fn barrier(&self) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Barrier(reply))?;
        rx.await.map_err(|_| CallError::Stopped)
    }

    fn command(&self, command: Command) -> Result<(), CallError> {
        self.tx
            .send(Inbound::Command(command))
            .map_err(|_| CallError::Stopped)
    }
}

struct ActiveCall {
    epoch: u64,
    session: Arc<dyn MediaSession>,
    transport: Option<Arc<dyn SignalingTransport>>,
}

pub struct CallSession {
    coordinator: Coordinator,
    parts: Collaborators,
    relay: String,
    epoch: u64,
    active: Option<ActiveCall>,
    backlog: VecDeque<CallEvent>,
    deferred: usize,
    tx: mpsc::WeakUnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl CallSession {
    /// Spawns the driver task. It stops once every [`CallHandle`] and [`EventSink`] is dropped.
    pub fn spawn(session_id: SessionId, relay: impl Into<String>, parts: Collaborators) -> CallHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = CallSession {
            coordinator: Coordinator::new(session_id),
            parts,
            relay: relay.into(),
            epoch: 0,
            active: None,
            backlog: VecDeque::new(),
            deferred: 0,
            tx: tx.downgrade(),
            rx,
        };
        tokio::spawn(driver.run());
        CallHandle { tx }
    }

    async fn run(mut self) {
        while let Some(inbound) = self.rx.recv().await {
            match inbound {
                Inbound::Command(command) => self.on_command(command).await,
                Inbound::Session { epoch, event } => {
                    if let Some(event) = self.translate_session(epoch, event) {
                        self.dispatch(event).await;
                    }
                }
                Inbound::Transport { epoch, event } => {
                    if !self.is_live(epoch) {
                        debug!(epoch, ?event, "Dropping signaling event of a finished call");
                        continue;
                    }
                    let event = match event {
                        TransportEvent::Opened => CallEvent::TransportOpened,
                        TransportEvent::Message(envelope) => CallEvent::Remote(envelope),
                        TransportEvent::Closed => CallEvent::TransportClosed,
                    };
                    self.dispatch(event).await;
                }
                Inbound::Deferred { epoch, event } => {
                    self.deferred = self.deferred.saturating_sub(1);
                    if self.is_live(epoch) {
                        self.dispatch(event).await;
                    }
                }
            }
        }

        if let Some(call) = self.active.take() {
            call.session.close().await;
            if let Some(transport) = call.transport {
                transport.close().await;
            }
        }
        debug!("Call driver stopped");
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.active.as_ref().is_some_and(|call| call.epoch == epoch)
    }

    fn sink(&self, epoch: u64) -> Option<EventSink> {
        self.tx.upgrade().map(|tx| EventSink { epoch, tx })
    }

    fn translate_session(&self, epoch: u64, event: SessionEvent) -> Option<CallEvent> {
        let Some(call) = self.active.as_ref().filter(|call| call.epoch == epoch) else {
            debug!(epoch, ?event, "Dropping media event of a finished call");
            return None;
        };
        let event = match event {
            SessionEvent::NegotiationNeeded => CallEvent::NegotiationNeeded,
            SessionEvent::IceCandidate(candidate) => CallEvent::LocalCandidate(candidate),
            // the notification may be older than operations already applied; read the current state
            SessionEvent::SignalingStateChange(_) => {
                CallEvent::SignalingStateChanged(call.session.signaling_state())
            }
            SessionEvent::ConnectionStateChange(state) => CallEvent::ConnectionStateChanged(state),
            SessionEvent::Track(stream) => CallEvent::RemoteTrack(stream),
        };
        Some(event)
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start_call().await;
                if let Err(e) = &result {
                    error!(error = %e, "Failed to start call");
                }
                let _ = reply.send(result);
            }
            Command::Hangup(reply) => {
                self.dispatch(CallEvent::Hangup).await;
                let _ = reply.send(());
            }
            Command::Barrier(reply) => {
                // wait for re-checks scheduled by earlier events
                match self.tx.upgrade() {
                    Some(tx) if self.deferred > 0 => {
                        let _ = tx.send(Inbound::Command(Command::Barrier(reply)));
                    }
                    _ => {
                        let _ = reply.send(());
                    }
                }
            }
        }
    }

    async fn start_call(&mut self) -> Result<(), CallError> {
        if let Some(call) = &self.active {
            warn!(epoch = call.epoch, "Call already active, ignoring start");
            return Ok(());
        }

        let media = self.parts.source.acquire().await?;

        self.epoch += 1;
        let epoch = self.epoch;
        let sink = self.sink(epoch).ok_or(CallError::Stopped)?;
        let session = self.parts.factory.create(sink).await?;
        for track in &media.tracks {
            if let Err(e) = session.add_track(Arc::clone(track)).await {
                session.close().await;
                return Err(e.into());
            }
        }

        self.parts.view.set_local_stream(Some(media));
        self.active = Some(ActiveCall {
            epoch,
            session,
            transport: None,
        });
        self.dispatch(CallEvent::SessionStarted(SessionHandle { epoch }))
            .await;

        let address = relay_address(&self.relay, self.coordinator.state().session_id());
        let sink = self.sink(epoch).ok_or(CallError::Stopped)?;
        match self.parts.connector.connect(&address, sink).await {
            Ok(transport) => {
                if let Some(call) = self.active.as_mut() {
                    call.transport = Some(transport);
                }
                info!(%address, epoch, "Call started");
                Ok(())
            }
            Err(e) => {
                self.dispatch(CallEvent::Hangup).await;
                Err(e.into())
            }
        }
    }

    async fn dispatch(&mut self, event: CallEvent) {
        self.backlog.push_back(event);
        while let Some(event) = self.backlog.pop_front() {
            for effect in self.coordinator.handle(event) {
                self.execute(effect).await;
            }
        }
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Send(envelope) => self.send(envelope).await,
            Effect::ScheduleStableCheck => {
                if let Some(tx) = self.tx.upgrade() {
                    let epoch = self.epoch;
                    if tx
                        .send(Inbound::Deferred {
                            epoch,
                            event: CallEvent::StableCheck,
                        })
                        .is_ok()
                    {
                        self.deferred += 1;
                    }
                }
            }
            Effect::AttachRemoteStream(stream) => self.parts.view.set_remote_stream(Some(stream)),
            Effect::ClearSinks => {
                self.parts.view.set_local_stream(None);
                self.parts.view.set_remote_stream(None);
            }
            Effect::ReportStatus(status) => self.parts.view.on_status(status),
            Effect::CloseSession => {
                if let Some(call) = self.active.take() {
                    call.session.close().await;
                    if let Some(transport) = call.transport {
                        transport.close().await;
                    }
                    info!(epoch = call.epoch, "Call torn down");
                }
            }
            operation => self.run_operation(operation).await,
        }
    }

    /// Runs one media session operation and queues its outcome. Description changes are followed by
    /// the resulting signaling state.
    async fn run_operation(&mut self, effect: Effect) {
        let Some(session) = self.active.as_ref().map(|call| Arc::clone(&call.session)) else {
            debug!(?effect, "No media session, skipping operation");
            return;
        };

        let (result, op, changes_state) = match effect {
            Effect::CreateOffer => (
                session.create_offer().await.map(Outcome::OfferCreated),
                Operation::CreateOffer,
                false,
            ),
            Effect::CreateAnswer => (
                session.create_answer().await.map(Outcome::AnswerCreated),
                Operation::CreateAnswer,
                false,
            ),
            Effect::SetLocalDescription(desc) => {
                let op = Operation::SetLocalDescription(desc.sdp_type);
                let result = session
                    .set_local_description(desc.clone())
                    .await
                    .map(|()| Outcome::LocalDescriptionApplied(desc));
                (result, op, true)
            }
            Effect::SetRemoteDescription(desc) => {
                let sdp_type = desc.sdp_type;
                let result = session
                    .set_remote_description(desc)
                    .await
                    .map(|()| Outcome::RemoteDescriptionApplied(sdp_type));
                (result, Operation::SetRemoteDescription(sdp_type), true)
            }
            Effect::Rollback => (
                session.rollback().await.map(|()| Outcome::RolledBack),
                Operation::Rollback,
                true,
            ),
            Effect::AddCandidate(candidate) => (
                session
                    .add_candidate(candidate.clone())
                    .await
                    .map(|()| Outcome::CandidateApplied),
                Operation::AddCandidate(candidate),
                false,
            ),
            other => {
                warn!(effect = ?other, "Not a media session operation");
                return;
            }
        };

        self.backlog.push_back(match result {
            Ok(outcome) => CallEvent::Completed(outcome),
            Err(error) => CallEvent::Failed { op, error },
        });
        if changes_state {
            self.backlog
                .push_back(CallEvent::SignalingStateChanged(session.signaling_state()));
        }
    }

    async fn send(&self, envelope: Envelope) {
        let kind = envelope.kind();
        let signaling = self.coordinator.state().signaling_state();
        let Some(transport) = self.active.as_ref().and_then(|call| call.transport.as_ref()) else {
            warn!(%kind, ?signaling, "Signaling channel not connected, dropping envelope");
            return;
        };
        match transport.send(&envelope).await {
            Ok(()) => debug!(%kind, "Envelope sent"),
            Err(e) => warn!(%kind, ?signaling, error = %e, "Failed to send envelope"),
        }
    }
}
