//! Координатор переговоров.
//!
//! A pure state machine: [`Coordinator::handle`] takes one [`CallEvent`] and returns the
//! [`Effect`]s to perform, in order. It never touches the peer connection, the relay or the UI
//! itself; the call driver in `session.rs` executes the effects and feeds their outcomes back as
//! events.
//!
//! Local offers are only created from the stable handler (a real transition to `stable`, or the
//! deferred re-check scheduled when negotiation is needed while already stable), or in reply to a
//! remote `OfferRequest`. Remote offers always win: a local offer in progress is rolled back or
//! discarded. Remote candidates are buffered until a remote description exists.

use crate::error::MediaSessionError;
use crate::logger::dump_candidate;
use crate::peer::ice::analyze_candidates;
use crate::peer::state::{GlareRecord, OfferPhase, SessionState};
use crate::peer::types::{
    CallStatus, ConnectionState, IceCandidate, RemoteStream, SdpType, SessionDescription,
    SessionHandle, SessionId, SignalingState,
};
use crate::signaling::Envelope;
use tracing::{debug, info, warn};

/// Всё, на что реагирует координатор
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// A media session was created for the call.
    SessionStarted(SessionHandle),
    /// Local hangup.
    Hangup,
    TransportOpened,
    TransportClosed,
    /// Envelope from the remote peer.
    Remote(Envelope),
    NegotiationNeeded,
    /// Deferred re-evaluation of the stable handler.
    StableCheck,
    SignalingStateChanged(SignalingState),
    LocalCandidate(Option<IceCandidate>),
    RemoteTrack(RemoteStream),
    ConnectionStateChanged(ConnectionState),
    /// Outcome of an effect executed against the media session.
    Completed(Outcome),
    Failed {
        op: Operation,
        error: MediaSessionError,
    },
}

/// Успешный результат операции над сессией
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    OfferCreated(SessionDescription),
    AnswerCreated(SessionDescription),
    LocalDescriptionApplied(SessionDescription),
    RemoteDescriptionApplied(SdpType),
    RolledBack,
    CandidateApplied,
}

/// Операция, которая завершилась ошибкой
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SdpType),
    SetRemoteDescription(SdpType),
    Rollback,
    AddCandidate(IceCandidate),
}

/// Действия, которые должен выполнить драйвер звонка
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(Envelope),
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    Rollback,
    AddCandidate(IceCandidate),
    /// Queue [`CallEvent::StableCheck`] behind every event already waiting.
    ScheduleStableCheck,
    AttachRemoteStream(RemoteStream),
    CloseSession,
    ClearSinks,
    ReportStatus(CallStatus),
}

#[derive(Debug)]
pub struct Coordinator {
    state: SessionState,
}

impl Coordinator {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            state: SessionState::new(session_id),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn handle(&mut self, event: CallEvent) -> Vec<Effect> {
        match event {
            CallEvent::SessionStarted(handle) => self.on_session_started(handle),
            CallEvent::Hangup => self.on_hangup(),
            CallEvent::TransportOpened => self.on_transport_opened(),
            CallEvent::TransportClosed => self.on_transport_closed(),
            // everything below belongs to a live session
            _ if !self.state.is_active() => {
                debug!(?event, "No active media session, ignoring event");
                Vec::new()
            }
            CallEvent::Remote(envelope) => self.on_remote(envelope),
            CallEvent::NegotiationNeeded => self.on_negotiation_needed(),
            CallEvent::StableCheck => {
                if self.state.signaling == SignalingState::Stable {
                    self.on_stable()
                } else {
                    Vec::new()
                }
            }
            CallEvent::SignalingStateChanged(next) => self.on_signaling_state(next),
            CallEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate),
            CallEvent::RemoteTrack(stream) => {
                info!(stream_id = %stream.stream_id, kind = %stream.kind, "Remote track received");
                vec![Effect::AttachRemoteStream(stream)]
            }
            CallEvent::ConnectionStateChanged(state) => {
                info!(?state, "Peer connection state changed");
                vec![Effect::ReportStatus(CallStatus::Peer(state))]
            }
            CallEvent::Completed(outcome) => self.on_completed(outcome),
            CallEvent::Failed { op, error } => self.on_failed(op, error),
        }
    }

    fn on_session_started(&mut self, handle: SessionHandle) -> Vec<Effect> {
        if let Some(current) = self.state.media {
            warn!(current = current.epoch, "Media session already active, ignoring start");
            return Vec::new();
        }
        self.state.reset_negotiation();
        self.state.media = Some(handle);
        info!(session = %self.state.session_id, epoch = handle.epoch, "Media session started");

        if self.state.transport_open {
            vec![Effect::Send(Envelope::OfferRequest)]
        } else {
            Vec::new()
        }
    }

    fn on_hangup(&mut self) -> Vec<Effect> {
        let Some(handle) = self.state.media.take() else {
            debug!("Hangup without an active call");
            return vec![Effect::ClearSinks];
        };
        info!(epoch = handle.epoch, signaling = ?self.state.signaling, "Hanging up");
        self.state.reset_negotiation();
        self.state.transport_open = false;
        vec![
            Effect::CloseSession,
            Effect::ClearSinks,
            Effect::ReportStatus(CallStatus::Ended),
        ]
    }

    /// Readiness handshake: ask the other side for an offer as soon as we can receive it.
    fn on_transport_opened(&mut self) -> Vec<Effect> {
        self.state.transport_open = true;
        if self.state.is_active() {
            info!("Signaling channel open, announcing readiness");
            vec![Effect::Send(Envelope::OfferRequest)]
        } else {
            Vec::new()
        }
    }

    fn on_transport_closed(&mut self) -> Vec<Effect> {
        self.state.transport_open = false;
        if self.state.is_active() {
            warn!(signaling = ?self.state.signaling, "Signaling channel lost");
            vec![Effect::ReportStatus(CallStatus::SignalingLost)]
        } else {
            Vec::new()
        }
    }

    fn on_negotiation_needed(&mut self) -> Vec<Effect> {
        self.state.renegotiation_pending = true;
        if self.state.signaling == SignalingState::Stable {
            // even when stable: a remote offer may already be queued
            debug!("Negotiation needed while stable, deferring to the stable handler");
            vec![Effect::ScheduleStableCheck]
        } else {
            debug!(signaling = ?self.state.signaling, "Negotiation needed mid-negotiation, deferring");
            Vec::new()
        }
    }

    fn on_signaling_state(&mut self, next: SignalingState) -> Vec<Effect> {
        let previous = self.state.signaling;
        if previous == next {
            return Vec::new();
        }
        debug!(?previous, ?next, "Signaling state changed");
        self.state.signaling = next;
        if next == SignalingState::Stable {
            self.on_stable()
        } else {
            Vec::new()
        }
    }

    /// The single place where offers for local changes are produced.
    fn on_stable(&mut self) -> Vec<Effect> {
        if !self.state.renegotiation_pending {
            return Vec::new();
        }
        if self.state.answering || self.state.offer != OfferPhase::Idle {
            debug!(
                answering = self.state.answering,
                offer = ?self.state.offer,
                "Stable but a negotiation is still in progress, keeping renegotiation pending"
            );
            return Vec::new();
        }
        self.state.renegotiation_pending = false;
        self.begin_offer()
    }

    fn begin_offer(&mut self) -> Vec<Effect> {
        info!("Creating offer...");
        self.state.offer = OfferPhase::Creating;
        vec![Effect::CreateOffer]
    }

    fn on_local_candidate(&mut self, candidate: Option<IceCandidate>) -> Vec<Effect> {
        match candidate {
            Some(candidate) => {
                dump_candidate("LOCAL", &candidate);
                self.state.local_candidates.push(candidate.clone());
                vec![Effect::Send(Envelope::CandidateExchange(candidate))]
            }
            None => {
                info!(
                    count = self.state.local_candidates.len(),
                    "ICE candidate gathering completed (null candidate received)"
                );
                analyze_candidates(&self.state.local_candidates);
                Vec::new()
            }
        }
    }

    fn on_remote(&mut self, envelope: Envelope) -> Vec<Effect> {
        match envelope {
            Envelope::Offer(offer) => self.on_remote_offer(offer),
            Envelope::Answer(answer) => self.on_remote_answer(answer),
            Envelope::CandidateExchange(candidate) => self.on_remote_candidate(candidate),
            Envelope::OfferRequest => self.on_offer_request(),
        }
    }

    fn on_remote_offer(&mut self, offer: SessionDescription) -> Vec<Effect> {
        info!(signaling = ?self.state.signaling, offer = ?self.state.offer, "Remote offer received");
        let mut effects = Vec::new();

        match self.state.offer {
            OfferPhase::Creating => {
                // never sent, so the peer has nothing to roll back; redo it once stable again
                self.state.offer = OfferPhase::Superseded;
                self.state.renegotiation_pending = true;
            }
            OfferPhase::Applying => {
                self.state.offer = OfferPhase::Superseded;
                self.state.renegotiation_pending = true;
                effects.push(Effect::Rollback);
            }
            OfferPhase::Idle | OfferPhase::Superseded => {
                if self.state.signaling == SignalingState::HaveLocalOffer {
                    warn!("Glare: local offer pending, rolling back in favour of the remote offer");
                    if let Some(local) = self.state.local_offer.as_ref() {
                        self.state.glare = Some(GlareRecord {
                            local_sdp: local.sdp.clone(),
                            remote_sdp: offer.sdp.clone(),
                        });
                    }
                    effects.push(Effect::Rollback);
                }
            }
        }

        self.state.local_offer = None;
        self.state.answering = true;
        effects.push(Effect::SetRemoteDescription(offer));
        effects
    }

    fn on_remote_answer(&mut self, answer: SessionDescription) -> Vec<Effect> {
        if self.state.signaling == SignalingState::HaveLocalOffer {
            info!("Remote answer received, applying");
            return vec![Effect::SetRemoteDescription(answer)];
        }

        warn!(signaling = ?self.state.signaling, "Stale answer received, ignoring");
        let Some(glare) = self.state.glare.take() else {
            return Vec::new();
        };
        // both sides rolled back and answered each other; exactly one of them renegotiates
        if glare.local_sdp > glare.remote_sdp {
            info!("Glare tie-break won, renegotiating");
            self.state.renegotiation_pending = true;
            if self.state.signaling == SignalingState::Stable {
                return vec![Effect::ScheduleStableCheck];
            }
        }
        Vec::new()
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Vec<Effect> {
        dump_candidate("REMOTE", &candidate);
        if self.state.remote_description_set {
            vec![Effect::AddCandidate(candidate)]
        } else {
            self.state.pending_candidates.push(candidate);
            Vec::new()
        }
    }

    fn on_offer_request(&mut self) -> Vec<Effect> {
        match (self.state.offer, self.state.signaling) {
            (OfferPhase::Superseded, _) => {
                // the stale result is still outstanding; offer once it has drained
                debug!("Offer requested while a superseded offer is outstanding, deferring");
                self.state.renegotiation_pending = true;
                Vec::new()
            }
            (OfferPhase::Creating | OfferPhase::Applying, _) => {
                debug!("Offer requested while one is already being produced");
                Vec::new()
            }
            (_, SignalingState::HaveLocalOffer) => match self.state.local_offer.clone() {
                Some(offer) => {
                    info!("Offer requested while ours is unanswered, sending it again");
                    vec![Effect::Send(Envelope::Offer(offer))]
                }
                None => {
                    self.state.renegotiation_pending = true;
                    Vec::new()
                }
            },
            (_, SignalingState::Stable) if !self.state.answering => {
                info!("Offer requested by remote peer");
                self.state.renegotiation_pending = false;
                self.begin_offer()
            }
            (_, signaling) => {
                debug!(?signaling, "Offer requested mid-negotiation, deferring");
                self.state.renegotiation_pending = true;
                Vec::new()
            }
        }
    }

    fn on_completed(&mut self, outcome: Outcome) -> Vec<Effect> {
        match outcome {
            Outcome::OfferCreated(offer) => {
                if self.state.offer == OfferPhase::Superseded {
                    debug!("Dropping offer superseded by a remote offer");
                    return self.drop_superseded();
                }
                self.state.offer = OfferPhase::Applying;
                vec![Effect::SetLocalDescription(offer)]
            }
            Outcome::AnswerCreated(answer) => vec![Effect::SetLocalDescription(answer)],
            Outcome::LocalDescriptionApplied(desc) => match desc.sdp_type {
                SdpType::Offer => {
                    if self.state.offer == OfferPhase::Superseded {
                        return self.drop_superseded();
                    }
                    self.state.offer = OfferPhase::Idle;
                    self.state.local_offer = Some(desc.clone());
                    info!("Local offer set, sending");
                    vec![Effect::Send(Envelope::Offer(desc))]
                }
                SdpType::Answer | SdpType::Pranswer => {
                    self.state.answering = false;
                    info!("Local answer set, sending");
                    vec![Effect::Send(Envelope::Answer(desc))]
                }
                SdpType::Rollback => Vec::new(),
            },
            Outcome::RemoteDescriptionApplied(sdp_type) => {
                self.state.remote_description_set = true;
                if sdp_type == SdpType::Answer {
                    self.state.local_offer = None;
                    self.state.glare = None;
                }
                let mut effects: Vec<Effect> = self
                    .state
                    .pending_candidates
                    .drain()
                    .into_iter()
                    .map(Effect::AddCandidate)
                    .collect();
                if !effects.is_empty() {
                    info!(count = effects.len(), "Applying pending candidates");
                }
                if sdp_type == SdpType::Offer {
                    effects.push(Effect::CreateAnswer);
                }
                effects
            }
            Outcome::RolledBack => {
                debug!("Local offer rolled back");
                Vec::new()
            }
            Outcome::CandidateApplied => Vec::new(),
        }
    }

    /// The answer may have brought us back to stable before the stale result landed.
    fn drop_superseded(&mut self) -> Vec<Effect> {
        self.state.offer = OfferPhase::Idle;
        if self.state.renegotiation_pending
            && !self.state.answering
            && self.state.signaling == SignalingState::Stable
        {
            vec![Effect::ScheduleStableCheck]
        } else {
            Vec::new()
        }
    }

    fn on_failed(&mut self, op: Operation, error: MediaSessionError) -> Vec<Effect> {
        warn!(?op, %error, signaling = ?self.state.signaling, "Negotiation step failed");
        match op {
            Operation::CreateOffer | Operation::SetLocalDescription(SdpType::Offer) => {
                if self.state.offer == OfferPhase::Superseded {
                    return self.drop_superseded();
                }
                // retried at the next stable transition
                self.state.offer = OfferPhase::Idle;
                self.state.renegotiation_pending = true;
            }
            Operation::CreateAnswer
            | Operation::SetLocalDescription(_)
            | Operation::SetRemoteDescription(SdpType::Offer) => {
                self.state.answering = false;
            }
            Operation::SetRemoteDescription(_) | Operation::Rollback => {}
            Operation::AddCandidate(candidate) => {
                if let MediaSessionError::InvalidState(_) = error {
                    self.state.remote_description_set = false;
                    self.state.pending_candidates.push(candidate);
                }
            }
        }
        Vec::new()
    }
}
