//! Детерминированная модель peer connection для координатора без async и без сети.

use std::collections::VecDeque;

use peercall_lib::peer::{
    CallEvent, Coordinator, Effect, IceCandidate, Operation, Outcome, SdpType,
    SessionDescription, SessionHandle, SessionId, SignalingState,
};
use peercall_lib::signaling::Envelope;
use peercall_lib::MediaSessionError;

/// One peer: a coordinator plus a minimal signaling-state model executing its effects the way
/// the call driver does (operation outcomes first, then the resulting signaling state).
#[allow(dead_code)]
pub struct SimPeer {
    pub name: &'static str,
    pub coordinator: Coordinator,
    pub signaling: SignalingState,
    pub has_remote: bool,
    pub outbox: VecDeque<Envelope>,
    pub sent: Vec<Envelope>,
    pub applied_candidates: Vec<IceCandidate>,
    pub effects: Vec<Effect>,
    pub deferred: VecDeque<CallEvent>,
    pub fail_create_offer: bool,
    /// Stable observations that found the renegotiation flag set.
    pub stable_with_flag: usize,
    offers_created: u32,
    answers_created: u32,
}

#[allow(dead_code)]
impl SimPeer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            coordinator: Coordinator::new(SessionId::parse("room42").unwrap()),
            signaling: SignalingState::Stable,
            has_remote: false,
            outbox: VecDeque::new(),
            sent: Vec::new(),
            applied_candidates: Vec::new(),
            effects: Vec::new(),
            deferred: VecDeque::new(),
            fail_create_offer: false,
            stable_with_flag: 0,
            offers_created: 0,
            answers_created: 0,
        }
    }

    /// Media session created, signaling channel open.
    pub fn started(name: &'static str) -> Self {
        let mut peer = Self::new(name);
        peer.feed(CallEvent::SessionStarted(SessionHandle { epoch: 1 }));
        peer.feed(CallEvent::TransportOpened);
        peer.outbox.clear();
        peer.sent.clear();
        peer.effects.clear();
        peer
    }

    pub fn feed(&mut self, event: CallEvent) {
        let mut backlog = VecDeque::from([event]);
        while let Some(event) = backlog.pop_front() {
            self.observe(&event);
            for effect in self.coordinator.handle(event) {
                self.effects.push(effect.clone());
                self.execute(effect, &mut backlog);
            }
        }
    }

    pub fn deliver(&mut self, envelope: Envelope) {
        self.feed(CallEvent::Remote(envelope));
    }

    pub fn run_deferred(&mut self) -> bool {
        let mut ran = false;
        while let Some(event) = self.deferred.pop_front() {
            ran = true;
            self.feed(event);
        }
        ran
    }

    pub fn sent_offers(&self) -> usize {
        self.sent
            .iter()
            .filter(|e| matches!(e, Envelope::Offer(_)))
            .count()
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    fn observe(&mut self, event: &CallEvent) {
        let reaches_stable_handler = match event {
            CallEvent::SignalingStateChanged(SignalingState::Stable) => {
                self.coordinator.state().signaling_state() != SignalingState::Stable
            }
            CallEvent::StableCheck => {
                self.coordinator.state().signaling_state() == SignalingState::Stable
            }
            _ => false,
        };
        if reaches_stable_handler && self.coordinator.state().renegotiation_pending() {
            self.stable_with_flag += 1;
        }
    }

    fn execute(&mut self, effect: Effect, backlog: &mut VecDeque<CallEvent>) {
        let (result, op, changes_state) = match effect {
            Effect::Send(envelope) => {
                self.sent.push(envelope.clone());
                self.outbox.push_back(envelope);
                return;
            }
            Effect::ScheduleStableCheck => {
                self.deferred.push_back(CallEvent::StableCheck);
                return;
            }
            Effect::AttachRemoteStream(_)
            | Effect::ClearSinks
            | Effect::ReportStatus(_) => return,
            Effect::CloseSession => {
                self.signaling = SignalingState::Closed;
                return;
            }
            Effect::CreateOffer => (self.create_offer(), Operation::CreateOffer, false),
            Effect::CreateAnswer => {
                self.answers_created += 1;
                let answer =
                    SessionDescription::answer(format!("v=0 {} answer {}", self.name, self.answers_created));
                (Ok(Outcome::AnswerCreated(answer)), Operation::CreateAnswer, false)
            }
            Effect::SetLocalDescription(desc) => {
                let op = Operation::SetLocalDescription(desc.sdp_type);
                (self.set_local(desc), op, true)
            }
            Effect::SetRemoteDescription(desc) => {
                let op = Operation::SetRemoteDescription(desc.sdp_type);
                (self.set_remote(desc), op, true)
            }
            Effect::Rollback => {
                if self.signaling == SignalingState::HaveLocalOffer {
                    self.signaling = SignalingState::Stable;
                }
                (Ok(Outcome::RolledBack), Operation::Rollback, true)
            }
            Effect::AddCandidate(candidate) => {
                if self.has_remote {
                    self.applied_candidates.push(candidate.clone());
                    (Ok(Outcome::CandidateApplied), Operation::AddCandidate(candidate), false)
                } else {
                    (
                        Err(MediaSessionError::InvalidState("no remote description".into())),
                        Operation::AddCandidate(candidate),
                        false,
                    )
                }
            }
        };

        backlog.push_back(match result {
            Ok(outcome) => CallEvent::Completed(outcome),
            Err(error) => CallEvent::Failed { op, error },
        });
        if changes_state {
            backlog.push_back(CallEvent::SignalingStateChanged(self.signaling));
        }
    }

    fn create_offer(&mut self) -> Result<Outcome, MediaSessionError> {
        if self.fail_create_offer {
            return Err(MediaSessionError::Failed("create offer failed".into()));
        }
        self.offers_created += 1;
        Ok(Outcome::OfferCreated(SessionDescription::offer(format!(
            "v=0 {} offer {}",
            self.name, self.offers_created
        ))))
    }

    fn set_local(&mut self, desc: SessionDescription) -> Result<Outcome, MediaSessionError> {
        match (desc.sdp_type, self.signaling) {
            (SdpType::Offer, SignalingState::Stable) => self.signaling = SignalingState::HaveLocalOffer,
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => self.signaling = SignalingState::Stable,
            (t, s) => {
                return Err(MediaSessionError::InvalidState(format!("set local {t} in {s:?}")));
            }
        }
        Ok(Outcome::LocalDescriptionApplied(desc))
    }

    fn set_remote(&mut self, desc: SessionDescription) -> Result<Outcome, MediaSessionError> {
        match (desc.sdp_type, self.signaling) {
            (SdpType::Offer, SignalingState::Stable) => self.signaling = SignalingState::HaveRemoteOffer,
            (SdpType::Answer, SignalingState::HaveLocalOffer) => self.signaling = SignalingState::Stable,
            (t, s) => {
                return Err(MediaSessionError::InvalidState(format!("set remote {t} in {s:?}")));
            }
        }
        self.has_remote = true;
        Ok(Outcome::RemoteDescriptionApplied(desc.sdp_type))
    }
}

/// Два пира, соединённые упорядоченным каналом.
#[allow(dead_code)]
pub struct SimPair {
    pub a: SimPeer,
    pub b: SimPeer,
}

#[allow(dead_code)]
impl SimPair {
    pub fn started() -> Self {
        Self {
            a: SimPeer::started("A"),
            b: SimPeer::started("B"),
        }
    }

    /// Delivers one envelope from A's outbox to B, if any.
    pub fn a_to_b(&mut self) -> bool {
        match self.a.outbox.pop_front() {
            Some(envelope) => {
                self.b.deliver(envelope);
                true
            }
            None => false,
        }
    }

    pub fn b_to_a(&mut self) -> bool {
        match self.b.outbox.pop_front() {
            Some(envelope) => {
                self.a.deliver(envelope);
                true
            }
            None => false,
        }
    }

    /// Alternates deliveries and deferred checks until nothing moves. Returns the step count.
    pub fn run_until_quiet(&mut self, max_steps: usize) -> usize {
        for step in 0..max_steps {
            let moved = self.a_to_b() | self.b_to_a() | self.a.run_deferred() | self.b.run_deferred();
            if !moved {
                return step;
            }
        }
        panic!("peers did not settle within {max_steps} steps");
    }
}
