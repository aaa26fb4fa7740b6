use crate::peer::ice::CandidateBuffer;
use crate::peer::types::{IceCandidate, SessionDescription, SessionHandle, SessionId, SignalingState};

/// Progress of the local offer the coordinator is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferPhase {
    Idle,
    /// `create_offer` issued, result not seen yet.
    Creating,
    /// Offer created, `set_local_description` issued.
    Applying,
    /// A remote offer won while ours was in progress; the result is dropped when it lands.
    Superseded,
}

/// Crossing offers that were both rolled back. Kept until the stale answer for our offer shows up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlareRecord {
    pub local_sdp: String,
    pub remote_sdp: String,
}

/// Состояние одного звонка. Меняет его только координатор.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) session_id: SessionId,
    pub(crate) media: Option<SessionHandle>,
    pub(crate) renegotiation_pending: bool,
    pub(crate) signaling: SignalingState,
    pub(crate) transport_open: bool,
    pub(crate) remote_description_set: bool,
    pub(crate) pending_candidates: CandidateBuffer,
    pub(crate) local_candidates: Vec<IceCandidate>,
    pub(crate) offer: OfferPhase,
    pub(crate) local_offer: Option<SessionDescription>,
    pub(crate) answering: bool,
    pub(crate) glare: Option<GlareRecord>,
}

impl SessionState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            media: None,
            renegotiation_pending: false,
            signaling: SignalingState::Stable,
            transport_open: false,
            remote_description_set: false,
            pending_candidates: CandidateBuffer::new(),
            local_candidates: Vec::new(),
            offer: OfferPhase::Idle,
            local_offer: None,
            answering: false,
            glare: None,
        }
    }

    /// Сбрасывает всё, что относится к переговорам, оставляя идентификатор сессии
    pub(crate) fn reset_negotiation(&mut self) {
        self.renegotiation_pending = false;
        self.signaling = SignalingState::Stable;
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.local_candidates.clear();
        self.offer = OfferPhase::Idle;
        self.local_offer = None;
        self.answering = false;
        self.glare = None;
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn media_session(&self) -> Option<SessionHandle> {
        self.media
    }

    pub fn is_active(&self) -> bool {
        self.media.is_some()
    }

    pub fn renegotiation_pending(&self) -> bool {
        self.renegotiation_pending
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling
    }

    pub fn transport_open(&self) -> bool {
        self.transport_open
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> &CandidateBuffer {
        &self.pending_candidates
    }

    /// Локальные кандидаты, уже отправленные собеседнику
    pub fn local_candidates(&self) -> &[IceCandidate] {
        &self.local_candidates
    }

    pub fn offer_phase(&self) -> OfferPhase {
        self.offer
    }

    pub fn local_offer(&self) -> Option<&SessionDescription> {
        self.local_offer.as_ref()
    }

    pub fn answering(&self) -> bool {
        self.answering
    }

    pub fn glare(&self) -> Option<&GlareRecord> {
        self.glare.as_ref()
    }
}
