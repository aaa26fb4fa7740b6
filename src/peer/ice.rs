use crate::peer::types::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Кандидаты, полученные до установки remote description.
///
/// Strict FIFO: `drain` hands candidates back in the order they were pushed.
#[derive(Debug, Default, Clone)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        debug!(
            queued = self.pending.len() + 1,
            "Remote description not set yet, queuing candidate"
        );
        self.pending.push_back(candidate);
    }

    /// Забирает все отложенные кандидаты, очищая буфер
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IceCandidate> {
        self.pending.iter()
    }
}

/// Тип кандидата по строке `candidate:` (host / srflx / prflx / relay)
pub fn candidate_type(candidate: &IceCandidate) -> &'static str {
    let mut parts = candidate.candidate.split_whitespace();
    while let Some(token) = parts.next() {
        if token == "typ" {
            return match parts.next() {
                Some("host") => "host",
                Some("srflx") => "srflx",
                Some("prflx") => "prflx",
                Some("relay") => "relay",
                _ => "unknown",
            };
        }
    }
    "unknown"
}

pub fn analyze_candidates<'a>(candidates: impl IntoIterator<Item = &'a IceCandidate>) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        match candidate_type(candidate) {
            "host" => host_count += 1,
            "srflx" => srflx_count += 1,
            "relay" => relay_count += 1,
            _ => {}
        }
    }

    debug!(
        host = host_count,
        srflx = srflx_count,
        relay = relay_count,
        "Candidate analysis"
    );

    if relay_count == 0 && srflx_count == 0 && host_count > 0 {
        warn!("Only host candidates gathered, connection through NAT may fail");
    }
}
