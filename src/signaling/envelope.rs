//! Конверты сигнального канала.
//!
//! Wire shape is `{"type": <int>, "data": <payload>}` with
//! `1 = CandidateExchange, 2 = Offer, 3 = Answer, 4 = OfferRequest`. The numbering is shared with
//! the relay and with browser peers and must not change.

use crate::error::SignalingError;
use crate::peer::types::{IceCandidate, SdpType, SessionDescription};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    CandidateExchange = 1,
    Offer = 2,
    Answer = 3,
    OfferRequest = 4,
}

impl EnvelopeKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(EnvelopeKind::CandidateExchange),
            2 => Some(EnvelopeKind::Offer),
            3 => Some(EnvelopeKind::Answer),
            4 => Some(EnvelopeKind::OfferRequest),
            _ => None,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvelopeKind::CandidateExchange => "candidate-exchange",
            EnvelopeKind::Offer => "offer",
            EnvelopeKind::Answer => "answer",
            EnvelopeKind::OfferRequest => "offer-request",
        };
        f.write_str(name)
    }
}

/// Один конверт; форма полезной нагрузки однозначно задаётся вариантом
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    CandidateExchange(IceCandidate),
    Offer(SessionDescription),
    Answer(SessionDescription),
    OfferRequest,
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::CandidateExchange(_) => EnvelopeKind::CandidateExchange,
            Envelope::Offer(_) => EnvelopeKind::Offer,
            Envelope::Answer(_) => EnvelopeKind::Answer,
            Envelope::OfferRequest => EnvelopeKind::OfferRequest,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: u64,
    #[serde(default)]
    data: Value,
}

impl TryFrom<&Envelope> for WireEnvelope {
    type Error = serde_json::Error;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        let data = match envelope {
            Envelope::CandidateExchange(candidate) => serde_json::to_value(candidate)?,
            Envelope::Offer(desc) | Envelope::Answer(desc) => serde_json::to_value(desc)?,
            Envelope::OfferRequest => Value::Null,
        };
        Ok(WireEnvelope {
            kind: u64::from(envelope.kind().code()),
            data,
        })
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = SignalingError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let kind = EnvelopeKind::from_code(wire.kind).ok_or(SignalingError::UnknownKind(wire.kind))?;
        let invalid = |reason: String| SignalingError::InvalidPayload {
            kind: kind.code(),
            reason,
        };

        match kind {
            EnvelopeKind::CandidateExchange => {
                let candidate: IceCandidate =
                    serde_json::from_value(wire.data).map_err(|e| invalid(e.to_string()))?;
                Ok(Envelope::CandidateExchange(candidate))
            }
            EnvelopeKind::Offer => {
                let desc: SessionDescription =
                    serde_json::from_value(wire.data).map_err(|e| invalid(e.to_string()))?;
                if desc.sdp_type != SdpType::Offer {
                    return Err(invalid(format!("description type {} in an offer", desc.sdp_type)));
                }
                Ok(Envelope::Offer(desc))
            }
            EnvelopeKind::Answer => {
                let desc: SessionDescription =
                    serde_json::from_value(wire.data).map_err(|e| invalid(e.to_string()))?;
                if !matches!(desc.sdp_type, SdpType::Answer | SdpType::Pranswer) {
                    return Err(invalid(format!("description type {} in an answer", desc.sdp_type)));
                }
                Ok(Envelope::Answer(desc))
            }
            // payload is ignored: peers send null, an empty object or nothing at all
            EnvelopeKind::OfferRequest => Ok(Envelope::OfferRequest),
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelope::try_from(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEnvelope::deserialize(deserializer)?;
        Envelope::try_from(wire).map_err(serde::de::Error::custom)
    }
}

/// Кодирует конверт в JSON текст для отправки одним сообщением
pub fn encode(envelope: &Envelope) -> Result<String, SignalingError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Разбирает JSON текст в конверт, сохраняя типизированную причину ошибки
pub fn decode(text: &str) -> Result<Envelope, SignalingError> {
    let wire: WireEnvelope = serde_json::from_str(text)?;
    Envelope::try_from(wire)
}
