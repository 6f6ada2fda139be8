use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description produced by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// A network candidate discovered by the local transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// Session-establishment messages exchanged over the negotiation channel.
///
/// Serialized with a `type` discriminator so receivers can dispatch on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Offer {
        from: DeviceId,
        description: SessionDescription,
    },
    Answer {
        from: DeviceId,
        description: SessionDescription,
    },
    Candidate {
        from: DeviceId,
        candidate: IceCandidate,
    },
    CandidatesExhausted {
        from: DeviceId,
    },
}

impl SignalMessage {
    pub fn sender(&self) -> &DeviceId {
        match self {
            Self::Offer { from, .. }
            | Self::Answer { from, .. }
            | Self::Candidate { from, .. }
            | Self::CandidatesExhausted { from } => from,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::CandidatesExhausted { .. } => "candidates-exhausted",
        }
    }
}
