use serde::{Deserialize, Serialize};

/// Status of a relay (negotiation channel) connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationStatus {
    Disconnected,
    Connecting,
    Connected,
    /// The relay could not be reached.
    Unavailable,
    /// The relay rejected us (authorization or protocol error).
    Failed,
}

impl NegotiationStatus {
    /// A connection in this state can be reused instead of dialing again.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Status of the direct peer transport for one device.
///
/// ```text
/// New ──→ Connecting ──→ Connected
///  │          │              │
///  └──────────┴──────────────┴──→ Disconnected | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportStatus {
    /// Record created, negotiation not yet progressed.
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl TransportStatus {
    /// Connect requests are refused while the transport is in one of these states.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// The transport may still need its negotiation channel.
    pub fn is_fresh(self) -> bool {
        matches!(self, Self::New | Self::Connecting)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Connection state exactly as reported by a transport implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawTransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RawTransportState> for TransportStatus {
    fn from(raw: RawTransportState) -> Self {
        match raw {
            RawTransportState::New => TransportStatus::New,
            RawTransportState::Connecting => TransportStatus::Connecting,
            RawTransportState::Connected => TransportStatus::Connected,
            RawTransportState::Disconnected | RawTransportState::Closed => {
                TransportStatus::Disconnected
            }
            RawTransportState::Failed => TransportStatus::Failed,
        }
    }
}
