//! Relay (negotiation channel) port.
//!
//! A relay offers authenticated pub/sub channels. Implementations report
//! everything that happens on a connection as [`RelayEnvelope`]s through the
//! sender handed to [`RelayConnectorPort::connect`]; the application layer
//! consumes them from a single queue.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::ids::RelayId;
use crate::network::{NegotiationStatus, SignalMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    StatusChanged(NegotiationStatus),
    SubscriptionSucceeded { channel: String },
    /// Channel authorization was rejected or the relay refused the subscription.
    SubscriptionFailed { channel: String, reason: String },
    /// A signaling message published by another member.
    Message { channel: String, message: SignalMessage },
    /// Another member joined a channel we are subscribed to.
    MemberAdded { channel: String, member_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEnvelope {
    pub relay_id: RelayId,
    pub event: RelayEvent,
}

pub type RelayEventSender = mpsc::UnboundedSender<RelayEnvelope>;

#[async_trait]
pub trait RelayConnectorPort: Send + Sync {
    /// Open a connection to `relay`.
    ///
    /// Returns as soon as dialing has started; status transitions arrive as
    /// [`RelayEvent::StatusChanged`]. `member_id` identifies this replica on
    /// presence channels.
    async fn connect(
        &self,
        relay: &RelayConfig,
        member_id: &str,
        events: RelayEventSender,
    ) -> Result<Arc<dyn RelayConnectionPort>>;
}

#[async_trait]
pub trait RelayConnectionPort: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Publish to the other members of `channel`. The publisher does not
    /// receive its own message.
    async fn publish(&self, channel: &str, message: &SignalMessage) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
