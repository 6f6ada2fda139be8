//! In-process relay with presence semantics.
//!
//! Members already on a channel hear about a newcomer through `MemberAdded`;
//! published messages reach every other member of the channel and never the
//! publisher itself.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use vs_core::ports::{
    RelayConnectionPort, RelayConnectorPort, RelayEnvelope, RelayEvent, RelayEventSender,
};
use vs_core::{NegotiationStatus, RelayConfig, RelayId, SignalMessage};

struct Session {
    relay_id: RelayId,
    member_id: String,
    events: RelayEventSender,
    channels: HashSet<String>,
}

impl Session {
    fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(RelayEnvelope {
            relay_id: self.relay_id.clone(),
            event,
        });
    }
}

#[derive(Default)]
struct ServerState {
    next_session: u64,
    sessions: HashMap<u64, Session>,
    rejected_channels: HashSet<String>,
    unreachable: HashSet<RelayId>,
}

/// Shared relay "server". Clones talk to the same server.
#[derive(Clone, Default)]
pub struct LoopbackRelayServer {
    state: Arc<Mutex<ServerState>>,
}

impl LoopbackRelayServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse authorization for `channel` from now on.
    pub fn reject_channel(&self, channel: impl Into<String>) {
        self.lock().rejected_channels.insert(channel.into());
    }

    /// Make dials to `relay_id` fail.
    pub fn set_unreachable(&self, relay_id: impl Into<RelayId>, unreachable: bool) {
        let relay_id = relay_id.into();
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(relay_id);
        } else {
            state.unreachable.remove(&relay_id);
        }
    }

    /// Open sessions across all relays.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Members currently subscribed to `channel` on `relay_id`.
    pub fn members(&self, relay_id: &RelayId, channel: &str) -> Vec<String> {
        let state = self.lock();
        let mut members: Vec<String> = state
            .sessions
            .values()
            .filter(|session| session.relay_id == *relay_id && session.channels.contains(channel))
            .map(|session| session.member_id.clone())
            .collect();
        members.sort();
        members
    }
}

#[async_trait]
impl RelayConnectorPort for LoopbackRelayServer {
    async fn connect(
        &self,
        relay: &RelayConfig,
        member_id: &str,
        events: RelayEventSender,
    ) -> Result<Arc<dyn RelayConnectionPort>> {
        let mut state = self.lock();
        if state.unreachable.contains(&relay.id) {
            return Err(anyhow!("relay {} is unreachable", relay.id));
        }

        let session_id = state.next_session;
        state.next_session += 1;
        let session = Session {
            relay_id: relay.id.clone(),
            member_id: member_id.to_string(),
            events,
            channels: HashSet::new(),
        };
        session.emit(RelayEvent::StatusChanged(NegotiationStatus::Connected));
        state.sessions.insert(session_id, session);
        tracing::debug!(
            relay_id = %relay.id,
            member_id,
            session_id,
            "loopback relay session opened"
        );

        Ok(Arc::new(LoopbackRelayConnection {
            server: self.clone(),
            session_id,
        }))
    }
}

struct LoopbackRelayConnection {
    server: LoopbackRelayServer,
    session_id: u64,
}

impl LoopbackRelayConnection {
    fn closed(&self) -> anyhow::Error {
        anyhow!("loopback relay session {} is closed", self.session_id)
    }
}

#[async_trait]
impl RelayConnectionPort for LoopbackRelayConnection {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        let mut guard = self.server.lock();
        let state = &mut *guard;
        let rejected = state.rejected_channels.contains(channel);
        let session = state
            .sessions
            .get_mut(&self.session_id)
            .ok_or_else(|| self.closed())?;

        if rejected {
            session.emit(RelayEvent::SubscriptionFailed {
                channel: channel.to_string(),
                reason: "authorization rejected".to_string(),
            });
            return Ok(());
        }

        session.channels.insert(channel.to_string());
        session.emit(RelayEvent::SubscriptionSucceeded {
            channel: channel.to_string(),
        });
        let relay_id = session.relay_id.clone();
        let member_id = session.member_id.clone();

        for (id, other) in &state.sessions {
            if *id != self.session_id
                && other.relay_id == relay_id
                && other.channels.contains(channel)
            {
                other.emit(RelayEvent::MemberAdded {
                    channel: channel.to_string(),
                    member_id: member_id.clone(),
                });
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut state = self.server.lock();
        let session = state
            .sessions
            .get_mut(&self.session_id)
            .ok_or_else(|| self.closed())?;
        session.channels.remove(channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &SignalMessage) -> Result<()> {
        let state = self.server.lock();
        let session = state
            .sessions
            .get(&self.session_id)
            .ok_or_else(|| self.closed())?;
        if !session.channels.contains(channel) {
            return Err(anyhow!("not subscribed to {channel}"));
        }

        for (id, other) in &state.sessions {
            if *id != self.session_id
                && other.relay_id == session.relay_id
                && other.channels.contains(channel)
            {
                other.emit(RelayEvent::Message {
                    channel: channel.to_string(),
                    message: message.clone(),
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(session) = self.server.lock().sessions.remove(&self.session_id) {
            tracing::debug!(
                relay_id = %session.relay_id,
                member_id = %session.member_id,
                "loopback relay session closed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<RelayEnvelope>) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    #[tokio::test]
    async fn test_presence_and_delivery() {
        let server = LoopbackRelayServer::new();
        let relay = RelayConfig::default();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();

        let a = server.connect(&relay, "a", a_tx).await.unwrap();
        a.subscribe("presence-x").await.unwrap();
        let b = server.connect(&relay, "b", b_tx).await.unwrap();
        b.subscribe("presence-x").await.unwrap();

        let a_events = drain(&mut a_rx);
        assert!(a_events.contains(&RelayEvent::MemberAdded {
            channel: "presence-x".to_string(),
            member_id: "b".to_string()
        }));
        // The newcomer is not told about existing members.
        assert!(!drain(&mut b_rx)
            .iter()
            .any(|event| matches!(event, RelayEvent::MemberAdded { .. })));

        let message = SignalMessage::CandidatesExhausted { from: "b".into() };
        b.publish("presence-x", &message).await.unwrap();
        assert_eq!(
            drain(&mut a_rx),
            vec![RelayEvent::Message {
                channel: "presence-x".to_string(),
                message
            }]
        );
        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(server.members(&relay.id, "presence-x"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_rejected_channel_reports_failure() {
        let server = LoopbackRelayServer::new();
        server.reject_channel("presence-x");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let connection = server.connect(&RelayConfig::default(), "a", tx).await.unwrap();
        connection.subscribe("presence-x").await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(RelayEvent::SubscriptionFailed { channel, .. }) if channel == "presence-x"
        ));
        assert!(connection
            .publish("presence-x", &SignalMessage::CandidatesExhausted { from: "a".into() })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unreachable_relay_and_disconnect() {
        let server = LoopbackRelayServer::new();
        let relay = RelayConfig::default();
        server.set_unreachable(relay.id.clone(), true);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(server.connect(&relay, "a", tx.clone()).await.is_err());

        server.set_unreachable(relay.id.clone(), false);
        let connection = server.connect(&relay, "a", tx).await.unwrap();
        assert_eq!(server.session_count(), 1);
        connection.disconnect().await.unwrap();
        assert_eq!(server.session_count(), 0);
        assert!(connection.subscribe("presence-x").await.is_err());
    }
}
