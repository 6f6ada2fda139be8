//! Pusher relay client over a websocket.
//!
//! One reader task turns server frames into [`RelayEvent`]s, one writer task
//! drains an outbound queue into the socket. Presence channels are authorized
//! through the relay's HTTP endpoint once the server has assigned a socket id.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{info_span, Instrument};

use vs_core::ports::{
    RelayConnectionPort, RelayConnectorPort, RelayEnvelope, RelayEvent, RelayEventSender,
};
use vs_core::{NegotiationStatus, RelayConfig, SignalMessage};

use super::protocol::{self, ChannelAuth, InboundFrame, UserAuth};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials relays speaking the Pusher channels protocol.
#[derive(Clone)]
pub struct PusherRelayConnector {
    http: reqwest::Client,
    handshake_timeout: Duration,
}

impl PusherRelayConnector {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Default for PusherRelayConnector {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl RelayConnectorPort for PusherRelayConnector {
    async fn connect(
        &self,
        relay: &RelayConfig,
        member_id: &str,
        events: RelayEventSender,
    ) -> Result<Arc<dyn RelayConnectionPort>> {
        let url = protocol::socket_url(relay);
        let span = info_span!("relay.pusher.connect", relay_id = %relay.id, host = %relay.host);

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .instrument(span)
            .await
            .with_context(|| format!("failed to reach relay {}", relay.id))?;
        tracing::info!(relay_id = %relay.id, "relay socket open");

        let (mut sink, source) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (socket_id_tx, socket_id_rx) = watch::channel(None);

        let shared = Arc::new(Shared {
            relay: relay.clone(),
            member_id: member_id.to_string(),
            http: self.http.clone(),
            handshake_timeout: self.handshake_timeout,
            outbound,
            socket_id: socket_id_rx,
            events,
        });

        let relay_id = relay.id.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(err) = sink.send(message).await {
                    tracing::warn!(%relay_id, error = %err, "relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });
        let reader = tokio::spawn(read_loop(shared.clone(), source, socket_id_tx));

        Ok(Arc::new(PusherConnection {
            shared,
            tasks: Mutex::new(vec![reader, writer]),
        }))
    }
}

struct Shared {
    relay: RelayConfig,
    member_id: String,
    http: reqwest::Client,
    handshake_timeout: Duration,
    outbound: mpsc::UnboundedSender<Message>,
    socket_id: watch::Receiver<Option<String>>,
    events: RelayEventSender,
}

impl Shared {
    fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(RelayEnvelope {
            relay_id: self.relay.id.clone(),
            event,
        });
    }

    fn send_text(&self, text: String) -> Result<()> {
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| anyhow!("relay {} connection is closed", self.relay.id))
    }

    async fn socket_id(&self) -> Result<String> {
        let mut socket_id = self.socket_id.clone();
        let handshake = socket_id.wait_for(Option::is_some);
        let ready = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .with_context(|| format!("relay {} did not complete its handshake", self.relay.id))?
            .map_err(|_| anyhow!("relay {} closed before its handshake", self.relay.id))?;
        (*ready)
            .clone()
            .ok_or_else(|| anyhow!("relay {} has no socket id", self.relay.id))
    }

    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<ChannelAuth> {
        if self.relay.auth_endpoint.is_empty() {
            return Err(anyhow!("relay {} has no authorization endpoint", self.relay.id));
        }
        let auth = self
            .http
            .post(&self.relay.auth_endpoint)
            .form(&[
                ("socket_id", socket_id),
                ("channel_name", channel),
                ("user_id", self.member_id.as_str()),
            ])
            .send()
            .await
            .context("authorization request failed")?
            .error_for_status()
            .context("authorization rejected")?
            .json::<ChannelAuth>()
            .await
            .context("authorization response is malformed")?;
        Ok(auth)
    }

    async fn sign_in(self: Arc<Self>, endpoint: String, socket_id: String) {
        let result = async {
            let auth = self
                .http
                .post(&endpoint)
                .form(&[("socket_id", socket_id.as_str()), ("user_id", self.member_id.as_str())])
                .send()
                .await?
                .error_for_status()?
                .json::<UserAuth>()
                .await?;
            self.send_text(protocol::signin_frame(&auth)?)
        }
        .await;

        if let Err(err) = result {
            tracing::warn!(relay_id = %self.relay.id, error = %err, "user sign-in rejected");
            self.emit(RelayEvent::StatusChanged(NegotiationStatus::Failed));
        }
    }

    /// Handle one server frame. Returns a status when the connection is over.
    fn dispatch(
        self: &Arc<Self>,
        frame: InboundFrame,
        socket_id: &watch::Sender<Option<String>>,
    ) -> Option<NegotiationStatus> {
        let fatal = frame.is_fatal_error();
        match frame {
            InboundFrame::ConnectionEstablished { socket_id: id } => {
                tracing::debug!(
                    relay_id = %self.relay.id,
                    socket_id = %id,
                    "relay handshake complete"
                );
                socket_id.send_replace(Some(id.clone()));
                self.emit(RelayEvent::StatusChanged(NegotiationStatus::Connected));
                if let Some(endpoint) = self.relay.user_auth_endpoint.clone() {
                    tokio::spawn(self.clone().sign_in(endpoint, id));
                }
            }
            InboundFrame::SubscriptionSucceeded { channel } => {
                self.emit(RelayEvent::SubscriptionSucceeded { channel });
            }
            InboundFrame::SubscriptionError { channel, reason } => {
                self.emit(RelayEvent::SubscriptionFailed { channel, reason });
            }
            InboundFrame::MemberAdded { channel, user_id } => {
                self.emit(RelayEvent::MemberAdded {
                    channel,
                    member_id: user_id,
                });
            }
            InboundFrame::Signal { channel, message } => {
                self.emit(RelayEvent::Message { channel, message });
            }
            InboundFrame::Ping => match protocol::pong_frame() {
                Ok(pong) => {
                    let _ = self.send_text(pong);
                }
                Err(err) => tracing::error!(error = %err, "failed to encode pong"),
            },
            InboundFrame::Pong => {}
            InboundFrame::Error { message, code } => {
                tracing::warn!(
                    relay_id = %self.relay.id,
                    ?code,
                    %message,
                    "relay reported an error"
                );
                if fatal {
                    return Some(NegotiationStatus::Failed);
                }
            }
            InboundFrame::Other { event } => {
                tracing::debug!(relay_id = %self.relay.id, %event, "ignoring relay event");
            }
        }
        None
    }
}

async fn read_loop<S>(shared: Arc<Shared>, mut source: S, socket_id: watch::Sender<Option<String>>)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut closing = NegotiationStatus::Disconnected;

    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(relay_id = %shared.relay.id, error = %err, "relay socket error");
                break;
            }
        };

        match protocol::parse(text.as_str()) {
            Ok(frame) => {
                if let Some(status) = shared.dispatch(frame, &socket_id) {
                    closing = status;
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(relay_id = %shared.relay.id, error = %err, "unreadable relay frame")
            }
        }
    }

    tracing::info!(relay_id = %shared.relay.id, status = ?closing, "relay socket closed");
    shared.emit(RelayEvent::StatusChanged(closing));
}

struct PusherConnection {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Presence and private channels need a signature from the auth endpoint.
fn requires_auth(channel: &str) -> bool {
    channel.starts_with("presence-") || channel.starts_with("private-")
}

#[async_trait]
impl RelayConnectionPort for PusherConnection {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        if !requires_auth(channel) {
            return self.shared.send_text(protocol::subscribe_frame(channel, None)?);
        }

        // Authorization waits for the handshake; the outcome arrives as a relay event.
        let shared = self.shared.clone();
        let channel = channel.to_string();
        let task = tokio::spawn(async move {
            let result = async {
                let socket_id = shared.socket_id().await?;
                let auth = shared.authorize(&socket_id, &channel).await?;
                shared.send_text(protocol::subscribe_frame(&channel, Some(&auth))?)
            }
            .await;

            if let Err(err) = result {
                tracing::warn!(
                    relay_id = %shared.relay.id,
                    %channel,
                    error = %err,
                    "channel authorization failed"
                );
                shared.emit(RelayEvent::SubscriptionFailed {
                    channel,
                    reason: format!("{err:#}"),
                });
            }
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(task);
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.shared.send_text(protocol::unsubscribe_frame(channel)?)
    }

    async fn publish(&self, channel: &str, message: &SignalMessage) -> Result<()> {
        self.shared.send_text(protocol::signal_frame(channel, message)?)
    }

    async fn disconnect(&self) -> Result<()> {
        let _ = self.shared.outbound.send(Message::Close(None));
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            task.abort();
        }
        tracing::info!(relay_id = %self.shared.relay.id, "relay connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn shared() -> (
        Arc<Shared>,
        mpsc::UnboundedReceiver<RelayEnvelope>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (_tx, socket_id) = watch::channel(None);
        let shared = Arc::new(Shared {
            relay: RelayConfig::default(),
            member_id: "a".to_string(),
            http: reqwest::Client::new(),
            handshake_timeout: Duration::from_millis(50),
            outbound,
            socket_id,
            events,
        });
        (shared, events_rx, outbound_rx)
    }

    fn text(frame: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(frame.to_string().into()))
    }

    #[tokio::test]
    async fn test_read_loop_translates_frames() {
        let (shared, mut events, mut outbound) = shared();
        let (socket_tx, socket_rx) = watch::channel(None);
        let frames = stream::iter(vec![
            text(r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.2\"}"}"#),
            text(r#"{"event":"pusher:ping","data":{}}"#),
            text(r#"{"event":"pusher_internal:member_added","channel":"presence-x","data":"{\"user_id\":\"b\"}"}"#),
            Ok(Message::Close(None)),
        ]);

        read_loop(shared, frames, socket_tx).await;

        assert_eq!(socket_rx.borrow().as_deref(), Some("1.2"));
        let mut seen = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            seen.push(envelope.event);
        }
        assert_eq!(
            seen,
            vec![
                RelayEvent::StatusChanged(NegotiationStatus::Connected),
                RelayEvent::MemberAdded {
                    channel: "presence-x".to_string(),
                    member_id: "b".to_string()
                },
                RelayEvent::StatusChanged(NegotiationStatus::Disconnected),
            ]
        );
        let pong = outbound.try_recv().unwrap();
        assert!(pong.to_text().unwrap().contains("pusher:pong"));
    }

    #[tokio::test]
    async fn test_fatal_error_fails_the_connection() {
        let (shared, mut events, _outbound) = shared();
        let (socket_tx, _socket_rx) = watch::channel(None);
        let frames = stream::iter(vec![
            text(r#"{"event":"pusher:error","data":{"code":4001,"message":"app disabled"}}"#),
            text(r#"{"event":"pusher_internal:member_added","channel":"presence-x","data":"{\"user_id\":\"b\"}"}"#),
        ]);

        read_loop(shared, frames, socket_tx).await;

        let last = events.try_recv().unwrap();
        assert_eq!(last.event, RelayEvent::StatusChanged(NegotiationStatus::Failed));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unauthorized_subscription_reports_failure() {
        let (shared, mut events, _outbound) = shared();
        let connection = PusherConnection {
            shared,
            tasks: Mutex::new(Vec::new()),
        };

        connection.subscribe("presence-vaultsync-a_b").await.unwrap();

        let envelope = events.recv().await.unwrap();
        assert!(matches!(
            envelope.event,
            RelayEvent::SubscriptionFailed { ref channel, .. }
                if channel == "presence-vaultsync-a_b"
        ));
    }

    #[tokio::test]
    async fn test_rejected_sign_in_fails_the_relay() {
        let (shared, mut events, mut outbound) = shared();

        shared
            .clone()
            .sign_in("not a url".to_string(), "1.2".to_string())
            .await;

        let envelope = events.try_recv().unwrap();
        assert_eq!(envelope.event, RelayEvent::StatusChanged(NegotiationStatus::Failed));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_writes_client_event() {
        let (shared, _events, mut outbound) = shared();
        let connection = PusherConnection {
            shared,
            tasks: Mutex::new(Vec::new()),
        };

        connection
            .publish("presence-x", &SignalMessage::CandidatesExhausted { from: "a".into() })
            .await
            .unwrap();

        let frame = outbound.try_recv().unwrap();
        assert!(frame.to_text().unwrap().contains("client-signal"));
    }
}
