//! WebRTC peer transport.
//!
//! Every callback registered on the peer connection or its data channels is
//! turned into a [`PeerEnvelope`] tagged with the remote device id, so the
//! runtime sees one ordered stream per transport. Candidates are trickled: a
//! `None` candidate from the gatherer becomes [`PeerEvent::CandidatesExhausted`].

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use vs_core::network::{IceCandidate, SdpKind, SessionDescription};
use vs_core::ports::{
    ChannelOrigin, DataChannelPort, PeerEnvelope, PeerEvent, PeerEventSender,
    PeerTransportFactoryPort,
    PeerTransportPort,
};
use vs_core::{DeviceId, IceServer, RawTransportState};

pub struct WebRtcTransportFactory {
    api: API,
}

impl WebRtcTransportFactory {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .context("failed to register webrtc interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn raw_state(state: RTCPeerConnectionState) -> Option<RawTransportState> {
    match state {
        RTCPeerConnectionState::Unspecified => None,
        RTCPeerConnectionState::New => Some(RawTransportState::New),
        RTCPeerConnectionState::Connecting => Some(RawTransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(RawTransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(RawTransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(RawTransportState::Failed),
        RTCPeerConnectionState::Closed => Some(RawTransportState::Closed),
    }
}

/// Tags events with the remote device before queueing them.
#[derive(Clone)]
struct Forwarder {
    device_id: DeviceId,
    events: PeerEventSender,
}

impl Forwarder {
    fn send(&self, event: PeerEvent) {
        if self
            .events
            .send(PeerEnvelope {
                device_id: self.device_id.clone(),
                event,
            })
            .is_err()
        {
            tracing::debug!(device_id = %self.device_id, "peer event dropped, runtime gone");
        }
    }
}

#[async_trait]
impl PeerTransportFactoryPort for WebRtcTransportFactory {
    async fn create(
        &self,
        device_id: &DeviceId,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransportPort>> {
        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .context("failed to create peer connection")?,
        );
        let forwarder = Forwarder {
            device_id: device_id.clone(),
            events,
        };

        let f = forwarder.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let f = f.clone();
            Box::pin(async move {
                tracing::debug!(device_id = %f.device_id, %state, "peer connection state");
                if let Some(raw) = raw_state(state) {
                    f.send(PeerEvent::StateChanged(raw));
                }
            })
        }));

        let f = forwarder.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let f = f.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    f.send(PeerEvent::CandidatesExhausted);
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => f.send(PeerEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                    })),
                    Err(err) => {
                        tracing::warn!(
                            device_id = %f.device_id,
                            error = %err,
                            "unserializable local candidate"
                        )
                    }
                }
            })
        }));

        let transport = Arc::new(WebRtcTransport {
            pc: pc.clone(),
            forwarder: forwarder.clone(),
            channels: Mutex::new(Vec::new()),
            pending_candidates: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&transport);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(transport) = weak.upgrade() else {
                    return;
                };
                let channel = Arc::new(WebRtcDataChannel {
                    inner: dc,
                    origin: ChannelOrigin::Inbound,
                });
                // Announce the channel before any of its events can fire.
                transport
                    .forwarder
                    .send(PeerEvent::InboundChannel(channel.clone()));
                channel.forward_events(&transport.forwarder);
                transport.channels.lock().await.push(channel);
            })
        }));

        Ok(transport)
    }
}

struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    forwarder: Forwarder,
    channels: Mutex<Vec<Arc<WebRtcDataChannel>>>,
    /// Remote candidates that arrived before the remote description.
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl WebRtcTransport {
    async fn flush_pending_candidates(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending_candidates.lock().await);
        for candidate in pending {
            self.pc
                .add_ice_candidate(candidate)
                .await
                .context("failed to add buffered candidate")?;
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransportPort for WebRtcTransport {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelPort>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .with_context(|| format!("failed to create data channel {label}"))?;
        let channel = Arc::new(WebRtcDataChannel {
            inner: dc,
            origin: ChannelOrigin::Local,
        });
        channel.forward_events(&self.forwarder);
        self.channels.lock().await.push(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.context("failed to create offer")?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .context("failed to install local offer")?;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        let remote = RTCSessionDescription::offer(offer.sdp).context("remote offer is malformed")?;
        self.pc
            .set_remote_description(remote)
            .await
            .context("failed to install remote offer")?;
        self.flush_pending_candidates().await?;

        let answer = self.pc.create_answer(None).await.context("failed to create answer")?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .context("failed to install local answer")?;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
        let remote = RTCSessionDescription::answer(answer.sdp)
            .context("remote answer is malformed")?;
        self.pc
            .set_remote_description(remote)
            .await
            .context("failed to install remote answer")?;
        self.flush_pending_candidates().await
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: None,
        };
        if self.pc.remote_description().await.is_none() {
            self.pending_candidates.lock().await.push(init);
            return Ok(());
        }
        self.pc
            .add_ice_candidate(init)
            .await
            .context("failed to add remote candidate")
    }

    async fn end_of_candidates(&self) -> Result<()> {
        // An empty candidate marks the end of the remote list.
        self.add_candidate(IceCandidate {
            candidate: String::new(),
            sdp_mid: None,
            sdp_m_line_index: None,
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        for channel in self.channels.lock().await.drain(..) {
            if let Err(err) = channel.inner.close().await {
                tracing::debug!(
                    device_id = %self.forwarder.device_id,
                    error = %err,
                    "data channel close failed"
                );
            }
        }
        self.pc.close().await.context("failed to close peer connection")
    }
}

struct WebRtcDataChannel {
    inner: Arc<RTCDataChannel>,
    origin: ChannelOrigin,
}

impl WebRtcDataChannel {
    fn forward_events(&self, forwarder: &Forwarder) {
        let origin = self.origin;

        let f = forwarder.clone();
        self.inner.on_open(Box::new(move || {
            let f = f.clone();
            Box::pin(async move {
                f.send(PeerEvent::ChannelOpened(origin));
            })
        }));

        let f = forwarder.clone();
        self.inner.on_close(Box::new(move || {
            let f = f.clone();
            Box::pin(async move {
                f.send(PeerEvent::ChannelClosed(origin));
            })
        }));

        let f = forwarder.clone();
        self.inner.on_error(Box::new(move |err: webrtc::Error| {
            let f = f.clone();
            Box::pin(async move {
                f.send(PeerEvent::ChannelError {
                    origin,
                    error: err.to_string(),
                });
            })
        }));

        let f = forwarder.clone();
        self.inner.on_message(Box::new(move |message: DataChannelMessage| {
            let f = f.clone();
            Box::pin(async move {
                f.send(PeerEvent::ChannelMessage {
                    origin,
                    data: message.data.to_vec(),
                });
            })
        }));
    }
}

#[async_trait]
impl DataChannelPort for WebRtcDataChannel {
    fn origin(&self) -> ChannelOrigin {
        self.origin
    }

    fn label(&self) -> String {
        self.inner.label().to_string()
    }

    async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.inner
            .send(&Bytes::from(data))
            .await
            .context("data channel send failed")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await.context("data channel close failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_state_mapping() {
        assert_eq!(raw_state(RTCPeerConnectionState::Unspecified), None);
        assert_eq!(
            raw_state(RTCPeerConnectionState::Closed),
            Some(RawTransportState::Closed)
        );
        assert_eq!(
            raw_state(RTCPeerConnectionState::Connected),
            Some(RawTransportState::Connected)
        );
    }

    #[test]
    fn test_ice_server_credentials_default_to_empty() {
        let server = rtc_ice_server(&IceServer {
            id: "stun".to_string(),
            urls: vec!["stun:stun.example.org:3478".to_string()],
            username: None,
            credential: None,
        });
        assert_eq!(server.urls.len(), 1);
        assert!(server.username.is_empty());
        assert!(server.credential.is_empty());
    }

    #[tokio::test]
    async fn test_offer_describes_data_channel() {
        let factory = WebRtcTransportFactory::new().unwrap();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let transport = factory.create(&"b".into(), &[], events).await.unwrap();

        let channel = transport.create_data_channel("vault-sync").await.unwrap();
        let offer = transport.create_offer().await.unwrap();

        assert_eq!(channel.label(), "vault-sync");
        assert_eq!(channel.origin(), ChannelOrigin::Local);
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=application"));
        transport.close().await.unwrap();
    }
}
