//! Pusher channels protocol (version 7) frames.
//!
//! Every frame is a JSON object with an `event` name, an optional `channel`
//! and a `data` payload. The server usually sends `data` as a string holding
//! JSON, clients send it as an object; both forms are accepted on input.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use vs_core::{RelayConfig, SignalMessage};

pub const PROTOCOL_VERSION: u8 = 7;
pub const CLIENT_NAME: &str = "vaultsync";
/// Client event used for every signaling message.
pub const SIGNAL_EVENT: &str = "client-signal";

#[derive(Debug, Error)]
pub enum PusherError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame `{event}` is missing `{field}`")]
    MissingField { event: String, field: &'static str },
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Frames the client reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    ConnectionEstablished { socket_id: String },
    SubscriptionSucceeded { channel: String },
    SubscriptionError { channel: String, reason: String },
    MemberAdded { channel: String, user_id: String },
    Signal { channel: String, message: SignalMessage },
    Ping,
    Pong,
    /// `pusher:error`. Codes 4000-4099 mean the connection must not be retried.
    Error { code: Option<u16>, message: String },
    Other { event: String },
}

impl InboundFrame {
    pub fn is_fatal_error(&self) -> bool {
        matches!(self, Self::Error { code: Some(code), .. } if (4000..4100).contains(code))
    }
}

/// Response of a channel authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelAuth {
    pub auth: String,
    #[serde(default)]
    pub channel_data: Option<String>,
}

/// Response of a user sign-in endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserAuth {
    pub auth: String,
    pub user_data: String,
}

pub fn socket_url(relay: &RelayConfig) -> String {
    let scheme = if relay.use_tls { "wss" } else { "ws" };
    format!(
        "{scheme}://{}/app/{}?protocol={PROTOCOL_VERSION}&client={CLIENT_NAME}&version={}",
        relay.host,
        relay.app_key,
        env!("CARGO_PKG_VERSION"),
    )
}

/// Servers double-encode `data`; unwrap the inner JSON when present.
fn payload(data: Value) -> Value {
    match data {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}

fn string_field(data: &Value, event: &str, field: &'static str) -> Result<String, PusherError> {
    match data.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PusherError::MissingField {
            event: event.to_string(),
            field,
        }),
    }
}

fn channel_of(frame: &Frame, data: &Value) -> Result<String, PusherError> {
    match &frame.channel {
        Some(channel) => Ok(channel.clone()),
        None => string_field(data, &frame.event, "channel"),
    }
}

pub fn parse(text: &str) -> Result<InboundFrame, PusherError> {
    let frame: Frame = serde_json::from_str(text)?;
    let data = payload(frame.data.clone());

    let parsed = match frame.event.as_str() {
        "pusher:connection_established" => InboundFrame::ConnectionEstablished {
            socket_id: string_field(&data, &frame.event, "socket_id")?,
        },
        "pusher_internal:subscription_succeeded" => InboundFrame::SubscriptionSucceeded {
            channel: channel_of(&frame, &data)?,
        },
        "pusher:subscription_error" => {
            let reason = data
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| data.get("status").map(|status| format!("status {status}")))
                .unwrap_or_else(|| data.to_string());
            InboundFrame::SubscriptionError {
                channel: channel_of(&frame, &data)?,
                reason,
            }
        }
        "pusher_internal:member_added" => InboundFrame::MemberAdded {
            channel: channel_of(&frame, &data)?,
            user_id: string_field(&data, &frame.event, "user_id")?,
        },
        SIGNAL_EVENT => InboundFrame::Signal {
            channel: channel_of(&frame, &data)?,
            message: serde_json::from_value(data)?,
        },
        "pusher:ping" => InboundFrame::Ping,
        "pusher:pong" => InboundFrame::Pong,
        "pusher:error" => InboundFrame::Error {
            code: data
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok()),
            message: data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        _ => InboundFrame::Other { event: frame.event },
    };
    Ok(parsed)
}

fn encode(event: &str, channel: Option<&str>, data: Value) -> Result<String, PusherError> {
    let frame = Frame {
        event: event.to_string(),
        channel: channel.map(str::to_string),
        data,
    };
    Ok(serde_json::to_string(&frame)?)
}

pub fn subscribe_frame(channel: &str, auth: Option<&ChannelAuth>) -> Result<String, PusherError> {
    let mut data = json!({ "channel": channel });
    if let Some(auth) = auth {
        data["auth"] = Value::String(auth.auth.clone());
        if let Some(channel_data) = &auth.channel_data {
            data["channel_data"] = Value::String(channel_data.clone());
        }
    }
    encode("pusher:subscribe", None, data)
}

pub fn unsubscribe_frame(channel: &str) -> Result<String, PusherError> {
    encode("pusher:unsubscribe", None, json!({ "channel": channel }))
}

pub fn signin_frame(auth: &UserAuth) -> Result<String, PusherError> {
    encode(
        "pusher:signin",
        None,
        json!({ "auth": auth.auth, "user_data": auth.user_data }),
    )
}

pub fn signal_frame(channel: &str, message: &SignalMessage) -> Result<String, PusherError> {
    encode(SIGNAL_EVENT, Some(channel), serde_json::to_value(message)?)
}

pub fn pong_frame() -> Result<String, PusherError> {
    encode("pusher:pong", None, json!({}))
}
