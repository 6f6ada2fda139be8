use super::model::*;

pub const DEFAULT_CHANNEL_NAMESPACE: &str = "presence-vaultsync";
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "vault-sync";
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            app_key: String::new(),
            host: "ws.pusherapp.com".to_string(),
            use_tls: true,
            channel_namespace: DEFAULT_CHANNEL_NAMESPACE.to_string(),
            auth_endpoint: String::new(),
            user_auth_endpoint: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            default_relay: RelayConfig::default(),
            ice_servers: Vec::new(),
            default_ice_servers: vec![IceServer {
                id: "default-stun".to_string(),
                urls: vec![
                    "stun:stun.l.google.com:19302".to_string(),
                    "stun:stun1.l.google.com:19302".to_string(),
                ],
                username: None,
                credential: None,
            }],
            sync_on_connect: true,
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}
