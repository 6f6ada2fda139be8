//! # Configuration Loader
//!
//! Reads a TOML file into [`AppConfig`]. Missing sections and keys take their
//! defaults; nothing is validated here. A relay reference that does not
//! resolve is reported later, when a device using it is connected.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use vs_core::SyncConfig;

/// Where log files go. File logging is off without a directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_name: "vaultsync.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns error if the file cannot be read or its content is not a valid
/// configuration document.
pub fn load_config(config_path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    toml::from_str(&content).context("Failed to parse config as TOML")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_reads_relays_and_ice_servers() {
        let file = write(
            r#"
            [sync]
            sync_on_connect = false
            data_channel_label = "vault"

            [sync.default_relay]
            id = "main"
            app_key = "abc"
            host = "relay.example.org"
            auth_endpoint = "https://auth.example.org/channel"

            [[sync.relays]]
            id = "eu"
            host = "relay.eu.example.org"
            use_tls = false

            [[sync.ice_servers]]
            id = "turn-eu"
            urls = ["turn:turn.example.org:3478"]
            username = "user"
            credential = "secret"

            [logging]
            directory = "/var/log/vaultsync"
        "#,
        );

        let config = load_config(file.path()).unwrap();

        assert!(!config.sync.sync_on_connect);
        assert_eq!(config.sync.data_channel_label, "vault");
        assert_eq!(config.sync.default_relay.id.as_str(), "main");
        assert_eq!(config.sync.relays[0].host, "relay.eu.example.org");
        assert!(!config.sync.relays[0].use_tls);
        assert_eq!(config.sync.ice_servers[0].username.as_deref(), Some("user"));
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/vaultsync"))
        );
        assert_eq!(config.logging.file_name, "vaultsync.log");
    }

    #[test]
    fn test_load_config_fills_missing_sections_with_defaults() {
        let file = write("");

        let config = load_config(file.path()).unwrap();

        assert_eq!(config, AppConfig::default());
        assert!(config.sync.sync_on_connect);
        assert_eq!(config.logging.directory, None);
    }

    #[test]
    fn test_load_config_does_not_validate_relay_references() {
        let file = write(
            r#"
            [[sync.relays]]
            id = ""
            host = ""
        "#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sync.relays[0].id.as_str(), "");
    }

    #[test]
    fn test_load_config_returns_io_error_on_file_not_found() {
        let result = load_config(Path::new("/this/path/does/not/exist/config.toml"));

        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("Failed to read config file"),
            "Expected IO error message, got: {err}"
        );
    }

    #[test]
    fn test_load_config_rejects_malformed_toml() {
        let file = write("[sync\nsync_on_connect = ");

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config as TOML"));
    }
}
