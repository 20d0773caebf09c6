//! Configuration management for meeting-core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod env;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// ICE configuration
    #[serde(default)]
    pub ice: IceConfig,

    /// Local capture and teardown configuration
    #[serde(default)]
    pub media: MediaConfig,

    /// Negotiation behavior
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    /// Signaling endpoint and identity
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Active meeting persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Fixed ICE configuration: public STUN only, no TURN
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(default = "default_stun_urls")]
    pub stun_urls: Vec<String>,

    /// Gather 127.0.0.1 host candidates; only useful when every peer runs on this host
    #[serde(default)]
    pub include_loopback: bool,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self { stun_urls: default_stun_urls(), include_loopback: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Request microphone on start
    #[serde(default = "default_true")]
    pub want_audio: bool,

    /// Request camera on start
    #[serde(default = "default_true")]
    pub want_video: bool,

    /// Fallback delay between stopping tracks and releasing the capture device
    #[serde(default = "default_release_grace_ms")]
    pub release_grace_ms: u64,

    /// Release as soon as the rendering layer reports its view detached
    #[serde(default = "default_true")]
    pub wait_for_view_detach: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            want_audio: true,
            want_video: true,
            release_grace_ms: default_release_grace_ms(),
            wait_for_view_detach: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Send a fresh offer when a connection reports failed/disconnected
    #[serde(default)]
    pub renegotiate_on_failure: bool,

    #[serde(default = "default_renegotiate_delay_ms")]
    pub renegotiate_delay_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            renegotiate_on_failure: false,
            renegotiate_delay_ms: default_renegotiate_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignalingConfig {
    /// WebSocket signaling endpoint (ws:// or wss://)
    #[serde(default)]
    pub url: Option<String>,

    /// The local user's id, used for self-filtering and glare tie-breaks
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where the active meeting record is kept; disabled when unset
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { state_file: None, max_age_secs: default_max_age_secs() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.ice.stun_urls.is_empty() {
            return Err("At least one STUN server is required".into());
        }

        for url in &self.ice.stun_urls {
            if url.starts_with("turn:") || url.starts_with("turns:") {
                return Err(format!("TURN servers are not supported: {}", url).into());
            }
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(format!("Invalid STUN URL: {}", url).into());
            }
        }

        if self.media.release_grace_ms == 0 {
            return Err("Media release grace delay must be non-zero".into());
        }

        if self.signaling.user_id.trim().is_empty() {
            return Err("Signaling user_id must be set".into());
        }

        if let Some(ref url) = self.signaling.url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err("Signaling url must use ws:// or wss://".into());
            }
        }

        if self.storage.max_age_secs == 0 {
            return Err("Storage max_age_secs must be non-zero".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    fn valid() -> Config {
        let mut cfg = Config::default();
        cfg.signaling.user_id = "u1".to_string();
        cfg
    }

    #[test]
    fn defaults_validate_once_user_is_set() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_turn_servers() {
        let mut cfg = valid();
        cfg.ice.stun_urls.push("turn:relay.example.com:3478".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_grace() {
        let mut cfg = valid();
        cfg.media.release_grace_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [media]
            release_grace_ms = 750

            [signaling]
            user_id = "alice"
            url = "ws://127.0.0.1:9000/meeting"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.media.release_grace_ms, 750);
        assert!(cfg.media.want_audio);
        assert_eq!(cfg.ice.stun_urls.len(), 2);
        assert!(!cfg.ice.include_loopback);
        assert!(cfg.validate().is_ok());
    }
}

fn default_true() -> bool {
    true
}

fn default_stun_urls() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

fn default_release_grace_ms() -> u64 { 500 }
fn default_renegotiate_delay_ms() -> u64 { 1000 }
fn default_max_age_secs() -> u64 { 60 * 60 }
