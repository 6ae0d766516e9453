//! Application configuration management.
//!
//! Configuration is stored at `~/.config/quickchat/config.json`. Every field
//! has a default, so a missing file yields a working local setup. A few
//! fields can be overridden from the environment (see [`Config::apply_env`]).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "quickchat";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// 30s allows for slow backends while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_BACKEND_URL: &str = "QUICKCHAT_BACKEND_URL";
const ENV_TOKEN_STORAGE: &str = "QUICKCHAT_TOKEN_STORAGE";

/// Where the session token is persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorage {
    /// `session.json` in the data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

impl std::str::FromStr for TokenStorage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(TokenStorage::File),
            "keyring" | "keychain" => Ok(TokenStorage::Keyring),
            other => Err(anyhow::anyhow!("Unknown token storage: {}", other)),
        }
    }
}

/// Presence channel settings. Reconnection here is the transport's own
/// behavior; the session layer never reconnects by itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub enabled: bool,
    /// Maximum reconnect attempts after a lost connection (0 = unlimited)
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub reconnect_delay_max_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            reconnect_delay_max_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub request_timeout_secs: u64,
    pub token_storage: TokenStorage,
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
    pub presence: PresenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            token_storage: TokenStorage::default(),
            data_dir: None,
            presence: PresenceConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `QUICKCHAT_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(
            std::env::var(ENV_BACKEND_URL).ok(),
            std::env::var(ENV_TOKEN_STORAGE).ok(),
        )
    }

    fn apply_overrides(
        &mut self,
        backend_url: Option<String>,
        token_storage: Option<String>,
    ) -> Result<()> {
        if let Some(url) = backend_url.filter(|u| !u.trim().is_empty()) {
            self.backend_url = url.trim().to_string();
        }
        if let Some(storage) = token_storage {
            self.token_storage = storage.parse()?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Backend URL without a trailing slash
    pub fn api_base(&self) -> &str {
        self.backend_url.trim_end_matches('/')
    }

    /// Websocket endpoint derived from the backend URL (`http` → `ws`, `https` → `wss`)
    pub fn socket_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(self.api_base())
            .with_context(|| format!("Invalid backend URL: {}", self.backend_url))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(anyhow::anyhow!("Unsupported backend URL scheme: {}", other)),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Cannot derive websocket URL from {}", self.backend_url))?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend_url, "http://localhost:5000");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.token_storage, TokenStorage::File);
        assert!(config.presence.enabled);
        assert_eq!(config.presence.reconnect_attempts, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"backend_url": "https://chat.example.com", "presence": {"enabled": false}}"#)
                .expect("partial config should parse");
        assert_eq!(config.backend_url, "https://chat.example.com");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(!config.presence.enabled);
        assert_eq!(config.presence.reconnect_delay_ms, 1000);
    }

    #[test]
    fn test_token_storage_parse() {
        assert_eq!("file".parse::<TokenStorage>().unwrap(), TokenStorage::File);
        assert_eq!("Keyring".parse::<TokenStorage>().unwrap(), TokenStorage::Keyring);
        assert_eq!("keychain".parse::<TokenStorage>().unwrap(), TokenStorage::Keyring);
        assert!("redis".parse::<TokenStorage>().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(Some("https://api.example.com/".into()), Some("keyring".into()))
            .unwrap();
        assert_eq!(config.backend_url, "https://api.example.com/");
        assert_eq!(config.api_base(), "https://api.example.com");
        assert_eq!(config.token_storage, TokenStorage::Keyring);

        // Blank URL is ignored
        config.apply_overrides(Some("  ".into()), None).unwrap();
        assert_eq!(config.api_base(), "https://api.example.com");
    }

    #[test]
    fn test_socket_url() {
        let mut config = Config::default();
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://localhost:5000/");

        config.backend_url = "https://chat.example.com/".into();
        assert_eq!(config.socket_url().unwrap().as_str(), "wss://chat.example.com/");

        config.backend_url = "ftp://chat.example.com".into();
        assert!(config.socket_url().is_err());
    }
}
