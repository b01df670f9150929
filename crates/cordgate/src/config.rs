use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::intents::IntentsSpec;

/// Environment variable consulted when `bot.token` is empty.
pub const TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    /// Fill an empty token from [`TOKEN_ENV`] and reject a config without one.
    pub fn resolve_token(mut self) -> Result<Self, ConfigError> {
        if self.bot.token.is_empty()
            && let Ok(token) = std::env::var(TOKEN_ENV)
        {
            self.bot.token = token;
        }
        if self.bot.token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(self)
    }

    /// REST base URL, honoring the sandbox flag.
    pub fn api_base_url(&self) -> &str {
        if self.bot.sandbox {
            &self.api.sandbox_base_url
        } else {
            &self.api.base_url
        }
    }
}

// ============================================================================
// BotConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_intents")]
    pub intents: IntentsSpec,
    /// Drop events authored by the bot itself.
    #[serde(default = "default_ignore_self")]
    pub ignore_self: bool,
    /// Route REST calls to `api.sandbox_base_url`.
    #[serde(default)]
    pub sandbox: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            intents: default_intents(),
            ignore_self: default_ignore_self(),
            sandbox: false,
        }
    }
}

fn default_intents() -> IntentsSpec {
    IntentsSpec::Names(vec![
        "GUILDS".to_string(),
        "GUILD_MESSAGES".to_string(),
        "DIRECT_MESSAGES".to_string(),
        "MESSAGE_CONTENT".to_string(),
    ])
}

fn default_ignore_self() -> bool {
    true
}

// ============================================================================
// GatewayConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    /// Consecutive failed connections tolerated before the session is dead.
    #[serde(default = "default_max_reconnect_count")]
    pub max_reconnect_count: u32,
    /// Delay before each reconnect attempt. Zero reconnects immediately.
    #[serde(default)]
    pub reconnect_interval_ms: u64,
    /// Overrides the interval announced by HELLO.
    #[serde(default)]
    pub heartbeat_interval_ms: Option<u64>,
}

impl GatewayConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_override(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            max_reconnect_count: default_max_reconnect_count(),
            reconnect_interval_ms: 0,
            heartbeat_interval_ms: None,
        }
    }
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_max_reconnect_count() -> u32 {
    10
}

// ============================================================================
// ApiConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_base_url")]
    pub sandbox_base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            sandbox_base_url: default_api_base_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

// ============================================================================
// ProxyConfig
// ============================================================================

/// HTTP proxy used for both the gateway socket and REST calls.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("no bot token configured (set bot.token or {TOKEN_ENV})")]
    MissingToken,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.bot.token.is_empty());
        assert!(config.bot.ignore_self);
        assert!(!config.bot.sandbox);
        assert_eq!(config.gateway.max_reconnect_count, 10);
        assert_eq!(config.gateway.reconnect_interval(), Duration::ZERO);
        assert_eq!(config.gateway.heartbeat_override(), None);
        assert_eq!(config.api.request_timeout_seconds, 30);
        assert_eq!(config.api_base_url(), "https://discord.com/api/v10");
        assert!(config.proxy.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing_path).await.unwrap();
        assert_eq!(config.gateway.max_reconnect_count, 10);
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bot:
  token: "abc"
  intents: [GUILDS, DIRECT_MESSAGE]
  ignore_self: false
  sandbox: true
gateway:
  url: "wss://example.test/gw"
  max_reconnect_count: 3
  reconnect_interval_ms: 500
  heartbeat_interval_ms: 20000
api:
  base_url: "https://api.example.test"
  sandbox_base_url: "https://sandbox.example.test"
proxy:
  host: "127.0.0.1"
  port: 7890
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.bot.token, "abc");
        assert!(!config.bot.ignore_self);
        assert_eq!(
            config.bot.intents,
            IntentsSpec::Names(vec!["GUILDS".to_string(), "DIRECT_MESSAGE".to_string()])
        );
        assert_eq!(config.gateway.url, "wss://example.test/gw");
        assert_eq!(config.gateway.max_reconnect_count, 3);
        assert_eq!(config.gateway.reconnect_interval(), Duration::from_millis(500));
        assert_eq!(
            config.gateway.heartbeat_override(),
            Some(Duration::from_secs(20))
        );
        assert_eq!(config.api_base_url(), "https://sandbox.example.test");
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.url(), "http://127.0.0.1:7890");
    }

    #[tokio::test]
    async fn test_load_numeric_intents() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "bot:\n  intents: 513\n").unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.bot.intents, IntentsSpec::Bits(513));
        assert!(config.bot.ignore_self); // default
        assert_eq!(config.gateway.max_reconnect_count, 10); // default
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(file.path()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_token_keeps_configured_token() {
        let mut config = Config::default();
        config.bot.token = "configured".to_string();
        let config = config.resolve_token().unwrap();
        assert_eq!(config.bot.token, "configured");
    }

    #[test]
    fn test_config_error_display() {
        let io_error = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(io_error.to_string().contains("failed to read config file"));
        assert!(ConfigError::MissingToken.to_string().contains(TOKEN_ENV));
    }
}
