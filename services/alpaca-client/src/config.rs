//! Configuration types for the Alpaca client

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::Endpoint;

/// Alpaca connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    /// Composite `"Name:Type:Number"` of the selected device
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Fixed ClientID; a random one is drawn per connection manager when unset
    #[serde(default)]
    pub client_id: Option<u16>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Bounded retry of the connect handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Cadence of the status heartbeat and the data refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub status_interval_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub data_interval_ms: u64,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            host: default_host(),
            port: default_port(),
            api_version: default_api_version(),
            device_name: String::new(),
            user: None,
            password: None,
            client_id: None,
            request_timeout_ms: default_request_timeout(),
            discovery_timeout_ms: default_discovery_timeout(),
            discovery_port: default_discovery_port(),
            connect: ConnectConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: default_poll_interval(),
            data_interval_ms: default_poll_interval(),
        }
    }
}

impl AlpacaConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            protocol: self.protocol.clone(),
            host: self.host.clone(),
            port: self.port,
            api_version: self.api_version,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Reject settings the client cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.polling.status_interval_ms == 0 || self.polling.data_interval_ms == 0 {
            return Err(crate::AlpacaError::Config(
                "polling intervals must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 || self.discovery_timeout_ms == 0 {
            return Err(crate::AlpacaError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Basic auth credentials, when a user is configured
    pub fn credentials(&self) -> Option<(String, String)> {
        self.user
            .as_ref()
            .filter(|user| !user.is_empty())
            .map(|user| (user.clone(), self.password.clone().unwrap_or_default()))
    }
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    11111
}

fn default_api_version() -> u32 {
    1
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_discovery_timeout() -> u64 {
    5_000
}

fn default_discovery_port() -> u16 {
    32227
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_delay() -> u64 {
    250
}

fn default_poll_interval() -> u64 {
    1000
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<AlpacaConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::AlpacaError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: AlpacaConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "protocol": "https",
            "host": "observatory.local",
            "port": 32323,
            "api_version": 1,
            "device_name": "Roof:safetymonitor:0",
            "user": "observer",
            "password": "clear-skies",
            "client_id": 4242,
            "request_timeout_ms": 8000,
            "discovery_timeout_ms": 3000,
            "discovery_port": 32228,
            "connect": { "max_attempts": 5, "retry_delay_ms": 100 },
            "polling": { "status_interval_ms": 3000, "data_interval_ms": 500 }
        }"#;

        let config: AlpacaConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.endpoint().server_url(), "https://observatory.local:32323");
        assert_eq!(config.device_name, "Roof:safetymonitor:0");
        assert_eq!(config.client_id, Some(4242));
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.discovery_timeout(), Duration::from_secs(3));
        assert_eq!(config.discovery_port, 32228);
        assert_eq!(config.connect.max_attempts, 5);
        assert_eq!(config.connect.retry_delay_ms, 100);
        assert_eq!(config.polling.status_interval_ms, 3000);
        assert_eq!(config.polling.data_interval_ms, 500);
        assert_eq!(
            config.credentials(),
            Some(("observer".to_string(), "clear-skies".to_string()))
        );
    }

    #[test]
    fn parse_minimal_config() {
        let config: AlpacaConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.endpoint(), Endpoint::default());
        assert!(config.device_name.is_empty());
        assert_eq!(config.client_id, None);
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.discovery_timeout_ms, 5_000);
        assert_eq!(config.discovery_port, 32227);
        assert_eq!(config.connect.max_attempts, 10);
        assert_eq!(config.connect.retry_delay_ms, 250);
        assert_eq!(config.polling.status_interval_ms, 1000);
        assert_eq!(config.polling.data_interval_ms, 1000);
        assert_eq!(config.credentials(), None);
    }

    #[test]
    fn empty_user_means_no_credentials() {
        let config: AlpacaConfig =
            serde_json::from_str(r#"{ "user": "", "password": "x" }"#).unwrap();
        assert_eq!(config.credentials(), None);
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpaca.json");
        std::fs::write(&path, r#"{ "host": "10.0.0.2", "port": 11112 }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, 11112);
    }

    #[test]
    fn load_config_missing_file_is_config_error() {
        let err = load_config(Path::new("/nonexistent/alpaca.json")).unwrap_err();
        assert!(matches!(err, crate::AlpacaError::Config(_)), "{err:?}");
    }

    #[test]
    fn load_config_rejects_zero_poll_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpaca.json");
        std::fs::write(&path, r#"{ "polling": { "status_interval_ms": 0 } }"#).unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, crate::AlpacaError::Config(_)), "{err:?}");
    }

    #[test]
    fn defaults_are_valid() {
        assert!(AlpacaConfig::default().validate().is_ok());
    }
}
