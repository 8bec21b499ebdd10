//! TOML configuration for the supervisor binary
//!
//! The library itself only needs [`SupervisorOptions`]; this module maps a
//! config file onto them and carries the extra settings the CLI uses
//! (subscriptions, credentials from the environment).

use crate::error::SupervisorResult;
use crate::supervisor::{
    SupervisorOptions, DEFAULT_QUEUE_CAPACITY, DEFAULT_RETRY_TIMEOUT, DEFAULT_WAIT_CLOSE_TIMEOUT,
};
use crate::transport::{Endpoint, QoS, Security, TransportOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Files tried, in order, when no config path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["mqtt-supervisor.toml", "config/mqtt-supervisor.toml"];

const DEFAULT_PLAIN_PORT: u16 = 1883;
const DEFAULT_SECURE_PORT: u16 = 8883;

/// Complete configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, e.g. `mqtts://broker.example.com:8883`
    pub url: Option<String>,
    /// Overrides the URL host
    pub host: Option<String>,
    /// Overrides the URL port
    pub port: Option<u16>,
    /// Overrides the URL scheme
    pub secure: Option<bool>,
    /// Client id prefix
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    pub max_packet_size: Option<u32>,
}

fn default_keep_alive_secs() -> u64 {
    60
}

/// Reconnect and queue tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorSection {
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    #[serde(default = "default_wait_close_timeout_ms")]
    pub wait_close_timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_retry_timeout_ms() -> u64 {
    DEFAULT_RETRY_TIMEOUT.as_millis() as u64
}

fn default_wait_close_timeout_ms() -> u64 {
    DEFAULT_WAIT_CLOSE_TIMEOUT.as_millis() as u64
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            retry_timeout_ms: default_retry_timeout_ms(),
            wait_close_timeout_ms: default_wait_close_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Topic subscribed on every connect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionConfig {
    pub topic: String,
    #[serde(default = "default_qos_level")]
    pub qos: u8,
}

fn default_qos_level() -> u8 {
    1
}

impl SubscriptionConfig {
    pub fn qos(&self) -> Result<QoS, ConfigError> {
        QoS::from_level(self.qos).ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "subscription '{}' has QoS {}; expected 0, 1 or 2",
                self.topic, self.qos
            ))
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SupervisorConfig {
    /// Load and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SupervisorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// First existing file among `explicit` or the default locations
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve_endpoint()?;

        let supervisor = &self.supervisor;
        if supervisor.retry_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "supervisor.retry_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if supervisor.wait_close_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "supervisor.wait_close_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if supervisor.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "supervisor.queue_capacity must be greater than 0".to_string(),
            ));
        }

        for subscription in &self.subscriptions {
            if subscription.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "subscription topic must not be empty".to_string(),
                ));
            }
            subscription.qos()?;
        }

        Ok(())
    }

    /// Broker address and constructor choice after applying overrides
    pub fn resolve_endpoint(&self) -> Result<(Endpoint, Security), ConfigError> {
        let broker = &self.broker;
        let mut host = None;
        let mut port = None;
        let mut security = Security::Plain;

        if let Some(raw) = &broker.url {
            let invalid = |reason: String| ConfigError::InvalidBrokerUrl {
                url: raw.clone(),
                reason,
            };
            let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
            security = match url.scheme() {
                "mqtt" | "tcp" => Security::Plain,
                "mqtts" | "ssl" => Security::Secure,
                other => return Err(invalid(format!("unsupported scheme '{other}'"))),
            };
            host = url.host_str().map(str::to_string);
            port = url.port();
        }

        if let Some(secure) = broker.secure {
            security = if secure { Security::Secure } else { Security::Plain };
        }
        if broker.host.is_some() {
            host = broker.host.clone();
        }
        if broker.port.is_some() {
            port = broker.port;
        }

        let host = host.filter(|h| !h.trim().is_empty()).ok_or_else(|| {
            ConfigError::InvalidConfig("broker.url or broker.host is required".to_string())
        })?;
        let port = port.unwrap_or(match security {
            Security::Plain => DEFAULT_PLAIN_PORT,
            Security::Secure => DEFAULT_SECURE_PORT,
        });
        if port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker port must be greater than 0".to_string(),
            ));
        }

        Ok((Endpoint { host, port }, security))
    }

    fn env_var(name: Option<&String>) -> Option<String> {
        name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::env_var(self.broker.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::env_var(self.broker.password_env.as_ref())
    }

    /// Subscriptions with their QoS resolved
    pub fn subscription_topics(&self) -> Result<Vec<(String, QoS)>, ConfigError> {
        self.subscriptions
            .iter()
            .map(|s| Ok((s.topic.clone(), s.qos()?)))
            .collect()
    }

    /// Build supervisor options, resolving credentials from the environment
    pub fn to_supervisor_options(&self) -> SupervisorResult<SupervisorOptions> {
        let (endpoint, security) = self.resolve_endpoint()?;
        let transport = TransportOptions {
            client_id: self.broker.client_id.clone(),
            username: self.get_mqtt_username(),
            password: self.get_mqtt_password(),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            max_packet_size: self
                .broker
                .max_packet_size
                .or(TransportOptions::default().max_packet_size),
            auto_reconnect: false,
        };

        let options = SupervisorOptions::new(endpoint.host, endpoint.port, security)?
            .with_retry_timeout(Duration::from_millis(self.supervisor.retry_timeout_ms))
            .with_wait_close_timeout(Duration::from_millis(self.supervisor.wait_close_timeout_ms))
            .with_queue_capacity(self.supervisor.queue_capacity)
            .with_transport(transport);
        options.validate()?;
        Ok(options)
    }

    /// Render back to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
