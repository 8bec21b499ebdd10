//! Crate-level error types
//!
//! Only construction problems and caller requests that cannot be served are
//! errors. Transport failures never surface here: the supervisor recovers from
//! them and reports them as notifications.

use crate::config::ConfigError;
use crate::supervisor::ConnectionState;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for supervisor operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Missing required connection parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Supervisor has stopped")]
    Stopped,
}

impl SupervisorError {
    /// Create invalid configuration error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result alias for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;
