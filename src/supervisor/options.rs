//! Construction-time supervisor options

use super::queue::DEFAULT_QUEUE_CAPACITY;
use crate::error::{SupervisorError, SupervisorResult};
use crate::transport::{Endpoint, Security, TransportOptions};
use std::time::Duration;

/// Delay before a failed connection is recreated
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_millis(120_000);

/// How long a publish may wait for its completion before the connection is reset
pub const DEFAULT_WAIT_CLOSE_TIMEOUT: Duration = Duration::from_millis(60_000);

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorOptions {
    pub endpoint: Endpoint,
    pub security: Security,
    pub retry_timeout: Duration,
    pub wait_close_timeout: Duration,
    pub queue_capacity: usize,
    pub transport: TransportOptions,
}

impl SupervisorOptions {
    /// Fails fast when host or port is missing
    pub fn new(host: impl Into<String>, port: u16, security: Security) -> SupervisorResult<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(SupervisorError::MissingParameter("host"));
        }
        if port == 0 {
            return Err(SupervisorError::MissingParameter("port"));
        }

        Ok(Self {
            endpoint: Endpoint { host, port },
            security,
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            wait_close_timeout: DEFAULT_WAIT_CLOSE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            transport: TransportOptions::default(),
        })
    }

    pub fn with_retry_timeout(mut self, retry_timeout: Duration) -> Self {
        self.retry_timeout = retry_timeout;
        self
    }

    pub fn with_wait_close_timeout(mut self, wait_close_timeout: Duration) -> Self {
        self.wait_close_timeout = wait_close_timeout;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Transport options; auto-reconnect is always switched off because the
    /// supervisor owns the reconnect policy
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = TransportOptions {
            auto_reconnect: false,
            ..transport
        };
        self
    }

    /// Validate values that cannot be expressed in the types
    pub fn validate(&self) -> SupervisorResult<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(SupervisorError::MissingParameter("host"));
        }
        if self.endpoint.port == 0 {
            return Err(SupervisorError::MissingParameter("port"));
        }
        if self.retry_timeout.is_zero() {
            return Err(SupervisorError::invalid_config("retry_timeout must be greater than 0"));
        }
        if self.wait_close_timeout.is_zero() {
            return Err(SupervisorError::invalid_config("wait_close_timeout must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(SupervisorError::invalid_config("queue_capacity must be greater than 0"));
        }
        Ok(())
    }
}
