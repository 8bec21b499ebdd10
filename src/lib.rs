//! Self-healing MQTT connection supervisor
//!
//! # Overview
//!
//! This crate keeps exactly one MQTT connection handle alive across transport
//! failures and drains an ordered, bounded publish queue through it:
//! - one live connection handle at a time, recreated after a fixed retry delay
//! - one publish in flight, correlated to its completion by sequence id
//! - a stall watchdog that resets the connection when a publish never completes
//! - lifecycle notifications (`Connect`, `Message`, `Close`, `Error`) for observers
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_supervisor::supervisor::{Notification, Supervisor, SupervisorOptions};
//! use mqtt_supervisor::testing::MockConnector;
//! use mqtt_supervisor::transport::{PublishOptions, Security};
//!
//! # tokio_test::block_on(async {
//! let connector = MockConnector::new();
//! let options = SupervisorOptions::new("localhost", 1883, Security::Plain).unwrap();
//! let (handle, _task) = Supervisor::spawn(options, connector.clone()).unwrap();
//! let mut events = handle.events();
//!
//! handle.publish("sensors/temperature", "21.5", PublishOptions::default());
//! handle.snapshot().await.unwrap();
//!
//! // The broker accepts the connection; the queued message is published
//! connector.latest_events().unwrap().connected();
//! assert_eq!(events.recv().await.unwrap(), Notification::Connect);
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, SupervisorConfig};
pub use error::{SupervisorError, SupervisorResult};
pub use supervisor::{
    ConnectionState, Notification, Supervisor, SupervisorHandle, SupervisorOptions,
    SupervisorSnapshot, SupervisorStats,
};
pub use transport::mqtt::RumqttcConnector;
pub use transport::{IncomingMessage, PublishOptions, QoS, Security};
