//! rumqttc-backed implementation of the connection capability
//!
//! # Architecture
//!
//! - [`connection`] - Pure option building (plain vs TLS, credentials, client ids)
//! - [`message_handler`] - Pure event routing and publish acknowledgement tracking
//! - [`client`] - Impure I/O: the connector, connection handles and poll tasks
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_supervisor::supervisor::{Supervisor, SupervisorOptions};
//! use mqtt_supervisor::transport::mqtt::RumqttcConnector;
//! use mqtt_supervisor::transport::{PublishOptions, Security};
//!
//! # tokio_test::block_on(async {
//! let options = SupervisorOptions::new("localhost", 1883, Security::Plain)?;
//! let (handle, _task) = Supervisor::spawn(options, RumqttcConnector)?;
//! handle.publish("sensors/temp", "21.5", PublishOptions::default());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{RumqttcConnection, RumqttcConnector};
pub use connection::configure_mqtt_options;
pub use message_handler::{EventRoute, MessageHandler, PublishTracker};
