//! Transport capability consumed by the connection supervisor
//!
//! The supervisor never speaks MQTT itself. It asks a [`Connector`] for a fresh
//! [`Connection`] through one of two constructors (plain or secure) and learns
//! about that connection exclusively through the [`ConnectionEvents`] sink it
//! hands over at construction time.
//!
//! [`mqtt`] provides the rumqttc-backed implementation; `crate::testing` provides
//! an in-memory one for tests.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Correlation identifier assigned to every queued publish
pub type SequenceId = u64;

/// Identifies one connection handle; strictly increasing per supervisor
pub type Epoch = u64;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Map a numeric MQTT QoS level (0, 1, 2)
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Per-message publish options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
}

impl PublishOptions {
    pub fn new(qos: QoS, retain: bool) -> Self {
        Self { qos, retain }
    }
}

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            received_at: Utc::now(),
        }
    }

    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Which of the two connection constructors to invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Plain,
    Secure,
}

/// Broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Options forwarded untouched to the underlying client
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    /// Client id prefix; a random suffix is appended per connection
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub max_packet_size: Option<u32>,
    /// Whether the underlying client may reconnect on its own
    pub auto_reconnect: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            max_packet_size: Some(256 * 1024),
            auto_reconnect: false,
        }
    }
}

/// Events a connection reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection
    Connected,
    /// Message received on a subscribed topic
    Message(IncomingMessage),
    /// Transport closed
    Closed(String),
    /// Transport failed
    Errored(String),
    /// A publish started with [`Connection::publish`] finished
    PublishComplete {
        sequence_id: SequenceId,
        result: Result<(), String>,
    },
}

/// Sink through which one connection handle reports its events
///
/// Every event is stamped with the epoch of the handle it belongs to so the
/// owner can discard events from handles it already replaced.
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<(Epoch, TransportEvent)>,
}

impl ConnectionEvents {
    pub fn new(epoch: Epoch, tx: mpsc::UnboundedSender<(Epoch, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Returns false once the owner has gone away
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }

    pub fn connected(&self) -> bool {
        self.send(TransportEvent::Connected)
    }

    pub fn message(&self, message: IncomingMessage) -> bool {
        self.send(TransportEvent::Message(message))
    }

    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::Closed(reason.into()))
    }

    pub fn errored(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::Errored(reason.into()))
    }

    pub fn publish_complete(&self, sequence_id: SequenceId, result: Result<(), String>) -> bool {
        self.send(TransportEvent::PublishComplete {
            sequence_id,
            result,
        })
    }
}

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid transport options: {0}")]
    InvalidOptions(String),
}

/// One live connection attempt
///
/// Methods never block. Completion of a publish is reported later through
/// [`ConnectionEvents::publish_complete`] with the same sequence id.
pub trait Connection: Send + 'static {
    /// Submit a publish; the outcome arrives as a `PublishComplete` event
    fn publish(
        &mut self,
        sequence_id: SequenceId,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), TransportError>;

    /// Forward a subscription request
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Close the connection; the handle is never used again afterwards
    fn destroy(&mut self);
}

/// Factory for connection handles
pub trait Connector: Send + 'static {
    type Connection: Connection;

    /// Open an unencrypted connection
    fn connect_plain(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
        events: ConnectionEvents,
    ) -> Result<Self::Connection, TransportError>;

    /// Open a TLS connection
    fn connect_secure(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
        events: ConnectionEvents,
    ) -> Result<Self::Connection, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(QoS::from_level(0), Some(QoS::AtMostOnce));
        assert_eq!(QoS::from_level(1), Some(QoS::AtLeastOnce));
        assert_eq!(QoS::from_level(2), Some(QoS::ExactlyOnce));
        assert_eq!(QoS::from_level(3), None);
        assert_eq!(QoS::ExactlyOnce.level(), 2);
        assert_eq!(QoS::default(), QoS::AtLeastOnce);
    }

    #[test]
    fn test_transport_options_default_disables_auto_reconnect() {
        let options = TransportOptions::default();
        assert!(!options.auto_reconnect);
        assert_eq!(options.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_connection_events_stamp_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = ConnectionEvents::new(7, tx);

        assert!(events.connected());
        assert!(events.publish_complete(3, Ok(())));

        assert_eq!(rx.try_recv().unwrap(), (7, TransportEvent::Connected));
        assert_eq!(
            rx.try_recv().unwrap(),
            (
                7,
                TransportEvent::PublishComplete {
                    sequence_id: 3,
                    result: Ok(())
                }
            )
        );
    }

    #[test]
    fn test_connection_events_report_dropped_owner() {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = ConnectionEvents::new(1, tx);
        drop(rx);

        assert!(!events.closed("gone"));
    }

    #[test]
    fn test_incoming_message_lossy_payload() {
        let message = IncomingMessage::new("a/b", vec![0x68, 0x69, 0xff], QoS::AtMostOnce, false);
        assert_eq!(message.payload_lossy(), "hi\u{fffd}");
    }
}
