//! Impure I/O for rumqttc-backed connection handles
//!
//! Each [`RumqttcConnection`] owns one rumqttc `AsyncClient` plus a spawned task
//! polling its `EventLoop`. The poll task translates rumqttc events into
//! [`ConnectionEvents`] and, unless auto-reconnect was explicitly allowed, stops
//! on the first error so rumqttc never re-dials behind the supervisor's back.
//! A refused publish is completed with an error before that error is reported.

use super::connection::{configure_mqtt_options, to_rumqttc_qos};
use super::message_handler::{EventRoute, MessageHandler, PublishTracker};
use crate::observability::logging::transport_span;
use crate::transport::{
    Connection, ConnectionEvents, Connector, Endpoint, PublishOptions, QoS, Security, SequenceId,
    TransportError, TransportOptions,
};
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the request channel between `AsyncClient` and `EventLoop`
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Pause between polls when rumqttc is allowed to reconnect by itself
const AUTO_RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Opens rumqttc connections
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcConnector;

impl Connector for RumqttcConnector {
    type Connection = RumqttcConnection;

    fn connect_plain(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
        events: ConnectionEvents,
    ) -> Result<Self::Connection, TransportError> {
        RumqttcConnection::open(endpoint, options, Security::Plain, events)
    }

    fn connect_secure(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
        events: ConnectionEvents,
    ) -> Result<Self::Connection, TransportError> {
        RumqttcConnection::open(endpoint, options, Security::Secure, events)
    }
}

/// One rumqttc client plus its poll task
pub struct RumqttcConnection {
    client: AsyncClient,
    tracker: Arc<Mutex<PublishTracker>>,
    poll_handle: Option<JoinHandle<()>>,
    epoch: u64,
}

impl RumqttcConnection {
    /// Create the client and start polling; must run inside a tokio runtime
    pub fn open(
        endpoint: &Endpoint,
        options: &TransportOptions,
        security: Security,
        events: ConnectionEvents,
    ) -> Result<Self, TransportError> {
        let mqtt_options = configure_mqtt_options(endpoint, options, security)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let tracker = Arc::new(Mutex::new(PublishTracker::new()));
        let epoch = events.epoch();

        info!(
            host = %endpoint.host,
            port = endpoint.port,
            ?security,
            epoch,
            "Opening MQTT connection"
        );

        let span = transport_span!(host = %endpoint.host, port = endpoint.port, epoch);
        let poll_handle = tokio::spawn(
            Self::poll_event_loop(event_loop, events, tracker.clone(), options.auto_reconnect)
                .instrument(span),
        );

        Ok(Self {
            client,
            tracker,
            poll_handle: Some(poll_handle),
            epoch,
        })
    }

    /// Drive the rumqttc event loop until it fails or the handle is destroyed
    async fn poll_event_loop(
        mut event_loop: EventLoop,
        events: ConnectionEvents,
        tracker: Arc<Mutex<PublishTracker>>,
        auto_reconnect: bool,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    if !Self::process_event_route(route, &events, &tracker) {
                        break;
                    }
                }
                Err(e) => {
                    if let Some(reason) = MessageHandler::publish_refusal(&e) {
                        let refused = lock(&tracker).take_unacknowledged();
                        if let Some(sequence_id) = refused {
                            warn!(sequence_id, %reason, "Broker refused publish");
                            if !events.publish_complete(sequence_id, Err(reason)) {
                                break;
                            }
                        }
                    }
                    error!("MQTT event loop error: {}", e);
                    if !events.errored(e.to_string()) {
                        break;
                    }
                    if !auto_reconnect {
                        events.closed("connection lost");
                        break;
                    }
                    tokio::time::sleep(AUTO_RECONNECT_PAUSE).await;
                }
            }
        }
        debug!("MQTT poll task stopped");
    }

    /// Returns false once the event sink is gone
    fn process_event_route(
        route: EventRoute,
        events: &ConnectionEvents,
        tracker: &Arc<Mutex<PublishTracker>>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => events.connected(),
            EventRoute::MessageReceived(message) => {
                debug!("Received MQTT message on topic: {}", message.topic);
                events.message(message)
            }
            EventRoute::PublishSent(pkid) => match lock(tracker).on_publish_sent(pkid) {
                Some(sequence_id) => events.publish_complete(sequence_id, Ok(())),
                None => true,
            },
            EventRoute::PublishAcknowledged(pkid) => {
                match lock(tracker).on_publish_acknowledged(pkid) {
                    Some(sequence_id) => events.publish_complete(sequence_id, Ok(())),
                    None => true,
                }
            }
            EventRoute::PublishRefused { pkid, reason } => {
                match lock(tracker).on_publish_acknowledged(pkid) {
                    Some(sequence_id) => {
                        warn!(sequence_id, %reason, "Broker refused publish");
                        events.publish_complete(sequence_id, Err(reason))
                    }
                    None => true,
                }
            }
            EventRoute::Disconnected => {
                warn!("Broker sent DISCONNECT");
                events.closed("broker disconnected");
                false
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!("MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }
}

fn lock(tracker: &Mutex<PublishTracker>) -> MutexGuard<'_, PublishTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection for RumqttcConnection {
    fn publish(
        &mut self,
        sequence_id: SequenceId,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        // Register first: the poll task may observe the outgoing packet before
        // try_publish returns.
        lock(&self.tracker).submitted(sequence_id, options.qos);

        let result = self.client.try_publish(
            topic,
            to_rumqttc_qos(options.qos),
            options.retain,
            payload,
        );
        if let Err(e) = result {
            lock(&self.tracker).rejected(sequence_id);
            return Err(TransportError::PublishFailed(Box::new(e)));
        }
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, to_rumqttc_qos(qos))
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))
    }

    fn destroy(&mut self) {
        // Best effort; the request is lost if the event loop is already gone
        let _ = self.client.try_disconnect();
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
            info!(epoch = self.epoch, "MQTT connection destroyed");
        }
    }
}

impl Drop for RumqttcConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_refused_connection_reports_error_then_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = ConnectionEvents::new(1, tx);
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port: 1,
        };

        let mut connection = RumqttcConnector
            .connect_plain(&endpoint, &TransportOptions::default(), events)
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event before timeout")
            .expect("channel open");
        assert!(matches!(first, (1, TransportEvent::Errored(_))));

        let second = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event before timeout")
            .expect("channel open");
        assert_eq!(second, (1, TransportEvent::Closed("connection lost".to_string())));

        connection.destroy();
    }

    #[tokio::test]
    async fn test_rejects_invalid_endpoint() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint {
            host: String::new(),
            port: 1883,
        };

        let result = RumqttcConnector.connect_secure(
            &endpoint,
            &TransportOptions::default(),
            ConnectionEvents::new(1, tx),
        );
        assert!(matches!(result, Err(TransportError::InvalidOptions(_))));
    }
}
