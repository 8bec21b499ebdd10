//! In-memory transport for testing
//!
//! [`MockConnector`] records every connection handle it creates together with
//! the event sink it was given, so tests can play the broker: report connects,
//! complete publishes, close or fail the transport.

use crate::transport::{
    Connection, ConnectionEvents, Connector, Endpoint, Epoch, PublishOptions, QoS, Security,
    SequenceId, TransportError, TransportOptions,
};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A publish submitted to a mock connection
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    pub epoch: Epoch,
    pub sequence_id: SequenceId,
    pub topic: String,
    pub payload: Bytes,
    pub options: PublishOptions,
}

/// A subscription forwarded to a mock connection
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRecord {
    pub epoch: Epoch,
    pub topic: String,
    pub qos: QoS,
}

/// One constructed connection handle
#[derive(Debug, Clone)]
pub struct HandleRecord {
    pub epoch: Epoch,
    pub security: Security,
    pub endpoint: Endpoint,
    pub options: TransportOptions,
    pub destroyed: bool,
    pub events: ConnectionEvents,
}

#[derive(Debug, Default)]
struct MockState {
    handles: Vec<HandleRecord>,
    publishes: Vec<PublishRecord>,
    subscriptions: Vec<SubscribeRecord>,
    failing_connects: usize,
    reject_publishes: bool,
    reject_subscribes: bool,
}

/// Mock connector; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock_state(&self.state)
    }

    /// Make the next `count` constructor calls fail
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    /// Make `publish` return an error instead of recording
    pub fn reject_publishes(&self, reject: bool) {
        self.lock().reject_publishes = reject;
    }

    pub fn reject_subscribes(&self, reject: bool) {
        self.lock().reject_subscribes = reject;
    }

    pub fn handles(&self) -> Vec<HandleRecord> {
        self.lock().handles.clone()
    }

    pub fn handle_count(&self) -> usize {
        self.lock().handles.len()
    }

    /// Handles not yet destroyed
    pub fn live_handle_count(&self) -> usize {
        self.lock().handles.iter().filter(|h| !h.destroyed).count()
    }

    /// Event sink of the most recently created handle
    pub fn latest_events(&self) -> Option<ConnectionEvents> {
        self.lock().handles.last().map(|h| h.events.clone())
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.lock().publishes.clone()
    }

    pub fn published_sequence_ids(&self) -> Vec<SequenceId> {
        self.lock().publishes.iter().map(|p| p.sequence_id).collect()
    }

    pub fn subscriptions(&self) -> Vec<SubscribeRecord> {
        self.lock().subscriptions.clone()
    }

    fn open(
        &self,
        security: Security,
        endpoint: &Endpoint,
        options: &TransportOptions,
        events: ConnectionEvents,
    ) -> Result<MockConnection, TransportError> {
        let mut state = self.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::ConnectionFailed(
                "mock connect failure".to_string().into(),
            ));
        }

        let epoch = events.epoch();
        state.handles.push(HandleRecord {
            epoch,
            security,
            endpoint: endpoint.clone(),
            options: options.clone(),
            destroyed: false,
            events,
        });

        Ok(MockConnection {
            index: state.handles.len() - 1,
            epoch,
            state: Arc::clone(&self.state),
        })
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect_plain(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
        events: ConnectionEvents,
    ) -> Result<MockConnection, TransportError> {
        self.open(Security::Plain, endpoint, options, events)
    }

    fn connect_secure(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
        events: ConnectionEvents,
    ) -> Result<MockConnection, TransportError> {
        self.open(Security::Secure, endpoint, options, events)
    }
}

/// Connection handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockConnection {
    index: usize,
    epoch: Epoch,
    state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    fn publish(
        &mut self,
        sequence_id: SequenceId,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        let mut state = lock_state(&self.state);
        if state.reject_publishes || state.handles[self.index].destroyed {
            return Err(TransportError::PublishFailed(
                "mock publish rejected".to_string().into(),
            ));
        }
        state.publishes.push(PublishRecord {
            epoch: self.epoch,
            sequence_id,
            topic: topic.to_string(),
            payload,
            options,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let mut state = lock_state(&self.state);
        if state.reject_subscribes {
            return Err(TransportError::SubscriptionFailed(
                "mock subscribe rejected".to_string().into(),
            ));
        }
        state.subscriptions.push(SubscribeRecord {
            epoch: self.epoch,
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    fn destroy(&mut self) {
        lock_state(&self.state).handles[self.index].destroyed = true;
    }
}

fn lock_state(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use tokio::sync::mpsc;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "localhost".to_string(),
            port: 1883,
        }
    }

    #[test]
    fn test_mock_connector_records_handles_and_publishes() {
        let connector = MockConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut connection = connector
            .connect_secure(&endpoint(), &TransportOptions::default(), ConnectionEvents::new(4, tx))
            .unwrap();
        connection
            .publish(1, "a/b", Bytes::from_static(b"hi"), PublishOptions::default())
            .unwrap();

        assert_eq!(connector.handle_count(), 1);
        assert_eq!(connector.handles()[0].security, Security::Secure);
        assert_eq!(connector.published()[0].epoch, 4);

        connector.latest_events().unwrap().connected();
        assert_eq!(rx.try_recv().unwrap(), (4, TransportEvent::Connected));
    }

    #[test]
    fn test_mock_connector_failures_and_destroy() {
        let connector = MockConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        connector.fail_next_connects(1);

        let first = connector.connect_plain(
            &endpoint(),
            &TransportOptions::default(),
            ConnectionEvents::new(1, tx.clone()),
        );
        assert!(first.is_err());

        let mut connection = connector
            .connect_plain(&endpoint(), &TransportOptions::default(), ConnectionEvents::new(2, tx))
            .unwrap();
        connection.destroy();

        assert_eq!(connector.live_handle_count(), 0);
        assert!(connection
            .publish(1, "a", Bytes::new(), PublishOptions::default())
            .is_err());
    }
}
