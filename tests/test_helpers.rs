//! Test helpers and utilities for integration tests

use mqtt_supervisor::supervisor::{
    Notification, Supervisor, SupervisorHandle, SupervisorOptions, SupervisorSnapshot,
};
use mqtt_supervisor::testing::MockConnector;
use mqtt_supervisor::transport::{ConnectionEvents, PublishOptions, Security};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[allow(dead_code)]
pub const RETRY_TIMEOUT: Duration = Duration::from_secs(5);

#[allow(dead_code)]
pub const WAIT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Options with short timers for integration tests
#[allow(dead_code)]
pub fn test_options(security: Security, queue_capacity: usize) -> SupervisorOptions {
    SupervisorOptions::new("broker.test", 1883, security)
        .expect("valid test options")
        .with_retry_timeout(RETRY_TIMEOUT)
        .with_wait_close_timeout(WAIT_CLOSE_TIMEOUT)
        .with_queue_capacity(queue_capacity)
}

/// A running supervisor wired to a mock connector
#[allow(dead_code)]
pub struct Harness {
    pub connector: MockConnector,
    pub handle: SupervisorHandle,
    pub events: broadcast::Receiver<Notification>,
    pub task: JoinHandle<()>,
}

#[allow(dead_code)]
impl Harness {
    pub fn start(options: SupervisorOptions) -> Self {
        Self::start_with(MockConnector::new(), options)
    }

    /// Start with a pre-configured connector
    pub fn start_with(connector: MockConnector, options: SupervisorOptions) -> Self {
        let (supervisor, handle) =
            Supervisor::new(options, connector.clone()).expect("supervisor should build");
        let events = handle.events();
        let task = tokio::spawn(supervisor.run());
        Self {
            connector,
            handle,
            events,
            task,
        }
    }

    /// Snapshot taken once everything sent so far has been processed
    pub async fn settle(&self) -> SupervisorSnapshot {
        self.handle.snapshot().await.expect("supervisor running")
    }

    pub fn publish(&self, topic: &str) {
        self.handle
            .publish(topic, format!("payload for {topic}"), PublishOptions::default());
    }

    /// Event sink of the newest connection handle
    pub fn broker(&self) -> ConnectionEvents {
        self.connector
            .latest_events()
            .expect("a connection handle should exist")
    }

    /// Report the newest handle as connected and wait for it to be processed
    pub async fn connect(&self) -> SupervisorSnapshot {
        // Make sure the supervisor has created its handle
        self.settle().await;
        self.broker().connected();
        self.settle().await
    }

    /// Complete a publish and wait for it to be processed
    pub async fn complete(&self, sequence_id: u64) -> SupervisorSnapshot {
        self.broker().publish_complete(sequence_id, Ok(()));
        self.settle().await
    }

    /// Notifications received so far
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut received = Vec::new();
        while let Ok(notification) = self.events.try_recv() {
            received.push(notification);
        }
        received
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.connector
            .published()
            .into_iter()
            .map(|record| record.topic)
            .collect()
    }
}
