//! The supervisor task: connection lifecycle plus publish queue draining
//!
//! One task owns the connection slot, the queue and both timer slots, and
//! processes inbound items strictly one at a time:
//!
//! - transport events stamped with the epoch of the handle that produced them
//! - retry timer expiry, which recreates the connection handle
//! - stall timer expiry, which tears down a handle whose publish never completed
//! - caller commands sent through [`SupervisorHandle`]
//!
//! Every invariant (one live handle, one pending retry, one in-flight publish)
//! is a presence check on a field of this struct; nothing is shared.

use super::handle::{Command, Notification, SupervisorHandle, SupervisorSnapshot, SupervisorStats};
use super::options::SupervisorOptions;
use super::queue::{Completion, PublishQueue, QueueFull};
use super::state::{log_state_transition, ConnectionState, LiveHandle, Link};
use super::timers::TimerSlot;
use crate::error::{SupervisorError, SupervisorResult};
use crate::observability::logging::supervisor_span;
use crate::transport::{
    Connection, ConnectionEvents, Connector, Epoch, PublishOptions, QoS, Security, SequenceId,
    TransportEvent,
};
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Buffered notifications per observer before it starts lagging
const NOTIFICATION_CAPACITY: usize = 256;

/// Terminal transport events share one cleanup path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Close,
    Error,
}

/// Connection supervisor and publish queue owner
pub struct Supervisor<C: Connector> {
    options: SupervisorOptions,
    connector: C,
    link: Link<C::Connection>,
    epoch: Epoch,
    queue: PublishQueue,
    retry: TimerSlot<()>,
    stall: TimerSlot<SequenceId>,
    events_tx: mpsc::UnboundedSender<(Epoch, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(Epoch, TransportEvent)>,
    commands: mpsc::UnboundedReceiver<Command>,
    notifications: broadcast::Sender<Notification>,
    state_tx: watch::Sender<ConnectionState>,
    stats: SupervisorStats,
}

impl<C: Connector> Supervisor<C> {
    /// Build a supervisor without starting it.
    ///
    /// Take observers from the returned handle before running the supervisor
    /// to be sure not to miss the first `Connect`.
    pub fn new(
        mut options: SupervisorOptions,
        connector: C,
    ) -> SupervisorResult<(Self, SupervisorHandle)> {
        options.validate()?;
        options.transport.auto_reconnect = false;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (state_tx, state_rx) =
            watch::channel(ConnectionState::Disconnected("not started".to_string()));

        let handle = SupervisorHandle::new(commands_tx, notifications.clone(), state_rx);
        let queue = PublishQueue::new(options.queue_capacity);

        let supervisor = Self {
            options,
            connector,
            link: Link::Disconnected,
            epoch: 0,
            queue,
            retry: TimerSlot::new(),
            stall: TimerSlot::new(),
            events_tx,
            events_rx,
            commands,
            notifications,
            state_tx,
            stats: SupervisorStats::default(),
        };
        Ok((supervisor, handle))
    }

    /// Build and spawn a supervisor onto the current tokio runtime
    pub fn spawn(
        options: SupervisorOptions,
        connector: C,
    ) -> SupervisorResult<(SupervisorHandle, JoinHandle<()>)> {
        let (supervisor, handle) = Self::new(options, connector)?;
        Ok((handle, tokio::spawn(supervisor.run())))
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(self) {
        let secure = self.options.security == Security::Secure;
        let span = supervisor_span!(
            host = %self.options.endpoint.host,
            port = self.options.endpoint.port,
            secure
        );
        self.run_loop().instrument(span).await
    }

    async fn run_loop(mut self) {
        info!("Starting connection supervisor");
        self.init();

        loop {
            tokio::select! {
                // Transport events before timers before caller commands
                biased;

                Some((epoch, event)) = self.events_rx.recv() => {
                    self.handle_transport_event(epoch, event);
                }
                () = self.retry.expired() => self.on_retry_elapsed(),
                sequence_id = self.stall.expired() => self.on_stall_elapsed(sequence_id),
                command = self.commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            self.stop("all handles dropped");
                            false
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!("Connection supervisor stopped");
    }

    /// Returns false when the supervisor should stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Publish {
                topic,
                payload,
                options,
            } => self.enqueue(topic, payload, options),
            Command::Subscribe { topic, qos, reply } => {
                let _ = reply.send(self.subscribe(&topic, qos));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { reply } => {
                self.stop("shutdown requested");
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    /// Create a connection handle unless one is already live
    fn init(&mut self) {
        if self.link.is_live() {
            debug!(epoch = ?self.link.epoch(), "Live connection handle exists, skipping init");
            return;
        }

        self.epoch += 1;
        let events = ConnectionEvents::new(self.epoch, self.events_tx.clone());
        let endpoint = &self.options.endpoint;
        let transport = &self.options.transport;
        let result = match self.options.security {
            Security::Plain => self.connector.connect_plain(endpoint, transport, events),
            Security::Secure => self.connector.connect_secure(endpoint, transport, events),
        };

        match result {
            Ok(connection) => {
                self.stats.handles_created += 1;
                self.link = Link::Connecting(LiveHandle {
                    epoch: self.epoch,
                    connection,
                });
                self.set_state(ConnectionState::Connecting);
            }
            Err(e) => {
                error!(epoch = self.epoch, "Failed to create connection handle: {}", e);
                self.handle_failure(Failure::Error, format!("connection setup failed: {e}"));
            }
        }
    }

    fn handle_transport_event(&mut self, epoch: Epoch, event: TransportEvent) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "Ignoring event from a replaced handle");
            return;
        }

        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Message(message) => {
                let _ = self.notifications.send(Notification::Message(message));
            }
            TransportEvent::Closed(reason) => self.handle_failure(Failure::Close, reason),
            TransportEvent::Errored(reason) => self.handle_failure(Failure::Error, reason),
            TransportEvent::PublishComplete {
                sequence_id,
                result,
            } => self.on_publish_complete(sequence_id, result),
        }
    }

    fn on_connected(&mut self) {
        if !self.link.mark_connected() {
            warn!(epoch = self.epoch, "Connect reported for a destroyed handle, ignoring");
            return;
        }
        self.set_state(ConnectionState::Connected);
        let _ = self.notifications.send(Notification::Connect);
        self.try_drain();
    }

    /// Shared cleanup for close, error and stall
    fn handle_failure(&mut self, failure: Failure, reason: String) {
        if let Some(mut live) = self.link.take() {
            live.connection.destroy();
            debug!(epoch = live.epoch, "Connection handle destroyed");
        }

        if let Some(sequence_id) = self.stall.cancel() {
            debug!(sequence_id, "Stall watchdog cancelled with its connection");
        }

        if self.retry.is_armed() {
            debug!("Reconnect already scheduled");
        } else {
            self.retry.arm((), self.options.retry_timeout);
            self.stats.reconnects_scheduled += 1;
            info!(delay = ?self.options.retry_timeout, "Reconnect scheduled");
        }

        self.set_state(ConnectionState::ReconnectPending(reason.clone()));

        let notification = match failure {
            Failure::Close => {
                info!("Connection closed: {}", reason);
                Notification::Close(reason)
            }
            Failure::Error => {
                error!("Connection error: {}", reason);
                Notification::Error(reason)
            }
        };
        let _ = self.notifications.send(notification);
    }

    fn on_retry_elapsed(&mut self) {
        info!("Reconnect timer elapsed, recreating connection");
        self.init();
    }

    fn on_stall_elapsed(&mut self, sequence_id: SequenceId) {
        self.stats.stalls += 1;
        warn!(
            sequence_id,
            timeout = ?self.options.wait_close_timeout,
            "Publish not completed in time, resetting connection"
        );
        self.handle_failure(Failure::Close, format!("publish {sequence_id} stalled"));
    }

    fn enqueue(&mut self, topic: String, payload: Bytes, options: PublishOptions) {
        match self.queue.enqueue(topic, payload, options) {
            Ok(sequence_id) => {
                debug!(sequence_id, queued = self.queue.len(), "Message queued");
            }
            Err(QueueFull { capacity }) => {
                self.stats.dropped += 1;
                warn!(capacity, "Publish queue full, dropping newest message");
            }
        }
        self.try_drain();
    }

    /// Publish the queue head if connected and nothing is in flight
    fn try_drain(&mut self) {
        if self.stall.is_armed() {
            return;
        }
        let Some(connection) = self.link.connected_mut() else {
            return;
        };
        let Some(head) = self.queue.head() else {
            return;
        };

        let sequence_id = head.sequence_id;
        self.stall.arm(sequence_id, self.options.wait_close_timeout);
        debug!(sequence_id, topic = %head.topic, "Publishing queue head");

        let result = connection.publish(sequence_id, &head.topic, head.payload.clone(), head.options);
        if let Err(e) = result {
            error!(sequence_id, "Publish could not be submitted: {}", e);
            self.handle_failure(Failure::Error, format!("publish {sequence_id} rejected: {e}"));
        }
    }

    fn on_publish_complete(&mut self, sequence_id: SequenceId, result: Result<(), String>) {
        if let Err(reason) = &result {
            self.stats.publish_failures += 1;
            warn!(sequence_id, "Publish completed with error: {}", reason);
        }

        self.stall.cancel();

        match self.queue.complete(sequence_id) {
            Completion::Removed(entry) => {
                self.stats.acknowledged += 1;
                debug!(sequence_id, topic = %entry.topic, "Publish completed");
            }
            Completion::Mismatch { head, received } => {
                self.stats.mismatches += 1;
                warn!(head, received, "Completion does not match queue head, queue unchanged");
            }
            Completion::Empty => {
                error!(sequence_id, "Publish completion arrived for an empty queue");
                return;
            }
        }

        self.try_drain();
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> SupervisorResult<()> {
        let state = self.state_tx.borrow().clone();
        let Some(connection) = self.link.live_mut() else {
            warn!(topic, "Subscribe refused: no live connection");
            return Err(SupervisorError::NotConnected { state });
        };

        connection.subscribe(topic, qos).map_err(|e| {
            warn!(topic, "Subscribe failed: {}", e);
            SupervisorError::from(e)
        })?;
        info!(topic, qos = qos.level(), "Subscription forwarded");
        Ok(())
    }

    fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            state: self.state_tx.borrow().clone(),
            queued: self.queue.sequence_ids(),
            in_flight: self.stall.value().copied(),
            retry_pending: self.retry.is_armed(),
            stats: self.stats,
        }
    }

    fn stop(&mut self, reason: &str) {
        if let Some(mut live) = self.link.take() {
            live.connection.destroy();
        }
        self.stall.cancel();
        self.retry.cancel();
        if !self.queue.is_empty() {
            warn!(unsent = self.queue.len(), "Stopping with unsent messages");
        }
        self.set_state(ConnectionState::Disconnected(reason.to_string()));
    }

    fn set_state(&mut self, next: ConnectionState) {
        let previous = self.state_tx.borrow().clone();
        if previous == next {
            return;
        }
        log_state_transition(&previous, &next);
        self.state_tx.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;
    use std::time::Duration;

    fn options(security: Security) -> SupervisorOptions {
        SupervisorOptions::new("broker.local", 1883, security)
            .unwrap()
            .with_retry_timeout(Duration::from_secs(5))
            .with_wait_close_timeout(Duration::from_secs(2))
            .with_queue_capacity(4)
    }

    fn supervisor(connector: &MockConnector) -> (Supervisor<MockConnector>, SupervisorHandle) {
        Supervisor::new(options(Security::Plain), connector.clone()).unwrap()
    }

    /// Process every transport event already sent
    fn pump(supervisor: &mut Supervisor<MockConnector>) {
        while let Ok((epoch, event)) = supervisor.events_rx.try_recv() {
            supervisor.handle_transport_event(epoch, event);
        }
    }

    fn publish(supervisor: &mut Supervisor<MockConnector>, topic: &str) {
        supervisor.enqueue(topic.to_string(), Bytes::from_static(b"x"), PublishOptions::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_is_idempotent_while_handle_is_live() {
        let connector = MockConnector::new();
        let (mut supervisor, _handle) = supervisor(&connector);

        supervisor.init();
        supervisor.init();

        assert_eq!(connector.handle_count(), 1);
        assert_eq!(supervisor.epoch, 1);
        assert_eq!(*supervisor.state_tx.borrow(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secure_flag_selects_secure_constructor() {
        let connector = MockConnector::new();
        let (mut supervisor, _handle) =
            Supervisor::new(options(Security::Secure), connector.clone()).unwrap();

        supervisor.init();

        assert_eq!(connector.handles()[0].security, Security::Secure);
        assert!(!connector.handles()[0].options.auto_reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_then_error_schedules_single_reconnect() {
        let connector = MockConnector::new();
        let (mut supervisor, handle) = supervisor(&connector);
        let mut notifications = handle.events();
        supervisor.init();

        let events = connector.latest_events().unwrap();
        events.closed("socket closed");
        events.errored("ECONNRESET");
        pump(&mut supervisor);

        assert!(supervisor.retry.is_armed());
        assert_eq!(supervisor.stats.reconnects_scheduled, 1);
        assert!(connector.handles()[0].destroyed);
        assert!(!supervisor.link.is_live());
        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification::Close("socket closed".to_string())
        );
        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification::Error("ECONNRESET".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recreates_handle_and_ignores_stale_events() {
        let connector = MockConnector::new();
        let (mut supervisor, _handle) = supervisor(&connector);
        supervisor.init();
        let stale = connector.latest_events().unwrap();
        stale.errored("boom");
        pump(&mut supervisor);

        supervisor.retry.expired().await;
        supervisor.on_retry_elapsed();

        assert_eq!(connector.handle_count(), 2);
        assert_eq!(supervisor.link.epoch(), Some(2));

        stale.closed("late close from the old handle");
        stale.connected();
        pump(&mut supervisor);

        assert!(supervisor.link.is_live());
        assert!(!supervisor.retry.is_armed());
        assert!(!connector.handles()[1].destroyed);
        assert_eq!(*supervisor.state_tx.borrow(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_constructor_failure_is_retried() {
        let connector = MockConnector::new();
        connector.fail_next_connects(1);
        let (mut supervisor, handle) = supervisor(&connector);
        let mut notifications = handle.events();

        supervisor.init();

        assert!(!supervisor.link.is_live());
        assert!(supervisor.retry.is_armed());
        assert!(matches!(notifications.try_recv().unwrap(), Notification::Error(_)));

        supervisor.retry.expired().await;
        supervisor.on_retry_elapsed();
        assert_eq!(connector.handle_count(), 1);
        assert!(supervisor.link.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_connect_and_keeps_one_in_flight() {
        let connector = MockConnector::new();
        let (mut supervisor, _handle) = supervisor(&connector);
        supervisor.init();

        publish(&mut supervisor, "a");
        publish(&mut supervisor, "b");
        assert!(connector.published().is_empty());

        connector.latest_events().unwrap().connected();
        pump(&mut supervisor);

        assert_eq!(connector.published_sequence_ids(), vec![1]);
        assert_eq!(supervisor.stall.value(), Some(&1));

        publish(&mut supervisor, "c");
        assert_eq!(connector.published_sequence_ids(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_destroys_handle_and_keeps_head() {
        let connector = MockConnector::new();
        let (mut supervisor, handle) = supervisor(&connector);
        let mut notifications = handle.events();
        supervisor.init();
        connector.latest_events().unwrap().connected();
        pump(&mut supervisor);
        publish(&mut supervisor, "never-acked");
        let _ = notifications.try_recv();

        let sequence_id = supervisor.stall.expired().await;
        supervisor.on_stall_elapsed(sequence_id);

        assert_eq!(sequence_id, 1);
        assert!(connector.handles()[0].destroyed);
        assert!(supervisor.retry.is_armed());
        assert_eq!(supervisor.stats.stalls, 1);
        assert_eq!(supervisor.queue.sequence_ids(), vec![1]);
        assert!(matches!(notifications.try_recv().unwrap(), Notification::Close(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_on_empty_queue_is_reported_and_ignored() {
        let connector = MockConnector::new();
        let (mut supervisor, _handle) = supervisor(&connector);
        supervisor.init();
        connector.latest_events().unwrap().connected();
        pump(&mut supervisor);

        supervisor.on_publish_complete(9, Ok(()));

        assert!(supervisor.queue.is_empty());
        assert_eq!(supervisor.stats.acknowledged, 0);
        assert!(!supervisor.stall.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_publish_resets_connection() {
        let connector = MockConnector::new();
        connector.reject_publishes(true);
        let (mut supervisor, _handle) = supervisor(&connector);
        supervisor.init();
        connector.latest_events().unwrap().connected();
        pump(&mut supervisor);

        publish(&mut supervisor, "a");

        assert!(!supervisor.link.is_live());
        assert!(!supervisor.stall.is_armed());
        assert!(supervisor.retry.is_armed());
        assert_eq!(supervisor.queue.sequence_ids(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_requires_live_handle() {
        let connector = MockConnector::new();
        let (mut supervisor, _handle) = supervisor(&connector);

        let result = supervisor.subscribe("sensors/#", QoS::AtLeastOnce);
        assert!(matches!(result, Err(SupervisorError::NotConnected { .. })));

        supervisor.init();
        supervisor.subscribe("sensors/#", QoS::AtLeastOnce).unwrap();
        assert_eq!(connector.subscriptions().len(), 1);
        assert_eq!(connector.subscriptions()[0].topic, "sensors/#");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_destroys_handle_and_clears_timers() {
        let connector = MockConnector::new();
        let (mut supervisor, _handle) = supervisor(&connector);
        supervisor.init();

        supervisor.stop("test");

        assert!(connector.handles()[0].destroyed);
        assert!(!supervisor.retry.is_armed());
        assert_eq!(
            *supervisor.state_tx.borrow(),
            ConnectionState::Disconnected("test".to_string())
        );
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let connector = MockConnector::new();
        let options = options(Security::Plain).with_queue_capacity(0);
        assert!(Supervisor::new(options, connector).is_err());
    }
}
