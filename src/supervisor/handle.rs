//! Caller-facing handle to a running supervisor

use super::state::ConnectionState;
use crate::error::{SupervisorError, SupervisorResult};
use crate::transport::{IncomingMessage, PublishOptions, QoS, SequenceId};
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::warn;

/// Lifecycle notifications re-emitted to observers
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Broker accepted a connection; queue draining resumes
    Connect,
    /// Message received on a subscribed topic
    Message(IncomingMessage),
    /// Transport lost; reconnect scheduled
    Close(String),
    /// Transport failed; reconnect scheduled
    Error(String),
}

/// Counters accumulated over the supervisor's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Entries removed from the head after a matching completion
    pub acknowledged: u64,
    /// Submissions refused because the queue was full
    pub dropped: u64,
    /// Completions that carried an error
    pub publish_failures: u64,
    /// Completions whose sequence id did not match the head
    pub mismatches: u64,
    /// Stall timeouts that reset the connection
    pub stalls: u64,
    /// Reconnect timers armed
    pub reconnects_scheduled: u64,
    /// Connection handles constructed
    pub handles_created: u64,
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSnapshot {
    pub state: ConnectionState,
    /// Queued sequence ids, head first
    pub queued: Vec<SequenceId>,
    /// Sequence id of the publish awaiting completion
    pub in_flight: Option<SequenceId>,
    pub retry_pending: bool,
    pub stats: SupervisorStats,
}

pub(crate) enum Command {
    Publish {
        topic: String,
        payload: Bytes,
        options: PublishOptions,
    },
    Subscribe {
        topic: String,
        qos: QoS,
        reply: oneshot::Sender<SupervisorResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<SupervisorSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle; the supervisor stops once every handle is dropped
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<Command>,
    notifications: broadcast::Sender<Notification>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SupervisorHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        notifications: broadcast::Sender<Notification>,
        state_rx: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            commands,
            notifications,
            state_rx,
        }
    }

    /// Queue a message for publishing.
    ///
    /// Fire-and-forget: a message refused because the queue is full is only
    /// reported through logs and [`SupervisorStats::dropped`].
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) {
        let command = Command::Publish {
            topic: topic.into(),
            payload: payload.into(),
            options,
        };
        if self.commands.send(command).is_err() {
            warn!("Publish ignored: supervisor has stopped");
        }
    }

    /// Forward a subscription to the live connection handle.
    ///
    /// Fails with [`SupervisorError::NotConnected`] when there is none.
    /// Subscriptions are not replayed after a reconnect.
    pub async fn subscribe(&self, topic: impl Into<String>, qos: QoS) -> SupervisorResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                topic: topic.into(),
                qos,
                reply,
            })
            .map_err(|_| SupervisorError::Stopped)?;
        response.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Subscribe to lifecycle notifications.
    ///
    /// Slow receivers lag and lose the oldest notifications.
    pub fn events(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Watch connection state changes
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Snapshot taken after every previously sent command was processed
    pub async fn snapshot(&self) -> SupervisorResult<SupervisorSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .map_err(|_| SupervisorError::Stopped)?;
        response.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Destroy the live handle and stop the supervisor task
    pub async fn shutdown(&self) -> SupervisorResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .map_err(|_| SupervisorError::Stopped)?;
        response.await.map_err(|_| SupervisorError::Stopped)
    }
}
