//! Connection state machine
//!
//! [`Link`] is the supervisor's private view: the handle lives inside the
//! `Connecting`/`Connected` variants, so "at most one live handle" holds by
//! construction. [`ConnectionState`] is the public, handle-free projection
//! published to observers.

use crate::transport::{Connection, Epoch};
use tracing::{error, info, warn};

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle and no reconnect scheduled
    Disconnected(String),
    /// No handle; a reconnect timer is armed
    ReconnectPending(String),
    /// Handle created, waiting for the broker to accept it
    Connecting,
    /// Handle accepted by the broker
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// A handle plus the epoch it was created in
pub(crate) struct LiveHandle<C> {
    pub(crate) epoch: Epoch,
    pub(crate) connection: C,
}

/// Supervisor-owned connection slot
pub(crate) enum Link<C> {
    Disconnected,
    Connecting(LiveHandle<C>),
    Connected(LiveHandle<C>),
}

impl<C: Connection> Link<C> {
    pub(crate) fn is_live(&self) -> bool {
        !matches!(self, Link::Disconnected)
    }

    /// Epoch of the live handle, if any
    pub(crate) fn epoch(&self) -> Option<Epoch> {
        match self {
            Link::Disconnected => None,
            Link::Connecting(live) | Link::Connected(live) => Some(live.epoch),
        }
    }

    /// Any live handle, connected or not
    pub(crate) fn live_mut(&mut self) -> Option<&mut C> {
        match self {
            Link::Disconnected => None,
            Link::Connecting(live) | Link::Connected(live) => Some(&mut live.connection),
        }
    }

    /// Only a handle the broker has accepted
    pub(crate) fn connected_mut(&mut self) -> Option<&mut C> {
        match self {
            Link::Connected(live) => Some(&mut live.connection),
            _ => None,
        }
    }

    /// Promote `Connecting` to `Connected`; returns false when there is
    /// nothing to promote
    pub(crate) fn mark_connected(&mut self) -> bool {
        match std::mem::replace(self, Link::Disconnected) {
            Link::Connecting(live) | Link::Connected(live) => {
                *self = Link::Connected(live);
                true
            }
            Link::Disconnected => false,
        }
    }

    /// Remove the handle, leaving the slot disconnected
    pub(crate) fn take(&mut self) -> Option<LiveHandle<C>> {
        match std::mem::replace(self, Link::Disconnected) {
            Link::Disconnected => None,
            Link::Connecting(live) | Link::Connected(live) => Some(live),
        }
    }
}

/// Log a connection state transition (pure logging function)
pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("MQTT connection established");
        }
        (ConnectionState::Connected, ConnectionState::ReconnectPending(reason)) => {
            warn!("MQTT connection lost: {}", reason);
        }
        (ConnectionState::ReconnectPending(_), ConnectionState::Connecting) => {
            info!("Reconnecting to MQTT broker");
        }
        (_, ConnectionState::Disconnected(reason)) => {
            info!("MQTT connection closed: {}", reason);
        }
        (_, ConnectionState::ReconnectPending(reason)) => {
            error!("MQTT connection attempt failed: {}", reason);
        }
        _ => {
            info!("MQTT connection state: {:?} -> {:?}", from, to);
        }
    }
}
