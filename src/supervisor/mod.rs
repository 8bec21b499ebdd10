//! Resilient MQTT connection supervisor
//!
//! A [`Supervisor`] keeps one connection handle alive across failures and
//! drains a bounded FIFO [`PublishQueue`] through it, one publish in flight
//! at a time. Callers talk to it through a cloneable [`SupervisorHandle`].

mod controller;
mod handle;
mod options;
mod queue;
mod state;
mod timers;

pub use controller::Supervisor;
pub use handle::{Notification, SupervisorHandle, SupervisorSnapshot, SupervisorStats};
pub use options::{SupervisorOptions, DEFAULT_RETRY_TIMEOUT, DEFAULT_WAIT_CLOSE_TIMEOUT};
pub use queue::{Completion, PublishQueue, QueueEntry, QueueFull, DEFAULT_QUEUE_CAPACITY};
pub use state::{log_state_transition, ConnectionState};
