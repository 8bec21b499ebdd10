//! One-shot timer slots polled from the supervisor's select loop

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// A slot holding at most one armed timer and the value it yields on expiry
#[derive(Debug)]
pub(crate) struct TimerSlot<T> {
    armed: Option<(T, Pin<Box<Sleep>>)>,
}

impl<T> TimerSlot<T> {
    pub(crate) fn new() -> Self {
        Self { armed: None }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub(crate) fn value(&self) -> Option<&T> {
        self.armed.as_ref().map(|(value, _)| value)
    }

    /// Arm the slot, replacing any timer already in it
    pub(crate) fn arm(&mut self, value: T, after: Duration) {
        self.armed = Some((value, Box::pin(sleep(after))));
    }

    /// Disarm; returns the value of the cancelled timer
    pub(crate) fn cancel(&mut self) -> Option<T> {
        self.armed.take().map(|(value, _)| value)
    }

    /// Resolves when the armed timer elapses and disarms the slot.
    /// Never resolves while the slot is empty.
    pub(crate) async fn expired(&mut self) -> T {
        loop {
            match &mut self.armed {
                Some((_, timer)) => timer.as_mut().await,
                None => pending::<()>().await,
            }
            if let Some((value, _)) = self.armed.take() {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_armed_slot_yields_value_and_disarms() {
        let mut slot = TimerSlot::new();
        slot.arm(7u64, Duration::from_secs(60));
        assert!(slot.is_armed());
        assert_eq!(slot.value(), Some(&7));

        let value = slot.expired().await;

        assert_eq!(value, 7);
        assert!(!slot.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_slot_never_fires() {
        let mut slot: TimerSlot<()> = TimerSlot::new();
        let result = tokio::time::timeout(Duration::from_secs(3600), slot.expired()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_value() {
        let mut slot = TimerSlot::new();
        slot.arm("stall", Duration::from_secs(1));

        assert_eq!(slot.cancel(), Some("stall"));
        assert_eq!(slot.cancel(), None);
        assert!(!slot.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_deadline() {
        let mut slot = TimerSlot::new();
        slot.arm(1u8, Duration::from_secs(10));
        slot.arm(2u8, Duration::from_secs(20));

        let start = tokio::time::Instant::now();
        let value = slot.expired().await;

        assert_eq!(value, 2);
        assert!(start.elapsed() >= Duration::from_secs(20));
    }
}
