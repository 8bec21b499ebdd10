//! Bounded FIFO of outbound publishes
//!
//! Pure data structure: no I/O, no timers. The supervisor decides when to
//! drain; this module only enforces capacity, ordering and the sequence-id
//! head check.

use crate::transport::{PublishOptions, SequenceId};
use bytes::Bytes;
use std::collections::VecDeque;

/// Default maximum number of queued publishes
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// One queued publish; immutable once queued
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub sequence_id: SequenceId,
    pub topic: String,
    pub payload: Bytes,
    pub options: PublishOptions,
}

/// Submission refused because the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull {
    pub capacity: usize,
}

/// Outcome of matching a publish completion against the head
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Head matched and was removed
    Removed(QueueEntry),
    /// Head carries a different sequence id; nothing removed
    Mismatch {
        head: SequenceId,
        received: SequenceId,
    },
    /// Completion arrived for an empty queue
    Empty,
}

#[derive(Debug)]
pub struct PublishQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
    next_sequence_id: SequenceId,
}

impl PublishQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            next_sequence_id: 1,
        }
    }

    /// Append a publish; a full queue refuses the newest submission and
    /// never evicts the head
    pub fn enqueue(
        &mut self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<SequenceId, QueueFull> {
        if self.entries.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }

        let sequence_id = self.next_sequence_id;
        self.next_sequence_id += 1;
        self.entries.push_back(QueueEntry {
            sequence_id,
            topic: topic.into(),
            payload: payload.into(),
            options,
        });
        Ok(sequence_id)
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Remove the head only if it is the entry the completion belongs to
    pub fn complete(&mut self, sequence_id: SequenceId) -> Completion {
        match self.entries.front() {
            None => Completion::Empty,
            Some(head) if head.sequence_id == sequence_id => match self.entries.pop_front() {
                Some(entry) => Completion::Removed(entry),
                None => Completion::Empty,
            },
            Some(head) => Completion::Mismatch {
                head: head.sequence_id,
                received: sequence_id,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence ids in delivery order
    pub fn sequence_ids(&self) -> Vec<SequenceId> {
        self.entries.iter().map(|entry| entry.sequence_id).collect()
    }
}

impl Default for PublishQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(capacity: usize, count: usize) -> PublishQueue {
        let mut queue = PublishQueue::new(capacity);
        for i in 0..count {
            queue
                .enqueue(format!("topic/{i}"), format!("payload-{i}"), PublishOptions::default())
                .unwrap();
        }
        queue
    }

    #[test]
    fn test_default_capacity() {
        let mut queue = PublishQueue::default();
        assert!(queue.is_empty());
        for i in 0..DEFAULT_QUEUE_CAPACITY {
            queue.enqueue(format!("topic/{i}"), "x", PublishOptions::default()).unwrap();
        }
        assert_eq!(
            queue.enqueue("overflow", "x", PublishOptions::default()),
            Err(QueueFull { capacity: 1000 })
        );
    }

    #[test]
    fn test_sequence_ids_are_monotonic_and_fifo() {
        let queue = queue_with(10, 3);
        assert_eq!(queue.sequence_ids(), vec![1, 2, 3]);
        assert_eq!(queue.head().unwrap().topic, "topic/0");
    }

    #[test]
    fn test_full_queue_drops_newest_submission() {
        let mut queue = queue_with(2, 2);

        let result = queue.enqueue("topic/2", "payload-2", PublishOptions::default());

        assert_eq!(result, Err(QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.sequence_ids(), vec![1, 2]);
        assert_eq!(queue.head().unwrap().topic, "topic/0");
    }

    #[test]
    fn test_dropped_submission_does_not_consume_sequence_id() {
        let mut queue = queue_with(1, 1);
        assert!(queue.enqueue("dropped", "x", PublishOptions::default()).is_err());

        assert!(matches!(queue.complete(1), Completion::Removed(_)));
        assert_eq!(queue.enqueue("next", "y", PublishOptions::default()), Ok(2));
    }

    #[test]
    fn test_complete_matching_head_removes_it() {
        let mut queue = queue_with(10, 2);

        match queue.complete(1) {
            Completion::Removed(entry) => {
                assert_eq!(entry.sequence_id, 1);
                assert_eq!(entry.payload, Bytes::from("payload-0"));
            }
            other => panic!("Expected Removed, got {other:?}"),
        }
        assert_eq!(queue.sequence_ids(), vec![2]);
    }

    #[test]
    fn test_complete_mismatch_leaves_queue_untouched() {
        let mut queue = queue_with(10, 2);

        assert_eq!(
            queue.complete(2),
            Completion::Mismatch {
                head: 1,
                received: 2
            }
        );
        assert_eq!(queue.sequence_ids(), vec![1, 2]);
    }

    #[test]
    fn test_complete_on_empty_queue() {
        let mut queue = PublishQueue::new(4);
        assert_eq!(queue.complete(1), Completion::Empty);
    }

    #[test]
    fn test_zero_capacity_refuses_everything() {
        let mut queue = PublishQueue::new(0);
        assert!(queue.enqueue("t", "p", PublishOptions::default()).is_err());
        assert!(queue.is_empty());
    }
}
