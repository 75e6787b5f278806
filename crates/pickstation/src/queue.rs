// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound message queue shared between the reading loop and the engine.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Thread-safe FIFO of framed device messages.
///
/// Cloning yields another handle to the same queue. `push` and `try_pop`
/// hold the lock only for the single deque operation.
#[derive(Debug, Clone, Default)]
pub struct InboundQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the tail.
    pub fn push(&self, message: String) {
        self.inner.lock().push_back(message);
    }

    /// Take the oldest message, if any. Never blocks on an empty queue.
    pub fn try_pop(&self) -> Option<String> {
        self.inner.lock().pop_front()
    }

    /// Take every queued message in arrival order.
    pub fn drain(&self) -> Vec<String> {
        let mut guard = self.inner.lock();
        guard.drain(..).collect()
    }

    /// Discard everything queued, returning how many messages were dropped.
    pub fn clear(&self) -> usize {
        let mut guard = self.inner.lock();
        let n = guard.len();
        guard.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = InboundQueue::new();
        for i in 0..1000 {
            queue.push(format!("+{i}"));
        }
        assert_eq!(queue.len(), 1000);
        for i in 0..1000 {
            assert_eq!(queue.try_pop(), Some(format!("+{i}")));
        }
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_drain_and_clear() {
        let queue = InboundQueue::new();
        queue.push("a".into());
        queue.push("b".into());
        assert_eq!(queue.drain(), vec!["a", "b"]);
        assert!(queue.is_empty());

        queue.push("c".into());
        assert_eq!(queue.clear(), 1);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_concurrent_producer_keeps_order() {
        let queue = InboundQueue::new();
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            for i in 0..5000u32 {
                producer.push(i.to_string());
            }
        });

        let mut received = Vec::with_capacity(5000);
        while received.len() < 5000 {
            match queue.try_pop() {
                Some(msg) => received.push(msg),
                None => thread::yield_now(),
            }
        }
        handle.join().expect("producer thread panicked");

        let expected: Vec<String> = (0..5000u32).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
    }
}
