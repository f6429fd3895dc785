//! Outbound queue for data awaiting delivery to a connection

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Unbounded FIFO of values waiting to be written to a session's transport.
///
/// Every operation takes the queue's own lock for O(1) or O(n) drain work and
/// never waits for data. Depth is unbounded; producers are expected to apply
/// backpressure themselves.
pub struct OutboundQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> OutboundQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a value at the tail
    pub fn push(&self, value: T) {
        self.items().push_back(value);
    }

    /// Remove and return the head, or `None` when empty
    pub fn pop(&self) -> Option<T> {
        self.items().pop_front()
    }

    /// Drain the whole queue in FIFO order, leaving it empty
    pub fn pop_all(&self) -> Vec<T> {
        let drained = std::mem::take(&mut *self.items());
        drained.into()
    }

    /// Number of queued values
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

impl<T> Default for OutboundQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for OutboundQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("len", &self.len())
            .finish()
    }
}
