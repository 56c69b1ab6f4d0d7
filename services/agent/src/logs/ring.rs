//! Fixed-capacity circular buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

/// A bounded FIFO that silently drops its oldest entry once full.
///
/// Writers and readers are paced independently: [`RingBuffer::read`] consumes
/// the oldest retained entry, while [`RingBuffer::tail`] peeks at the newest
/// entries without consuming anything. All access goes through an internal
/// lock, so a reader never observes a half-applied write.
#[derive(Debug)]
pub struct RingBuffer<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a buffer retaining at most `capacity` entries.
    ///
    /// A zero capacity is valid: writes are discarded and reads return nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append a value, overwriting the oldest entry once the buffer is full.
    pub fn write(&self, value: T) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(value);
    }

    /// Consume the oldest retained entry.
    pub fn read(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Up to `n` most recent entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<T> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        // A panic while holding the lock cannot leave the deque in a torn
        // state, so the poisoned guard is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
