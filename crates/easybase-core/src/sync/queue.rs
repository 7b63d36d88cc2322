//! Sync queues
//!
//! Multi-producer queue over `crossbeam-channel`: request tasks push,
//! the scheduler drains in batches. Pushing never blocks; a full bounded
//! queue hands the item back so the caller can fall back to an immediate
//! apply.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

/// Non-blocking MPMC queue with counters
#[derive(Debug)]
pub struct SyncQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
    total_enqueued: AtomicU64,
    total_dequeued: AtomicU64,
    /// Pushes rejected because the queue was full
    rejected: AtomicU64,
}

impl<T> SyncQueue<T> {
    /// Queue holding at most `capacity` items
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self::from_channel(sender, receiver, capacity)
    }

    /// Queue without a capacity limit
    pub fn unbounded() -> Self {
        let (sender, receiver) = unbounded();
        Self::from_channel(sender, receiver, usize::MAX)
    }

    fn from_channel(sender: Sender<T>, receiver: Receiver<T>, capacity: usize) -> Self {
        Self {
            sender,
            receiver,
            capacity,
            total_enqueued: AtomicU64::new(0),
            total_dequeued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking; the item comes back when the queue is full
    pub fn try_push(&self, item: T) -> Result<(), T> {
        match self.sender.try_send(item) {
            Ok(()) => {
                self.total_enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(item)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(item)
            }
            Err(TrySendError::Disconnected(item)) => Err(item),
        }
    }

    /// Dequeue up to `max` items in FIFO order
    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        let batch: Vec<T> = self.receiver.try_iter().take(max).collect();
        if !batch.is_empty() {
            self.total_dequeued
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
        batch
    }

    /// Dequeue everything currently queued
    pub fn drain(&self) -> Vec<T> {
        self.pop_batch(self.receiver.len())
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Capacity (`usize::MAX` when unbounded)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counters
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            capacity: self.capacity,
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items currently queued
    pub len: usize,
    /// Capacity
    pub capacity: usize,
    /// Items ever enqueued
    pub total_enqueued: u64,
    /// Items ever dequeued
    pub total_dequeued: u64,
    /// Pushes rejected as full
    pub rejected: u64,
}
