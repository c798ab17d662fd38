//! Per-consumer outbound buffer
//!
//! A bounded FIFO of sentences waiting to be written to one consumer.
//!
//! # Overflow policy
//!
//! Pushing never blocks. When the buffer is full the **oldest** unread
//! sentence is discarded to make room (drop-oldest). A consumer that stops
//! reading therefore keeps the most recent `capacity` sentences, which for
//! position telemetry is the useful end of the history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use super::sentence::Sentence;

/// Result of pushing into a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Sentence appended, nothing lost
    Queued,
    /// Buffer was full; the oldest sentence was dropped to make room
    DroppedOldest,
}

#[derive(Debug)]
struct Inner {
    queue: VecDeque<Sentence>,
    last_activity: Instant,
}

/// Bounded drop-oldest queue shared between the ingestion fan-out and the
/// delivery workers of one consumer
#[derive(Debug)]
pub struct OutboundBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    notify: Notify,
    readers: AtomicU32,
    dropped: AtomicU64,
}

impl OutboundBuffer {
    /// Create an empty buffer holding at most `capacity` sentences
    ///
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                last_activity: Instant::now(),
            }),
            capacity,
            notify: Notify::new(),
            readers: AtomicU32::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The critical sections cannot panic halfway through an update
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sentence, evicting the oldest one if the buffer is full
    pub fn push(&self, sentence: Sentence) -> PushOutcome {
        let outcome = {
            let mut inner = self.lock();
            let outcome = if inner.queue.len() >= self.capacity {
                inner.queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            inner.queue.push_back(sentence);
            inner.last_activity = Instant::now();
            outcome
        };

        self.notify.notify_one();
        outcome
    }

    /// Remove and return the oldest sentence, if any
    pub fn pop(&self) -> Option<Sentence> {
        let mut inner = self.lock();
        let sentence = inner.queue.pop_front();
        if sentence.is_some() {
            inner.last_activity = Instant::now();
        }
        sentence
    }

    /// Wait for and remove the oldest sentence
    ///
    /// Cancel safe: if the future is dropped before completing, no sentence
    /// has been removed.
    pub async fn recv(&self) -> Sentence {
        loop {
            if let Some(sentence) = self.pop() {
                return sentence;
            }
            // `notify_one` stores a permit when nobody is waiting, so a push
            // landing between `pop` and here is not missed.
            self.notify.notified().await;
        }
    }

    /// Number of buffered sentences
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Maximum number of sentences held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total sentences discarded by the overflow policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy out the buffered sentences, oldest first
    pub fn snapshot(&self) -> Vec<Sentence> {
        self.lock().queue.iter().cloned().collect()
    }

    /// Time since the last push, pop or reader attach
    pub fn idle_for(&self) -> Duration {
        self.lock().last_activity.elapsed()
    }

    /// Register a delivery worker reading from this buffer
    ///
    /// The returned guard unregisters it on drop.
    pub fn attach(self: &Arc<Self>) -> ReaderGuard {
        self.readers.fetch_add(1, Ordering::Relaxed);
        self.lock().last_activity = Instant::now();
        ReaderGuard {
            buffer: Arc::clone(self),
        }
    }

    /// Number of delivery workers currently attached
    pub fn reader_count(&self) -> u32 {
        self.readers.load(Ordering::Relaxed)
    }
}

/// Marks a delivery worker as attached to a buffer
#[derive(Debug)]
pub struct ReaderGuard {
    buffer: Arc<OutboundBuffer>,
}

impl ReaderGuard {
    /// The buffer this guard is attached to
    pub fn buffer(&self) -> &Arc<OutboundBuffer> {
        &self.buffer
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.buffer.readers.fetch_sub(1, Ordering::Relaxed);
        self.buffer.lock().last_activity = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn sentence(n: usize) -> Sentence {
        Sentence::new(format!("$GPGGA,{}", n))
    }

    #[test]
    fn test_fifo_order() {
        let buffer = OutboundBuffer::new(50);
        for n in 0..5 {
            assert_eq!(buffer.push(sentence(n)), PushOutcome::Queued);
        }

        let popped: Vec<_> = std::iter::from_fn(|| buffer.pop()).collect();
        assert_eq!(popped, (0..5).map(sentence).collect::<Vec<_>>());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buffer = OutboundBuffer::new(50);
        for n in 0..50 {
            buffer.push(sentence(n));
        }
        assert_eq!(buffer.len(), 50);

        assert_eq!(buffer.push(sentence(50)), PushOutcome::DroppedOldest);
        assert_eq!(buffer.len(), 50);
        assert_eq!(buffer.dropped(), 1);

        // Oldest gone, newest kept
        let contents = buffer.snapshot();
        assert_eq!(contents.first(), Some(&sentence(1)));
        assert_eq!(contents.last(), Some(&sentence(50)));
    }

    #[test]
    fn test_sustained_overflow_keeps_newest_window() {
        let buffer = OutboundBuffer::new(50);
        for n in 0..500 {
            buffer.push(sentence(n));
        }

        assert_eq!(buffer.len(), 50);
        assert_eq!(buffer.dropped(), 450);
        assert_eq!(buffer.snapshot(), (450..500).map(sentence).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let buffer = OutboundBuffer::new(0);
        buffer.push(sentence(0));
        buffer.push(sentence(1));

        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.pop(), Some(sentence(1)));
    }

    #[tokio::test]
    async fn test_recv_waits_for_push() {
        let buffer = Arc::new(OutboundBuffer::new(50));

        let reader = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        buffer.push(sentence(7));
        let received = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, sentence(7));
    }

    #[tokio::test]
    async fn test_cancelled_recv_loses_nothing() {
        let buffer = OutboundBuffer::new(50);

        let timed_out = tokio::time::timeout(Duration::from_millis(10), buffer.recv()).await;
        assert!(timed_out.is_err());

        buffer.push(sentence(1));
        assert_eq!(buffer.recv().await, sentence(1));
    }

    #[test]
    fn test_reader_guard_counts() {
        let buffer = Arc::new(OutboundBuffer::new(50));
        let a = buffer.attach();
        let b = buffer.attach();
        assert_eq!(buffer.reader_count(), 2);

        drop(a);
        assert_eq!(buffer.reader_count(), 1);
        assert!(Arc::ptr_eq(b.buffer(), &buffer));
        drop(b);
        assert_eq!(buffer.reader_count(), 0);
    }
}
