//! Bounded hand-off from the driver's delivery thread to the processing task.
//!
//! The signal callback runs on a driver thread and must never block, so it
//! pushes into a [`SampleQueue`] and returns.  When the processing task falls
//! behind and the queue is full, the **oldest** batch is discarded and the
//! drop is logged at `error!` with a running counter.  Losing a few samples
//! is preferable to unbounded memory growth.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::error;
use tokio::sync::Notify;

use crate::types::RawSignalSample;

/// One burst of samples as delivered by a single driver callback.
pub type SignalBatch = Vec<RawSignalSample>;

pub struct SampleQueue {
    capacity: usize,
    batches: Mutex<VecDeque<SignalBatch>>,
    notify: Notify,
    dropped_batches: AtomicU64,
    dropped_samples: AtomicU64,
    closed: AtomicBool,
}

impl SampleQueue {
    /// `capacity` is in batches; `0` is treated as `1`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            batches: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped_batches: AtomicU64::new(0),
            dropped_samples: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SignalBatch>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.batches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a batch without blocking.
    ///
    /// Returns `false` when the queue is closed and the batch was discarded.
    pub fn push(&self, batch: SignalBatch) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if batch.is_empty() {
            return true;
        }
        {
            let mut q = self.lock();
            if q.len() >= self.capacity {
                if let Some(old) = q.pop_front() {
                    let n = self.dropped_batches.fetch_add(1, Ordering::Relaxed) + 1;
                    let s = self
                        .dropped_samples
                        .fetch_add(old.len() as u64, Ordering::Relaxed)
                        + old.len() as u64;
                    error!(
                        "Signal queue full ({} batches): dropped oldest batch of {} samples \
                         ({n} batches / {s} samples dropped so far)",
                        self.capacity,
                        old.len()
                    );
                }
            }
            q.push_back(batch);
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next batch.
    ///
    /// Returns `None` once the queue has been closed **and** drained.
    pub async fn recv(&self) -> Option<SignalBatch> {
        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.notify.notified();
            if let Some(batch) = self.lock().pop_front() {
                return Some(batch);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Take a batch if one is ready.
    pub fn try_recv(&self) -> Option<SignalBatch> {
        self.lock().pop_front()
    }

    /// Stop accepting batches and wake the consumer.  Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn batch(start: u32, n: u32) -> SignalBatch {
        (start..start + n)
            .map(|i| RawSignalSample {
                pack_num: i,
                o1: 0.0,
                o2: 0.0,
                t3: 0.0,
                t4: 0.0,
            })
            .collect()
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let q = SampleQueue::new(2);
        q.push(batch(0, 3));
        q.push(batch(3, 3));
        q.push(batch(6, 3));

        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped_batches(), 1);
        assert_eq!(q.dropped_samples(), 3);
        assert_eq!(q.try_recv().unwrap()[0].pack_num, 3);
        assert_eq!(q.try_recv().unwrap()[0].pack_num, 6);
        assert!(q.try_recv().is_none());
    }

    #[test]
    fn test_closed_queue_rejects_push() {
        let q = SampleQueue::new(4);
        q.close();
        assert!(!q.push(batch(0, 1)));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_recv_drains_then_ends_after_close() {
        let q = Arc::new(SampleQueue::new(8));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(b) = q.recv().await {
                    seen.extend(b.into_iter().map(|s| s.pack_num));
                }
                seen
            })
        };
        for i in 0..5 {
            q.push(batch(i * 2, 2));
            tokio::task::yield_now().await;
        }
        q.close();
        let seen = consumer.await.unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}
