//! Bounded, lossy channel transport shared by `SmartBuffer`'s segment
//! output and the dispatcher's per-speaker queues.
//!
//! `try_send` never blocks: on a full channel it increments a dropped
//! counter and rate-limits the warning log, the same policy used
//! throughout the pipeline for backpressure (segment channel, event bus,
//! per-speaker FIFOs).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Full,
    Closed,
}

pub struct BoundedSender<T> {
    tx: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
    label: &'static str,
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: self.dropped.clone(),
            label: self.label,
        }
    }
}

impl<T> BoundedSender<T> {
    /// Attempt to enqueue without blocking. On `Full`, the dropped counter
    /// advances and a warning is logged every 10th drop to avoid flooding
    /// logs under sustained overflow.
    pub fn try_send(&self, value: T) -> Result<(), SendError> {
        match self.tx.try_send(value) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n % 10 == 1 {
                    tracing::warn!(label = self.label, dropped_total = n, "channel full, dropping");
                }
                Err(SendError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct BoundedReceiver<T> {
    rx: mpsc::Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> BoundedReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Create a bounded channel with drop-newest-and-count overflow semantics.
/// `label` identifies the channel in log lines (e.g. "segment", "event:Kind").
pub fn bounded<T>(capacity: usize, label: &'static str) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        BoundedSender {
            tx,
            dropped: dropped.clone(),
            label,
        },
        BoundedReceiver { rx, dropped },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_recv_roundtrip() {
        let (tx, mut rx) = bounded::<u32>(4, "test");
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn full_channel_drops_and_counts() {
        let (tx, mut rx) = bounded::<u32>(1, "test");
        tx.try_send(1).unwrap();
        let err = tx.try_send(2).unwrap_err();
        assert_eq!(err, SendError::Full);
        assert_eq!(tx.dropped_count(), 1);
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn closed_channel_reports_closed() {
        let (tx, rx) = bounded::<u32>(1, "test");
        drop(rx);
        let err = tx.try_send(1).unwrap_err();
        assert_eq!(err, SendError::Closed);
    }

    #[tokio::test]
    async fn dropped_counter_shared_across_clones() {
        let (tx, _rx) = bounded::<u32>(1, "test");
        let tx2 = tx.clone();
        tx.try_send(1).unwrap();
        let _ = tx2.try_send(2);
        assert_eq!(tx.dropped_count(), 1);
        assert_eq!(tx2.dropped_count(), 1);
    }
}
