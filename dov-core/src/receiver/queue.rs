//! Bounded hand-off between the capture and analyzer workers.
//!
//! The capture side never blocks: when the queue is full the oldest
//! capture is discarded, so analysis always works on recent images.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::image::CarrierImage;

pub struct ImageQueue {
    tx: Sender<Arc<CarrierImage>>,
    rx: Receiver<Arc<CarrierImage>>,
    dropped: AtomicU64,
}

impl ImageQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue `image`, evicting the oldest entry if full. Returns whether
    /// an entry was evicted.
    pub fn push(&self, image: Arc<CarrierImage>) -> bool {
        let mut pending = image;
        let mut evicted = false;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(returned)) => {
                    pending = returned;
                    // The analyzer may win the race for the oldest entry.
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted = true;
                    }
                }
                // Both ends live in `self`.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// Dequeue the oldest entry, waiting up to `timeout` for one.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Arc<CarrierImage>> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Captures evicted so far because analysis fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

// ── Tests ────────────────────────────────────────────────────────
