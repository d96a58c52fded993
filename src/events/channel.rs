//! Bounded, non-blocking event queue.
//!
//! Producers never wait on the consumer. When the queue is full the oldest
//! queued event is discarded to make room; every discard is counted and
//! logged, so loss is visible rather than silent.

use super::ScannerEvent;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Shared {
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<ScannerEvent>,
    // Lets a producer evict the oldest event when the queue is full.
    evict: Receiver<ScannerEvent>,
    shared: Arc<Shared>,
}

/// Consumer half. Dropping it closes the channel for all producers.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<ScannerEvent>,
    shared: Arc<Shared>,
}

/// Creates an event channel holding at most `capacity` undelivered events.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let shared = Arc::new(Shared::default());

    (
        EventSender {
            tx,
            evict: rx.clone(),
            shared: Arc::clone(&shared),
        },
        EventReceiver { rx, shared },
    )
}

impl EventSender {
    /// Enqueues an event without blocking.
    ///
    /// Returns `false` once the receiver has been dropped.
    pub fn send(&self, event: ScannerEvent) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return true,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(oldest) = self.evict.try_recv() {
                        let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(
                            kind = oldest.kind(),
                            dropped_total = total,
                            "Event queue full, dropped oldest event"
                        );
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// True once the consumer is gone.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Events discarded due to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl EventReceiver {
    /// Takes the next event if one is queued.
    pub fn try_recv(&self) -> Option<ScannerEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ScannerEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<ScannerEvent> {
        self.rx.try_iter().collect()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Events discarded due to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}
