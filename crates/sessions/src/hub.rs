//! Subscriber hub: bounded, lossy fan-out of typed events.
//!
//! Subscriber slowness must never back-pressure the upstream — broadcast
//! uses non-blocking sends and drops events for the one subscriber whose
//! buffer is full. Consumers that need loss-free streams combine an on-disk
//! snapshot with a live subscription (read-then-subscribe).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Per-subscriber channel capacity.
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// Events broadcast through a hub carry the hub's monotonic sequence number.
pub trait Sequenced {
    fn with_seq(self, seq: u64) -> Self;
}

impl Sequenced for archon_domain::events::SessionEvent {
    fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }
}

impl Sequenced for archon_domain::events::DebugEvent {
    fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }
}

struct HubInner<T> {
    /// `None` once the hub has shut down; new subscribers then receive an
    /// already-closed channel.
    subscribers: Mutex<Option<HashMap<u64, mpsc::Sender<T>>>>,
    next_id: AtomicU64,
    seq: AtomicU64,
}

/// Fan-out register of subscribers to a single event stream.
pub struct EventHub<T> {
    inner: Arc<HubInner<T>>,
}

impl<T> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> EventHub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(Some(HashMap::new())),
                next_id: AtomicU64::new(1),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber. Returns the receive side plus an idempotent
    /// canceller that is safe to call after the hub has shut down.
    pub fn add(&self) -> (mpsc::Receiver<T>, Canceller<T>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.inner.subscribers.lock();
        match guard.as_mut() {
            Some(map) => {
                map.insert(id, tx);
            }
            // Hub already shut down: drop the sender so the receiver reads
            // a closed channel immediately.
            None => drop(tx),
        }

        (
            rx,
            Canceller {
                hub: Arc::downgrade(&self.inner),
                id,
            },
        )
    }

    /// Number of current subscribers.
    pub fn count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .as_ref()
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Shut the hub down: all subscriber channels close, later `add` calls
    /// receive closed channels, broadcasts become no-ops. Idempotent.
    pub fn shutdown(&self) {
        self.inner.subscribers.lock().take();
    }
}

impl<T: Sequenced + Clone> EventHub<T> {
    /// Send `event` to every current subscriber without blocking. A full
    /// buffer drops the event for that subscriber only; a disconnected
    /// subscriber is removed.
    pub fn broadcast(&self, event: T) {
        let mut guard = self.inner.subscribers.lock();
        let Some(map) = guard.as_mut() else {
            return;
        };

        // Stamp under the hub lock so sequence numbers are strictly
        // monotonic in broadcast order.
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let event = event.with_seq(seq);

        map.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(subscriber = id, "subscriber buffer full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Idempotent cancellation handle for one subscription.
pub struct Canceller<T> {
    hub: Weak<HubInner<T>>,
    id: u64,
}

impl<T> Canceller<T> {
    /// Remove the subscription and close its channel. Calling twice, or
    /// after hub shutdown, is a no-op.
    pub fn cancel(&self) {
        if let Some(inner) = self.hub.upgrade() {
            if let Some(map) = inner.subscribers.lock().as_mut() {
                map.remove(&self.id);
            }
        }
    }
}

impl<T> Drop for Canceller<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use archon_domain::events::SessionEvent;
    use serde_json::json;

    fn event(method: &str) -> SessionEvent {
        SessionEvent::notification(method, json!({}))
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let hub = EventHub::new();
        let (mut rx1, _c1) = hub.add();
        let (mut rx2, _c2) = hub.add();
        assert_eq!(hub.count(), 2);

        hub.broadcast(event("turn/started"));

        assert_eq!(rx1.recv().await.unwrap().method, "turn/started");
        assert_eq!(rx2.recv().await.unwrap().method, "turn/started");
    }

    #[tokio::test]
    async fn sequence_numbers_are_strictly_monotonic() {
        let hub = EventHub::new();
        let (mut rx, _c) = hub.add();

        for _ in 0..5 {
            hub.broadcast(event("e"));
        }

        let mut last = 0;
        for _ in 0..5 {
            let ev = rx.recv().await.unwrap();
            assert!(ev.seq > last, "seq {} not > {}", ev.seq, last);
            last = ev.seq;
        }
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_stalling_others() {
        let hub = EventHub::new();
        let (mut slow, _c1) = hub.add();
        let (mut fast, _c2) = hub.add();

        // Overflow the slow subscriber's buffer by one.
        for _ in 0..=SUBSCRIBER_CAPACITY {
            hub.broadcast(event("e"));
        }

        // The fast subscriber drains everything.
        let mut fast_count = 0;
        while fast.try_recv().is_ok() {
            fast_count += 1;
        }
        assert_eq!(fast_count, SUBSCRIBER_CAPACITY + 1);

        // The slow one got exactly its buffer's worth.
        let mut slow_count = 0;
        while slow.try_recv().is_ok() {
            slow_count += 1;
        }
        assert_eq!(slow_count, SUBSCRIBER_CAPACITY);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let hub = EventHub::<SessionEvent>::new();
        let (mut rx, canceller) = hub.add();
        assert_eq!(hub.count(), 1);

        canceller.cancel();
        canceller.cancel();
        assert_eq!(hub.count(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_closes_channels_and_future_adds() {
        let hub = EventHub::new();
        let (mut rx, canceller) = hub.add();

        hub.shutdown();
        assert!(rx.recv().await.is_none());
        assert_eq!(hub.count(), 0);

        // Cancel after shutdown stays a no-op.
        canceller.cancel();

        // New subscribers see a closed channel.
        let (mut rx2, _c) = hub.add();
        assert!(rx2.recv().await.is_none());

        // Broadcast after shutdown is a no-op.
        hub.broadcast(event("late"));
    }

    #[tokio::test]
    async fn dropping_receiver_removes_subscriber_on_next_broadcast() {
        let hub = EventHub::new();
        let (rx, _c) = hub.add();
        drop(rx);

        hub.broadcast(event("e"));
        assert_eq!(hub.count(), 0);
    }
}
