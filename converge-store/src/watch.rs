//! Watch registry - per-context subscriptions with automatic cleanup
//!
//! Subscribers receive committed entries through bounded channels. The
//! registry snapshots the matching subscriber list before fanning out
//! so no lock is held during delivery, and a subscriber that is gone
//! (receiver dropped) or too slow (channel full) is evicted; a slow
//! subscriber can re-subscribe and catch up with a sequence-bounded
//! read. Dropping a `WatchHandle` unsubscribes immediately, so a
//! subscriber task that exits - normally or abnormally - is cleaned up
//! without any reaper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use converge_model::Entry;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

/// Per-subscriber queue depth. Overflow evicts the subscription.
pub const WATCH_CHANNEL_CAPACITY: usize = 64;

struct Subscription {
    id: u64,
    key_filter: Option<String>,
    tx: mpsc::Sender<Entry>,
}

impl Subscription {
    fn matches(&self, key: &str) -> bool {
        match &self.key_filter {
            Some(filter) => filter == key,
            None => true,
        }
    }
}

/// Long-lived subscription manager owned by the store.
#[derive(Default)]
pub struct WatchRegistry {
    contexts: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription on a context, optionally filtered to a
    /// single key. The returned handle unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        context_id: &str,
        key_filter: Option<String>,
    ) -> WatchHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        self.contexts
            .lock()
            .entry(context_id.to_string())
            .or_default()
            .push(Subscription {
                id,
                key_filter,
                tx,
            });
        WatchHandle {
            context_id: context_id.to_string(),
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Deliver a committed entry to every live matching subscription.
    ///
    /// Called by the store inside the per-context critical section, so
    /// each subscriber's queue sees entries in commit order. Delivery
    /// itself is non-blocking: `try_send` per subscriber, eviction on
    /// overflow or a dropped receiver.
    pub fn notify(&self, entry: &Entry) {
        let targets: Vec<(u64, mpsc::Sender<Entry>)> = {
            let contexts = self.contexts.lock();
            let Some(subscriptions) = contexts.get(&entry.context_id) else {
                return;
            };
            subscriptions
                .iter()
                .filter(|s| s.matches(&entry.key))
                .map(|s| (s.id, s.tx.clone()))
                .collect()
        };

        let mut evicted = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(entry.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!(context_id = %entry.context_id, subscription = id, "evicting slow watch subscriber");
                    evicted.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => evicted.push(id),
            }
        }
        if !evicted.is_empty() {
            self.remove(&entry.context_id, &evicted);
        }
    }

    /// Number of live subscriptions on a context. Subscriptions whose
    /// receiver has gone away are pruned on the spot.
    pub fn subscriber_count(&self, context_id: &str) -> usize {
        let mut contexts = self.contexts.lock();
        let Some(subscriptions) = contexts.get_mut(context_id) else {
            return 0;
        };
        subscriptions.retain(|s| !s.tx.is_closed());
        let count = subscriptions.len();
        if count == 0 {
            contexts.remove(context_id);
        }
        count
    }

    fn remove(&self, context_id: &str, ids: &[u64]) {
        let mut contexts = self.contexts.lock();
        if let Some(subscriptions) = contexts.get_mut(context_id) {
            subscriptions.retain(|s| !ids.contains(&s.id));
            if subscriptions.is_empty() {
                contexts.remove(context_id);
            }
        }
    }
}

/// One live subscription. Receive committed entries with `recv`; drop
/// the handle (or let the owning task die) to unsubscribe.
pub struct WatchHandle {
    context_id: String,
    id: u64,
    rx: mpsc::Receiver<Entry>,
    registry: Arc<WatchRegistry>,
}

impl WatchHandle {
    /// Next committed entry matching this subscription, or `None` once
    /// the subscription has been evicted.
    pub async fn recv(&mut self) -> Option<Entry> {
        self.rx.recv().await
    }

    /// Non-blocking variant of `recv`.
    pub fn try_recv(&mut self) -> Option<Entry> {
        self.rx.try_recv().ok()
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Explicitly end this subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.registry.remove(&self.context_id, &[self.id]);
    }
}
