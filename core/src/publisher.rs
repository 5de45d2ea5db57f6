use crate::session::SessionSnapshot;
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Handle returned by [`SessionPublisher::subscribe`]; pass it back to
/// [`SessionPublisher::unsubscribe`] to stop receiving snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Clears the delivery flag even when a subscriber panics.
struct DeliveryGuard;

impl DeliveryGuard {
    fn arm() -> Self {
        DELIVERING.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        DELIVERING.with(|flag| flag.set(false));
    }
}

/// Fan-out of session snapshots to registered callbacks. Delivery is
/// synchronous and in subscription order; a publish issued from inside a
/// callback is dropped with a warning rather than recursing.
#[derive(Clone, Default)]
pub struct SessionPublisher {
    inner: Arc<PublisherInner>,
}

#[derive(Default)]
struct PublisherInner {
    subscribers: RwLock<BTreeMap<u64, Subscriber>>,
    next_id: AtomicU64,
    deliver: Mutex<()>,
}

impl SessionPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .write()
            .insert(id, Arc::new(callback));
        SubscriptionId(id)
    }

    /// Idempotent; unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscribers.write().remove(&id.0);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    pub fn publish(&self, snapshot: &SessionSnapshot) {
        if DELIVERING.with(Cell::get) {
            warn!("session snapshot published from inside a subscriber, dropping");
            return;
        }
        // Serialize cross-thread publishes so subscribers see snapshots
        // one at a time.
        let _guard = self.inner.deliver.lock();
        // Clone the callbacks out so subscribers may subscribe or
        // unsubscribe from within their own delivery.
        let subscribers: Vec<Subscriber> =
            self.inner.subscribers.read().values().cloned().collect();
        let _delivering = DeliveryGuard::arm();
        for subscriber in subscribers {
            subscriber(snapshot);
        }
    }
}
