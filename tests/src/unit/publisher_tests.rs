use cinefluent_core::publisher::SessionPublisher;
use cinefluent_core::session::{SessionPhase, SessionSnapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn snapshot(phase: SessionPhase) -> SessionSnapshot {
    SessionSnapshot {
        user: None,
        phase,
        is_loading: false,
        error: None,
    }
}

#[test]
fn delivers_in_subscription_order() {
    let publisher = SessionPublisher::new();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let first = order.clone();
    publisher.subscribe(move |_| first.lock().push("first"));
    let second = order.clone();
    publisher.subscribe(move |_| second.lock().push("second"));

    publisher.publish(&snapshot(SessionPhase::Unauthenticated));

    assert_eq!(*order.lock(), vec!["first", "second"]);
}

#[test]
fn unsubscribe_stops_delivery_and_is_idempotent() {
    let publisher = SessionPublisher::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let id = publisher.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    publisher.publish(&snapshot(SessionPhase::Unauthenticated));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    publisher.unsubscribe(id);
    publisher.unsubscribe(id);
    publisher.publish(&snapshot(SessionPhase::Unauthenticated));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(publisher.subscriber_count(), 0);
}

#[test]
fn reentrant_publish_is_dropped() {
    let publisher = SessionPublisher::new();
    let deliveries = Arc::new(AtomicUsize::new(0));

    let counter = deliveries.clone();
    let inner = publisher.clone();
    publisher.subscribe(move |snap| {
        counter.fetch_add(1, Ordering::SeqCst);
        // Must be rejected, not recurse.
        inner.publish(snap);
    });

    publisher.publish(&snapshot(SessionPhase::Authenticated));

    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
}

#[test]
fn delivery_resumes_after_a_panicking_subscriber() {
    let publisher = SessionPublisher::new();
    let id = publisher.subscribe(|_| panic!("subscriber bug"));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    publisher.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let publish = std::panic::AssertUnwindSafe(|| {
        publisher.publish(&snapshot(SessionPhase::Unauthenticated));
    });
    std::panic::catch_unwind(publish).expect_err("panic must propagate");

    // The next publish on this thread must still deliver.
    publisher.unsubscribe(id);
    publisher.publish(&snapshot(SessionPhase::Unauthenticated));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn subscribing_from_inside_delivery_does_not_deadlock() {
    let publisher = SessionPublisher::new();
    let inner = publisher.clone();
    publisher.subscribe(move |_| {
        inner.subscribe(|_| {});
    });

    publisher.publish(&snapshot(SessionPhase::Unauthenticated));

    assert_eq!(publisher.subscriber_count(), 2);
}
