//! Disposal, bounded shutdown and failure isolation.

mod common;

use common::{addr, drain, init_tracing, subscription, Harness};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use subscription_sync::{
    ClientId, CorrelationId, InMemorySagaStore, LoopbackBus, Result, SagaState, SagaStore,
    ServiceConfig, SubscriptionClientSaga, SubscriptionService, SyncError,
};

/// Client store whose queries block until released.
struct StallingStore {
    inner: InMemorySagaStore<SubscriptionClientSaga>,
    stalled: Sender<()>,
    release: Receiver<()>,
}

impl SagaStore<SubscriptionClientSaga> for StallingStore {
    fn create(&self, saga: SubscriptionClientSaga) -> Result<()> {
        self.inner.create(saga)
    }

    fn get(&self, id: &CorrelationId) -> Result<Option<SubscriptionClientSaga>> {
        self.inner.get(id)
    }

    fn transition(&self, id: &CorrelationId, to: SagaState) -> Result<SubscriptionClientSaga> {
        self.inner.transition(id, to)
    }

    fn query(
        &self,
        predicate: &dyn Fn(&SubscriptionClientSaga) -> bool,
    ) -> Result<Vec<SubscriptionClientSaga>> {
        let _ = self.stalled.try_send(());
        let _ = self.release.recv_timeout(Duration::from_secs(10));
        self.inner.query(predicate)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Client store whose first query fails.
struct FlakyStore {
    inner: InMemorySagaStore<SubscriptionClientSaga>,
    failed_once: AtomicBool,
}

impl SagaStore<SubscriptionClientSaga> for FlakyStore {
    fn create(&self, saga: SubscriptionClientSaga) -> Result<()> {
        self.inner.create(saga)
    }

    fn get(&self, id: &CorrelationId) -> Result<Option<SubscriptionClientSaga>> {
        self.inner.get(id)
    }

    fn transition(&self, id: &CorrelationId, to: SagaState) -> Result<SubscriptionClientSaga> {
        self.inner.transition(id, to)
    }

    fn query(
        &self,
        predicate: &dyn Fn(&SubscriptionClientSaga) -> bool,
    ) -> Result<Vec<SubscriptionClientSaga>> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(SyncError::InvalidFormat("simulated store outage".into()));
        }
        self.inner.query(predicate)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[test]
fn test_dispose_is_idempotent() {
    let harness = Harness::new();
    harness.service.dispose().unwrap();
    assert!(harness.bus.is_disposed());

    // Second call neither errors nor touches the (already released) bus.
    harness.service.dispose().unwrap();
}

#[test]
fn test_dispose_drains_queued_work() {
    let harness = Harness::new();
    let x = harness.join("ctl://x", 1);
    harness.flush();
    x.drain();

    for n in 1..=20 {
        harness
            .service
            .consume_subscription_added(subscription(n, "Queued", "q://queued"))
            .unwrap();
    }
    harness.service.dispose().unwrap();

    // Mailbox senders are gone after bus disposal; buffered envelopes remain.
    let received = x.drain();
    assert_eq!(received.len(), 20);
}

#[test]
fn test_stalled_work_bounds_dispose() {
    init_tracing();
    let (stalled_tx, stalled_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let clients = Arc::new(StallingStore {
        inner: InMemorySagaStore::new(),
        stalled: stalled_tx,
        release: release_rx,
    });

    let bus = Arc::new(LoopbackBus::new(addr("loopback://node/subscriptions")));
    let service = SubscriptionService::new(
        bus.clone(),
        clients,
        Arc::new(InMemorySagaStore::new()),
        ServiceConfig::default().with_shutdown_timeout(Duration::from_millis(200)),
    )
    .unwrap();
    service.start().unwrap();

    service
        .consume_subscription_added(subscription(1, "Stuck", "q://stuck"))
        .unwrap();
    service
        .consume_subscription_added(subscription(2, "Behind", "q://behind"))
        .unwrap();
    stalled_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let start = Instant::now();
    let result = service.dispose();
    let elapsed = start.elapsed();

    match result {
        Err(SyncError::Shutdown(cause)) => match *cause {
            SyncError::ShutdownTimeout { abandoned, .. } => assert_eq!(abandoned, 1),
            other => panic!("Expected ShutdownTimeout cause, got {:?}", other),
        },
        other => panic!("Expected Shutdown error, got {:?}", other),
    }
    assert!(elapsed < Duration::from_secs(2), "dispose took {:?}", elapsed);
    assert!(bus.is_disposed());

    // Still a no-op afterwards
    service.dispose().unwrap();
    release_tx.send(()).unwrap();
}

#[test]
fn test_failing_work_item_is_isolated() {
    init_tracing();
    let clients = Arc::new(FlakyStore {
        inner: InMemorySagaStore::new(),
        failed_once: AtomicBool::new(false),
    });
    let harness = Harness::with_stores(
        clients.clone(),
        Arc::new(InMemorySagaStore::new()),
        ServiceConfig::default(),
    );

    // Register the client directly so the first query is the failing broadcast.
    clients
        .create(SubscriptionClientSaga::create(
            subscription_sync::SubscriptionClient::new(ClientId::from_u128(1), addr("ctl://x")),
        ))
        .unwrap();
    let x = harness.bus.connect(addr("ctl://x")).unwrap();

    harness
        .service
        .consume_subscription_added(subscription(1, "Lost", "q://lost"))
        .unwrap();
    harness
        .service
        .consume_subscription_added(subscription(2, "Delivered", "q://delivered"))
        .unwrap();

    let received = drain(&harness, &x);
    assert_eq!(received.len(), 1);
    match &received[0].message {
        subscription_sync::Notification::AddSubscription { subscription } => {
            assert_eq!(subscription.message_name, "Delivered");
        }
        other => panic!("Expected AddSubscription, got {:?}", other),
    }
}

#[test]
fn test_concurrent_dispose_runs_shutdown_once() {
    let harness = Arc::new(Harness::new());
    let errors = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let harness = Arc::clone(&harness);
            let errors = Arc::clone(&errors);
            std::thread::spawn(move || {
                if let Err(e) = harness.service.dispose() {
                    errors.lock().push(e.to_string());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(errors.lock().is_empty());
    assert!(harness.bus.is_disposed());
}
