//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use subscription_sync::{
    ClientId, CorrelationId, EndpointAddress, Envelope, InMemorySagaStore, LoopbackBus, Mailbox,
    SagaStore, ServiceConfig, Subscription, SubscriptionClientSaga, SubscriptionSaga,
    SubscriptionService,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn addr(s: &str) -> EndpointAddress {
    EndpointAddress::parse(s).unwrap()
}

pub fn subscription(n: u128, message: &str, endpoint: &str) -> Subscription {
    Subscription::new(CorrelationId::from_u128(n), message, addr(endpoint))
}

pub struct Harness {
    pub bus: Arc<LoopbackBus>,
    pub clients: Arc<dyn SagaStore<SubscriptionClientSaga>>,
    pub subscriptions: Arc<dyn SagaStore<SubscriptionSaga>>,
    pub service: SubscriptionService,
}

impl Harness {
    /// Started service over in-memory stores and a loopback bus.
    pub fn new() -> Self {
        Self::with_stores(
            Arc::new(InMemorySagaStore::new()),
            Arc::new(InMemorySagaStore::new()),
            ServiceConfig::default().with_shutdown_timeout(Duration::from_secs(5)),
        )
    }

    pub fn with_stores(
        clients: Arc<dyn SagaStore<SubscriptionClientSaga>>,
        subscriptions: Arc<dyn SagaStore<SubscriptionSaga>>,
        config: ServiceConfig,
    ) -> Self {
        init_tracing();
        let bus = Arc::new(LoopbackBus::from_config(
            addr("loopback://node/subscriptions"),
            &config,
        ));
        let service = SubscriptionService::new(
            bus.clone(),
            Arc::clone(&clients),
            Arc::clone(&subscriptions),
            config,
        )
        .unwrap();
        service.start().unwrap();

        Self {
            bus,
            clients,
            subscriptions,
            service,
        }
    }

    /// Open a mailbox and announce the client through the bus.
    pub fn join(&self, control: &str, id: u128) -> Mailbox {
        let mailbox = self.bus.connect(addr(control)).unwrap();
        self.bus
            .publish(subscription_sync::SubscriptionEvent::SubscriptionClientAdded {
                control_address: addr(control),
                client_id: ClientId::from_u128(id),
            })
            .unwrap();
        mailbox
    }

    pub fn flush(&self) {
        self.service.flush(RECV_TIMEOUT).unwrap();
    }
}

/// Flush the service, then take everything buffered in `mailbox`.
pub fn drain(harness: &Harness, mailbox: &Mailbox) -> Vec<Envelope> {
    harness.flush();
    mailbox.drain()
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.service.dispose();
    }
}
