//! Subscription service: keeps every client's routing cache in sync.
//!
//! Bus dispatch threads call the consume entry points concurrently. Each
//! entry point validates its event and submits one work item to the
//! [`Sequencer`]; store mutation, store queries and outbound sends all run
//! on the sequencer's single worker, in arrival order.
//!
//! | Event                       | Work item                                        |
//! |-----------------------------|--------------------------------------------------|
//! | `SubscriptionAdded`         | activate saga, `AddSubscription` to active clients |
//! | `SubscriptionRemoved`       | retire saga, `RemoveSubscription` to active clients |
//! | `SubscriptionClientAdded`   | activate client, `SubscriptionRefresh` to it only |
//! | `SubscriptionClientRemoved` | audit log entry only                             |

use crate::bus::{EventHandler, ServiceBus, UnsubscribeAction};
use crate::config::ServiceConfig;
use crate::error::{Result, SyncError};
use crate::messages::{EventKind, Notification, SendContext, SubscriptionEvent};
use crate::saga::{
    SagaRegistration, SagaState, SagaStore, SubscriptionClientSaga, SubscriptionSaga,
};
use crate::sequencer::Sequencer;
use crate::types::{
    ClientId, CorrelationId, EndpointAddress, Subscription, SubscriptionClient,
    SubscriptionInformation,
};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of a service instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Started,
    Stopped,
    /// Terminal.
    Disposed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Store access and outbound sends. Only ever used from the sequencer worker.
struct SyncCore {
    bus: Arc<dyn ServiceBus>,
    clients: Arc<dyn SagaStore<SubscriptionClientSaga>>,
    subscriptions: Arc<dyn SagaStore<SubscriptionSaga>>,
    context: SendContext,
}

impl SyncCore {
    fn subscription_added(&self, subscription: Subscription) -> Result<()> {
        let id = subscription.subscription_id;
        match self.subscriptions.get(&id)? {
            None => {
                self.subscriptions
                    .create(SubscriptionSaga::create(subscription.clone()))?;
            }
            Some(saga) if saga.state == SagaState::Removed => {
                warn!(subscription = %id, "ignoring add for a removed subscription");
                return Ok(());
            }
            Some(_) => {
                debug!(subscription = %id, "subscription already active; re-broadcasting");
            }
        }

        self.broadcast(Notification::AddSubscription { subscription })
    }

    fn subscription_removed(&self, subscription: Subscription) -> Result<()> {
        let id = subscription.subscription_id;
        match self.subscriptions.get(&id)? {
            Some(saga) if saga.state != SagaState::Removed => {
                self.subscriptions.transition(&id, SagaState::Removed)?;
            }
            Some(_) => {
                debug!(subscription = %id, "subscription already removed");
            }
            None => {
                // Tombstone so a late add for the same id stays retired.
                debug!(subscription = %id, "removing unknown subscription");
                self.subscriptions
                    .create(SubscriptionSaga::new(subscription.clone()))?;
                self.subscriptions.transition(&id, SagaState::Removed)?;
            }
        }

        self.broadcast(Notification::RemoveSubscription { subscription })
    }

    fn client_added(&self, client: SubscriptionClient) -> Result<()> {
        let id = client.client_id;
        match self.clients.get(&id)? {
            None => {
                self.clients
                    .create(SubscriptionClientSaga::create(client.clone()))?;
            }
            Some(saga) if saga.state == SagaState::Removed => {
                warn!(client = %id, "ignoring join from a removed client");
                return Ok(());
            }
            Some(saga) => {
                // Broadcasts keep going to the address recorded at first join.
                if saga.control_address() != &client.control_address {
                    warn!(
                        client = %id,
                        registered = %saga.control_address(),
                        requested = %client.control_address,
                        "client rejoined from a different control address; keeping the registered one"
                    );
                }
                debug!(client = %id, "client already active; re-sending snapshot");
            }
        }

        let subscriptions: Vec<SubscriptionInformation> = self
            .subscriptions
            .query_by_state(SagaState::Active)?
            .iter()
            .map(SubscriptionSaga::info)
            .collect();

        debug!(
            client = %id,
            address = %client.control_address,
            subscriptions = subscriptions.len(),
            "sending subscription snapshot"
        );
        self.send_to(
            &client.control_address,
            Notification::SubscriptionRefresh { subscriptions },
        );
        Ok(())
    }

    /// Send `notification` to every active client. Individual send failures
    /// are logged and skipped.
    fn broadcast(&self, notification: Notification) -> Result<()> {
        let clients = self.clients.query_by_state(SagaState::Active)?;

        let mut delivered = 0usize;
        for client in &clients {
            if self.send_to(client.control_address(), notification.clone()) {
                delivered += 1;
            }
        }

        debug!(
            notification = notification.name(),
            delivered,
            targets = clients.len(),
            "broadcast complete"
        );
        Ok(())
    }

    fn send_to(&self, address: &EndpointAddress, notification: Notification) -> bool {
        let name = notification.name();
        let result = self
            .bus
            .get_endpoint(address)
            .and_then(|endpoint| endpoint.send(notification, &self.context));

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(address = %address, notification = name, error = %e, "send failed");
                false
            }
        }
    }
}

/// State reachable from bus handlers.
struct ServiceShared {
    core: Arc<SyncCore>,
    sequencer: Sequencer,
}

impl ServiceShared {
    fn consume(&self, event: SubscriptionEvent) -> Result<()> {
        match event {
            SubscriptionEvent::SubscriptionAdded { subscription } => {
                self.subscription_added(subscription)
            }
            SubscriptionEvent::SubscriptionRemoved { subscription } => {
                self.subscription_removed(subscription)
            }
            SubscriptionEvent::SubscriptionClientAdded {
                control_address,
                client_id,
            } => self.client_added(control_address, client_id),
            SubscriptionEvent::SubscriptionClientRemoved {
                control_address,
                client_id,
                correlation_id,
            } => self.client_removed(control_address, client_id, correlation_id),
        }
    }

    fn subscription_added(&self, subscription: Subscription) -> Result<()> {
        subscription.validate()?;
        debug!(
            subscription = %subscription.subscription_id,
            message = %subscription.message_name,
            endpoint = %subscription.endpoint,
            "subscription added"
        );

        let core = Arc::clone(&self.core);
        self.sequencer
            .submit("subscription_added", move || core.subscription_added(subscription))?;
        Ok(())
    }

    fn subscription_removed(&self, subscription: Subscription) -> Result<()> {
        subscription.validate()?;
        debug!(
            subscription = %subscription.subscription_id,
            message = %subscription.message_name,
            endpoint = %subscription.endpoint,
            "subscription removed"
        );

        let core = Arc::clone(&self.core);
        self.sequencer.submit("subscription_removed", move || {
            core.subscription_removed(subscription)
        })?;
        Ok(())
    }

    fn client_added(&self, control_address: EndpointAddress, client_id: ClientId) -> Result<()> {
        debug!(client = %client_id, address = %control_address, "subscription client added");

        let core = Arc::clone(&self.core);
        let client = SubscriptionClient::new(client_id, control_address);
        self.sequencer
            .submit("client_added", move || core.client_added(client))?;
        Ok(())
    }

    // The client saga is left active. A disconnected client keeps receiving
    // broadcasts until something else retires its saga.
    fn client_removed(
        &self,
        control_address: EndpointAddress,
        client_id: ClientId,
        correlation_id: CorrelationId,
    ) -> Result<()> {
        self.sequencer.submit("client_removed", move || {
            info!(
                client = %client_id,
                address = %control_address,
                correlation = %correlation_id,
                "subscription client removed"
            );
            Ok(())
        })?;
        Ok(())
    }
}

/// Orchestrates the two saga stores and the bus.
pub struct SubscriptionService {
    shared: Arc<ServiceShared>,
    config: ServiceConfig,
    state: Mutex<ServiceState>,
    /// Registration teardowns accumulated by `start`, run in reverse by `stop`.
    teardown: Mutex<Vec<UnsubscribeAction>>,
    disposed: AtomicBool,
}

impl SubscriptionService {
    /// Create a service. Its sequencer worker starts immediately; bus
    /// registration waits for [`SubscriptionService::start`].
    pub fn new(
        bus: Arc<dyn ServiceBus>,
        clients: Arc<dyn SagaStore<SubscriptionClientSaga>>,
        subscriptions: Arc<dyn SagaStore<SubscriptionSaga>>,
        config: ServiceConfig,
    ) -> Result<Self> {
        config.validate()?;
        let sequencer = Sequencer::new(config.sequencer_name.clone())?;
        let context = SendContext {
            source: bus.address().clone(),
        };

        Ok(Self {
            shared: Arc::new(ServiceShared {
                core: Arc::new(SyncCore {
                    bus,
                    clients,
                    subscriptions,
                    context,
                }),
                sequencer,
            }),
            config,
            state: Mutex::new(ServiceState::Created),
            teardown: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Register the four event handlers and both saga stores with the bus.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != ServiceState::Created {
            return Err(SyncError::InvalidState {
                expected: ServiceState::Created.to_string(),
                got: state.to_string(),
            });
        }

        let bus = &self.shared.core.bus;
        let mut actions: Vec<UnsubscribeAction> = Vec::new();

        let registered = (|| -> Result<()> {
            for kind in EventKind::ALL {
                actions.push(bus.subscribe(kind, self.handler())?);
            }
            actions.push(bus.subscribe_saga(<dyn SagaRegistration>::for_store(Arc::clone(
                &self.shared.core.clients,
            )))?);
            actions.push(bus.subscribe_saga(<dyn SagaRegistration>::for_store(Arc::clone(
                &self.shared.core.subscriptions,
            )))?);
            Ok(())
        })();

        if let Err(e) = registered {
            error!(error = %e, "subscription service registration failed");
            run_teardown(actions);
            return Err(e);
        }

        *self.teardown.lock() = actions;
        *state = ServiceState::Started;
        info!(address = %bus.address(), "subscription service started");
        Ok(())
    }

    /// Unregister every handler and saga registration made by `start`.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != ServiceState::Started {
            return Err(SyncError::InvalidState {
                expected: ServiceState::Started.to_string(),
                got: state.to_string(),
            });
        }

        let actions = std::mem::take(&mut *self.teardown.lock());
        run_teardown(actions);

        *state = ServiceState::Stopped;
        info!("subscription service stopped");
        Ok(())
    }

    /// Shut down the sequencer (bounded by the configured timeout) and
    /// release the bus. Later calls are no-ops.
    ///
    /// Failures are logged and returned wrapped in [`SyncError::Shutdown`].
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sequencer_result = self
            .shared
            .sequencer
            .shutdown(self.config.shutdown_timeout);
        // Released exactly once, even when the sequencer did not drain.
        let bus_result = self.shared.core.bus.dispose();

        *self.state.lock() = ServiceState::Disposed;

        let result = sequencer_result.map(|_| ()).and(bus_result);
        if let Err(e) = result {
            let err = SyncError::shutdown(e);
            error!(error = %err, "subscription service shutdown failed");
            return Err(err);
        }

        info!("subscription service disposed");
        Ok(())
    }

    pub fn consume(&self, event: SubscriptionEvent) -> Result<()> {
        self.shared.consume(event)
    }

    pub fn consume_subscription_added(&self, subscription: Subscription) -> Result<()> {
        self.shared.subscription_added(subscription)
    }

    pub fn consume_subscription_removed(&self, subscription: Subscription) -> Result<()> {
        self.shared.subscription_removed(subscription)
    }

    pub fn consume_client_added(
        &self,
        control_address: EndpointAddress,
        client_id: ClientId,
    ) -> Result<()> {
        self.shared.client_added(control_address, client_id)
    }

    pub fn consume_client_removed(
        &self,
        control_address: EndpointAddress,
        client_id: ClientId,
        correlation_id: CorrelationId,
    ) -> Result<()> {
        self.shared
            .client_removed(control_address, client_id, correlation_id)
    }

    /// Wait until everything submitted so far has run.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let (tx, rx) = bounded::<()>(1);
        self.shared.sequencer.submit("flush", move || {
            let _ = tx.send(());
            Ok(())
        })?;
        rx.recv_timeout(timeout)
            .map_err(|_| SyncError::Timeout(timeout))
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Source address stamped on every notification.
    pub fn address(&self) -> &EndpointAddress {
        &self.shared.core.context.source
    }

    /// Work items queued but not yet started.
    pub fn pending_work(&self) -> usize {
        self.shared.sequencer.pending()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn handler(&self) -> EventHandler {
        let weak = Arc::downgrade(&self.shared);
        Arc::new(move |event: SubscriptionEvent| match weak.upgrade() {
            Some(shared) => shared.consume(event),
            None => Err(SyncError::SequencerStopped),
        })
    }
}

impl Drop for SubscriptionService {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::SeqCst) {
            // Do not wait on the worker or touch the bus here.
            warn!("subscription service dropped without dispose");
            self.shared.sequencer.close();
        }
    }
}

fn run_teardown(actions: Vec<UnsubscribeAction>) {
    for action in actions.into_iter().rev() {
        action();
    }
}
