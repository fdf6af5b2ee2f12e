//! In-process bus with per-address mailboxes.

use crate::config::ServiceConfig;
use crate::error::{Result, SyncError};
use crate::messages::{Envelope, EventKind, Notification, SendContext, SubscriptionEvent};
use crate::saga::SagaRegistration;
use crate::types::EndpointAddress;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::types::{Endpoint, EventHandler, Mailbox, ServiceBus, UnsubscribeAction};

/// Default mailbox capacity before sends start failing.
const DEFAULT_MAILBOX_CAPACITY: usize = 1000;

struct BusInner {
    address: EndpointAddress,
    handlers: RwLock<HashMap<EventKind, HashMap<u64, EventHandler>>>,
    sagas: RwLock<HashMap<u64, Arc<dyn SagaRegistration>>>,
    mailboxes: RwLock<HashMap<EndpointAddress, Sender<Envelope>>>,
    next_id: AtomicU64,
    mailbox_capacity: usize,
    disposed: AtomicBool,
}

impl BusInner {
    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SyncError::BusDisposed);
        }
        Ok(())
    }
}

/// Endpoint backed by a mailbox sender.
struct LoopbackEndpoint {
    address: EndpointAddress,
    sender: Sender<Envelope>,
}

impl Endpoint for LoopbackEndpoint {
    fn address(&self) -> &EndpointAddress {
        &self.address
    }

    fn send(&self, message: Notification, context: &SendContext) -> Result<()> {
        let envelope = Envelope {
            source: context.source.clone(),
            destination: self.address.clone(),
            message,
        };
        match self.sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SyncError::SendFailed {
                address: self.address.to_string(),
                reason: "mailbox full".into(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(SyncError::SendFailed {
                address: self.address.to_string(),
                reason: "mailbox closed".into(),
            }),
        }
    }
}

/// In-process [`ServiceBus`].
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    /// Create a bus with the default mailbox capacity.
    pub fn new(address: EndpointAddress) -> Self {
        Self::with_mailbox_capacity(address, DEFAULT_MAILBOX_CAPACITY)
    }

    /// Create a bus sized by the service configuration.
    pub fn from_config(address: EndpointAddress, config: &ServiceConfig) -> Self {
        Self::with_mailbox_capacity(address, config.mailbox_capacity)
    }

    pub fn with_mailbox_capacity(address: EndpointAddress, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                address,
                handlers: RwLock::new(HashMap::new()),
                sagas: RwLock::new(HashMap::new()),
                mailboxes: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                mailbox_capacity: capacity,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Open a mailbox for `address`, replacing any previous one.
    pub fn connect(&self, address: EndpointAddress) -> Result<Mailbox> {
        self.inner.ensure_live()?;
        let (sender, receiver) = bounded(self.inner.mailbox_capacity);
        self.inner.mailboxes.write().insert(address.clone(), sender);
        debug!(address = %address, "mailbox connected");
        Ok(Mailbox { address, receiver })
    }

    /// Close the mailbox for `address`. Later sends to it fail.
    pub fn disconnect(&self, address: &EndpointAddress) -> bool {
        self.inner.mailboxes.write().remove(address).is_some()
    }

    /// Dispatch an event to every handler registered for its kind.
    ///
    /// Every handler is invoked; the first handler error is returned.
    /// Returns the number of handlers invoked.
    pub fn publish(&self, event: SubscriptionEvent) -> Result<usize> {
        self.inner.ensure_live()?;
        let kind = event.kind();

        let handlers: Vec<EventHandler> = self
            .inner
            .handlers
            .read()
            .get(&kind)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default();

        let mut first_error = None;
        for handler in &handlers {
            if let Err(e) = handler(event.clone()) {
                warn!(kind = %kind, error = %e, "event handler failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(handlers.len()),
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .read()
            .get(&kind)
            .map_or(0, |by_id| by_id.len())
    }

    /// Saga types currently registered for dispatch.
    pub fn saga_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self
            .inner
            .sagas
            .read()
            .values()
            .map(|registration| registration.saga_type())
            .collect();
        types.sort_unstable();
        types
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl ServiceBus for LoopbackBus {
    fn address(&self) -> &EndpointAddress {
        &self.inner.address
    }

    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Result<UnsubscribeAction> {
        self.inner.ensure_live()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .handlers
            .write()
            .entry(kind)
            .or_default()
            .insert(id, handler);

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        Ok(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(by_id) = inner.handlers.write().get_mut(&kind) {
                    by_id.remove(&id);
                }
            }
        }))
    }

    fn subscribe_saga(
        &self,
        registration: Arc<dyn SagaRegistration>,
    ) -> Result<UnsubscribeAction> {
        self.inner.ensure_live()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(saga_type = registration.saga_type(), "saga store registered");
        self.inner.sagas.write().insert(id, registration);

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        Ok(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.sagas.write().remove(&id);
            }
        }))
    }

    fn get_endpoint(&self, address: &EndpointAddress) -> Result<Arc<dyn Endpoint>> {
        self.inner.ensure_live()?;
        let sender = self
            .inner
            .mailboxes
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| SyncError::UnknownEndpoint(address.to_string()))?;

        Ok(Arc::new(LoopbackEndpoint {
            address: address.clone(),
            sender,
        }))
    }

    fn dispose(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Err(SyncError::BusDisposed);
        }
        self.inner.handlers.write().clear();
        self.inner.sagas.write().clear();
        self.inner.mailboxes.write().clear();
        debug!(address = %self.inner.address, "loopback bus disposed");
        Ok(())
    }
}
