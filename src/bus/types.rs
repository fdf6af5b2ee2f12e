//! Bus and endpoint traits plus the mailbox handle.

use crate::error::Result;
use crate::messages::{Envelope, EventKind, Notification, SendContext, SubscriptionEvent};
use crate::saga::SagaRegistration;
use crate::types::EndpointAddress;
use std::sync::Arc;

/// Handler invoked by bus dispatch, possibly from many threads at once.
pub type EventHandler = Arc<dyn Fn(SubscriptionEvent) -> Result<()> + Send + Sync>;

/// Tears down one registration.
pub type UnsubscribeAction = Box<dyn FnOnce() + Send>;

/// A resolved send target.
pub trait Endpoint: Send + Sync {
    fn address(&self) -> &EndpointAddress;

    fn send(&self, message: Notification, context: &SendContext) -> Result<()>;
}

/// The slice of a message bus the subscription service depends on.
pub trait ServiceBus: Send + Sync {
    /// This bus instance's own address, used as the source of sends.
    fn address(&self) -> &EndpointAddress;

    /// Deliver events of `kind` to `handler` until the action is invoked.
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Result<UnsubscribeAction>;

    /// Register a saga store for generic saga dispatch.
    fn subscribe_saga(&self, registration: Arc<dyn SagaRegistration>)
        -> Result<UnsubscribeAction>;

    fn get_endpoint(&self, address: &EndpointAddress) -> Result<Arc<dyn Endpoint>>;

    /// Release the underlying connection.
    fn dispose(&self) -> Result<()>;
}

/// Receiving side of a loopback address.
pub struct Mailbox {
    pub(crate) address: EndpointAddress,
    pub(crate) receiver: crossbeam_channel::Receiver<Envelope>,
}

impl Mailbox {
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Receive the next envelope (blocking).
    pub fn recv(&self) -> std::result::Result<Envelope, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an envelope (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<Envelope, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<Envelope, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<Envelope> {
        self.receiver.try_iter().collect()
    }
}
