//! # Subscription Sync
//!
//! The subscription-synchronization core of a publish/subscribe message bus.
//! It tracks which remote endpoints want which message types and keeps every
//! connected client's routing cache consistent as subscriptions and clients
//! come and go.
//!
//! ## Core Concepts
//!
//! - **Sagas**: two correlation-keyed state machines, one per subscription
//!   and one per subscriber client, each `Initial -> Active -> Removed`
//! - **Saga stores**: keyed, queryable persistence for each saga type
//!   (in-memory or file-backed)
//! - **Sequencer**: a single-worker FIFO that serializes every store
//!   mutation and broadcast
//! - **Subscription service**: consumes the four subscription events from
//!   the bus and fans out notifications to active clients
//!
//! ## Example
//!
//! ```ignore
//! use subscription_sync::*;
//!
//! let bus = Arc::new(LoopbackBus::new(EndpointAddress::parse("loopback://node/subs")?));
//! let service = SubscriptionService::new(
//!     bus.clone(),
//!     Arc::new(InMemorySagaStore::new()),
//!     Arc::new(InMemorySagaStore::new()),
//!     ServiceConfig::default(),
//! )?;
//! service.start()?;
//!
//! let mailbox = bus.connect(EndpointAddress::parse("ctl://x")?)?;
//! bus.publish(SubscriptionEvent::SubscriptionClientAdded {
//!     control_address: mailbox.address().clone(),
//!     client_id: ClientId::new(),
//! })?;
//!
//! // ... later
//! service.stop()?;
//! service.dispose()?;
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod messages;
pub mod saga;
pub mod sequencer;
pub mod service;
pub mod types;

// Re-exports
pub use bus::{Endpoint, EventHandler, LoopbackBus, Mailbox, ServiceBus, UnsubscribeAction};
pub use config::{ServiceConfig, DEFAULT_SHUTDOWN_TIMEOUT};
pub use error::{Result, SyncError};
pub use messages::{Envelope, EventKind, Notification, SendContext, SubscriptionEvent};
pub use saga::{
    FileSagaStore, InMemorySagaStore, Saga, SagaRegistration, SagaState, SagaStore,
    SubscriptionClientSaga, SubscriptionSaga,
};
pub use sequencer::{Sequencer, ShutdownReport};
pub use service::{ServiceState, SubscriptionService};
pub use types::*;
