//! Bus boundary consumed by the subscription service.
//!
//! The service only needs a narrow view of the bus:
//! - register per-event-kind handlers and saga stores, each returning an
//!   unsubscribe action
//! - resolve a control address into an [`Endpoint`] and send to it
//! - release the bus connection once at disposal
//!
//! [`LoopbackBus`] is an in-process implementation with per-address
//! mailboxes, used for local deployments and tests.
//!
//! # Example
//!
//! ```ignore
//! let bus = LoopbackBus::new(EndpointAddress::parse("loopback://node/subscriptions")?);
//! let mailbox = bus.connect(EndpointAddress::parse("ctl://x")?)?;
//!
//! bus.publish(SubscriptionEvent::SubscriptionClientAdded {
//!     control_address: mailbox.address().clone(),
//!     client_id: ClientId::new(),
//! })?;
//!
//! let envelope = mailbox.recv_timeout(Duration::from_secs(1))?;
//! ```

mod loopback;
mod types;

pub use loopback::LoopbackBus;
pub use types::{Endpoint, EventHandler, Mailbox, ServiceBus, UnsubscribeAction};
