//! Saga state machines and the stores that persist them.
//!
//! Two independent lifecycles are tracked, each keyed by correlation id:
//! - [`SubscriptionSaga`]: one message-type-to-endpoint binding
//! - [`SubscriptionClientSaga`]: one remote subscriber endpoint
//!
//! Both move `Initial -> Active -> Removed`. Only `Active` sagas are
//! eligible for broadcasts and cache snapshots.
//!
//! # Example
//!
//! ```ignore
//! let store = InMemorySagaStore::<SubscriptionSaga>::new();
//! store.create(SubscriptionSaga::create(subscription))?;
//!
//! let active = store.query_by_state(SagaState::Active)?;
//! ```

mod client;
mod file;
mod state;
mod store;
mod subscription;

pub use client::SubscriptionClientSaga;
pub use file::FileSagaStore;
pub use state::{Saga, SagaState};
pub use store::{InMemorySagaStore, SagaRegistration, SagaStore};
pub use subscription::SubscriptionSaga;
