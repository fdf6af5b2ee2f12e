//! Subscription lifecycle state machine.

use super::state::{Saga, SagaState};
use crate::error::Result;
use crate::types::{CorrelationId, Subscription, SubscriptionInformation, Timestamp};
use serde::{Deserialize, Serialize};

/// Persisted state of one subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSaga {
    /// Equals `subscription.subscription_id`.
    pub correlation_id: CorrelationId,
    pub state: SagaState,
    pub subscription: Subscription,
    pub created: Timestamp,
    pub updated: Timestamp,
}

impl SubscriptionSaga {
    /// A saga that has not yet been activated.
    pub fn new(subscription: Subscription) -> Self {
        let now = Timestamp::now();
        Self {
            correlation_id: subscription.subscription_id,
            state: SagaState::Initial,
            subscription,
            created: now,
            updated: now,
        }
    }

    /// Create a saga for a newly added subscription. It is active immediately.
    pub fn create(subscription: Subscription) -> Self {
        let mut saga = Self::new(subscription);
        saga.state = SagaState::Active;
        saga
    }

    /// Retire the subscription. It will no longer be part of snapshots.
    pub fn mark_removed(&mut self) -> Result<()> {
        self.transition(SagaState::Removed)
    }

    pub fn info(&self) -> SubscriptionInformation {
        SubscriptionInformation::from_subscription(&self.subscription)
    }
}

impl Saga for SubscriptionSaga {
    const SAGA_TYPE: &'static str = "subscription";

    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    fn state(&self) -> SagaState {
        self.state
    }

    fn set_state(&mut self, state: SagaState, at: Timestamp) {
        self.state = state;
        self.updated = at;
    }
}
