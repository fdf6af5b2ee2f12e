//! Subscriber client lifecycle state machine.

use super::state::{Saga, SagaState};
use crate::error::Result;
use crate::types::{ClientId, CorrelationId, EndpointAddress, SubscriptionClient, Timestamp};
use serde::{Deserialize, Serialize};

/// Persisted state of one remote subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionClientSaga {
    pub correlation_id: CorrelationId,
    pub state: SagaState,
    pub client: SubscriptionClient,
    pub created: Timestamp,
    pub updated: Timestamp,
}

impl SubscriptionClientSaga {
    pub fn new(client: SubscriptionClient) -> Self {
        let now = Timestamp::now();
        Self {
            correlation_id: client.client_id,
            state: SagaState::Initial,
            client,
            created: now,
            updated: now,
        }
    }

    /// Register a joining client. It is active immediately.
    pub fn create(client: SubscriptionClient) -> Self {
        let mut saga = Self::new(client);
        saga.state = SagaState::Active;
        saga
    }

    /// Retire the client. Driven by whatever expires disconnected clients;
    /// the `SubscriptionClientRemoved` event does not call this.
    pub fn mark_removed(&mut self) -> Result<()> {
        self.transition(SagaState::Removed)
    }

    pub fn client_id(&self) -> ClientId {
        self.client.client_id
    }

    pub fn control_address(&self) -> &EndpointAddress {
        &self.client.control_address
    }
}

impl Saga for SubscriptionClientSaga {
    const SAGA_TYPE: &'static str = "subscription_client";

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
