//! Saga store abstraction and the in-memory implementation.

use super::state::{Saga, SagaState};
use crate::error::{Result, SyncError};
use crate::types::CorrelationId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Keyed, queryable persistence for one saga type.
///
/// Each call is atomic at the store boundary; the store owns concurrency
/// control over its own records.
pub trait SagaStore<S: Saga>: Send + Sync {
    /// Insert a new saga. Fails if the correlation id is already taken.
    fn create(&self, saga: S) -> Result<()>;

    fn get(&self, id: &CorrelationId) -> Result<Option<S>>;

    /// Move an existing saga to `to`, returning the updated saga.
    fn transition(&self, id: &CorrelationId, to: SagaState) -> Result<S>;

    /// All sagas matching `predicate`, in no particular order.
    fn query(&self, predicate: &dyn Fn(&S) -> bool) -> Result<Vec<S>>;

    fn len(&self) -> usize;

    fn query_by_state(&self, state: SagaState) -> Result<Vec<S>> {
        self.query(&|saga: &S| saga.state() == state)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Type-erased view of a store, handed to the bus for saga dispatch.
pub trait SagaRegistration: Send + Sync {
    fn saga_type(&self) -> &'static str;

    fn len(&self) -> usize;

    fn active_count(&self) -> Result<usize>;
}

struct StoreRegistration<S: Saga> {
    store: Arc<dyn SagaStore<S>>,
}

impl<S: Saga> SagaRegistration for StoreRegistration<S> {
    fn saga_type(&self) -> &'static str {
        S::SAGA_TYPE
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn active_count(&self) -> Result<usize> {
        Ok(self.store.query_by_state(SagaState::Active)?.len())
    }
}

impl dyn SagaRegistration {
    /// Wrap a typed store for registration with the bus.
    pub fn for_store<S: Saga>(store: Arc<dyn SagaStore<S>>) -> Arc<dyn SagaRegistration> {
        Arc::new(StoreRegistration { store })
    }
}

/// Apply a transition to a saga held in `sagas`.
pub(crate) fn transition_in<S: Saga>(
    sagas: &mut HashMap<CorrelationId, S>,
    id: &CorrelationId,
    to: SagaState,
) -> Result<S> {
    let saga = sagas.get_mut(id).ok_or(SyncError::SagaNotFound(*id))?;
    saga.transition(to)?;
    Ok(saga.clone())
}

/// Saga store held entirely in memory.
pub struct InMemorySagaStore<S: Saga> {
    sagas: RwLock<HashMap<CorrelationId, S>>,
}

impl<S: Saga> InMemorySagaStore<S> {
    pub fn new() -> Self {
        Self {
            sagas: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: Saga> Default for InMemorySagaStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Saga> SagaStore<S> for InMemorySagaStore<S> {
    fn create(&self, saga: S) -> Result<()> {
        let id = saga.correlation_id();
        let mut sagas = self.sagas.write();
        if sagas.contains_key(&id) {
            return Err(SyncError::SagaExists(id));
        }
        sagas.insert(id, saga);
        Ok(())
    }

    fn get(&self, id: &CorrelationId) -> Result<Option<S>> {
        Ok(self.sagas.read().get(id).cloned())
    }

    fn transition(&self, id: &CorrelationId, to: SagaState) -> Result<S> {
        transition_in(&mut self.sagas.write(), id, to)
    }

    fn query(&self, predicate: &dyn Fn(&S) -> bool) -> Result<Vec<S>> {
        Ok(self
            .sagas
            .read()
            .values()
            .filter(|saga| predicate(saga))
            .cloned()
            .collect())
    }

    fn len(&self) -> usize {
        self.sagas.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::{SubscriptionClientSaga, SubscriptionSaga};
    use crate::types::{EndpointAddress, Subscription, SubscriptionClient};

    fn subscription_saga(n: u128) -> SubscriptionSaga {
        SubscriptionSaga::create(Subscription::new(
            CorrelationId::from_u128(n),
            format!("Message{n}"),
            EndpointAddress::parse("q://orders").unwrap(),
        ))
    }

    #[test]
    fn test_create_and_get() {
        let store = InMemorySagaStore::new();
        store.create(subscription_saga(1)).unwrap();

        let saga = store.get(&CorrelationId::from_u128(1)).unwrap().unwrap();
        assert_eq!(saga.subscription.message_name, "Message1");
        assert!(store.get(&CorrelationId::from_u128(2)).unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_duplicate() {
        let store = InMemorySagaStore::new();
        store.create(subscription_saga(1)).unwrap();

        let result = store.create(subscription_saga(1));
        assert!(matches!(result, Err(SyncError::SagaExists(_))));
    }

    #[test]
    fn test_transition_and_query_by_state() {
        let store = InMemorySagaStore::new();
        for n in 1..=4 {
            store.create(subscription_saga(n)).unwrap();
        }
        store
            .transition(&CorrelationId::from_u128(2), SagaState::Removed)
            .unwrap();

        let active = store.query_by_state(SagaState::Active).unwrap();
        assert_eq!(active.len(), 3);
        assert!(active
            .iter()
            .all(|s| s.correlation_id != CorrelationId::from_u128(2)));

        let removed = store.query_by_state(SagaState::Removed).unwrap();
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn test_transition_missing_and_illegal() {
        let store = InMemorySagaStore::new();
        let missing = store.transition(&CorrelationId::from_u128(9), SagaState::Removed);
        assert!(matches!(missing, Err(SyncError::SagaNotFound(_))));

        store.create(subscription_saga(1)).unwrap();
        store
            .transition(&CorrelationId::from_u128(1), SagaState::Removed)
            .unwrap();
        let illegal = store.transition(&CorrelationId::from_u128(1), SagaState::Active);
        assert!(matches!(illegal, Err(SyncError::IllegalTransition { .. })));
    }

    #[test]
    fn test_registration_counts() {
        let store: Arc<dyn SagaStore<SubscriptionClientSaga>> = Arc::new(InMemorySagaStore::new());
        for n in 1..=3 {
            store
                .create(SubscriptionClientSaga::create(SubscriptionClient::new(
                    CorrelationId::from_u128(n),
                    EndpointAddress::parse(&format!("ctl://client-{n}")).unwrap(),
                )))
                .unwrap();
        }
        store
            .transition(&CorrelationId::from_u128(3), SagaState::Removed)
            .unwrap();

        let registration = <dyn SagaRegistration>::for_store(Arc::clone(&store));
        assert_eq!(registration.saga_type(), "subscription_client");
        assert_eq!(registration.len(), 3);
        assert_eq!(registration.active_count().unwrap(), 2);
    }
}
