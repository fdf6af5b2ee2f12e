//! Saga lifecycle states.

use crate::error::{Result, SyncError};
use crate::types::{CorrelationId, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Lifecycle state shared by both saga kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    Initial,
    Active,
    /// Terminal.
    Removed,
}

impl SagaState {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: SagaState) -> bool {
        matches!(
            (self, to),
            (SagaState::Initial, SagaState::Active)
                | (SagaState::Initial, SagaState::Removed)
                | (SagaState::Active, SagaState::Removed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SagaState::Removed
    }
}

/// A persisted, correlation-keyed state machine instance.
pub trait Saga: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Name used in logs and bus registrations.
    const SAGA_TYPE: &'static str;

    fn correlation_id(&self) -> CorrelationId;

    fn state(&self) -> SagaState;

    /// Overwrite the state. Callers go through [`Saga::transition`].
    fn set_state(&mut self, state: SagaState, at: Timestamp);

    /// Move to `to`, rejecting illegal transitions.
    fn transition(&mut self, to: SagaState) -> Result<()> {
        let from = self.state();
        if !from.can_transition_to(to) {
            return Err(SyncError::IllegalTransition {
                id: self.correlation_id(),
                from,
                to,
            });
        }
        self.set_state(to, Timestamp::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(SagaState::Initial.can_transition_to(SagaState::Active));
        assert!(SagaState::Initial.can_transition_to(SagaState::Removed));
        assert!(SagaState::Active.can_transition_to(SagaState::Removed));
    }

    #[test]
    fn test_removed_is_terminal() {
        assert!(SagaState::Removed.is_terminal());
        for to in [SagaState::Initial, SagaState::Active, SagaState::Removed] {
            assert!(!SagaState::Removed.can_transition_to(to));
        }
        assert!(!SagaState::Active.can_transition_to(SagaState::Initial));
        assert!(!SagaState::Active.can_transition_to(SagaState::Active));
    }
}
