//! Typed error hierarchy for lockstep.
//!
//! Two enums cover the two subsystems:
//! - `PhaseError`: gate ordering, timeouts and captured phase failures
//! - `StoreError`: backing store failures (see `crate::store`)

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use crate::store::StoreError;

/// A captured failure that can be handed to any thread.
///
/// Held behind an `Arc` so the ledger and the thread that raised it share the
/// very same value; the concrete type is recoverable with `downcast_ref`.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Boxed form every phase action error is converted into before capture.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors from the gate and the orchestrator facade.
#[derive(Debug, Clone, Error)]
pub enum PhaseError {
    #[error("Phase sequence must contain at least one label")]
    EmptySequence,

    #[error("Phase {label} appears more than once in the sequence")]
    DuplicateLabel { label: String },

    #[error("Phase {label} is not part of this scenario")]
    UnknownPhase { label: String },

    #[error("Phase {requested} requested out of order: gate is at {current}")]
    OrderingViolation { requested: String, current: String },

    #[error("Phase {requested} requested from inside running phase {running}")]
    NestedPhase { requested: String, running: String },

    #[error("Timed out after {waited:?} waiting for phase {requested}: gate is at {current}")]
    Timeout {
        requested: String,
        current: String,
        waited: Duration,
    },

    #[error("Scenario aborted while waiting for phase {requested}: {reason}")]
    Aborted { requested: String, reason: String },

    #[error("Expected {expected} in phase {label}, but the action completed without error")]
    ExpectationMissed { label: String, expected: String },

    #[error(transparent)]
    Failed(SharedError),
}

impl PhaseError {
    /// The action error carried by `Failed`, if it has type `E`.
    pub fn action_error<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            PhaseError::Failed(error) => error.as_ref().downcast_ref::<E>(),
            _ => None,
        }
    }

    /// The shared error carried by `Failed`.
    pub fn shared(&self) -> Option<&SharedError> {
        match self {
            PhaseError::Failed(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_violation_names_both_phases() {
        let err = PhaseError::OrderingViolation {
            requested: "SECOND".to_string(),
            current: "FOURTH".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("SECOND"));
        assert!(msg.contains("FOURTH"));
    }

    #[test]
    fn timeout_carries_wait_duration() {
        let err = PhaseError::Timeout {
            requested: "THIRD".into(),
            current: "FIRST".into(),
            waited: Duration::from_millis(250),
        };
        match &err {
            PhaseError::Timeout { waited, .. } => assert_eq!(*waited, Duration::from_millis(250)),
            _ => panic!("Expected Timeout"),
        }
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn failed_is_transparent_and_downcastable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "row vanished");
        let shared: SharedError = Arc::new(io_err);
        let err = PhaseError::Failed(shared.clone());

        assert_eq!(err.to_string(), "row vanished");
        let inner = err.action_error::<std::io::Error>().unwrap();
        assert_eq!(inner.kind(), std::io::ErrorKind::NotFound);
        assert!(err.action_error::<std::fmt::Error>().is_none());
        assert!(Arc::ptr_eq(err.shared().unwrap(), &shared));
    }

    #[test]
    fn expectation_missed_names_the_phase() {
        let err = PhaseError::ExpectationMissed {
            label: "FOURTH".into(),
            expected: "lockstep::store::StoreError".into(),
        };
        assert!(err.to_string().contains("without error"));
        assert!(err.to_string().contains("FOURTH"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
        assert_std_error(&PhaseError::EmptySequence);
        assert_std_error(&StoreError::LockPoisoned);
    }
}
