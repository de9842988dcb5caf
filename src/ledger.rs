//! Thread-safe record of every failure captured during one scenario.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::errors::SharedError;

/// One failure captured at a phase boundary.
#[derive(Debug, Clone)]
pub struct CapturedFailure {
    /// Label of the phase the failure was raised in
    pub label: String,
    /// Type name of the error the action returned
    pub kind: String,
    /// The error itself, shared with whoever it was re-raised to
    pub error: SharedError,
    /// Whether the phase declared this failure as expected
    pub expected: bool,
    /// `"<Expected|Unexpected> exception <kind>: <message>"`
    pub description: String,
}

impl CapturedFailure {
    fn describe(expected: bool, kind: &str, message: &str) -> String {
        let tag = if expected { "Expected" } else { "Unexpected" };
        format!("{} exception {}: {}", tag, kind, message)
    }
}

/// Append-only failure store shared by all actors of a scenario.
///
/// Every failure is retained. `no_exceptions` only considers unexpected
/// failures; `details` and `rethrow_if_any` report the most recent one of
/// either kind.
#[derive(Debug, Default)]
pub struct ExceptionLedger {
    failures: Mutex<Vec<CapturedFailure>>,
}

impl ExceptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failure and return the stored entry.
    pub fn record(
        &self,
        label: &str,
        kind: &str,
        message: &str,
        error: SharedError,
        expected: bool,
    ) -> CapturedFailure {
        let failure = CapturedFailure {
            label: label.to_string(),
            kind: kind.to_string(),
            error,
            expected,
            description: CapturedFailure::describe(expected, kind, message),
        };
        if expected {
            info!(phase = label, failure = %failure.description, "captured expected failure");
        } else {
            warn!(phase = label, failure = %failure.description, "captured unexpected failure");
        }
        self.lock().push(failure.clone());
        failure
    }

    /// True until the first unexpected failure is recorded.
    pub fn no_exceptions(&self) -> bool {
        self.lock().iter().all(|f| f.expected)
    }

    /// True iff nothing at all has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Description of the most recent failure, empty when there is none.
    pub fn details(&self) -> String {
        self.lock()
            .last()
            .map(|f| f.description.clone())
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<CapturedFailure> {
        self.lock().last().cloned()
    }

    /// Snapshot of every failure in recording order.
    pub fn failures(&self) -> Vec<CapturedFailure> {
        self.lock().clone()
    }

    /// Re-raise the most recently recorded error, if any.
    ///
    /// Nothing is removed, so repeated calls return the same error.
    pub fn rethrow_if_any(&self) -> Result<(), SharedError> {
        match self.lock().last() {
            Some(failure) => Err(Arc::clone(&failure.error)),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CapturedFailure>> {
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(lock = "exception_ledger", "mutex poisoned; recovering inner state");
                poisoned.into_inner()
            }
        }
    }
}
