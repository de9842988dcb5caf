//! The scripting facade: Gate + ExceptionLedger + unit-of-work execution.

use std::any::type_name;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::errors::{BoxError, PhaseError, SharedError, StoreError};
use crate::gate::Gate;
use crate::ledger::{CapturedFailure, ExceptionLedger};
use crate::phase::{Phase, PhaseLabel, PhaseSequence};

/// Per-scenario context used by every actor thread.
///
/// Create one per scenario run and share it by reference (e.g. with
/// `std::thread::scope`). Never reuse it: ordering and failure history are
/// tied to a single run.
#[derive(Debug)]
pub struct Orchestrator<L: PhaseLabel = Phase> {
    gate: Gate<L>,
    ledger: ExceptionLedger,
}

impl<L: PhaseLabel> Orchestrator<L> {
    pub fn new(sequence: PhaseSequence<L>) -> Self {
        Self {
            gate: Gate::new(sequence),
            ledger: ExceptionLedger::new(),
        }
    }

    /// Bound every wait for a turn. `None` waits forever.
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        Self {
            gate: self.gate.with_timeout(timeout),
            ledger: self.ledger,
        }
    }

    pub fn gate(&self) -> &Gate<L> {
        &self.gate
    }

    pub fn ledger(&self) -> &ExceptionLedger {
        &self.ledger
    }

    /// Run `action` in `label`'s turn.
    ///
    /// An error from the action is recorded as unexpected and returned at once
    /// as `PhaseError::Failed`, so an enclosing transaction still rolls back.
    pub fn phase<T, E, F>(&self, label: L, action: F) -> Result<T, PhaseError>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<BoxError> + fmt::Display,
    {
        match self.run(&label, action)? {
            Ok(value) => Ok(value),
            Err(err) => Err(PhaseError::Failed(self.capture(&label, err, false))),
        }
    }

    /// Run `action` in `label`'s turn, expecting it to fail.
    ///
    /// An error accepted by `expected` is recorded as expected and swallowed.
    /// Any other error, or no error at all, is recorded as unexpected and
    /// returned.
    pub fn phase_expecting<T, E, F, P>(
        &self,
        label: L,
        expected: P,
        action: F,
    ) -> Result<(), PhaseError>
    where
        F: FnOnce() -> Result<T, E>,
        E: Into<BoxError> + fmt::Display,
        P: FnOnce(&E) -> bool,
    {
        match self.run(&label, action)? {
            Err(err) if expected(&err) => {
                self.capture(&label, err, true);
                Ok(())
            }
            Err(err) => Err(PhaseError::Failed(self.capture(&label, err, false))),
            Ok(_) => {
                let missed = PhaseError::ExpectationMissed {
                    label: label.to_string(),
                    expected: type_name::<E>().to_string(),
                };
                Err(PhaseError::Failed(self.capture(&label, missed, false)))
            }
        }
    }

    /// A phase with nothing to do but mark the point in the sequence.
    pub fn checkpoint(&self, label: L) -> Result<(), PhaseError> {
        self.phase(label, || Ok::<(), Infallible>(()))
    }

    /// Consume `label` on behalf of an actor whose script can no longer reach
    /// it, e.g. because its transaction failed early. No-op once passed.
    pub fn skip(&self, label: L) -> Result<(), PhaseError> {
        if self.gate.has_passed(&label)? {
            return Ok(());
        }
        debug!(phase = %label, "skipping phase");
        self.checkpoint(label)
    }

    /// Re-raise the most recently captured failure, if any.
    pub fn if_any_exception_rethrow(&self) -> Result<(), PhaseError> {
        self.ledger.rethrow_if_any().map_err(PhaseError::Failed)
    }

    /// True until the first unexpected failure is captured.
    pub fn no_exceptions(&self) -> bool {
        self.ledger.no_exceptions()
    }

    /// Description of the most recently captured failure.
    pub fn exception_details(&self) -> String {
        self.ledger.details()
    }

    pub fn failures(&self) -> Vec<CapturedFailure> {
        self.ledger.failures()
    }

    /// Release every waiting actor with `PhaseError::Aborted`.
    pub fn abort(&self, reason: impl Into<String>) {
        self.gate.abort(reason);
    }

    /// True once every phase in the sequence has completed.
    pub fn is_complete(&self) -> bool {
        self.gate.is_finished()
    }

    fn run<T, F>(&self, label: &L, action: F) -> Result<T, PhaseError>
    where
        F: FnOnce() -> T,
    {
        self.gate.await_and_run(label, action).map_err(|err| {
            self.capture(label, err.clone(), false);
            err
        })
    }

    fn capture<E>(&self, label: &L, err: E, expected: bool) -> SharedError
    where
        E: Into<BoxError> + fmt::Display,
    {
        let message = format!("{:#}", err);
        let error: SharedError = Arc::from(err.into());
        let kind = chain_kind(error.as_ref()).unwrap_or(type_name::<E>());
        self.ledger
            .record(&label.to_string(), kind, &message, error, expected)
            .error
    }
}

/// Type name of the first error in `err`'s chain that this crate knows.
///
/// An `anyhow::Error` is then reported by what it wraps rather than as
/// `anyhow::Error`. Types from other crates fall back to the action's
/// declared error type.
fn chain_kind(err: &(dyn StdError + 'static)) -> Option<&'static str> {
    let mut next = Some(err);
    while let Some(err) = next {
        if err.is::<StoreError>() {
            return Some(type_name::<StoreError>());
        }
        if err.is::<PhaseError>() {
            return Some(type_name::<PhaseError>());
        }
        if err.is::<rusqlite::Error>() {
            return Some(type_name::<rusqlite::Error>());
        }
        if err.is::<std::io::Error>() {
            return Some(type_name::<std::io::Error>());
        }
        next = err.source();
    }
    None
}

impl Orchestrator<Phase> {
    /// Orchestrator over the first `count` built-in phases.
    pub fn for_phases(count: usize) -> Result<Self, PhaseError> {
        Ok(Self::new(Phase::sequence(count)?))
    }
}
