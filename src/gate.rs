//! Phase-sequenced barrier forcing concurrent threads through a global order.
//!
//! A `Gate` owns a single "current ordinal". A thread asking to run the phase
//! labelled `L` blocks on a condition variable until the gate reaches `L`'s
//! ordinal, runs its action with the turn claimed (the internal lock is *not*
//! held while the action runs), then advances the gate by one and wakes every
//! waiter. Requests that can never be satisfied fail fast instead of hanging.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::PhaseError;
use crate::phase::{PhaseLabel, PhaseSequence};

#[derive(Debug)]
struct GateState {
    current: usize,
    /// Thread holding the turn for `current`, if its action is running.
    running: Option<ThreadId>,
    aborted: Option<String>,
}

/// Lock-step scheduler over a `PhaseSequence`.
#[derive(Debug)]
pub struct Gate<L: PhaseLabel> {
    sequence: PhaseSequence<L>,
    state: Mutex<GateState>,
    turn: Condvar,
    timeout: Option<Duration>,
}

impl<L: PhaseLabel> Gate<L> {
    /// Create a gate positioned at the first label, waiting without a timeout.
    pub fn new(sequence: PhaseSequence<L>) -> Self {
        Self {
            sequence,
            state: Mutex::new(GateState {
                current: PhaseSequence::<L>::FIRST_ORDINAL,
                running: None,
                aborted: None,
            }),
            turn: Condvar::new(),
            timeout: None,
        }
    }

    /// Bound every wait for a turn. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ordinal the gate is currently waiting to run.
    pub fn current_ordinal(&self) -> usize {
        self.lock().current
    }

    /// Label the gate is currently waiting to run, `None` once finished.
    pub fn current_label(&self) -> Option<L> {
        let current = self.current_ordinal();
        self.sequence.label_at(current).cloned()
    }

    /// True once the last label's phase has completed.
    pub fn is_finished(&self) -> bool {
        self.current_ordinal() == self.sequence.terminal_ordinal()
    }

    /// True once the phase for `label` has completed.
    pub fn has_passed(&self, label: &L) -> Result<bool, PhaseError> {
        let ordinal = self.ordinal_of(label)?;
        Ok(ordinal < self.current_ordinal())
    }

    /// Fail every pending and future wait with `PhaseError::Aborted`.
    ///
    /// A phase already running is left to finish.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.lock();
        if state.aborted.is_none() {
            warn!(reason = %reason, current = %self.sequence.describe(state.current), "gate aborted");
            state.aborted = Some(reason);
        }
        drop(state);
        self.turn.notify_all();
    }

    /// Block until it is `label`'s turn, run `action`, then advance the gate.
    ///
    /// The action's return value is handed back untouched. The gate advances
    /// even if `action` panics, so other threads are never stranded.
    pub fn await_and_run<T, F>(&self, label: &L, action: F) -> Result<T, PhaseError>
    where
        F: FnOnce() -> T,
    {
        let ordinal = self.claim(label)?;
        let _advance = Advance { gate: self, ordinal };
        debug!(phase = %label, ordinal, "phase started");
        Ok(action())
    }

    fn ordinal_of(&self, label: &L) -> Result<usize, PhaseError> {
        self.sequence
            .ordinal_of(label)
            .ok_or_else(|| PhaseError::UnknownPhase {
                label: label.to_string(),
            })
    }

    /// Wait for `label`'s turn and mark it as running on this thread.
    fn claim(&self, label: &L) -> Result<usize, PhaseError> {
        let ordinal = self.ordinal_of(label)?;
        let me = thread::current().id();
        let started = Instant::now();
        let mut state = self.lock();

        loop {
            if let Some(reason) = &state.aborted {
                return Err(PhaseError::Aborted {
                    requested: label.to_string(),
                    reason: reason.clone(),
                });
            }
            if ordinal < state.current || (ordinal == state.current && state.running.is_some()) {
                return Err(PhaseError::OrderingViolation {
                    requested: label.to_string(),
                    current: self.sequence.describe(state.current),
                });
            }
            if state.running == Some(me) {
                return Err(PhaseError::NestedPhase {
                    requested: label.to_string(),
                    running: self.sequence.describe(state.current),
                });
            }
            if ordinal == state.current {
                state.running = Some(me);
                return Ok(ordinal);
            }

            state = match self.timeout {
                None => self.turn.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(timeout) => {
                    let Some(remaining) = timeout.checked_sub(started.elapsed()) else {
                        return Err(PhaseError::Timeout {
                            requested: label.to_string(),
                            current: self.sequence.describe(state.current),
                            waited: timeout,
                        });
                    };
                    let (next, _) = self
                        .turn
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                    next
                }
            };
        }
    }

    fn advance(&self, ordinal: usize) {
        let mut state = self.lock();
        state.current = ordinal + 1;
        state.running = None;
        debug!(
            completed = %self.sequence.describe(ordinal),
            next = %self.sequence.describe(state.current),
            "phase completed"
        );
        drop(state);
        self.turn.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(lock = "gate_state", "mutex poisoned; recovering inner state");
                poisoned.into_inner()
            }
        }
    }
}

/// Advances the gate when dropped, including during unwinding.
struct Advance<'a, L: PhaseLabel> {
    gate: &'a Gate<L>,
    ordinal: usize,
}

impl<L: PhaseLabel> Drop for Advance<'_, L> {
    fn drop(&mut self) {
        self.gate.advance(self.ordinal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;

    fn gate(count: usize) -> Gate<Phase> {
        Gate::new(Phase::sequence(count).unwrap())
    }

    #[test]
    fn test_single_thread_runs_in_order() {
        let gate = gate(3);
        assert_eq!(gate.current_label(), Some(Phase::First));
        assert_eq!(gate.await_and_run(&Phase::First, || 1).unwrap(), 1);
        assert_eq!(gate.await_and_run(&Phase::Second, || 2).unwrap(), 2);
        assert_eq!(gate.current_ordinal(), 3);
        assert!(!gate.is_finished());
        gate.await_and_run(&Phase::Third, || ()).unwrap();
        assert!(gate.is_finished());
        assert_eq!(gate.current_label(), None);
    }

    #[test]
    fn test_threads_started_in_reverse_still_run_in_order() {
        let gate = gate(6);
        let log = Mutex::new(Vec::new());

        thread::scope(|s| {
            for phase in Phase::ALL[..6].iter().rev().copied() {
                let gate = &gate;
                let log = &log;
                s.spawn(move || {
                    gate.await_and_run(&phase, || log.lock().unwrap().push(phase))
                        .unwrap();
                });
            }
        });

        assert_eq!(*log.lock().unwrap(), Phase::ALL[..6].to_vec());
        assert!(gate.is_finished());
    }

    #[test]
    fn test_passed_phase_is_ordering_violation() {
        let gate = gate(3);
        gate.await_and_run(&Phase::First, || ()).unwrap();
        gate.await_and_run(&Phase::Second, || ()).unwrap();

        let err = gate.await_and_run(&Phase::First, || ()).unwrap_err();
        match err {
            PhaseError::OrderingViolation { requested, current } => {
                assert_eq!(requested, "FIRST");
                assert_eq!(current, "THIRD");
            }
            other => panic!("Expected OrderingViolation, got {:?}", other),
        }
        assert!(gate.has_passed(&Phase::Second).unwrap());
        assert!(!gate.has_passed(&Phase::Third).unwrap());
    }

    #[test]
    fn test_request_after_terminal_state_is_ordering_violation() {
        let gate = gate(1);
        gate.await_and_run(&Phase::First, || ()).unwrap();
        let err = gate.await_and_run(&Phase::First, || ()).unwrap_err();
        assert!(err.to_string().contains("<finished>"));
    }

    #[test]
    fn test_unknown_label() {
        let gate = gate(2);
        let err = gate.await_and_run(&Phase::Fifth, || ()).unwrap_err();
        assert!(matches!(err, PhaseError::UnknownPhase { .. }));
        assert!(gate.has_passed(&Phase::Fifth).is_err());
    }

    #[test]
    fn test_timeout_when_earlier_phase_never_arrives() {
        let gate = gate(2).with_timeout(Some(Duration::from_millis(50)));
        let started = Instant::now();
        let err = gate.await_and_run(&Phase::Second, || ()).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(50));
        match err {
            PhaseError::Timeout {
                requested,
                current,
                waited,
            } => {
                assert_eq!(requested, "SECOND");
                assert_eq!(current, "FIRST");
                assert_eq!(waited, Duration::from_millis(50));
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
        // The gate did not move.
        assert_eq!(gate.current_label(), Some(Phase::First));
    }

    #[test]
    fn test_abort_wakes_waiters() {
        let gate = Arc::new(gate(3));
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.await_and_run(&Phase::Third, || ()))
        };
        thread::sleep(Duration::from_millis(20));
        gate.abort("reader crashed");

        let err = waiter.join().unwrap().unwrap_err();
        match err {
            PhaseError::Aborted { requested, reason } => {
                assert_eq!(requested, "THIRD");
                assert_eq!(reason, "reader crashed");
            }
            other => panic!("Expected Aborted, got {:?}", other),
        }
        assert!(gate.await_and_run(&Phase::First, || ()).is_err());
    }

    #[test]
    fn test_panicking_action_still_advances() {
        let gate = gate(2);
        let result = catch_unwind(AssertUnwindSafe(|| {
            gate.await_and_run::<(), _>(&Phase::First, || panic!("boom"))
        }));
        assert!(result.is_err());
        assert_eq!(gate.current_label(), Some(Phase::Second));
        gate.await_and_run(&Phase::Second, || ()).unwrap();
        assert!(gate.is_finished());
    }

    #[test]
    fn test_nested_phase_fails_fast() {
        let gate = gate(3);
        let inner = gate
            .await_and_run(&Phase::First, || gate.await_and_run(&Phase::Second, || ()))
            .unwrap();
        assert!(matches!(inner, Err(PhaseError::NestedPhase { .. })));
        // The outer phase still completed normally.
        assert_eq!(gate.current_label(), Some(Phase::Second));
    }

    #[test]
    fn test_concurrent_duplicate_request_is_rejected() {
        let gate = gate(2);
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        thread::scope(|s| {
            let gate = &gate;
            let holder = s.spawn(move || {
                gate.await_and_run(&Phase::First, || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                })
            });

            started_rx.recv().unwrap();
            let duplicate = gate.await_and_run(&Phase::First, || ());
            release_tx.send(()).unwrap();

            assert!(matches!(
                duplicate,
                Err(PhaseError::OrderingViolation { .. })
            ));
            holder.join().unwrap().unwrap();
        });
        assert_eq!(gate.current_label(), Some(Phase::Second));
    }
}
