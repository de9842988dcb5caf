//! Scenario results: what each actor saw, in phase order.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ledger::CapturedFailure;
use crate::orchestrator::Orchestrator;
use crate::phase::Phase;
use crate::store::Isolation;

/// One note taken by an actor inside a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub phase: Phase,
    pub actor: String,
    pub note: String,
}

/// Serializable view of a captured failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub phase: String,
    pub kind: String,
    pub expected: bool,
    pub description: String,
}

impl From<&CapturedFailure> for FailureSummary {
    fn from(failure: &CapturedFailure) -> Self {
        Self {
            phase: failure.label.clone(),
            kind: failure.kind.clone(),
            expected: failure.expected,
            description: failure.description.clone(),
        }
    }
}

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub isolation: Isolation,
    /// Whether the anomaly the scenario targets actually happened
    pub anomaly_observed: bool,
    /// No unexpected failure was captured
    pub no_exceptions: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exception_details: String,
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub failures: Vec<FailureSummary>,
    pub started_at: DateTime<Utc>,
    /// Wall time of the run in milliseconds
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ScenarioReport {
    /// True if both runs went through the same phases with the same
    /// observations and failures. Timing is ignored.
    pub fn same_interleaving(&self, other: &ScenarioReport) -> bool {
        let failure_shape = |r: &ScenarioReport| -> Vec<(String, String, bool)> {
            r.failures
                .iter()
                .map(|f| (f.phase.clone(), f.kind.clone(), f.expected))
                .collect()
        };
        self.scenario == other.scenario
            && self.anomaly_observed == other.anomaly_observed
            && self.no_exceptions == other.no_exceptions
            && self.observations == other.observations
            && failure_shape(self) == failure_shape(other)
    }

    /// Notes taken by `actor`, in phase order.
    pub fn notes_of<'a>(&'a self, actor: &'a str) -> impl Iterator<Item = &'a Observation> + 'a {
        self.observations.iter().filter(move |o| o.actor == actor)
    }
}

/// Ordered log of observations, appended from inside phase actions.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<Observation>>,
}

impl Journal {
    pub fn note(&self, phase: Phase, actor: &str, note: impl Into<String>) {
        let note = note.into();
        debug!(phase = %phase, actor, note = %note, "observation");
        self.lock().push(Observation {
            phase,
            actor: actor.to_string(),
            note,
        });
    }

    pub fn into_entries(self) -> Vec<Observation> {
        self.entries
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Observation>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(lock = "journal", "mutex poisoned; recovering inner state");
                poisoned.into_inner()
            }
        }
    }
}

/// Start time of a run, in both wall clock and monotonic form.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Assemble the report for a finished run.
    pub fn finish(
        self,
        scenario: &str,
        isolation: Isolation,
        anomaly_observed: bool,
        orch: &Orchestrator,
        journal: Journal,
    ) -> ScenarioReport {
        ScenarioReport {
            scenario: scenario.to_string(),
            isolation,
            anomaly_observed,
            no_exceptions: orch.no_exceptions(),
            exception_details: orch.exception_details(),
            observations: journal.into_entries(),
            failures: orch.failures().iter().map(FailureSummary::from).collect(),
            started_at: self.started_at,
            duration: self.started.elapsed(),
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(notes: &[(Phase, &str, &str)], anomaly: bool) -> ScenarioReport {
        ScenarioReport {
            scenario: "dirty-read".to_string(),
            isolation: Isolation::ReadUncommitted,
            anomaly_observed: anomaly,
            no_exceptions: true,
            exception_details: String::new(),
            observations: notes
                .iter()
                .map(|(phase, actor, note)| Observation {
                    phase: *phase,
                    actor: actor.to_string(),
                    note: note.to_string(),
                })
                .collect(),
            failures: Vec::new(),
            started_at: Utc::now(),
            duration: Duration::from_millis(12),
        }
    }

    #[test]
    fn same_interleaving_ignores_timing() {
        let a = report(&[(Phase::First, "reader", "0 accounts")], true);
        let mut b = a.clone();
        b.duration = Duration::from_secs(3);
        b.started_at = Utc::now();
        assert!(a.same_interleaving(&b));
    }

    #[test]
    fn different_notes_are_a_different_interleaving() {
        let a = report(&[(Phase::First, "reader", "0 accounts")], true);
        let b = report(&[(Phase::First, "reader", "1 accounts")], true);
        assert!(!a.same_interleaving(&b));

        let c = report(&[(Phase::First, "reader", "0 accounts")], false);
        assert!(!a.same_interleaving(&c));
    }

    #[test]
    fn report_serializes_duration_as_millis() {
        let report = report(&[(Phase::Third, "writer", "inserted")], false);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["duration"], 12);
        assert_eq!(value["isolation"], "read-uncommitted");
        assert_eq!(value["observations"][0]["phase"], "THIRD");
        assert!(value.get("exception_details").is_none());

        let back: ScenarioReport = serde_json::from_value(value).unwrap();
        assert!(back.same_interleaving(&report));
    }

    #[test]
    fn journal_keeps_append_order() {
        let journal = Journal::default();
        journal.note(Phase::First, "reader", "a");
        journal.note(Phase::Second, "writer", "b");
        let entries = journal.into_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].actor, "writer");
    }

    #[test]
    fn notes_of_filters_by_actor() {
        let report = report(
            &[
                (Phase::First, "reader", "a"),
                (Phase::Second, "writer", "b"),
                (Phase::Third, "reader", "c"),
            ],
            false,
        );
        let notes: Vec<&str> = report.notes_of("reader").map(|o| o.note.as_str()).collect();
        assert_eq!(notes, vec!["a", "c"]);
    }
}
