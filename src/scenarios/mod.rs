//! Scripted isolation-anomaly scenarios.
//!
//! Each scenario seeds the store, runs its actors on scoped threads through
//! one `Orchestrator`, and reports what every actor observed. All actors use
//! the isolation level from `RunSettings`.
//!
//! | Scenario              | Phases | Anomaly                                       |
//! |-----------------------|--------|-----------------------------------------------|
//! | `dirty-read`          | 7      | reader sees a row that is later rolled back   |
//! | `non-repeatable-read` | 6      | a re-read row vanished; updating it changes nothing |
//! | `phantom-read`        | 5      | re-counting a range inside one transaction differs |
//! | `lost-update`         | 7      | two read-modify-write transfers, one is lost  |

pub mod dirty_read;
pub mod lost_update;
pub mod non_repeatable_read;
pub mod phantom_read;
mod report;

pub use report::{FailureSummary, Journal, Observation, RunClock, ScenarioReport};

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::PhaseError;
use crate::orchestrator::Orchestrator;
use crate::phase::Phase;
use crate::store::{Isolation, Store};

/// Knobs shared by every scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub isolation: Isolation,
    /// Bound on each wait for a turn; `None` waits forever
    pub phase_timeout: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            isolation: Isolation::default(),
            phase_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// The anomalies lockstep can reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anomaly {
    DirtyRead,
    NonRepeatableRead,
    PhantomRead,
    LostUpdate,
}

impl Anomaly {
    pub const ALL: [Anomaly; 4] = [
        Anomaly::DirtyRead,
        Anomaly::NonRepeatableRead,
        Anomaly::PhantomRead,
        Anomaly::LostUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Anomaly::DirtyRead => "dirty-read",
            Anomaly::NonRepeatableRead => "non-repeatable-read",
            Anomaly::PhantomRead => "phantom-read",
            Anomaly::LostUpdate => "lost-update",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Anomaly::DirtyRead => {
                "A reader counts an account another transaction inserted but later rolled back"
            }
            Anomaly::NonRepeatableRead => {
                "A reader re-reads and renames a user another transaction deleted and committed"
            }
            Anomaly::PhantomRead => {
                "A reader counts a user's accounts twice while another transaction adds one"
            }
            Anomaly::LostUpdate => {
                "Two transfers read the same balance and both write, losing one deposit"
            }
        }
    }

    /// Number of phases the scenario is scripted over.
    pub fn phase_count(self) -> usize {
        match self {
            Anomaly::DirtyRead | Anomaly::LostUpdate => 7,
            Anomaly::NonRepeatableRead => 6,
            Anomaly::PhantomRead => 5,
        }
    }

    /// Reset the store and run the scenario once.
    pub fn run(self, store: &Store, settings: &RunSettings) -> Result<ScenarioReport> {
        info!(scenario = %self, isolation = %settings.isolation, "running scenario");
        store.reset()?;
        let report = match self {
            Anomaly::DirtyRead => dirty_read::run(store, settings),
            Anomaly::NonRepeatableRead => non_repeatable_read::run(store, settings),
            Anomaly::PhantomRead => phantom_read::run(store, settings),
            Anomaly::LostUpdate => lost_update::run(store, settings),
        }?;
        info!(
            scenario = %self,
            anomaly_observed = report.anomaly_observed,
            no_exceptions = report.no_exceptions,
            "scenario finished"
        );
        Ok(report)
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Anomaly {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Anomaly::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| {
                anyhow!(
                    "Unknown scenario '{}'. Valid values: dirty-read, non-repeatable-read, phantom-read, lost-update",
                    s
                )
            })
    }
}

/// How an actor's transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Committed(T),
    RolledBack,
}

impl<T> Outcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed(_))
    }

    /// True if committed and the committed value satisfies `f`.
    pub fn committed_and(&self, f: impl FnOnce(&T) -> bool) -> bool {
        match self {
            Outcome::Committed(value) => f(value),
            Outcome::RolledBack => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Committed(_) => "committed",
            Outcome::RolledBack => "rolled back",
        }
    }
}

/// Sort a transaction result into committed, rolled back by a captured
/// phase failure, or a hard error that ends the actor's script.
pub fn settle<T>(result: Result<T>) -> Result<Outcome<T>> {
    match result {
        Ok(value) => Ok(Outcome::Committed(value)),
        Err(err) => match err.downcast_ref::<PhaseError>() {
            Some(PhaseError::Failed(_)) => Ok(Outcome::RolledBack),
            _ => Err(err),
        },
    }
}

/// Run an actor's script, aborting the orchestrator if it fails so the
/// other actors are released instead of waiting for phases that never come.
pub fn actor<T>(orch: &Orchestrator, name: &str, script: impl FnOnce() -> Result<T>) -> Result<T> {
    script().map_err(|err| {
        error!(actor = name, error = %format!("{:#}", err), "actor failed");
        orch.abort(format!("{} failed: {:#}", name, err));
        err.context(format!("{} failed", name))
    })
}

/// Phase whose only work is a journal note.
pub fn mark(
    orch: &Orchestrator,
    journal: &Journal,
    phase: Phase,
    actor: &str,
    note: impl Into<String>,
) -> Result<(), PhaseError> {
    let note = note.into();
    orch.phase(phase, || {
        journal.note(phase, actor, note);
        Ok::<(), Infallible>(())
    })
}

/// Join a scoped actor thread, turning a panic into an error.
pub fn join<T>(handle: std::thread::ScopedJoinHandle<'_, Result<T>>, name: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{} thread panicked", name))?
}

fn orchestrator(anomaly: Anomaly, settings: &RunSettings) -> Result<Orchestrator> {
    Ok(Orchestrator::for_phases(anomaly.phase_count())?.with_timeout(settings.phase_timeout))
}
