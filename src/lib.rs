//! Deterministic phase-sequenced scheduling for reproducing transaction
//! isolation anomalies.
//!
//! Actor threads script their work as labelled phases; an [`Orchestrator`]
//! runs those phases in one global order and records every failure they
//! raise, so a concurrency scenario interleaves identically on every run.

pub mod config;
pub mod errors;
pub mod gate;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod scenarios;
pub mod store;

pub use errors::{PhaseError, SharedError};
pub use orchestrator::Orchestrator;
pub use phase::{Phase, PhaseLabel, PhaseSequence};
