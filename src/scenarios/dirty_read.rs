//! Dirty read: a reader counts an account that is inserted by a transaction
//! which later fails on a duplicate user and rolls back.
//!
//! | Phase   | Reader (main thread)   | Writer                                   |
//! |---------|------------------------|------------------------------------------|
//! | FIRST   | count accounts         |                                          |
//! | SECOND  |                        | insert account 1                         |
//! | THIRD   | count accounts again   |                                          |
//! | FOURTH  |                        | insert duplicate user (expected failure) |
//! | FIFTH   |                        | report commit or rollback                |
//! | SIXTH   | count accounts again   |                                          |
//! | SEVENTH | check the ledger       |                                          |

use std::convert::Infallible;
use std::thread;

use anyhow::Result;

use super::{Journal, Outcome, RunClock, RunSettings, ScenarioReport, actor, join, mark, settle};
use crate::orchestrator::Orchestrator;
use crate::phase::Phase;
use crate::store::{Store, StoreError, accounts, users};

pub const USER_NAME: &str = "someName";
pub const ACCOUNT_ID: i64 = 1;
pub const ACCOUNT_AMOUNT: i64 = 10;

/// Counts the reader took at FIRST, THIRD and SIXTH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReaderCounts {
    before: i64,
    during: i64,
    after: i64,
}

pub fn run(store: &Store, settings: &RunSettings) -> Result<ScenarioReport> {
    store.with_anchor(|conn| users::insert(conn, USER_NAME))?;

    let orch = super::orchestrator(super::Anomaly::DirtyRead, settings)?;
    let journal = Journal::default();
    let clock = RunClock::start();

    let (counts, written) = thread::scope(|s| -> Result<_> {
        let handle = s.spawn(|| actor(&orch, "writer", || writer(store, &orch, &journal, settings)));
        let counts = actor(&orch, "reader", || reader(store, &orch, &journal, settings));
        let written = join(handle, "writer");
        Ok((counts?, written?))
    })?;

    let observed = counts.committed_and(|c| c.during > c.before && c.after == c.before)
        && !written.is_committed();
    Ok(clock.finish(
        super::Anomaly::DirtyRead.as_str(),
        settings.isolation,
        observed,
        &orch,
        journal,
    ))
}

fn reader(
    store: &Store,
    orch: &Orchestrator,
    journal: &Journal,
    settings: &RunSettings,
) -> Result<Outcome<ReaderCounts>> {
    let mut session = store.session()?;
    let count_at = |phase: Phase, conn: &rusqlite::Connection| {
        orch.phase(phase, || {
            let count = accounts::count(conn)?;
            journal.note(phase, "reader", format!("{} account(s) visible", count));
            Ok::<_, StoreError>(count)
        })
    };

    let outcome = settle(session.run_in_transaction(settings.isolation, |conn| {
        let before = count_at(Phase::First, conn)?;
        let during = count_at(Phase::Third, conn)?;
        let after = count_at(Phase::Sixth, conn)?;
        Ok(ReaderCounts {
            before,
            during,
            after,
        })
    }))?;
    orch.skip(Phase::Third)?;
    orch.skip(Phase::Sixth)?;

    orch.phase(Phase::Seventh, || {
        let clean = orch.no_exceptions();
        journal.note(Phase::Seventh, "reader", format!("no exceptions: {}", clean));
        Ok::<(), Infallible>(())
    })?;
    Ok(outcome)
}

fn writer(
    store: &Store,
    orch: &Orchestrator,
    journal: &Journal,
    settings: &RunSettings,
) -> Result<Outcome<()>> {
    let mut session = store.session()?;

    let outcome = settle(session.run_in_transaction(settings.isolation, |conn| {
        orch.phase(Phase::Second, || {
            accounts::insert(conn, &accounts::NewAccount::with_id(ACCOUNT_ID, ACCOUNT_AMOUNT))?;
            journal.note(Phase::Second, "writer", format!("inserted account {}", ACCOUNT_ID));
            Ok::<_, StoreError>(())
        })?;

        orch.phase_expecting(Phase::Fourth, StoreError::is_integrity_violation, || {
            journal.note(Phase::Fourth, "writer", format!("inserting user {}", USER_NAME));
            let user_id = users::insert(conn, USER_NAME)?;
            accounts::assign_user(conn, ACCOUNT_ID, user_id)
        })?;

        // The swallowed failure still has to undo the account insert.
        orch.if_any_exception_rethrow()?;
        Ok(())
    }))?;
    orch.skip(Phase::Fourth)?;

    mark(orch, journal, Phase::Fifth, "writer", outcome.label())?;
    Ok(outcome)
}
