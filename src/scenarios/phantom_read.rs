//! Phantom read: a reader counts one user's accounts twice in a transaction
//! while a writer adds an account for that user and commits.
//!
//! | Phase  | Reader (main thread) | Writer            |
//! |--------|----------------------|-------------------|
//! | FIRST  | count and sum        |                   |
//! | SECOND |                      | insert account    |
//! | THIRD  |                      | report outcome    |
//! | FOURTH | count and sum again  |                   |
//! | FIFTH  | check the ledger     |                   |

use std::convert::Infallible;
use std::thread;

use anyhow::Result;

use super::{Anomaly, Journal, Outcome, RunClock, RunSettings, ScenarioReport, actor, join, mark, settle};
use crate::orchestrator::Orchestrator;
use crate::phase::Phase;
use crate::store::{Store, StoreError, accounts, users};

pub const USER_NAME: &str = "someName";
pub const OPENING_AMOUNTS: [i64; 2] = [100, 50];
pub const NEW_AMOUNT: i64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    count: i64,
    total: i64,
}

pub fn run(store: &Store, settings: &RunSettings) -> Result<ScenarioReport> {
    let user_id = store.with_anchor(|conn| {
        let id = users::insert(conn, USER_NAME)?;
        for amount in OPENING_AMOUNTS {
            accounts::insert(conn, &accounts::NewAccount::for_user(id, amount))?;
        }
        Ok::<_, StoreError>(id)
    })?;

    let orch = super::orchestrator(Anomaly::PhantomRead, settings)?;
    let journal = Journal::default();
    let clock = RunClock::start();

    let ranges = thread::scope(|s| -> Result<_> {
        let handle = s.spawn(|| {
            actor(&orch, "writer", || writer(store, &orch, &journal, settings, user_id))
        });
        let ranges = actor(&orch, "reader", || reader(store, &orch, &journal, settings, user_id));
        join(handle, "writer")?;
        ranges
    })?;

    let observed = ranges.committed_and(|(first, second)| first.count != second.count);
    Ok(clock.finish(
        Anomaly::PhantomRead.as_str(),
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
    user_id: i64,
) -> Result<Outcome<(Range, Range)>> {
    let mut session = store.session()?;
    let scan_at = |phase: Phase, conn: &rusqlite::Connection| {
        orch.phase(phase, || {
            let range = Range {
                count: accounts::count_for_user(conn, user_id)?,
                total: accounts::sum_for_user(conn, user_id)?,
            };
            journal.note(
                phase,
                "reader",
                format!("{} account(s) totalling {}", range.count, range.total),
            );
            Ok::<_, StoreError>(range)
        })
    };

    let outcome = settle(session.run_in_transaction(settings.isolation, |conn| {
        let first = scan_at(Phase::First, conn)?;
        let second = scan_at(Phase::Fourth, conn)?;
        Ok((first, second))
    }))?;
    orch.skip(Phase::Fourth)?;

    orch.phase(Phase::Fifth, || {
        let clean = orch.no_exceptions();
        journal.note(Phase::Fifth, "reader", format!("no exceptions: {}", clean));
        Ok::<(), Infallible>(())
    })?;
    Ok(outcome)
}

fn writer(
    store: &Store,
    orch: &Orchestrator,
    journal: &Journal,
    settings: &RunSettings,
    user_id: i64,
) -> Result<Outcome<i64>> {
    let mut session = store.session()?;

    let outcome = settle(session.run_in_transaction(settings.isolation, |conn| {
        Ok(orch.phase(Phase::Second, || {
            let id = accounts::insert(conn, &accounts::NewAccount::for_user(user_id, NEW_AMOUNT))?;
            journal.note(Phase::Second, "writer", format!("inserted account {}", id));
            Ok::<_, StoreError>(id)
        })?)
    }))?;
    orch.skip(Phase::Second)?;

    mark(orch, journal, Phase::Third, "writer", outcome.label())?;
    Ok(outcome)
}
