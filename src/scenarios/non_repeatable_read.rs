//! Non-repeatable read: a reader reads the same user twice in one
//! transaction while a writer deletes it and commits in between. The reader
//! then renames the user it believes still exists; the update changes no
//! rows and raises no error.
//!
//! | Phase  | Reader (main thread)  | Writer            |
//! |--------|-----------------------|-------------------|
//! | FIRST  | read user name        |                   |
//! | SECOND |                       | delete users      |
//! | THIRD  |                       | report outcome    |
//! | FOURTH | read user name again  |                   |
//! | FIFTH  | rename the user       |                   |
//! | SIXTH  | check the ledger      |                   |

use std::convert::Infallible;
use std::thread;

use anyhow::Result;

use super::{Anomaly, Journal, Outcome, RunClock, RunSettings, ScenarioReport, actor, join, mark, settle};
use crate::orchestrator::Orchestrator;
use crate::phase::Phase;
use crate::store::{Store, StoreError, users};

pub const USER_NAME: &str = "someName";

pub fn run(store: &Store, settings: &RunSettings) -> Result<ScenarioReport> {
    let user_id = store.with_anchor(|conn| users::insert(conn, USER_NAME))?;

    let orch = super::orchestrator(Anomaly::NonRepeatableRead, settings)?;
    let journal = Journal::default();
    let clock = RunClock::start();

    let seen = thread::scope(|s| -> Result<_> {
        let handle = s.spawn(|| actor(&orch, "writer", || writer(store, &orch, &journal, settings)));
        let seen = actor(&orch, "reader", || reader(store, &orch, &journal, settings, user_id));
        join(handle, "writer")?;
        seen
    })?;

    let observed = seen.committed_and(|s| s.first != s.second || s.renamed == 0);
    Ok(clock.finish(
        Anomaly::NonRepeatableRead.as_str(),
        settings.isolation,
        observed,
        &orch,
        journal,
    ))
}

/// What the reader's transaction saw.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Seen {
    first: Option<String>,
    second: Option<String>,
    /// Rows changed by the rename
    renamed: usize,
}

fn reader(
    store: &Store,
    orch: &Orchestrator,
    journal: &Journal,
    settings: &RunSettings,
    user_id: i64,
) -> Result<Outcome<Seen>> {
    let mut session = store.session()?;
    let read_at = |phase: Phase, conn: &rusqlite::Connection| {
        orch.phase(phase, || {
            let name = users::find_name(conn, user_id)?;
            let note = match &name {
                Some(name) => format!("user {} is {}", user_id, name),
                None => format!("user {} not found", user_id),
            };
            journal.note(phase, "reader", note);
            Ok::<_, StoreError>(name)
        })
    };

    let outcome = settle(session.run_in_transaction(settings.isolation, |conn| {
        let first = read_at(Phase::First, conn)?;
        let second = read_at(Phase::Fourth, conn)?;
        let renamed = orch.phase(Phase::Fifth, || {
            let target = first.as_deref().unwrap_or(USER_NAME).to_uppercase();
            let changed = users::update_name(conn, user_id, &target)?;
            journal.note(
                Phase::Fifth,
                "reader",
                format!("renamed to {}: {} row(s) changed", target, changed),
            );
            Ok::<_, StoreError>(changed)
        })?;
        Ok(Seen {
            first,
            second,
            renamed,
        })
    }))?;
    orch.skip(Phase::Fourth)?;
    orch.skip(Phase::Fifth)?;

    orch.phase(Phase::Sixth, || {
        let clean = orch.no_exceptions();
        journal.note(Phase::Sixth, "reader", format!("no exceptions: {}", clean));
        Ok::<(), Infallible>(())
    })?;
    Ok(outcome)
}

fn writer(
    store: &Store,
    orch: &Orchestrator,
    journal: &Journal,
    settings: &RunSettings,
) -> Result<Outcome<usize>> {
    let mut session = store.session()?;

    let outcome = settle(session.run_in_transaction(settings.isolation, |conn| {
        Ok(orch.phase(Phase::Second, || {
            let deleted = users::delete_all(conn)?;
            journal.note(Phase::Second, "writer", format!("deleted {} user(s)", deleted));
            Ok::<_, StoreError>(deleted)
        })?)
    }))?;
    orch.skip(Phase::Second)?;

    mark(orch, journal, Phase::Third, "writer", outcome.label())?;
    Ok(outcome)
}
