//! Lost update: two transfers read the same balance, then both write it back
//! with their own deposit added.
//!
//! | Phase   | transfer-a      | transfer-b      | Main             |
//! |---------|-----------------|-----------------|------------------|
//! | FIRST   | read balance    |                 |                  |
//! | SECOND  |                 | read balance    |                  |
//! | THIRD   | write +50       |                 |                  |
//! | FOURTH  | report outcome  |                 |                  |
//! | FIFTH   |                 | write +30       |                  |
//! | SIXTH   |                 | report outcome  |                  |
//! | SEVENTH |                 |                 | read final value |

use std::thread;

use anyhow::Result;

use super::{Anomaly, Journal, Outcome, RunClock, RunSettings, ScenarioReport, actor, join, mark, settle};
use crate::orchestrator::Orchestrator;
use crate::phase::Phase;
use crate::store::{Store, StoreError, accounts};

pub const ACCOUNT_ID: i64 = 1;
pub const OPENING_BALANCE: i64 = 0;

#[derive(Debug, Clone, Copy)]
struct Transfer {
    actor: &'static str,
    read: Phase,
    write: Phase,
    report: Phase,
    deposit: i64,
}

const TRANSFER_A: Transfer = Transfer {
    actor: "transfer-a",
    read: Phase::First,
    write: Phase::Third,
    report: Phase::Fourth,
    deposit: 50,
};

const TRANSFER_B: Transfer = Transfer {
    actor: "transfer-b",
    read: Phase::Second,
    write: Phase::Fifth,
    report: Phase::Sixth,
    deposit: 30,
};

pub fn run(store: &Store, settings: &RunSettings) -> Result<ScenarioReport> {
    store.with_anchor(|conn| {
        accounts::insert(conn, &accounts::NewAccount::with_id(ACCOUNT_ID, OPENING_BALANCE))
    })?;

    let orch = super::orchestrator(Anomaly::LostUpdate, settings)?;
    let journal = Journal::default();
    let clock = RunClock::start();

    let (a, b, closing) = thread::scope(|s| -> Result<_> {
        let spawn = |transfer: Transfer| {
            let (orch, journal) = (&orch, &journal);
            s.spawn(move || {
                actor(orch, transfer.actor, || {
                    run_transfer(store, orch, journal, settings, transfer)
                })
            })
        };
        let handle_a = spawn(TRANSFER_A);
        let handle_b = spawn(TRANSFER_B);

        let closing = actor(&orch, "main", || {
            Ok(orch.phase(Phase::Seventh, || {
                let balance = store.with_anchor(|conn| accounts::amount(conn, ACCOUNT_ID))?;
                journal.note(Phase::Seventh, "main", format!("final balance {}", balance));
                Ok::<_, StoreError>(balance)
            })?)
        });
        let a = join(handle_a, TRANSFER_A.actor);
        let b = join(handle_b, TRANSFER_B.actor);
        Ok((a?, b?, closing?))
    })?;

    let expected = OPENING_BALANCE + TRANSFER_A.deposit + TRANSFER_B.deposit;
    let observed = a.is_committed() && b.is_committed() && closing != expected;
    Ok(clock.finish(
        Anomaly::LostUpdate.as_str(),
        settings.isolation,
        observed,
        &orch,
        journal,
    ))
}

fn run_transfer(
    store: &Store,
    orch: &Orchestrator,
    journal: &Journal,
    settings: &RunSettings,
    transfer: Transfer,
) -> Result<Outcome<i64>> {
    let mut session = store.session()?;

    let outcome = settle(session.run_in_transaction(settings.isolation, |conn| {
        let balance = orch.phase(transfer.read, || {
            let balance = accounts::amount(conn, ACCOUNT_ID)?;
            journal.note(transfer.read, transfer.actor, format!("read balance {}", balance));
            Ok::<_, StoreError>(balance)
        })?;

        let written = orch.phase(transfer.write, || {
            let updated = balance + transfer.deposit;
            accounts::update_amount(conn, ACCOUNT_ID, updated)?;
            journal.note(transfer.write, transfer.actor, format!("wrote balance {}", updated));
            Ok::<_, StoreError>(updated)
        })?;
        Ok(written)
    }))?;
    orch.skip(transfer.write)?;

    mark(orch, journal, transfer.report, transfer.actor, outcome.label())?;
    Ok(outcome)
}
