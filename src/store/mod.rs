//! SQLite-backed store the anomaly scenarios run against.
//!
//! Every connection opens the same shared-cache database, so concurrent
//! transactions observe each other through SQLite's table-level locking and,
//! with `read_uncommitted`, through the shared page cache.

pub mod accounts;
mod error;
pub mod users;

pub use error::StoreError;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StoreSection;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY,
        user_id INTEGER,
        amount INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);
";

/// Transaction isolation requested by a scenario.
///
/// SQLite's shared cache only distinguishes two behaviours: `ReadUncommitted`
/// skips table read locks and sees uncommitted rows, every other level holds
/// read locks until the transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    #[default]
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Isolation {
    pub const ALL: [Isolation; 4] = [
        Isolation::ReadUncommitted,
        Isolation::ReadCommitted,
        Isolation::RepeatableRead,
        Isolation::Serializable,
    ];

    pub fn reads_uncommitted(self) -> bool {
        self == Isolation::ReadUncommitted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Isolation::ReadUncommitted => "read-uncommitted",
            Isolation::ReadCommitted => "read-committed",
            Isolation::RepeatableRead => "repeatable-read",
            Isolation::Serializable => "serializable",
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Isolation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Isolation::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid isolation level '{}'. Valid values: read-uncommitted, read-committed, repeatable-read, serializable",
                    s
                )
            })
    }
}

/// Handle to one shared-cache database.
///
/// The anchor connection keeps an in-memory database alive for as long as
/// the store exists and is used for seeding and inspection.
pub struct Store {
    uri: String,
    anchor: Mutex<Connection>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("uri", &self.uri).finish()
    }
}

impl Store {
    /// Open the database described by `settings` and create the schema.
    ///
    /// Without a `path` every call opens a fresh in-memory database.
    pub fn open(settings: &StoreSection) -> Result<Self, StoreError> {
        let uri = match &settings.path {
            Some(path) => format!("file:{}?cache=shared", encode_path(path)),
            None => format!(
                "file:{}-{}?mode=memory&cache=shared",
                settings.name,
                uuid::Uuid::new_v4().simple()
            ),
        };
        let anchor = connect(&uri)?;
        anchor.execute_batch(SCHEMA)?;
        debug!(uri = %uri, "store opened");
        Ok(Self {
            uri,
            anchor: Mutex::new(anchor),
        })
    }

    /// Open a fresh in-memory store with default settings.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(&StoreSection::default())
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Open a new connection for one actor thread.
    pub fn session(&self) -> Result<Session, StoreError> {
        Ok(Session {
            conn: connect(&self.uri)?,
        })
    }

    /// Run `f` on the anchor connection in autocommit mode.
    pub fn with_anchor<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<StoreError>,
    {
        let guard = self.anchor()?;
        f(&*guard)
    }

    /// Delete every row so the next scenario starts from a clean slate.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.with_anchor(|conn| {
            accounts::delete_all(conn)?;
            users::delete_all(conn)?;
            conn.execute("DELETE FROM sqlite_sequence WHERE name = 'users'", [])?;
            Ok::<_, StoreError>(())
        })?;
        debug!(uri = %self.uri, "store reset");
        Ok(())
    }

    fn anchor(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.anchor.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Escape the characters that would end the path part of an SQLite URI.
fn encode_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut encoded = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '?' => encoded.push_str("%3f"),
            '#' => encoded.push_str("%23"),
            _ => encoded.push(c),
        }
    }
    encoded
}

fn connect(uri: &str) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_SHARED_CACHE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(uri, flags).map_err(|source| StoreError::Open {
        uri: uri.to_string(),
        source,
    })
}

/// A single connection owned by one actor.
#[derive(Debug)]
pub struct Session {
    conn: Connection,
}

impl Session {
    /// Run `f` inside one transaction at `isolation`.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` and
    /// hands that error back unchanged.
    pub fn run_in_transaction<T, E, F>(&mut self, isolation: Isolation, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.conn
            .pragma_update(None, "read_uncommitted", isolation.reads_uncommitted())
            .map_err(StoreError::from)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(StoreError::from)?;
        debug!(isolation = %isolation, "transaction started");

        let conn: &Connection = &tx;
        match f(conn) {
            Ok(value) => {
                tx.commit().map_err(StoreError::from)?;
                debug!(isolation = %isolation, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                match tx.rollback() {
                    Ok(()) => debug!(isolation = %isolation, "transaction rolled back"),
                    Err(e) => warn!(error = %e, "rollback failed"),
                }
                Err(err)
            }
        }
    }
}
