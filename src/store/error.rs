use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors raised by the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open database {uri}: {source}")]
    Open {
        uri: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A constraint (unique, not null, check) rejected the statement.
    #[error("Data integrity violation: {source}")]
    IntegrityViolation {
        #[source]
        source: rusqlite::Error,
    },

    /// Another connection holds a conflicting table lock.
    #[error("Lock conflict: {source}")]
    LockConflict {
        #[source]
        source: rusqlite::Error,
    },

    #[error("No {entity} with id {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Store connection lock poisoned")]
    LockPoisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl StoreError {
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, StoreError::IntegrityViolation { .. })
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, StoreError::LockConflict { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(source: rusqlite::Error) -> Self {
        match source.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StoreError::IntegrityViolation { source },
            Some(ErrorCode::DatabaseLocked | ErrorCode::DatabaseBusy) => {
                StoreError::LockConflict { source }
            }
            _ => StoreError::Sqlite(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn constraint_maps_to_integrity_violation() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert!(err.is_integrity_violation());
        assert!(!err.is_lock_conflict());
    }

    #[test]
    fn locked_and_busy_map_to_lock_conflict() {
        let locked = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED_SHAREDCACHE));
        let busy = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(locked.is_lock_conflict());
        assert!(busy.is_lock_conflict());
    }

    #[test]
    fn other_errors_stay_generic() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::Sqlite(_)));
        assert!(err.to_string().starts_with("SQLite error"));
    }

    #[test]
    fn not_found_names_entity() {
        let err = StoreError::NotFound {
            entity: "account",
            id: 7,
        };
        assert_eq!(err.to_string(), "No account with id 7");
    }
}
