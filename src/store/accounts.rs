//! Queries against the `accounts` table.

use rusqlite::{Connection, OptionalExtension, params};

use super::StoreError;

/// Row to insert into `accounts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAccount {
    /// Explicit id, or `None` to let SQLite assign one
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub amount: i64,
}

impl NewAccount {
    pub fn with_id(id: i64, amount: i64) -> Self {
        Self {
            id: Some(id),
            user_id: None,
            amount,
        }
    }

    pub fn for_user(user_id: i64, amount: i64) -> Self {
        Self {
            id: None,
            user_id: Some(user_id),
            amount,
        }
    }
}

/// Insert an account and return its id.
pub fn insert(conn: &Connection, account: &NewAccount) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO accounts (id, user_id, amount) VALUES (?1, ?2, ?3)",
        params![account.id, account.user_id, account.amount],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn amount(conn: &Connection, id: i64) -> Result<i64, StoreError> {
    conn.query_row(
        "SELECT amount FROM accounts WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(StoreError::NotFound {
        entity: "account",
        id,
    })
}

pub fn update_amount(conn: &Connection, id: i64, amount: i64) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE accounts SET amount = ?1 WHERE id = ?2",
        params![amount, id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "account",
            id,
        });
    }
    Ok(())
}

/// Point an account at its owner.
pub fn assign_user(conn: &Connection, id: i64, user_id: i64) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE accounts SET user_id = ?1 WHERE id = ?2",
        params![user_id, id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "account",
            id,
        });
    }
    Ok(())
}

pub fn count(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?)
}

pub fn count_for_user(conn: &Connection, user_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM accounts WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?)
}

pub fn sum_for_user(conn: &Connection, user_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM accounts WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?)
}

pub fn delete_all(conn: &Connection) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM accounts", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, users};

    #[test]
    fn insert_with_explicit_id() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .with_anchor(|conn| insert(conn, &NewAccount::with_id(7, 10)))
            .unwrap();
        assert_eq!(id, 7);
        assert_eq!(store.with_anchor(|conn| amount(conn, 7)).unwrap(), 10);
    }

    #[test]
    fn duplicate_id_is_integrity_violation() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_anchor(|conn| insert(conn, &NewAccount::with_id(1, 10)))
            .unwrap();
        let err = store
            .with_anchor(|conn| insert(conn, &NewAccount::with_id(1, 20)))
            .unwrap_err();
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn missing_account() {
        let store = Store::open_in_memory().unwrap();
        let err = store.with_anchor(|conn| amount(conn, 3)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "account", id: 3 }));
        assert!(store.with_anchor(|conn| update_amount(conn, 3, 1)).is_err());
        assert!(store.with_anchor(|conn| assign_user(conn, 3, 1)).is_err());
    }

    #[test]
    fn per_user_aggregates() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_anchor(|conn| {
                let owner = users::insert(conn, "owner")?;
                let other = users::insert(conn, "other")?;
                insert(conn, &NewAccount::for_user(owner, 100))?;
                insert(conn, &NewAccount::for_user(owner, 50))?;
                let loose = insert(conn, &NewAccount::with_id(10, 5))?;

                assert_eq!(count_for_user(conn, owner)?, 2);
                assert_eq!(sum_for_user(conn, owner)?, 150);
                assert_eq!(sum_for_user(conn, other)?, 0);

                assign_user(conn, loose, other)?;
                update_amount(conn, loose, 25)?;
                assert_eq!(sum_for_user(conn, other)?, 25);
                assert_eq!(count(conn)?, 3);
                assert_eq!(delete_all(conn)?, 3);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }
}
