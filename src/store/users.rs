//! Queries against the `users` table.

use rusqlite::{Connection, OptionalExtension, params};

use super::StoreError;

/// Insert a user and return its id. Names are unique.
pub fn insert(conn: &Connection, user_name: &str) -> Result<i64, StoreError> {
    conn.execute("INSERT INTO users (user_name) VALUES (?1)", params![user_name])?;
    Ok(conn.last_insert_rowid())
}

/// Name of the user with `id`, `None` if no such row is visible.
pub fn find_name(conn: &Connection, id: i64) -> Result<Option<String>, StoreError> {
    let name = conn
        .query_row(
            "SELECT user_name FROM users WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}

/// Rename the user with `id`, returning how many rows changed.
///
/// A row that is gone is not an error: the update just changes nothing.
pub fn update_name(conn: &Connection, id: i64, user_name: &str) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE users SET user_name = ?1 WHERE id = ?2",
        params![user_name, id],
    )?)
}

pub fn count(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

/// Delete every user, returning how many rows went.
pub fn delete_all(conn: &Connection) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM users", [])?)
}
