//! Versioned schema setup for the SQLite side stores.
//!
//! Each store carries an ordered list of migrations. The number of applied
//! migrations is tracked in `PRAGMA user_version`, so running [`migrate`]
//! again only applies what is pending.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Migrations for the identifier-mapping database.
pub const MAPPINGS_MIGRATIONS: &[&str] = &[r"
CREATE TABLE IF NOT EXISTS ids (
    original_id NOT NULL,
    type INTEGER NOT NULL,
    target_id INTEGER NOT NULL,
    PRIMARY KEY (original_id, type)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_ids_type_target ON ids (type, target_id);
"];

/// Migrations for the upload metadata database.
pub const UPLOADS_MIGRATIONS: &[&str] = &[r"
CREATE TABLE IF NOT EXISTS uploads (
    id TEXT PRIMARY KEY NOT NULL,
    upload JSON,
    markdown TEXT,
    skip_reason TEXT
);
"];

/// Apply all migrations newer than the database's `user_version`.
///
/// Returns the number of migrations applied.
pub fn migrate(conn: &mut Connection, migrations: &[&str]) -> Result<usize> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let current = current.max(0) as usize;

    let mut applied = 0;
    for (idx, sql) in migrations.iter().enumerate().skip(current) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", (idx + 1) as i64)?;
        tx.commit()?;
        applied += 1;
    }

    if applied > 0 {
        debug!(
            "Applied {} schema migration(s), now at version {}",
            applied,
            migrations.len()
        );
    }

    Ok(applied)
}
