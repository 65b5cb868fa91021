//! Upload (binary asset) metadata store.
//!
//! The engine only owns this store's schema and makes it visible to step
//! queries as the attached `uploads` schema.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::{MigrateError, Result};
use crate::schema::{self, UPLOADS_MIGRATIONS};

/// SQLite-backed upload metadata store.
pub struct UploadStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl UploadStore {
    /// Open or create the upload database and run pending schema migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        schema::migrate(&mut conn, UPLOADS_MIGRATIONS)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MigrateError::Store("upload store lock poisoned".into()))
    }

    /// Number of uploads that were processed without a skip reason.
    pub fn count_available(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM uploads WHERE skip_reason IS NULL",
            [],
            |row| row.get(0),
        )?)
    }
}
