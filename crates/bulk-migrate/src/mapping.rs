//! Identifier-mapping store.
//!
//! Persists `(original_id, type) -> target_id` for every imported entity that
//! opts into mapping. Rows are only ever inserted, one SQLite transaction per
//! committed target batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::schema::{self, MAPPINGS_MIGRATIONS};
use crate::value::OriginalId;

/// Kind of entity a mapping row belongs to. Codes are stored on disk and
/// must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    Users,
    Groups,
    Categories,
    Badges,
    UserEmails,
}

impl MappingType {
    /// Stable integer code.
    pub fn code(self) -> i64 {
        match self {
            MappingType::Users => 1,
            MappingType::Groups => 2,
            MappingType::Categories => 3,
            MappingType::Badges => 4,
            MappingType::UserEmails => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(MappingType::Users),
            2 => Some(MappingType::Groups),
            3 => Some(MappingType::Categories),
            4 => Some(MappingType::Badges),
            5 => Some(MappingType::UserEmails),
            _ => None,
        }
    }
}

/// SQLite-backed identifier-mapping store.
///
/// The async methods run on tokio's blocking pool; the sync ones are for
/// callers already off the runtime.
pub struct MappingStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl MappingStore {
    /// Open or create the mapping database at `path` and run pending schema migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(path)?;
        // The staging reader attaches this file while batches are being recorded.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        schema::migrate(&mut conn, MAPPINGS_MIGRATIONS)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| MigrateError::Store(format!("mapping store task failed: {}", e)))?
    }

    /// Record mappings for one committed batch in a single transaction.
    pub fn insert_batch(
        &self,
        mapping_type: MappingType,
        mappings: &[(OriginalId, i64)],
    ) -> Result<usize> {
        insert_rows(&mut *self.lock_conn()?, mapping_type, mappings)
    }

    /// [`insert_batch`](Self::insert_batch) on the blocking pool.
    pub async fn record_batch(
        &self,
        mapping_type: MappingType,
        mappings: Vec<(OriginalId, i64)>,
    ) -> Result<usize> {
        if mappings.is_empty() {
            return Ok(0);
        }
        self.blocking(move |conn| insert_rows(conn, mapping_type, &mappings))
            .await
    }

    /// Load every mapping of one type.
    pub fn load(&self, mapping_type: MappingType) -> Result<HashMap<OriginalId, i64>> {
        load_rows(&*self.lock_conn()?, mapping_type)
    }

    /// [`load`](Self::load) on the blocking pool.
    pub async fn load_all(&self, mapping_type: MappingType) -> Result<HashMap<OriginalId, i64>> {
        self.blocking(move |conn| load_rows(conn, mapping_type)).await
    }

    /// Look up a single mapping.
    pub fn get(&self, mapping_type: MappingType, original_id: &OriginalId) -> Result<Option<i64>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT target_id FROM ids WHERE original_id = ?1 AND type = ?2")?;
        let mut rows = stmt.query(rusqlite::params![original_id, mapping_type.code()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Number of mappings of one type.
    pub fn count(&self, mapping_type: MappingType) -> Result<i64> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM ids WHERE type = ?1",
            [mapping_type.code()],
            |row| row.get(0),
        )?)
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| MigrateError::Store("mapping store lock poisoned".into()))
}

fn insert_rows(
    conn: &mut Connection,
    mapping_type: MappingType,
    mappings: &[(OriginalId, i64)],
) -> Result<usize> {
    if mappings.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO ids (original_id, type, target_id) VALUES (?1, ?2, ?3)",
        )?;
        for (original_id, target_id) in mappings {
            stmt.execute(rusqlite::params![original_id, mapping_type.code(), target_id])?;
        }
    }
    tx.commit()?;

    Ok(mappings.len())
}

fn load_rows(conn: &Connection, mapping_type: MappingType) -> Result<HashMap<OriginalId, i64>> {
    let mut stmt = conn.prepare("SELECT original_id, target_id FROM ids WHERE type = ?1")?;
    let rows = stmt.query_map([mapping_type.code()], |row| {
        Ok((row.get::<_, OriginalId>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut map = HashMap::new();
    for row in rows {
        let (original_id, target_id) = row?;
        map.insert(original_id, target_id);
    }
    Ok(map)
}
