//! Lazily loaded target data shared between steps.
//!
//! Each key names a single-column target query (existing usernames, group
//! names, ...). The first [`SharedData::load`] runs the query and caches the
//! result; later loads return the cached set until [`SharedData::unload`]
//! drops it, so a step that changed the underlying table can force a reload.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::target::TargetStore;

pub const USERNAMES: &str = "usernames";
pub const GROUP_NAMES: &str = "group_names";
pub const CATEGORY_NAMES: &str = "category_names";
pub const BADGE_NAMES: &str = "badge_names";

/// A cached shared data set.
pub type SharedSet = Arc<HashSet<String>>;

pub struct SharedData {
    target: Arc<dyn TargetStore>,
    queries: BTreeMap<String, String>,
    cache: Mutex<HashMap<String, SharedSet>>,
}

impl SharedData {
    /// Shared data with the built-in keys registered.
    pub fn new(target: Arc<dyn TargetStore>) -> Self {
        Self::empty(target)
            .with_query(USERNAMES, "SELECT username_lower FROM users")
            .with_query(GROUP_NAMES, "SELECT LOWER(name) FROM groups")
            .with_query(CATEGORY_NAMES, "SELECT LOWER(name) FROM categories")
            .with_query(BADGE_NAMES, "SELECT LOWER(name) FROM badges")
    }

    /// Shared data without any registered keys.
    pub fn empty(target: Arc<dyn TargetStore>) -> Self {
        Self {
            target,
            queries: BTreeMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the query behind a key.
    pub fn with_query(mut self, key: &str, sql: &str) -> Self {
        self.queries.insert(key.to_string(), sql.to_string());
        self
    }

    /// Return the set for `key`, querying the target on first use.
    pub async fn load(&self, key: &str) -> Result<SharedSet> {
        let sql = self
            .queries
            .get(key)
            .ok_or_else(|| MigrateError::UnknownSharedData(key.to_string()))?;

        let mut cache = self.cache.lock().await;
        if let Some(set) = cache.get(key) {
            return Ok(Arc::clone(set));
        }

        let started = Instant::now();
        let set: SharedSet = Arc::new(self.target.query_set(sql).await?);
        debug!(
            "Loaded shared data '{}' ({} values) in {:?}",
            key,
            set.len(),
            started.elapsed()
        );
        cache.insert(key.to_string(), Arc::clone(&set));
        Ok(set)
    }

    /// Drop the cached set for `key`; the next load queries again.
    pub async fn unload(&self, key: &str) -> Result<()> {
        if !self.queries.contains_key(key) {
            return Err(MigrateError::UnknownSharedData(key.to_string()));
        }
        if self.cache.lock().await.remove(key).is_some() {
            debug!("Unloaded shared data '{}'", key);
        }
        Ok(())
    }

    pub async fn is_loaded(&self, key: &str) -> bool {
        self.cache.lock().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memory::MemoryTargetStore;

    fn shared() -> SharedData {
        let target = MemoryTargetStore::new()
            .with_set("SELECT username_lower FROM users", &["alice", "bob"]);
        SharedData::new(Arc::new(target))
    }

    #[tokio::test]
    async fn test_load_is_memoized() {
        let shared = shared();
        let first = shared.load(USERNAMES).await.unwrap();
        let second = shared.load(USERNAMES).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.contains("alice"));
    }

    #[tokio::test]
    async fn test_unload_forces_reload() {
        let shared = shared();
        let first = shared.load(USERNAMES).await.unwrap();
        shared.unload(USERNAMES).await.unwrap();
        assert!(!shared.is_loaded(USERNAMES).await);

        let second = shared.load(USERNAMES).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn test_unknown_key_is_an_error() {
        let shared = shared();
        assert!(matches!(
            shared.load("emails").await,
            Err(MigrateError::UnknownSharedData(_))
        ));
        assert!(shared.unload("emails").await.is_err());
    }
}
