//! Keyed store: an ordered string-to-string map persisted in SQLite.
//!
//! Each store is one database file holding a single `kv` table. Stores are
//! independent; `StorePool` keeps one open connection per path so concurrent
//! callers against the same file share (and serialize on) it.

use crate::error::{AppError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MIN_LIST_LIMIT: usize = 1;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedRecord {
    pub key: String,
    pub value: String,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    pub items: Vec<KeyedRecord>,
    /// Last returned key when `has_more`, the cursor for the next page.
    pub next_start_after: Option<String>,
    pub has_more: bool,
}

#[derive(Debug)]
pub struct KeyedStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl KeyedStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::StorageError(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        tracing::debug!(path = %path.display(), "Keyed store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::StorageError("Store connection lock poisoned".into()))
    }

    /// Insert or overwrite `key`.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO kv(key, value) VALUES(?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()?
            .query_row("SELECT value FROM kv WHERE key=?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?)
    }

    /// Remove `key`. Returns true iff a record existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM kv WHERE key=?1", params![key])?;
        Ok(removed > 0)
    }

    /// Keys starting with `prefix` and strictly after `start_after`, ascending.
    ///
    /// `limit` is clamped to `[MIN_LIST_LIMIT, MAX_LIST_LIMIT]`. Prefix matching
    /// is exact: `%` and `_` in the prefix are not wildcards.
    pub fn list(&self, prefix: &str, limit: usize, start_after: Option<&str>) -> Result<ListPage> {
        let limit = limit.clamp(MIN_LIST_LIMIT, MAX_LIST_LIMIT);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT key, value
            FROM kv
            WHERE (?1 = '' OR substr(key, 1, length(?1)) = ?1)
              AND (?2 IS NULL OR key > ?2)
            ORDER BY key ASC
            LIMIT ?3
            "#,
        )?;

        let mut items = stmt
            .query_map(params![prefix, start_after, (limit + 1) as i64], |row| {
                Ok(KeyedRecord {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_start_after = if has_more {
            items.last().map(|r| r.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            items,
            next_start_after,
            has_more,
        })
    }
}

/// Open stores by path, one shared instance per file.
#[derive(Default)]
pub struct StorePool {
    stores: Mutex<HashMap<PathBuf, Arc<KeyedStore>>>,
}

impl StorePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<Arc<KeyedStore>> {
        let key = normalize(path.as_ref());
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| AppError::StorageError("Store pool lock poisoned".into()))?;

        if let Some(store) = stores.get(&key) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(KeyedStore::open(&key)?);
        stores.insert(key, Arc::clone(&store));
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.stores.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical form of a store path. Files that do not exist yet are keyed by
/// their canonical parent so `a/./kv.db` and `a/kv.db` share a store.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
