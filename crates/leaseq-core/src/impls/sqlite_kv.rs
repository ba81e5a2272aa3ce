//! SqliteKvStore - ディスク永続化された key-value ストア
//!
//! キーは TEXT（BINARY collation = バイト順）なので、範囲スキャンの順序は
//! Rust の `String` の順序と一致する。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::open_connection;
use crate::error::{QueueError, Result};
use crate::ports::{KeyRange, KvStore, Visit};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv (
        key    TEXT PRIMARY KEY,
        value  BLOB NOT NULL
    ) WITHOUT ROWID;
";

pub struct SqliteKvStore {
    name: &'static str,
    conn: Mutex<Option<Connection>>,
}

impl SqliteKvStore {
    pub fn open(dir: impl AsRef<Path>, name: &'static str) -> Result<Self> {
        let conn = open_connection(dir.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        debug!(store = name, "opened kv store");
        Ok(Self {
            name,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(QueueError::StoreUnavailable(self.name))?;
        f(conn)
    }
}

impl KvStore for SqliteKvStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    fn has(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
    }

    fn for_each(&self, range: KeyRange, visit: &mut Visit<'_>) -> Result<()> {
        // ロックを握ったまま visitor を呼ぶと、visitor 内の delete がデッドロックする
        let snapshot: Vec<(String, Vec<u8>)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv
                 WHERE key >= ?1 AND (?2 IS NULL OR key < ?2)
                 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map(
                params![range.start.as_deref().unwrap_or(""), range.end.as_deref()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })?;

        for (key, value) in &snapshot {
            if !visit(key, value)? {
                break;
            }
        }
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
    }

    fn close(&self) -> Result<()> {
        let Some(conn) = self.lock().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, err)| QueueError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_delete() {
        let dir = tempdir().unwrap();
        let store = SqliteKvStore::open(dir.path(), "running").unwrap();

        store.put("k", b"v1").unwrap();
        store.put("k", b"v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));
        assert!(store.has("k").unwrap());
        assert_eq!(store.count().unwrap(), 1);

        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn range_scan_is_ordered_and_bounded() {
        let dir = tempdir().unwrap();
        let store = SqliteKvStore::open(dir.path(), "running").unwrap();
        for key in ["20240101000003:c", "20240101000001:a", "20240101000002:b"] {
            store.put(key, key.as_bytes()).unwrap();
        }

        let mut seen = Vec::new();
        store
            .for_each(KeyRange::below("20240101000003"), &mut |key, value| {
                assert_eq!(key.as_bytes(), value);
                seen.push(key.to_string());
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec!["20240101000001:a", "20240101000002:b"]);
    }

    #[test]
    fn visitor_may_delete_while_scanning() {
        let dir = tempdir().unwrap();
        let store = SqliteKvStore::open(dir.path(), "running").unwrap();
        store.put("a", b"1").unwrap();
        store.put("b", b"2").unwrap();

        store
            .for_each(KeyRange::all(), &mut |key, _| store.delete(key))
            .unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn closed_store_is_unavailable() {
        let dir = tempdir().unwrap();
        let store = SqliteKvStore::open(dir.path(), "running").unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.put("a", b"1"),
            Err(QueueError::StoreUnavailable("running"))
        ));
    }
}
