//! SqliteOrderedQueue - ディスク永続化された順序付きキュー
//!
//! 1 ディレクトリ = 1 SQLite ファイル（`<dir>/data.db`）。
//! `(priority, seq)` インデックスで取り出し順を決める。

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::open_connection;
use crate::error::{QueueError, Result};
use crate::ports::OrderedQueue;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS items (
        seq       INTEGER PRIMARY KEY AUTOINCREMENT,
        priority  INTEGER NOT NULL,
        record    BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_items_order ON items(priority ASC, seq ASC);
";

pub struct SqliteOrderedQueue {
    name: &'static str,
    conn: Mutex<Option<Connection>>,
    /// Counted once at open, then kept in step with append/remove.
    len: AtomicU64,
}

impl SqliteOrderedQueue {
    pub fn open(dir: impl AsRef<Path>, name: &'static str) -> Result<Self> {
        let conn = open_connection(dir.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        let len: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        debug!(queue = name, len, "opened ordered queue");
        Ok(Self {
            name,
            conn: Mutex::new(Some(conn)),
            len: AtomicU64::new(len.max(0) as u64),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OrderedQueue for SqliteOrderedQueue {
    fn append(&self, priority: u8, record: &[u8]) -> Result<u64> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(QueueError::StoreUnavailable(self.name))?;
        conn.execute(
            "INSERT INTO items (priority, record) VALUES (?1, ?2)",
            params![priority, record],
        )?;
        let seq = conn.last_insert_rowid();
        self.len.fetch_add(1, Ordering::SeqCst);
        Ok(seq as u64)
    }

    fn peek_oldest(&self) -> Result<Vec<u8>> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(QueueError::StoreUnavailable(self.name))?;
        conn.query_row(
            "SELECT record FROM items ORDER BY priority ASC, seq ASC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(QueueError::QueueEmpty)
    }

    fn remove_oldest(&self) -> Result<Vec<u8>> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(QueueError::StoreUnavailable(self.name))?;
        let tx = conn.transaction()?;
        let head: Option<(i64, Vec<u8>)> = tx
            .query_row(
                "SELECT seq, record FROM items ORDER BY priority ASC, seq ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((seq, record)) = head else {
            return Err(QueueError::QueueEmpty);
        };
        tx.execute("DELETE FROM items WHERE seq = ?1", params![seq])?;
        tx.commit()?;
        self.len.fetch_sub(1, Ordering::SeqCst);
        Ok(record)
    }

    fn len(&self) -> u64 {
        self.len.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        let Some(conn) = self.lock().take() else {
            return Ok(());
        };
        self.len.store(0, Ordering::SeqCst);
        conn.close().map_err(|(_, err)| QueueError::from(err))
    }
}
