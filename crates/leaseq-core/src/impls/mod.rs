//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryOrderedQueue / InMemoryKvStore**: テスト・開発用
//! - **SqliteOrderedQueue / SqliteKvStore**: ディスク永続化（本番用）

pub mod inmem_kv;
pub mod inmem_queue;
pub mod sqlite_kv;
pub mod sqlite_queue;

pub use self::inmem_kv::InMemoryKvStore;
pub use self::inmem_queue::InMemoryOrderedQueue;
pub use self::sqlite_kv::SqliteKvStore;
pub use self::sqlite_queue::SqliteOrderedQueue;

use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

const DB_FILE: &str = "data.db";

/// Open (or create) the single SQLite file backing one storage directory.
pub(crate) fn open_connection(dir: &Path) -> Result<Connection> {
    std::fs::create_dir_all(dir)?;
    let conn = Connection::open(dir.join(DB_FILE))?;
    // WAL: 書き込み中でも読み取りをブロックしない
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}
