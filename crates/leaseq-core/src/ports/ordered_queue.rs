//! OrderedQueue port - 永続化された順序付きキュー
//!
//! シリアライズ済みのタスクレコードを (priority 昇順, 挿入順) で保持する。
//! priority がすべて同じなら純粋な FIFO になる。
//!
//! # 契約
//! - `peek_oldest` / `remove_oldest` は空なら `QueueError::QueueEmpty`
//! - `remove_oldest` は取り出しと削除をアトミックに行う（同じ要素を二人に渡さない）
//! - `close` 後の操作は `QueueError::StoreUnavailable`、`close` 自体は何度呼んでもよい

use crate::error::Result;

pub trait OrderedQueue: Send + Sync {
    /// Append a record. Returns its insertion sequence number.
    fn append(&self, priority: u8, record: &[u8]) -> Result<u64>;

    /// Next record without removing it.
    fn peek_oldest(&self) -> Result<Vec<u8>>;

    /// Atomically pop and return the next record.
    fn remove_oldest(&self) -> Result<Vec<u8>>;

    /// Number of records currently queued (0 once closed).
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&self) -> Result<()>;
}
