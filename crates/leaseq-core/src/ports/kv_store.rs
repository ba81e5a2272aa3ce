//! KvStore port - 永続化された key-value ストア（lease store の土台）
//!
//! # 契約
//! - キーは文字列、辞書順（バイト順）で順序付けされる
//! - `delete` は存在しないキーでも失敗しない（Confirm と Sweeper が同じキーを奪い合うため）
//! - `for_each` は範囲のスナップショットを昇順で訪問する。visitor が同じストアを
//!   変更してもよい。visitor が `Ok(false)` かエラーを返したらそこで止まる

use crate::error::Result;

/// Half-open key range `[start, end)`. `None` means unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self::default()
    }

    /// Every key strictly less than `end`.
    pub fn below(end: impl Into<String>) -> Self {
        Self {
            start: None,
            end: Some(end.into()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.start.as_deref().is_none_or(|start| key >= start)
            && self.end.as_deref().is_none_or(|end| key < end)
    }
}

/// Visitor for `KvStore::for_each`: return `Ok(true)` to continue.
pub type Visit<'a> = dyn FnMut(&str, &[u8]) -> Result<bool> + 'a;

pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove `key` if present. Returns whether a value was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    fn for_each(&self, range: KeyRange, visit: &mut Visit<'_>) -> Result<()>;

    /// Number of stored keys.
    fn count(&self) -> Result<u64>;

    fn close(&self) -> Result<()>;
}
