//! InMemoryOrderedQueue - テスト・開発用の順序付きキュー
//!
//! # 実装詳細
//! - `BTreeMap<(priority, seq), record>` で (priority 昇順, 挿入順) を表現
//! - std の Mutex で排他制御（await を跨がないので tokio の Mutex は不要）
//! - close 後は state を `None` にする

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{QueueError, Result};
use crate::ports::OrderedQueue;

#[derive(Default)]
struct QueueState {
    items: BTreeMap<(u8, u64), Vec<u8>>,
    next_seq: u64,
}

pub struct InMemoryOrderedQueue {
    name: &'static str,
    state: Mutex<Option<QueueState>>,
}

impl InMemoryOrderedQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(Some(QueueState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<QueueState>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_open<T>(&self, f: impl FnOnce(&mut QueueState) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let state = guard
            .as_mut()
            .ok_or(QueueError::StoreUnavailable(self.name))?;
        f(state)
    }
}

impl OrderedQueue for InMemoryOrderedQueue {
    fn append(&self, priority: u8, record: &[u8]) -> Result<u64> {
        self.with_open(|state| {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.items.insert((priority, seq), record.to_vec());
            Ok(seq)
        })
    }

    fn peek_oldest(&self) -> Result<Vec<u8>> {
        self.with_open(|state| {
            state
                .items
                .first_key_value()
                .map(|(_, record)| record.clone())
                .ok_or(QueueError::QueueEmpty)
        })
    }

    fn remove_oldest(&self) -> Result<Vec<u8>> {
        self.with_open(|state| {
            state
                .items
                .pop_first()
                .map(|(_, record)| record)
                .ok_or(QueueError::QueueEmpty)
        })
    }

    fn len(&self) -> u64 {
        self.lock()
            .as_ref()
            .map_or(0, |state| state.items.len() as u64)
    }

    fn close(&self) -> Result<()> {
        self.lock().take();
        Ok(())
    }
}
