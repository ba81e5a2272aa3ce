//! InMemoryKvStore - テスト・開発用の key-value ストア

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use crate::error::{QueueError, Result};
use crate::ports::{KeyRange, KvStore, Visit};

type Entries = BTreeMap<String, Vec<u8>>;

pub struct InMemoryKvStore {
    name: &'static str,
    entries: Mutex<Option<Entries>>,
}

impl InMemoryKvStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(Some(BTreeMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Entries>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_open<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> Result<T> {
        let mut guard = self.lock();
        let entries = guard
            .as_mut()
            .ok_or(QueueError::StoreUnavailable(self.name))?;
        Ok(f(entries))
    }
}

impl KvStore for InMemoryKvStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.with_open(|entries| {
            entries.insert(key.to_string(), value.to_vec());
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_open(|entries| entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.with_open(|entries| entries.remove(key).is_some())
    }

    fn for_each(&self, range: KeyRange, visit: &mut Visit<'_>) -> Result<()> {
        // スナップショットを取ってからロックを外す（visitor が delete できるように）
        let snapshot: Vec<(String, Vec<u8>)> = self.with_open(|entries| {
            if let (Some(start), Some(end)) = (&range.start, &range.end)
                && start >= end
            {
                return Vec::new();
            }
            let lower = range.start.as_ref().map_or(Bound::Unbounded, Bound::Included);
            let upper = range.end.as_ref().map_or(Bound::Unbounded, Bound::Excluded);
            entries
                .range::<String, _>((lower, upper))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })?;

        for (key, value) in &snapshot {
            if !visit(key, value)? {
                break;
            }
        }
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        self.with_open(|entries| entries.len() as u64)
    }

    fn close(&self) -> Result<()> {
        self.lock().take();
        Ok(())
    }
}
