//! QueueEngine - lease / retry ライフサイクルの本体
//!
//! # フロー
//! 1. enqueue: TaskRecord を作って primary queue に append
//! 2. dequeue(timeout): retry queue → primary queue の順に 1 件取り出す。
//!    timeout > 0 かつ retry limit 未満なら lease store に記録して LeaseKey を返す
//! 3. confirm(key): lease を削除（存在しなければ LeaseNotFound）
//! 4. sweep_expired: 期限切れ lease を retry queue に戻す（Sweeper から定期的に呼ばれる）
//!
//! # 既知の制約
//! dequeue で queue から取り出してから lease を書き込むまでの間、タスクは
//! どちらのストアにも存在しない。この区間でプロセスが落ちるとタスクは失われる。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, info};

use super::{QueueConfig, QueueStatus, RetryPolicy};
use crate::domain::{DEFAULT_PRIORITY, LeaseKey, TaskId, TaskRecord, deadline_after};
use crate::error::{QueueError, Result};
use crate::impls::{InMemoryKvStore, InMemoryOrderedQueue, SqliteKvStore, SqliteOrderedQueue};
use crate::ports::{
    Clock, IdGenerator, KeyRange, KvStore, OrderedQueue, SystemClock, UlidGenerator,
};

/// The three storage collaborators behind one engine.
pub struct Stores {
    /// Fresh work.
    pub primary: Box<dyn OrderedQueue>,
    /// Reclaimed work; always drained before `primary`.
    pub retry: Box<dyn OrderedQueue>,
    /// In-flight leases keyed by `LeaseKey`.
    pub leases: Box<dyn KvStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            primary: Box::new(InMemoryOrderedQueue::new("queue")),
            retry: Box::new(InMemoryOrderedQueue::new("retry_queue")),
            leases: Box::new(InMemoryKvStore::new("running")),
        }
    }

    /// Open the on-disk layout under `config.path`.
    pub fn open(config: &QueueConfig) -> Result<Self> {
        Ok(Self {
            primary: Box::new(SqliteOrderedQueue::open(config.queue_dir(), "queue")?),
            retry: Box::new(SqliteOrderedQueue::open(config.retry_queue_dir(), "retry_queue")?),
            leases: Box::new(SqliteKvStore::open(config.running_dir(), "running")?),
        })
    }

    /// Close every store, even if an earlier one fails. Returns the first error.
    fn close(&self) -> Result<()> {
        let results = [self.primary.close(), self.retry.close(), self.leases.close()];
        results.into_iter().collect()
    }
}

/// Result of a dequeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// `None` when no lease was created (timeout <= 0 or retry limit reached).
    pub lease_key: Option<LeaseKey>,
    pub task_id: TaskId,
    pub value: Vec<u8>,
    /// Retry count before this delivery; 0 on first delivery.
    pub previous_retry_count: u32,
}

impl Delivery {
    pub fn is_leased(&self) -> bool {
        self.lease_key.is_some()
    }
}

pub struct QueueEngine {
    stores: Stores,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator<Arc<dyn Clock>>,
    /// Number of persisted leases. Resynced from the lease store at construction.
    running: AtomicI64,
    root: Option<PathBuf>,
}

impl QueueEngine {
    pub fn new(stores: Stores, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Result<Self> {
        let running = stores.leases.count()?;
        debug!(running, "resynced in-flight counter from lease store");
        Ok(Self {
            stores,
            retry,
            ids: UlidGenerator::new(Arc::clone(&clock)),
            clock,
            running: AtomicI64::new(running as i64),
            root: None,
        })
    }

    /// Disk-backed engine rooted at `config.path`.
    pub fn open(config: &QueueConfig) -> Result<Self> {
        let mut engine = Self::new(Stores::open(config)?, config.retry, Arc::new(SystemClock))?;
        engine.root = Some(config.path.clone());
        Ok(engine)
    }

    pub fn in_memory(retry: RetryPolicy) -> Result<Self> {
        Self::new(Stores::in_memory(), retry, Arc::new(SystemClock))
    }

    pub fn enqueue(&self, payload: impl Into<Vec<u8>>) -> Result<TaskId> {
        self.enqueue_with_priority(payload, DEFAULT_PRIORITY)
    }

    /// Lower `priority` is served first; ties keep insertion order.
    pub fn enqueue_with_priority(&self, payload: impl Into<Vec<u8>>, priority: u8) -> Result<TaskId> {
        let record = TaskRecord::with_priority(self.ids.generate_task_id(), payload, priority);
        self.stores.primary.append(record.priority, &record.encode()?)?;
        debug!(task_id = %record.id, priority, "enqueued");
        Ok(record.id)
    }

    /// Take the next task and, when `timeout_secs > 0` and the retry limit
    /// allows it, lease it until `now + timeout_secs`.
    pub fn dequeue(&self, timeout_secs: i64) -> Result<Delivery> {
        let raw = self.take_next()?;
        let mut record = TaskRecord::decode(&raw)?;
        let previous_retry_count = record.retry_count;

        if timeout_secs <= 0 || !self.retry.allows_lease(previous_retry_count) {
            debug!(
                task_id = %record.id,
                retry_count = previous_retry_count,
                "delivered without lease"
            );
            return Ok(Delivery {
                lease_key: None,
                task_id: record.id,
                value: record.value,
                previous_retry_count,
            });
        }

        if record.value.is_empty() {
            return Err(QueueError::EmptyPayload);
        }
        // digest は変更前の生バイトから取る
        let deadline = deadline_after(self.clock.now(), timeout_secs);
        let key = LeaseKey::new(deadline, &raw);
        record.start_lease();
        self.stores.leases.put(key.as_str(), &record.encode()?)?;
        self.running.fetch_add(1, Ordering::SeqCst);
        debug!(task_id = %record.id, lease = %key, %deadline, "leased");

        Ok(Delivery {
            lease_key: Some(key),
            task_id: record.id,
            value: record.value,
            previous_retry_count,
        })
    }

    fn take_next(&self) -> Result<Vec<u8>> {
        match self.stores.retry.remove_oldest() {
            Err(QueueError::QueueEmpty) => self.stores.primary.remove_oldest(),
            taken => taken,
        }
    }

    /// Payload of the next deliverable task. Touches neither leases nor counters.
    pub fn peek(&self) -> Result<Vec<u8>> {
        let raw = match self.stores.retry.peek_oldest() {
            Err(QueueError::QueueEmpty) => self.stores.primary.peek_oldest()?,
            peeked => peeked?,
        };
        Ok(TaskRecord::decode(&raw)?.value)
    }

    /// Delete a lease. Not idempotent: a second confirm of the same key fails
    /// with `LeaseNotFound`, as does a key already reclaimed by the sweeper.
    pub fn confirm(&self, key: &str) -> Result<()> {
        if !self.stores.leases.delete(key)? {
            return Err(QueueError::LeaseNotFound(key.to_string()));
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        debug!(lease = key, "confirmed");
        Ok(())
    }

    pub fn is_leased(&self, key: &str) -> Result<bool> {
        self.stores.leases.has(key)
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus::new(
            self.stores.primary.len(),
            self.stores.retry.len(),
            self.running.load(Ordering::SeqCst),
        )
    }

    /// Move every lease whose deadline has passed back to the retry queue.
    ///
    /// Returns the number of reclaimed tasks. A decode or store error aborts
    /// the pass; entries not yet visited stay in place for the next pass.
    ///
    /// The pass visits a snapshot, so a lease confirmed after the snapshot is
    /// skipped. A confirm landing between the append and the delete still
    /// leaves a requeued copy behind (at-least-once).
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut reclaimed = 0;
        self.stores.leases.for_each(
            KeyRange::below(LeaseKey::expiry_bound(now)),
            &mut |key, value| {
                if !self.stores.leases.has(key)? {
                    debug!(lease = key, "lease confirmed before reclaim; skipped");
                    return Ok(true);
                }
                let mut record = TaskRecord::decode(value)?;
                record.reclaim();
                self.stores.retry.append(record.priority, &record.encode()?)?;
                if !self.stores.leases.delete(key)? {
                    debug!(task_id = %record.id, lease = key, "lease confirmed during reclaim");
                    return Ok(true);
                }
                self.running.fetch_sub(1, Ordering::SeqCst);
                reclaimed += 1;

                let overdue_secs = LeaseKey::parse(key)
                    .ok()
                    .and_then(|lease| lease.deadline())
                    .map(|deadline| (now - deadline).num_seconds());
                info!(
                    task_id = %record.id,
                    lease = key,
                    retry_count = record.retry_count,
                    overdue_secs,
                    "reclaimed expired lease"
                );
                Ok(true)
            },
        )?;
        Ok(reclaimed)
    }

    /// Close all stores. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        self.stores.close()
    }

    /// Close, then delete the whole on-disk state. Irreversible.
    pub fn destroy(&self) -> Result<()> {
        self.close()?;
        if let Some(root) = &self.root {
            match std::fs::remove_dir_all(root) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err.into()),
                _ => info!(path = %root.display(), "destroyed queue state"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;
    use chrono::{TimeDelta, TimeZone, Utc};
    use rstest::rstest;

    fn engine_with(retry: RetryPolicy) -> (QueueEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let engine = QueueEngine::new(Stores::in_memory(), retry, clock.clone()).unwrap();
        (engine, clock)
    }

    fn engine() -> (QueueEngine, Arc<ManualClock>) {
        engine_with(RetryPolicy::unlimited())
    }

    #[rstest]
    #[case::zero(0)]
    #[case::negative(-5)]
    fn non_positive_timeout_never_leases(#[case] timeout: i64) {
        let (engine, _) = engine();
        engine.enqueue("p").unwrap();

        let delivery = engine.dequeue(timeout).unwrap();
        assert_eq!(delivery.lease_key, None);
        assert_eq!(delivery.value, b"p");
        assert_eq!(engine.status(), QueueStatus::new(0, 0, 0));
    }

    #[test]
    fn fifo_without_priorities() {
        let (engine, _) = engine();
        for p in ["a", "b", "c"] {
            engine.enqueue(p).unwrap();
        }

        for expected in ["a", "b", "c"] {
            let delivery = engine.dequeue(0).unwrap();
            assert_eq!(delivery.value, expected.as_bytes());
            assert!(!delivery.is_leased());
        }
        assert!(matches!(engine.dequeue(0), Err(QueueError::QueueEmpty)));
    }

    #[test]
    fn lower_priority_value_served_first() {
        let (engine, _) = engine();
        engine.enqueue_with_priority("five", 5).unwrap();
        engine.enqueue_with_priority("one", 1).unwrap();

        assert_eq!(engine.dequeue(0).unwrap().value, b"one");
        assert_eq!(engine.dequeue(0).unwrap().value, b"five");
    }

    #[test]
    fn duplicate_payloads_are_independent_tasks() {
        let (engine, _) = engine();
        let first = engine.enqueue("same").unwrap();
        let second = engine.enqueue("same").unwrap();
        assert_ne!(first, second);

        let a = engine.dequeue(30).unwrap();
        let b = engine.dequeue(30).unwrap();
        assert_ne!(a.lease_key, b.lease_key);
        assert_eq!(engine.status().running_count, 2);
    }

    #[test]
    fn confirm_succeeds_exactly_once() {
        let (engine, _) = engine();
        engine.enqueue("job").unwrap();

        let delivery = engine.dequeue(10).unwrap();
        let key = delivery.lease_key.unwrap();
        assert_eq!(delivery.previous_retry_count, 0);
        assert!(engine.is_leased(key.as_str()).unwrap());
        assert_eq!(engine.status().running_count, 1);

        engine.confirm(key.as_str()).unwrap();
        assert_eq!(engine.status().running_count, 0);
        assert!(matches!(
            engine.confirm(key.as_str()),
            Err(QueueError::LeaseNotFound(_))
        ));
        assert_eq!(engine.status().running_count, 0);
    }

    #[test]
    fn empty_queue_and_bogus_key() {
        let (engine, _) = engine();
        assert!(matches!(engine.dequeue(10), Err(QueueError::QueueEmpty)));
        assert!(matches!(engine.peek(), Err(QueueError::QueueEmpty)));
        assert!(matches!(
            engine.confirm("bogus"),
            Err(QueueError::LeaseNotFound(key)) if key == "bogus"
        ));
    }

    #[test]
    fn empty_payload_is_queued_but_not_leasable() {
        let (engine, _) = engine();
        engine.enqueue("").unwrap();
        assert_eq!(engine.status().queue_length, 1);

        assert!(matches!(engine.dequeue(10), Err(QueueError::EmptyPayload)));
        assert_eq!(engine.status().running_count, 0);
    }

    #[test]
    fn lease_deadline_is_now_plus_timeout() {
        let (engine, clock) = engine();
        engine.enqueue("job").unwrap();

        let key = engine.dequeue(90).unwrap().lease_key.unwrap();
        assert_eq!(key.deadline(), Some(clock.now() + TimeDelta::seconds(90)));
    }

    #[test]
    fn unconfirmed_lease_is_not_reclaimed_before_deadline() {
        let (engine, clock) = engine();
        engine.enqueue("job").unwrap();
        engine.dequeue(10).unwrap();

        clock.advance(TimeDelta::seconds(10));
        assert_eq!(engine.sweep_expired().unwrap(), 0);
        assert_eq!(engine.status().running_count, 1);
    }

    #[test]
    fn expired_lease_is_redelivered_with_incremented_retry_count() {
        let (engine, clock) = engine();
        engine.enqueue("job").unwrap();
        let first = engine.dequeue(10).unwrap();

        clock.advance(TimeDelta::seconds(11));
        assert_eq!(engine.sweep_expired().unwrap(), 1);
        assert_eq!(engine.status(), QueueStatus::new(0, 1, 0));
        assert!(!engine.is_leased(first.lease_key.unwrap().as_str()).unwrap());

        let second = engine.dequeue(10).unwrap();
        assert_eq!(second.task_id, first.task_id);
        assert_eq!(second.value, b"job");
        assert_eq!(second.previous_retry_count, first.previous_retry_count + 1);
        assert!(second.is_leased());
    }

    #[test]
    fn reclaimed_work_beats_fresh_work() {
        let (engine, clock) = engine();
        engine.enqueue_with_priority("old", 200).unwrap();
        engine.dequeue(5).unwrap();
        engine.enqueue_with_priority("fresh", 0).unwrap();

        clock.advance(TimeDelta::seconds(6));
        engine.sweep_expired().unwrap();

        assert_eq!(engine.peek().unwrap(), b"old");
        assert_eq!(engine.dequeue(0).unwrap().value, b"old");
        assert_eq!(engine.dequeue(0).unwrap().value, b"fresh");
    }

    #[test]
    fn confirm_after_reclaim_fails() {
        let (engine, clock) = engine();
        engine.enqueue("job").unwrap();
        let key = engine.dequeue(1).unwrap().lease_key.unwrap();

        clock.advance(TimeDelta::seconds(2));
        engine.sweep_expired().unwrap();
        assert!(matches!(
            engine.confirm(key.as_str()),
            Err(QueueError::LeaseNotFound(_))
        ));
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    fn retry_limit_turns_delivery_into_hand_off(#[case] limit: u32) {
        let (engine, clock) = engine_with(RetryPolicy::with_limit(limit));
        engine.enqueue("flaky").unwrap();

        for attempt in 0..limit {
            let delivery = engine.dequeue(5).unwrap();
            assert!(delivery.is_leased(), "attempt {attempt} should be leased");
            assert_eq!(delivery.previous_retry_count, attempt);
            clock.advance(TimeDelta::seconds(6));
            assert_eq!(engine.sweep_expired().unwrap(), 1);
        }

        let last = engine.dequeue(5).unwrap();
        assert_eq!(last.lease_key, None);
        assert_eq!(last.previous_retry_count, limit);
        assert_eq!(engine.status(), QueueStatus::new(0, 0, 0));
    }

    #[test]
    fn running_count_matches_confirms_needed() {
        let (engine, _) = engine();
        for i in 0..4 {
            engine.enqueue(format!("task-{i}")).unwrap();
        }
        let keys: Vec<_> = (0..3)
            .map(|_| engine.dequeue(60).unwrap().lease_key.unwrap())
            .collect();
        engine.dequeue(0).unwrap();

        assert_eq!(engine.status().running_count, 3);
        for key in &keys {
            engine.confirm(key.as_str()).unwrap();
        }
        assert_eq!(engine.status().running_count, 0);
    }

    #[test]
    fn peek_never_mutates_status() {
        let (engine, _) = engine();
        engine.enqueue("a").unwrap();
        engine.enqueue("b").unwrap();
        engine.dequeue(30).unwrap();

        let before = engine.status();
        assert_eq!(engine.peek().unwrap(), b"b");
        assert_eq!(engine.peek().unwrap(), b"b");
        assert_eq!(engine.status(), before);
    }

    #[test]
    fn corrupt_lease_aborts_the_sweep_pass() {
        let stores = Stores::in_memory();
        stores.leases.put("20000101000000:00", b"not a record").unwrap();
        let engine =
            QueueEngine::new(stores, RetryPolicy::unlimited(), Arc::new(SystemClock)).unwrap();
        assert_eq!(engine.status().running_count, 1);

        assert!(matches!(
            engine.sweep_expired(),
            Err(QueueError::Serialization(_))
        ));
        assert_eq!(engine.status().running_count, 1);
        assert!(engine.is_leased("20000101000000:00").unwrap());
    }

    #[test]
    fn closed_engine_is_unavailable() {
        let (engine, _) = engine();
        engine.close().unwrap();
        engine.close().unwrap();

        assert!(matches!(
            engine.enqueue("x"),
            Err(QueueError::StoreUnavailable(_))
        ));
        assert!(matches!(
            engine.confirm("k"),
            Err(QueueError::StoreUnavailable(_))
        ));
        assert_eq!(engine.status(), QueueStatus::new(0, 0, 0));
    }

    /// Lease store that loses each visited key right after the snapshot,
    /// as if a consumer confirmed it concurrently.
    struct ConfirmedAfterSnapshot(InMemoryKvStore);

    impl KvStore for ConfirmedAfterSnapshot {
        fn put(&self, key: &str, value: &[u8]) -> Result<()> {
            self.0.put(key, value)
        }

        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.0.get(key)
        }

        fn delete(&self, key: &str) -> Result<bool> {
            self.0.delete(key)
        }

        fn for_each(&self, range: KeyRange, visit: &mut crate::ports::Visit<'_>) -> Result<()> {
            self.0.for_each(range, &mut |key, value| {
                self.0.delete(key)?;
                visit(key, value)
            })
        }

        fn count(&self) -> Result<u64> {
            self.0.count()
        }

        fn close(&self) -> Result<()> {
            self.0.close()
        }
    }

    #[test]
    fn lease_confirmed_after_snapshot_is_not_requeued() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let stores = Stores {
            leases: Box::new(ConfirmedAfterSnapshot(InMemoryKvStore::new("running"))),
            ..Stores::in_memory()
        };
        let engine = QueueEngine::new(stores, RetryPolicy::unlimited(), clock.clone()).unwrap();
        engine.enqueue("job").unwrap();
        engine.dequeue(5).unwrap();

        clock.advance(TimeDelta::seconds(6));
        assert_eq!(engine.sweep_expired().unwrap(), 0);
        assert_eq!(engine.status().retry_queue_length, 0);
        assert!(matches!(engine.dequeue(0), Err(QueueError::QueueEmpty)));
    }

    #[test]
    fn concurrent_consumers_and_sweeper_keep_counter_in_step() {
        use std::collections::HashSet;
        use std::sync::Mutex;
        use std::sync::atomic::{AtomicBool, AtomicUsize};
        use std::time::{Duration, Instant};

        const TASKS: usize = 200;
        const CONSUMERS: usize = 8;

        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig::new(dir.path());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let engine = QueueEngine::new(
            Stores::open(&config).unwrap(),
            RetryPolicy::unlimited(),
            clock.clone(),
        )
        .unwrap();
        for i in 0..TASKS {
            engine.enqueue(format!("task-{i}")).unwrap();
        }

        let confirmed = Mutex::new(HashSet::new());
        let confirms = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..CONSUMERS {
                scope.spawn(|| {
                    while !stop.load(Ordering::SeqCst) {
                        match engine.dequeue(1) {
                            Ok(delivery) => {
                                let key = delivery.lease_key.unwrap();
                                match engine.confirm(key.as_str()) {
                                    Ok(()) => {
                                        confirms.fetch_add(1, Ordering::SeqCst);
                                        confirmed.lock().unwrap().insert(delivery.value);
                                    }
                                    Err(QueueError::LeaseNotFound(_)) => {}
                                    Err(err) => panic!("confirm failed: {err}"),
                                }
                            }
                            Err(QueueError::QueueEmpty) => {
                                std::thread::sleep(Duration::from_millis(1));
                            }
                            Err(err) => panic!("dequeue failed: {err}"),
                        }
                    }
                });
            }

            scope.spawn(|| {
                while !stop.load(Ordering::SeqCst) {
                    clock.advance(TimeDelta::seconds(1));
                    engine.sweep_expired().unwrap();
                    std::thread::sleep(Duration::from_millis(2));
                }
            });

            let deadline = Instant::now() + Duration::from_secs(60);
            while confirmed.lock().unwrap().len() < TASKS && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            stop.store(true, Ordering::SeqCst);
        });

        let confirmed = confirmed.into_inner().unwrap();
        assert_eq!(confirmed.len(), TASKS);

        // 残っているのは confirm 済みタスクの再配送分だけ
        while let Ok(delivery) = engine.dequeue(0) {
            assert!(confirmed.contains(&delivery.value));
        }
        assert!(confirms.load(Ordering::SeqCst) >= TASKS);

        let status = engine.status();
        assert_eq!(status.running_count, engine.stores.leases.count().unwrap() as i64);
        assert_eq!(status.running_count, 0);
        assert_eq!(status.total_queue_length, 0);
    }
}
