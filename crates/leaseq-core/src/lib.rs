//! leaseq-core
//!
//! Durable, at-least-once work queue with visibility-timeout leases.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskId, TaskRecord, LeaseKey）
//! - **ports**: 抽象化レイヤー（OrderedQueue, KvStore, Clock, IdGenerator）
//! - **impls**: ports の実装（InMemory / SQLite）
//! - **queue**: キューエンジンと facade（enqueue / dequeue / confirm / status）
//! - **app**: バックグラウンドループ（Sweeper）
//! - **error**: エラー型

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;

pub use error::{QueueError, Result};
pub use queue::{Delivery, LeaseQueue, QueueConfig, QueueEngine, QueueStatus, RetryPolicy};
