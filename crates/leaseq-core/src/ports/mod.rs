//! Ports - 抽象化レイヤー
//!
//! キューエンジンが依存する外部コラボレーター（ストレージ・時刻・ID 生成）の
//! インターフェース。実装は `impls` にある。
//!
//! # 設計原則
//! - 順序付きキューと key-value ストアはそれぞれ独立して open/close できる
//! - アトミック性は各ストアの単一操作が保証する（エンジン側でロックを足さない）

pub mod clock;
pub mod id_generator;
pub mod kv_store;
pub mod ordered_queue;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::kv_store::{KeyRange, KvStore, Visit};
pub use self::ordered_queue::OrderedQueue;
