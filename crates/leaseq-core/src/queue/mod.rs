//! Queue module: engine, retry policy, configuration, and the `LeaseQueue` facade.

mod config;
mod engine;
mod retry;
mod status;

pub use config::{DEFAULT_SWEEP_INTERVAL, QueueConfig};
pub use engine::{Delivery, QueueEngine, Stores};
pub use retry::RetryPolicy;
pub use status::QueueStatus;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::app::Sweeper;
use crate::domain::TaskId;
use crate::error::Result;

/// A queue engine plus its background sweeper.
///
/// Design intent:
/// - Construction starts the sweeper, so it must happen inside a tokio runtime.
/// - `close` is synchronous and safe to call more than once; only the first call acts.
/// - `shutdown` additionally waits for the sweeper to finish its current pass.
pub struct LeaseQueue {
    engine: Arc<QueueEngine>,
    sweeper: Mutex<Option<Sweeper>>,
    closed: AtomicBool,
}

impl LeaseQueue {
    /// Open (or create) the on-disk queue at `config.path` and start sweeping.
    pub fn open(config: &QueueConfig) -> Result<Self> {
        let engine = QueueEngine::open(config)?;
        info!(
            path = %config.path.display(),
            running = engine.status().running_count,
            "opened queue"
        );
        Ok(Self::start(Arc::new(engine), config.sweep_interval))
    }

    /// Wrap an already-built engine and start sweeping it.
    pub fn start(engine: Arc<QueueEngine>, sweep_interval: Duration) -> Self {
        let sweeper = Sweeper::spawn(Arc::clone(&engine), sweep_interval);
        Self {
            engine,
            sweeper: Mutex::new(Some(sweeper)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &Arc<QueueEngine> {
        &self.engine
    }

    pub fn enqueue(&self, payload: impl Into<Vec<u8>>) -> Result<TaskId> {
        self.engine.enqueue(payload)
    }

    pub fn enqueue_with_priority(&self, payload: impl Into<Vec<u8>>, priority: u8) -> Result<TaskId> {
        self.engine.enqueue_with_priority(payload, priority)
    }

    pub fn dequeue(&self, timeout_secs: i64) -> Result<Delivery> {
        self.engine.dequeue(timeout_secs)
    }

    pub fn peek(&self) -> Result<Vec<u8>> {
        self.engine.peek()
    }

    pub fn confirm(&self, key: &str) -> Result<()> {
        self.engine.confirm(key)
    }

    pub fn status(&self) -> QueueStatus {
        self.engine.status()
    }

    fn take_sweeper(&self) -> Option<Sweeper> {
        self.sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Signal the sweeper and close every store.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(sweeper) = self.take_sweeper() {
            sweeper.request_shutdown();
        }
        self.engine.close()?;
        info!("closed queue");
        Ok(())
    }

    /// Stop the sweeper, wait for it, then close.
    pub async fn shutdown(&self) -> Result<()> {
        let sweeper = self.take_sweeper();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown_and_join().await;
        }
        self.close()
    }

    /// Close and delete the on-disk state.
    pub fn destroy(&self) -> Result<()> {
        self.close()?;
        self.engine.destroy()
    }
}
