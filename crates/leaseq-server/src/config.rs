//! Server configuration: flags with environment fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use leaseq_core::{LeaseQueue, QueueConfig, QueueEngine, Result};

#[derive(Debug, Clone, Parser)]
#[command(name = "leaseq", version, about = "Durable at-least-once work queue")]
pub struct Cli {
    /// Where the HTTP API will listen, e.g. 127.0.0.1:8080
    #[arg(long, env = "LEASEQ_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: SocketAddr,

    /// Root directory for queue/, retry_queue/ and running/.
    #[arg(long, env = "LEASEQ_PATH", default_value = "./queue")]
    pub path: PathBuf,

    /// Leases granted per task before it is handed out without one. 0 = unlimited.
    #[arg(long, env = "LEASEQ_RETRY_LIMIT", default_value_t = 0)]
    pub retry_limit: u32,

    /// Seconds between two sweeps of the lease store.
    #[arg(long, env = "LEASEQ_SWEEP_INTERVAL_SECS", default_value_t = 5)]
    pub sweep_interval_secs: u64,

    /// Keep everything in memory (nothing survives a restart).
    #[arg(long, env = "LEASEQ_IN_MEMORY", default_value_t = false)]
    pub in_memory: bool,
}

impl Cli {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::new(&self.path)
            .with_retry_limit(self.retry_limit)
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs.max(1)))
    }

    /// Build the queue and start its sweeper. Needs a tokio runtime.
    pub fn open_queue(&self) -> Result<LeaseQueue> {
        let config = self.queue_config();
        if self.in_memory {
            let engine = QueueEngine::in_memory(config.retry)?;
            return Ok(LeaseQueue::start(Arc::new(engine), config.sweep_interval));
        }
        LeaseQueue::open(&config)
    }
}
