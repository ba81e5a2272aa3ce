//! Sweeper - 期限切れ lease の回収ループ
//!
//! # フロー
//! 1. shutdown が来ていたら抜ける
//! 2. QueueEngine::sweep_expired() を blocking スレッドで実行
//! 3. interval だけ待つ（shutdown と select で競合させる）
//!
//! sweep の失敗はログに出して次のサイクルで再試行する。ループ自体は止めない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::queue::QueueEngine;

/// Sweeper handle.
/// - `shutdown_tx` を drop してもループは止まる
/// - `shutdown_and_join()` で終了を待てる
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn(engine: Arc<QueueEngine>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            sweep_loop(engine, interval, &mut shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    /// Ask the loop to stop after the current pass.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            warn!(error = %err, "sweeper task ended abnormally");
        }
    }
}

async fn sweep_loop(
    engine: Arc<QueueEngine>,
    interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    info!(interval_ms = interval.as_millis() as u64, "sweeper started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let pass = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || pass.sweep_expired()).await {
            Ok(Ok(0)) => {}
            Ok(Ok(reclaimed)) => info!(reclaimed, "sweep pass reclaimed expired leases"),
            Ok(Err(err)) => warn!(error = %err, "sweep pass failed"),
            Err(err) => warn!(error = %err, "sweep pass panicked"),
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender が drop された場合も停止
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("sweeper stopped");
}
