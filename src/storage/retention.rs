use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{cancel::Cancellation, StorageBackend};

/// Start the periodic purge task.
///
/// Purges every `interval`, skipping the immediate first tick. The task ends
/// once `shutdown` is cancelled; a purge in flight sees the same signal at
/// its next bucket checkpoint.
pub fn spawn_purge_loop(
    storage: Arc<dyn StorageBackend>,
    retain: Duration,
    interval: Duration,
    shutdown: Cancellation,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        info!(
            "🧹 Purging mail older than {:?} every {:?}",
            retain, interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_cancelled(&shutdown) => break,
            }

            match storage.purge(retain, shutdown.clone()).await {
                Ok(report) => {
                    for (bucket, e) in &report.failed {
                        warn!("Failed to purge bucket {}: {}", bucket, e);
                    }
                    if let Some(e) = report.interrupted {
                        debug!("Purge interrupted: {}", e);
                    }
                }
                Err(e) => error!("Failed to purge expired mail: {}", e),
            }
        }

        info!("🛑 Purge task stopped");
    })
}

async fn wait_cancelled(shutdown: &Cancellation) {
    while !shutdown.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
