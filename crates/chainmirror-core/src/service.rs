//! Recurring-timer wrapper around [`SyncDriver`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::driver::{CycleOutcome, SyncDriver};
use crate::error::IndexerError;

/// Runs [`SyncDriver::cycle`] every `poll_interval_ms` on a tokio task.
///
/// A failed cycle is logged and left to the next tick, whose cleanup step
/// resumes from the status ledger.
pub struct SyncService {
    driver: Arc<SyncDriver>,
    task: JoinHandle<()>,
}

impl SyncService {
    /// Start the driver and spawn the tick loop.
    pub fn spawn(driver: Arc<SyncDriver>) -> Self {
        driver.start();
        let ticking = Arc::clone(&driver);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ticking.config().poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !ticking.is_running() {
                    break;
                }
                match ticking.cycle().await {
                    Ok(CycleOutcome::Completed { steps }) if steps > 0 => {
                        tracing::debug!(steps, "sync cycle complete");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "sync cycle failed"),
                }
            }
        });
        tracing::info!(
            network = %driver.config().network,
            poll_interval_ms = driver.config().poll_interval_ms,
            "sync service started"
        );
        Self { driver, task }
    }

    pub fn driver(&self) -> &Arc<SyncDriver> {
        &self.driver
    }

    /// Stop the driver, wait for the in-flight cycle, then join the task.
    pub async fn shutdown(self) -> Result<(), IndexerError> {
        self.driver.stop().await?;
        self.task
            .await
            .map_err(|e| IndexerError::Other(format!("sync task panicked: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::handler::IndexerRegistry;
    use crate::memory::MemoryStore;
    use crate::source::MemorySource;
    use crate::types::SourceBlock;
    use std::time::Duration;

    fn chain(to: u32) -> Vec<SourceBlock> {
        (0..=to)
            .map(|h| {
                serde_json::from_value(serde_json::json!({
                    "hash": format!("s{h}"),
                    "previousblockhash": if h == 0 { String::new() } else { format!("s{}", h - 1) },
                    "height": h, "time": 0, "mediantime": 0
                }))
                .unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn service_follows_the_source() {
        let source = Arc::new(MemorySource::new(chain(3)));
        let driver = Arc::new(SyncDriver::new(
            source.clone(),
            Arc::new(MemoryStore::new()),
            IndexerRegistry::new(),
            SyncConfig::builder().poll_interval_ms(5).build(),
        ));
        let service = SyncService::spawn(driver.clone());

        let caught_up = async {
            loop {
                if let Some(tip) = driver.tip().await.unwrap() {
                    if tip.height == 5 {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        source.set_chain(chain(5));
        tokio::time::timeout(Duration::from_secs(5), caught_up)
            .await
            .expect("service did not catch up");

        service.shutdown().await.unwrap();
        assert!(!driver.is_running());
        assert!(!driver.is_indexing());
    }
}
