use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trove_config::SweeperConfig;

use crate::{
    error::Result,
    saga::{CardNotificationSaga, SweepReport},
};

/// Periodically flushes jobs from the due index whose timer never fired,
/// typically because the worker that created the buffer went away.
///
/// Jobs are only considered once they are `grace` past due so that the
/// creating worker's timer normally claims them first.
#[derive(Debug, Clone)]
pub struct FlushSweeper {
    saga: CardNotificationSaga,
    interval: Duration,
    grace: Duration,
    batch_size: usize,
}

impl FlushSweeper {
    pub fn new(
        saga: CardNotificationSaga,
        interval: Duration,
        grace: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            saga,
            interval,
            grace,
            batch_size,
        }
    }

    pub fn from_config(
        saga: CardNotificationSaga,
        config: &SweeperConfig,
    ) -> Self {
        Self::new(saga, config.interval, config.grace, config.batch_size)
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.saga.flush_due(self.grace, self.batch_size).await
    }

    /// Run until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Flush sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        if let Err(err) = self.sweep_once().await {
                            warn!("flush sweeper error: {err}");
                        }
                    }
                }
            }
        })
    }
}
