use std::{any::type_name_of_val, fmt, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trove_config::Config;

use crate::{
    error::StoreResult,
    flush::FlushSweeper,
    infra::InMemoryCoordinationStore,
    ports::{CardDirectory, CoordinationStore, NotificationCommands},
    saga::{CardNotificationSaga, SagaPorts, SagaSettings},
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the coordination store the config asks for: Redis when a URL is
/// configured, otherwise a process-local store.
pub async fn connect_store(
    config: &Config,
) -> StoreResult<Arc<dyn CoordinationStore>> {
    match &config.redis {
        #[cfg(feature = "redis")]
        Some(redis) => {
            let store =
                crate::infra::RedisCoordinationStore::connect(&redis.url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(crate::error::StoreError::Unavailable(
            "REDIS_URL is set but trove-core was built without the `redis` feature"
                .into(),
        )),
        None => {
            if config.dev_mode {
                info!("Dev mode: using in-memory coordination store");
            } else {
                warn!(
                    "No Redis configured; coordination is limited to this process"
                );
            }
            Ok(Arc::new(InMemoryCoordinationStore::new()))
        }
    }
}

/// Saga plus its background flush sweeper, wired from [`Config`].
pub struct NotificationRuntime {
    saga: CardNotificationSaga,
    store: Arc<dyn CoordinationStore>,
    shutdown_token: CancellationToken,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for NotificationRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sweeper_running = self
            .sweeper_handle
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(true);

        f.debug_struct("NotificationRuntime")
            .field("saga", &self.saga)
            .field("store", &type_name_of_val(self.store.as_ref()))
            .field("sweeper_running", &sweeper_running)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl NotificationRuntime {
    /// Connect the configured store and start the runtime.
    pub async fn start(
        config: &Config,
        directory: Arc<dyn CardDirectory>,
        notifications: Arc<dyn NotificationCommands>,
    ) -> StoreResult<Self> {
        let store = connect_store(config).await?;
        Ok(Self::with_ports(
            config,
            SagaPorts::new(store, directory, notifications),
        ))
    }

    /// Start with explicit ports. Must be called inside a tokio runtime.
    pub fn with_ports(config: &Config, ports: SagaPorts) -> Self {
        let store = Arc::clone(&ports.store);
        let saga = CardNotificationSaga::new(ports, SagaSettings::from(config));
        let shutdown_token = CancellationToken::new();

        let sweeper_handle = if config.flush.sweeper.enabled {
            let sweeper =
                FlushSweeper::from_config(saga.clone(), &config.flush.sweeper);
            Some(sweeper.spawn(shutdown_token.clone()))
        } else {
            None
        };

        info!(
            window_ms = config.aggregation.window.as_millis() as u64,
            timer = config.flush.timer,
            sweeper = config.flush.sweeper.enabled,
            "card notification runtime started"
        );

        Self {
            saga,
            store,
            shutdown_token,
            sweeper_handle: Mutex::new(sweeper_handle),
        }
    }

    pub fn saga(&self) -> &CardNotificationSaga {
        &self.saga
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        Arc::clone(&self.store)
    }

    pub async fn shutdown(&self) {
        info!("Initiating shutdown of card notification runtime");
        self.shutdown_token.cancel();

        let handle = self.sweeper_handle.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Flush sweeper task failed: {:?}", e),
                Err(_) => warn!("Flush sweeper timed out during shutdown"),
            }
        }
    }
}
