//! Client session orchestration.
//!
//! [`SyncClient`] wires the validator, market store, local cache and
//! connection manager for one session. [`Application`] is the CLI driver
//! around it.

use crate::config::AppConfig;
use crate::endpoint::Endpoints;
use crate::error::{AppError, AppResult};
use pulse_feed::{market_store, MarketStore, Validator};
use pulse_persistence::{FileStore, KeyValueStore, LocalCache};
use pulse_telemetry::Metrics;
use pulse_ws::{ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// One market data sync session.
pub struct SyncClient {
    session_id: Uuid,
    manager: Arc<ConnectionManager>,
    store: MarketStore,
    cache: Option<LocalCache>,
    task: Option<JoinHandle<()>>,
}

impl SyncClient {
    /// Build a client with the file-backed cache from `config`.
    pub fn new(config: &AppConfig, endpoints: &Endpoints) -> AppResult<Self> {
        let backend: Option<Arc<dyn KeyValueStore>> = if config.cache.enabled {
            Some(Arc::new(FileStore::new(&config.cache.dir)))
        } else {
            None
        };
        Self::with_cache_backend(config, endpoints, backend)
    }

    /// Build a client over an explicit cache backend (`None` disables caching).
    pub fn with_cache_backend(
        config: &AppConfig,
        endpoints: &Endpoints,
        backend: Option<Arc<dyn KeyValueStore>>,
    ) -> AppResult<Self> {
        let validator = Validator::new(config.symbol_set()?);
        let (writer, store) = market_store();
        let cache = backend.map(|b| LocalCache::new(b, config.cache_expiry()));

        let connection = config.connection_config(endpoints.market_feed_url());
        let manager = Arc::new(ConnectionManager::new(
            connection,
            validator,
            writer,
            cache.clone(),
        ));

        Ok(Self {
            session_id: Uuid::new_v4(),
            manager,
            store,
            cache,
            task: None,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Seed from cache, then spawn the connection loop.
    ///
    /// Cached data is visible in the store when this returns.
    pub fn start(&mut self) -> AppResult<()> {
        if self.task.is_some() || self.manager.is_shutdown() {
            return Err(AppError::AlreadyStarted);
        }

        let span = info_span!("session", session_id = %self.session_id);
        let seeded = span.in_scope(|| self.manager.seed_from_cache());
        info!(session_id = %self.session_id, seeded, "Starting sync client");

        let manager = Arc::clone(&self.manager);
        self.task = Some(tokio::spawn(
            async move {
                if let Err(e) = manager.run().await {
                    error!(?e, "Connection loop failed");
                }
            }
            .instrument(span),
        ));
        Ok(())
    }

    /// Tear down: no further transitions or store writes after this returns.
    pub async fn stop(&mut self) {
        self.manager.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(?e, "Connection task ended abnormally");
            }
        }
        info!(session_id = %self.session_id, "Sync client stopped");
    }

    pub fn store(&self) -> MarketStore {
        self.store.clone()
    }

    pub fn cache(&self) -> Option<&LocalCache> {
        self.cache.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.manager.watch_status()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe_events()
    }

    pub fn reconnect_now(&self) {
        self.manager.reconnect_now();
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.manager.shutdown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// CLI driver: runs a client until Ctrl-C or an optional deadline.
pub struct Application {
    config: AppConfig,
    endpoints: Endpoints,
}

impl Application {
    pub fn new(config: AppConfig, endpoints: Endpoints) -> Self {
        Self { config, endpoints }
    }

    pub async fn run(self, duration: Option<Duration>) -> AppResult<()> {
        let mut client = SyncClient::new(&self.config, &self.endpoints)?;

        let _subscription = client.store().subscribe(|update| {
            if let pulse_feed::StoreUpdate::Tick(tick) = update {
                info!(
                    symbol = %tick.symbol,
                    price = tick.price,
                    change = tick.change,
                    change_percent = tick.change_percent,
                    status = %tick.status,
                    "Tick"
                );
            }
        });
        Metrics::store_subscribers(client.store().subscriber_count());

        client.start()?;
        let mut status_rx = client.watch_status();

        let deadline = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        info!("Entering main event loop");
        loop {
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = status_rx.borrow_and_update().clone();
                    info!(state = %status.state, detail = %status.detail, attempt = status.attempt, "Connection status");
                }
                () = &mut deadline => {
                    info!("Run duration elapsed");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let snapshot = client.store().get_all();
        info!(
            symbols = snapshot.len(),
            accepted = client.manager().validation_stats().accepted(),
            rejected = client.manager().validation_stats().rejected(),
            "Shutting down"
        );
        client.stop().await;
        Ok(())
    }
}
