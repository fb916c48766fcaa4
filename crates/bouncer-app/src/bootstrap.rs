//! Wiring of configuration into a running bouncer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bouncer_core::Config;
use bouncer_proxy::{BouncerState, ChallengeService};
use bouncer_server::{Server, ServerConfig, ServerHandle};
use bouncer_storage::{DecisionCache, DecisionStore, MemoryStore, RedisStore};
use bouncer_sync::{SyncEngine, TickerHandle};

/// Opens the decision store selected by `[redis]`.
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn DecisionStore>> {
    if config.redis.enabled {
        let url = config.redis.url()?;
        let store = RedisStore::connect(&url)
            .await
            .with_context(|| format!("failed to connect to redis at {}", config.redis.host))?;
        tracing::info!(host = %config.redis.host, db = config.redis.database, "Using shared redis cache");
        Ok(Arc::new(store))
    } else {
        tracing::info!("Using process-local cache");
        Ok(Arc::new(MemoryStore::new()))
    }
}

/// A fully wired bouncer that has not started serving yet.
pub struct Bouncer {
    engine: Arc<SyncEngine>,
    server: Server,
}

impl Bouncer {
    /// Builds every component from a prepared configuration.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let store = open_store(config).await?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: &Config, store: Arc<dyn DecisionStore>) -> anyhow::Result<Self> {
        let engine = Arc::new(
            SyncEngine::from_config(config, DecisionCache::new(store))
                .context("failed to set up decision source")?,
        );

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("failed to build challenge client")?;
        let challenge = ChallengeService::from_config(&config.captcha, client)
            .context("failed to set up challenge provider")?;

        let state = BouncerState::from_config(config, Arc::clone(&engine), challenge)?;
        let server = Server::new(ServerConfig::from_settings(&config.server)?, state)?;

        Ok(Self { engine, server })
    }

    /// Starts the background sync (when the mode has one) and the server.
    ///
    /// A failed first login to the decision source aborts startup.
    pub async fn start(self) -> anyhow::Result<RunningBouncer> {
        tracing::info!(mode = self.engine.mode().as_str(), "Starting bouncer");
        let ticker = self
            .engine
            .start()
            .await
            .context("failed to start decision sync")?;

        let server = match self.server.start().await {
            Ok(server) => server,
            Err(e) => {
                if let Some(ticker) = ticker {
                    ticker.stop().await;
                }
                return Err(e.into());
            }
        };

        Ok(RunningBouncer {
            engine: self.engine,
            ticker,
            server,
        })
    }
}

/// Handle to a serving bouncer.
pub struct RunningBouncer {
    engine: Arc<SyncEngine>,
    ticker: Option<TickerHandle>,
    server: ServerHandle,
}

impl RunningBouncer {
    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Stops accepting requests, then stops the refresh ticker.
    pub async fn stop(self) {
        self.server.stop().await;
        if let Some(ticker) = self.ticker {
            ticker.stop().await;
        }
        tracing::info!("Bouncer stopped");
    }
}
