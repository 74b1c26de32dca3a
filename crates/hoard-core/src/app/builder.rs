//! AppBuilder - 設定から App を組み立てる
//!
//! # 起動時検証
//! - backend が渡されていなければ BuildError::MissingBackend
//! - cache_dir が作れなければ BuildError::Store
//!
//! gateway client / clock / event sink は省略すると本番用の実装
//! (`ReqwestGatewayClient` / `SystemClock` / `TracingEventSink`) になります。

use std::sync::Arc;

use tracing::info;

use crate::app::reaper_loop::{ReaperHandle, ReaperLoop};
use crate::app::runtime::Runtime;
use crate::app::status::StatusReport;
use crate::cache::{CachePolicy, ModelCache};
use crate::config::HoardConfig;
use crate::content::GatewayFetcher;
use crate::domain::HoardError;
use crate::impls::{FsArtifactStore, ReqwestGatewayClient, TracingEventSink};
use crate::ports::{Clock, EventSink, GatewayClient, ModelBackend, SystemClock, UlidGenerator};

/// 設定どおりの FsArtifactStore を開く（CLI からも使う）
pub fn open_store(
    config: &HoardConfig,
    client: Arc<dyn GatewayClient>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
) -> Result<FsArtifactStore, HoardError> {
    let fetcher = GatewayFetcher::new(
        client,
        config.gateways.clone(),
        config.fetch_timeout(),
        config.max_artifact_bytes,
        events.clone(),
    );
    FsArtifactStore::open(&config.cache_dir, fetcher, config.verify_on_reuse, clock, events)
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no model backend was provided")]
    MissingBackend,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("failed to open content store: {0}")]
    Store(#[from] HoardError),
}

/// AppBuilder
///
/// ```ignore
/// let app = AppBuilder::new(HoardConfig::from_env()?)
///     .with_backend(backend)
///     .build()?;
/// ```
pub struct AppBuilder {
    config: HoardConfig,
    backend: Option<Arc<dyn ModelBackend>>,
    gateway: Option<Arc<dyn GatewayClient>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventSink>>,
}

impl AppBuilder {
    pub fn new(config: HoardConfig) -> Self {
        Self {
            config,
            backend: None,
            gateway: None,
            clock: None,
            events: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_gateway_client(mut self, client: Arc<dyn GatewayClient>) -> Self {
        self.gateway = Some(client);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let backend = self.backend.ok_or(BuildError::MissingBackend)?;
        let gateway: Arc<dyn GatewayClient> = match self.gateway {
            Some(client) => client,
            None => Arc::new(ReqwestGatewayClient::new().map_err(|e| BuildError::HttpClient(e.to_string()))?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));
        let config = self.config;

        let store = Arc::new(open_store(&config, gateway, clock.clone(), events.clone())?);
        let cache = Arc::new(ModelCache::new(
            store.clone(),
            backend,
            clock.clone(),
            events,
            CachePolicy {
                max_entries: config.max_loaded_models,
                idle_ttl: config.idle_ttl(),
            },
        ));
        let runtime = Runtime::new(
            cache.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            config.request_timeout(),
        );

        info!(
            cache_dir = %config.cache_dir.display(),
            gateways = config.gateways.len(),
            max_loaded_models = config.max_loaded_models,
            verify = ?config.verify_on_reuse,
            "hoard app built"
        );

        Ok(App {
            config,
            runtime,
            cache,
            store,
            clock,
        })
    }
}

/// App は組み立て済みの一式
pub struct App {
    pub config: HoardConfig,
    pub runtime: Runtime,
    pub cache: Arc<ModelCache>,
    pub store: Arc<FsArtifactStore>,
    clock: Arc<dyn Clock>,
}

impl App {
    /// idle_ttl が無効なら None
    pub fn spawn_reaper(&self) -> Option<ReaperHandle> {
        self.config.idle_ttl()?;
        let reaper = ReaperLoop::new(self.cache.clone(), self.clock.clone(), self.config.reaper_interval());
        Some(reaper.spawn())
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            cache: self.cache.status(),
            store: self.store.stats(),
        }
    }

    /// reaper を止めてから load 済みモデルを全部手放す
    pub async fn shutdown(&self, reaper: Option<ReaperHandle>) {
        if let Some(reaper) = reaper {
            reaper.shutdown_and_join().await;
        }
        let released = self.cache.clear();
        info!(released, "hoard app shut down");
    }
}
