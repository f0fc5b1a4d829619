use ssrkit_common::{Result, SsrConfig, SsrError};
use ssrkit_metrics::RenderMetricsCollector;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::document::DocumentComposer;
use crate::hmr::{BroadcasterConfig, DevWatcher, EventBroadcaster, Rebuilder};
use crate::http_router::{ContextProvider, SsrRouter};
use crate::http_server::HttpServer;
use crate::render::{RenderCache, Renderer};
use crate::resource_limits::ResourceLimits;
use crate::runtime::{BoaEngineFactory, EnginePool, MemoryMonitor, MonitorConfig, PoolConfig};

/// A fully wired rendering service backed by Boa engines.
pub struct App {
    config: Arc<SsrConfig>,
    metrics: Arc<RenderMetricsCollector>,
    pool: EnginePool<BoaEngineFactory>,
    cache: Option<Arc<RenderCache>>,
    renderer: Arc<Renderer<BoaEngineFactory>>,
    broadcaster: EventBroadcaster,
    rebuilder: Option<Arc<Rebuilder>>,
    router: Arc<SsrRouter<BoaEngineFactory>>,
}

/// Handles of the background work started by [`App::start_background`].
/// Dropping it stops the watcher and the memory monitor.
pub struct BackgroundTasks {
    monitor: JoinHandle<()>,
    _watcher: Option<DevWatcher>,
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

impl App {
    pub fn new(config: SsrConfig) -> Result<Self> {
        Self::with_provider(config, None)
    }

    /// Like [`App::new`], with a custom source of per-request user info.
    pub fn with_provider(config: SsrConfig, provider: Option<Arc<dyn ContextProvider>>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(RenderMetricsCollector::new(config.dev));
        let limits = ResourceLimits::from(config.as_ref());
        limits.validate().map_err(SsrError::Config)?;

        let pool = EnginePool::with_metrics(
            BoaEngineFactory::new(limits.clone()),
            PoolConfig::from(&config.pool),
            metrics.clone(),
        )?;

        let cache = if config.cache.enabled {
            Some(RenderCache::with_metrics(config.cache.clone(), metrics.clone())?)
        } else {
            tracing::info!("Render cache disabled");
            None
        };

        let mut renderer = Renderer::new(config.server_build_dir.clone(), pool.clone(), limits)
            .with_metrics(metrics.clone());
        if let Some(cache) = &cache {
            renderer = renderer.with_cache(cache.clone());
        }
        let renderer = Arc::new(renderer);

        let broadcaster =
            EventBroadcaster::with_metrics(BroadcasterConfig::from(&config.hmr), metrics.clone());

        let rebuilder = config.dev.then(|| {
            let mut rebuilder = Rebuilder::from_config(&config.hmr, broadcaster.clone());
            if let Some(cache) = &cache {
                rebuilder = rebuilder.with_cache(cache.clone());
            }
            Arc::new(rebuilder)
        });

        let composer = DocumentComposer::from_config(&config)?;
        let mut router = SsrRouter::new(renderer.clone(), composer, config.clone())
            .with_broadcaster(broadcaster.clone());
        if let Some(provider) = provider {
            router = router.with_provider(provider);
        }

        tracing::info!(
            "Rendering {} with {} engines ({} mode)",
            config.server_build_dir.display(),
            config.pool.size,
            if config.dev { "development" } else { "production" }
        );

        Ok(Self {
            config,
            metrics,
            pool,
            cache,
            renderer,
            broadcaster,
            rebuilder,
            router: Arc::new(router),
        })
    }

    pub fn config(&self) -> &SsrConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<RenderMetricsCollector> {
        &self.metrics
    }

    pub fn pool(&self) -> &EnginePool<BoaEngineFactory> {
        &self.pool
    }

    pub fn cache(&self) -> Option<&Arc<RenderCache>> {
        self.cache.as_ref()
    }

    pub fn renderer(&self) -> &Arc<Renderer<BoaEngineFactory>> {
        &self.renderer
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    pub fn rebuilder(&self) -> Option<&Arc<Rebuilder>> {
        self.rebuilder.as_ref()
    }

    pub fn router(&self) -> Arc<SsrRouter<BoaEngineFactory>> {
        self.router.clone()
    }

    /// Starts the memory monitor and, in development mode, runs an initial
    /// rebuild check and starts the file watcher. Must be called inside a
    /// tokio runtime.
    pub async fn start_background(&self) -> Result<BackgroundTasks> {
        let monitor = MemoryMonitor::new(self.pool.clone(), MonitorConfig::from(&self.config.pool)).spawn();

        let watcher = match &self.rebuilder {
            Some(rebuilder) => {
                let outcome = rebuilder.rebuild_if_changed(false).await?;
                tracing::info!("Initial build check: {:?}", outcome);
                Some(DevWatcher::start(
                    &self.config.hmr,
                    rebuilder.clone(),
                    self.broadcaster.clone(),
                )?)
            }
            None => None,
        };

        Ok(BackgroundTasks {
            monitor,
            _watcher: watcher,
        })
    }

    /// Starts background work and serves HTTP on the configured address.
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self.config.bind.parse()?;
        let _background = self.start_background().await?;
        HttpServer::new(self.router()).run(addr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ssrkit_common::{CacheConfig, HmrConfig, RequestContext};
    use ssrkit_metrics::MetricsCollector;
    use std::fs;
    use tempfile::TempDir;

    fn config(root: &TempDir, dev: bool) -> SsrConfig {
        let server = root.path().join("server");
        fs::create_dir_all(&server).unwrap();
        fs::write(
            server.join("Home.js"),
            "function Render() { return '<h1>' + INITIAL_PROPS.title + '</h1>'; }",
        )
        .unwrap();
        SsrConfig {
            dev,
            server_build_dir: server,
            cache: CacheConfig {
                dir: root.path().join("cache"),
                ..Default::default()
            },
            hmr: HmrConfig {
                source_dirs: Vec::new(),
                manifest_files: Vec::new(),
                state_dir: Some(root.path().join("state")),
                ..Default::default()
            },
            pool: ssrkit_common::PoolSettings {
                size: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_app_renders_and_caches() {
        let root = TempDir::new().unwrap();
        let app = App::new(config(&root, false)).unwrap();
        assert_eq!(app.pool().size(), 2);
        assert!(app.rebuilder().is_none());

        let ctx = RequestContext::default();
        let payload = json!({"title": "Hi"});
        let first = app.renderer().render("Home.js", &payload, &ctx).await.unwrap();
        let second = app.renderer().render("Home.js", &payload, &ctx).await.unwrap();
        assert_eq!(first, "<h1>Hi</h1>");
        assert_eq!(first, second);
        assert_eq!(app.metrics().snapshot().cache.hits, 1);
    }

    #[tokio::test]
    async fn test_cache_can_be_disabled() {
        let root = TempDir::new().unwrap();
        let mut config = config(&root, false);
        config.cache.enabled = false;
        let app = App::new(config).unwrap();
        assert!(app.cache().is_none());
    }

    #[tokio::test]
    async fn test_dev_mode_wires_rebuilder() {
        let root = TempDir::new().unwrap();
        let app = App::new(config(&root, true)).unwrap();
        assert!(app.rebuilder().is_some());
        let background = app.start_background().await.unwrap();
        drop(background);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let root = TempDir::new().unwrap();
        let mut config = config(&root, false);
        config.pool.size = 0;
        assert!(App::new(config).is_err());
    }
}
