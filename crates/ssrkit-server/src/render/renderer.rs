use serde_json::{json, Value};
use ssrkit_common::{RequestContext, Result, SsrError};
use ssrkit_metrics::{MetricsCollector, RenderMetricsCollector};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::render::cache::RenderCache;
use crate::resource_limits::ResourceLimits;
use crate::runtime::{EngineFactory, EnginePool, ScriptEngine};

/// Adds the navigation methods a `location` object is expected to have.
/// They do nothing during server rendering.
const LOCATION_METHODS: &str = "window.location.assign = function() {};\n\
     window.location.replace = function() {};\n\
     window.location.reload = function() {};";

/// Entry point every fragment bundle defines.
const RENDER_ENTRY: &str = "Render()";

/// One render of one fragment, ready to run on an engine.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub fragment: String,
    pub script: String,
    pub payload: Value,
    pub context: RequestContext,
}

impl RenderJob {
    /// Runs the fragment script, injects the request globals and calls
    /// `Render()`.
    ///
    /// Globals go in as separate engine calls in a fixed order: `location`,
    /// `INITIAL_PROPS`, `TRANSLATIONS`, `WEBSITE`, `LANG`, `USER_INFO` (only
    /// for authenticated requests), `ssr`. A failure to set `USER_INFO` is
    /// logged and ignored; any other failure aborts the render.
    pub fn run<E: ScriptEngine + ?Sized>(&self, engine: &mut E) -> Result<String> {
        engine
            .run_script(&self.script, &self.fragment)
            .map_err(|e| SsrError::ScriptExecution {
                fragment: self.fragment.clone(),
                message: e.message,
            })?;

        let location = serde_json::to_value(&self.context.location)?;
        self.inject(engine, "location", &location)?;
        engine
            .run_script(LOCATION_METHODS, "location.js")
            .map_err(|e| self.injection_error("location", e.message))?;

        self.inject(engine, "INITIAL_PROPS", &self.payload)?;
        self.inject(engine, "TRANSLATIONS", &self.context.translations)?;
        self.inject(engine, "WEBSITE", &self.context.site)?;
        self.inject(engine, "LANG", &Value::String(self.context.lang.clone()))?;

        if let Some(user) = &self.context.user {
            if let Err(e) = engine.set_global("USER_INFO", user) {
                tracing::warn!("Failed to inject USER_INFO for {}: {}", self.fragment, e);
            }
        }

        self.inject(engine, "ssr", &Value::Bool(true))?;

        engine
            .run_script(RENDER_ENTRY, &self.fragment)
            .map_err(|e| SsrError::RenderInvocation {
                fragment: self.fragment.clone(),
                message: e.message,
            })
    }

    fn inject<E: ScriptEngine + ?Sized>(&self, engine: &mut E, global: &str, value: &Value) -> Result<()> {
        engine
            .set_global(global, value)
            .map_err(|e| self.injection_error(global, e.message))
    }

    fn injection_error(&self, global: &str, message: String) -> SsrError {
        SsrError::ContextInjection {
            fragment: self.fragment.clone(),
            global: global.to_string(),
            message,
        }
    }
}

/// Renders fragments on pooled engines, consulting the render cache first.
pub struct Renderer<F: EngineFactory> {
    build_dir: PathBuf,
    pool: EnginePool<F>,
    cache: Option<Arc<RenderCache>>,
    metrics: Arc<RenderMetricsCollector>,
    limits: ResourceLimits,
}

impl<F: EngineFactory> Renderer<F> {
    pub fn new(build_dir: impl Into<PathBuf>, pool: EnginePool<F>, limits: ResourceLimits) -> Self {
        Self {
            build_dir: build_dir.into(),
            pool,
            cache: None,
            metrics: Arc::new(RenderMetricsCollector::default()),
            limits,
        }
    }

    pub fn with_cache(mut self, cache: Arc<RenderCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RenderMetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn pool(&self) -> &EnginePool<F> {
        &self.pool
    }

    pub fn cache(&self) -> Option<&Arc<RenderCache>> {
        self.cache.as_ref()
    }

    pub fn metrics(&self) -> &Arc<RenderMetricsCollector> {
        &self.metrics
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Renders `fragment` with `payload` for the request described by `ctx`.
    ///
    /// Anonymous renders are served from and stored into the render cache
    /// when one is attached; cache failures never fail the render.
    pub async fn render(&self, fragment: &str, payload: &Value, ctx: &RequestContext) -> Result<String> {
        let start = Instant::now();
        let cache_key = self.cache_key_for(fragment, payload, ctx);

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(markup) = cache.load(key) {
                tracing::debug!("Cache hit for {}", fragment);
                self.metrics.record_render(fragment, start, true);
                return Ok(markup);
            }
        }

        let result = self.render_uncached(fragment, payload, ctx).await;
        self.metrics.record_render(fragment, start, result.is_ok());

        match &result {
            Ok(markup) => {
                tracing::debug!("Rendered {} in {:?}", fragment, start.elapsed());
                if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
                    if let Err(e) = cache.save(key, markup) {
                        tracing::warn!("Failed to cache {}: {}", fragment, e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Render of {} failed: {}", fragment, e);
                if let Ok(pretty) = serde_json::to_string_pretty(payload) {
                    tracing::debug!("Payload for failed render of {}:\n{}", fragment, pretty);
                }
            }
        }
        result
    }

    /// Cache key over the payload plus the request values that change the
    /// markup. Authenticated requests are never cached.
    fn cache_key_for(&self, fragment: &str, payload: &Value, ctx: &RequestContext) -> Option<String> {
        self.cache.as_ref()?;
        if ctx.is_authenticated() {
            return None;
        }
        let keyed = json!({
            "payload": payload,
            "lang": ctx.lang,
            "path": ctx.location.pathname,
            "query": ctx.location.query(),
        });
        match RenderCache::key(fragment, &keyed) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!("Cannot derive cache key for {}: {}", fragment, e);
                None
            }
        }
    }

    async fn render_uncached(&self, fragment: &str, payload: &Value, ctx: &RequestContext) -> Result<String> {
        let script = self.load_fragment(fragment).await?;
        let mut engine = self.pool.acquire().await?;
        tracing::trace!("Engine {} (use {}) rendering {}", engine.id(), engine.uses(), fragment);

        let job = RenderJob {
            fragment: fragment.to_string(),
            script,
            payload: payload.clone(),
            context: ctx.clone(),
        };
        // The guard moves into the task and is released when the task
        // ends, whether or not the caller is still waiting for it.
        let task = tokio::task::spawn_blocking(move || job.run(&mut *engine));

        match tokio::time::timeout(self.limits.render_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SsrError::RenderInvocation {
                fragment: fragment.to_string(),
                message: format!("render task failed: {}", e),
            }),
            Err(_) => Err(SsrError::RenderTimeout {
                fragment: fragment.to_string(),
                timeout_ms: self.limits.render_timeout.as_millis() as u64,
            }),
        }
    }

    async fn load_fragment(&self, fragment: &str) -> Result<String> {
        let path = fragment_path(&self.build_dir, fragment)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(script) => Ok(script),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SsrError::FragmentNotFound {
                fragment: fragment.to_string(),
                path: path.display().to_string(),
            }),
            Err(e) => Err(SsrError::Io(e)),
        }
    }
}

/// Resolves a fragment name inside the build directory. Names may contain
/// subdirectories but never leave the directory.
pub fn fragment_path(build_dir: &Path, fragment: &str) -> Result<PathBuf> {
    let relative = Path::new(fragment);
    let well_formed = !fragment.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !well_formed {
        return Err(SsrError::InvalidFragmentName(fragment.to_string()));
    }
    Ok(build_dir.join(relative))
}
