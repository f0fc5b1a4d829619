//! Configuration for an ssrkit deployment.
//!
//! Every field has a default so a config file only needs to name what it
//! changes. Loading order is: defaults, then the JSON file, then
//! `SSRKIT_*` environment variables; the CLI applies its flags last.
//!
//! # Example
//!
//! ```json
//! {
//!   "server_build_dir": "dist/server",
//!   "routes": [{ "path": "/", "fragment": "Home.js", "title": "Home" }],
//!   "cache": { "max_files": 500 }
//! }
//! ```

use crate::error::{Result, SsrError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SsrConfig {
    /// Address the HTTP server binds to
    pub bind: String,
    /// Directory holding server-side fragment bundles
    pub server_build_dir: PathBuf,
    /// Directory served under `/assets/`
    pub client_build_dir: PathBuf,
    /// Development mode: live reload, raw diagnostics on error pages
    pub dev: bool,
    /// Language used when the request does not name one
    pub default_lang: String,
    /// Upper bound on a single render, in milliseconds
    pub render_timeout_ms: u64,
    /// Loop iterations a script may run before it is aborted
    pub loop_iteration_limit: u64,
    /// Asset version stamped into composed pages
    pub version: String,
    /// Optional page template overriding the built-in one
    pub page_template: Option<PathBuf>,
    /// Optional error page template overriding the built-in one
    pub error_template: Option<PathBuf>,
    /// Site configuration exposed to fragments as `WEBSITE`
    pub site: Value,
    /// Translation tables keyed by language, exposed as `TRANSLATIONS`
    pub translations: Value,
    pub routes: Vec<RouteConfig>,
    pub pool: PoolSettings,
    pub cache: CacheConfig,
    pub hmr: HmrConfig,
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            server_build_dir: PathBuf::from("dist/server"),
            client_build_dir: PathBuf::from("dist/client"),
            dev: false,
            default_lang: "en".to_string(),
            render_timeout_ms: 10_000,
            loop_iteration_limit: 10_000_000,
            version: env!("CARGO_PKG_VERSION").to_string(),
            page_template: None,
            error_template: None,
            site: Value::Object(Default::default()),
            translations: Value::Object(Default::default()),
            routes: Vec::new(),
            pool: PoolSettings::default(),
            cache: CacheConfig::default(),
            hmr: HmrConfig::default(),
        }
    }
}

/// A page route: request path to fragment plus static props.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfig {
    pub path: String,
    pub fragment: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub props: Value,
}

/// Engine pool sizing and recycling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub size: usize,
    /// Renders an engine serves before it is replaced
    pub max_uses: u32,
    /// Resident memory above which the pool is rebuilt
    pub memory_threshold_bytes: u64,
    pub monitor_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 5,
            max_uses: 50,
            memory_threshold_bytes: 500 * 1024 * 1024,
            monitor_interval_secs: 300,
        }
    }
}

impl PoolSettings {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

/// On-disk render cache limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub max_size_bytes: u64,
    pub max_files: usize,
    /// Fraction of `max_size_bytes` at which eviction starts
    pub clean_threshold: f64,
    /// Fraction of entries removed per eviction pass
    pub clean_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: std::env::temp_dir().join("ssrkit-render-cache"),
            max_size_bytes: 100 * 1024 * 1024,
            max_files: 1000,
            clean_threshold: 0.9,
            clean_ratio: 0.2,
        }
    }
}

/// Live reload and the development watcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HmrConfig {
    pub throttle_ms: u64,
    pub heartbeat_secs: u64,
    pub inbox_capacity: usize,
    /// Source trees that trigger a rebuild when they change
    pub source_dirs: Vec<PathBuf>,
    /// Locale trees that only trigger a reload event
    pub locale_dirs: Vec<PathBuf>,
    /// Individual files compared by content (dependency manifests)
    pub manifest_files: Vec<PathBuf>,
    /// Bundler invocation, program first
    pub build_command: Vec<String>,
    pub dir_debounce_ms: u64,
    pub file_debounce_ms: u64,
    /// Where change digests are persisted; system temp dir when unset
    pub state_dir: Option<PathBuf>,
}

impl Default for HmrConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 300,
            heartbeat_secs: 30,
            inbox_capacity: 5,
            source_dirs: vec![PathBuf::from("frontend")],
            locale_dirs: Vec::new(),
            manifest_files: vec![PathBuf::from("package.json")],
            build_command: Vec::new(),
            dir_debounce_ms: 500,
            file_debounce_ms: 1000,
            state_dir: None,
        }
    }
}

impl HmrConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl SsrConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SsrError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: SsrConfig = serde_json::from_str(&raw)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Applies `SSRKIT_BUILD_DIR`, `SSRKIT_CACHE_DIR`, `SSRKIT_BIND` and
    /// `SSRKIT_DEV` when they are set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("SSRKIT_BUILD_DIR") {
            self.server_build_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SSRKIT_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(bind) = lookup("SSRKIT_BIND") {
            self.bind = bind;
        }
        if let Some(dev) = lookup("SSRKIT_DEV") {
            self.dev = matches!(dev.as_str(), "1" | "true" | "yes");
        }
        self
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Translation table for `lang`, or an empty object.
    pub fn translations_for(&self, lang: &str) -> Value {
        self.translations
            .get(lang)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    pub fn route(&self, path: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|r| r.path == path)
    }

    /// Checks the values that would otherwise fail late at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            return Err(SsrError::Config("pool.size must be at least 1".into()));
        }
        if self.pool.max_uses == 0 {
            return Err(SsrError::Config("pool.max_uses must be at least 1".into()));
        }
        if self.render_timeout_ms == 0 {
            return Err(SsrError::Config("render_timeout_ms must be greater than zero".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.clean_threshold) || self.cache.clean_threshold == 0.0 {
            return Err(SsrError::Config(format!(
                "cache.clean_threshold must be in (0, 1], got {}",
                self.cache.clean_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.cache.clean_ratio) {
            return Err(SsrError::Config(format!(
                "cache.clean_ratio must be in [0, 1], got {}",
                self.cache.clean_ratio
            )));
        }
        if self.cache.max_files == 0 {
            return Err(SsrError::Config("cache.max_files must be at least 1".into()));
        }
        if self.hmr.inbox_capacity == 0 {
            return Err(SsrError::Config("hmr.inbox_capacity must be at least 1".into()));
        }
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(SsrError::Config(format!(
                    "route path '{}' must start with '/'",
                    route.path
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SsrConfig::default();
        assert_eq!(config.pool.size, 5);
        assert_eq!(config.pool.max_uses, 50);
        assert_eq!(config.pool.memory_threshold_bytes, 500 * 1024 * 1024);
        assert_eq!(config.cache.max_size_bytes, 100 * 1024 * 1024);
        assert_eq!(config.cache.max_files, 1000);
        assert_eq!(config.hmr.throttle(), Duration::from_millis(300));
        assert_eq!(config.hmr.heartbeat(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{"server_build_dir": "build/ssr", "pool": {"size": 2}, "routes": [{"path": "/", "fragment": "Home.js"}]}"#,
        )
        .unwrap();

        let config = SsrConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server_build_dir, PathBuf::from("build/ssr"));
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.pool.max_uses, 50);
        assert_eq!(config.route("/").unwrap().fragment, "Home.js");
        assert!(config.route("/missing").is_none());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = SsrConfig::from_file("/nonexistent/ssrkit.json").unwrap_err();
        assert!(matches!(err, SsrError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("SSRKIT_BUILD_DIR", "/srv/ssr"),
            ("SSRKIT_BIND", "0.0.0.0:8080"),
            ("SSRKIT_DEV", "true"),
        ]
        .into_iter()
        .collect();

        let config = SsrConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.server_build_dir, PathBuf::from("/srv/ssr"));
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert!(config.dev);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SsrConfig::default();
        config.pool.size = 0;
        assert!(config.validate().is_err());

        let mut config = SsrConfig::default();
        config.cache.clean_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = SsrConfig::default();
        config.routes.push(RouteConfig {
            path: "about".to_string(),
            fragment: "About.js".to_string(),
            title: None,
            props: Value::Null,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_translations_for() {
        let config = SsrConfig {
            translations: json!({"en": {"hello": "Hello"}, "de": {"hello": "Hallo"}}),
            ..Default::default()
        };
        assert_eq!(config.translations_for("de"), json!({"hello": "Hallo"}));
        assert_eq!(config.translations_for("fr"), json!({}));
    }
}
