// Copyright 2025 MaDRPC Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::registry::{MetricsConfig, MetricsRegistry};
use crate::snapshot::{MetricsSnapshot, ServerInfo, ServerMode};
use serde_json::Value;
use ssrkit_common::{Result, SsrError};
use std::sync::Arc;
use std::time::Instant;

pub const METRICS_PATH: &str = "/_metrics";
pub const INFO_PATH: &str = "/_info";

/// Metrics collection for the rendering server.
///
/// The HTTP layer asks [`MetricsCollector::is_metrics_path`] before routing a
/// request; matching paths are answered from the collector and never reach
/// the renderer.
///
/// # Built-in Endpoints
///
/// - `/_metrics`: complete [`MetricsSnapshot`] as JSON
/// - `/_info`: [`ServerInfo`] with mode, version and uptime
pub trait MetricsCollector: Send + Sync {
    /// Returns `true` for `/_metrics` and `/_info`.
    fn is_metrics_path(&self, path: &str) -> bool;

    /// Produces the JSON body for a built-in endpoint.
    ///
    /// # Errors
    /// `SsrError::InvalidRequest` when `path` is not a metrics endpoint.
    fn handle_metrics_request(&self, path: &str) -> Result<Value>;

    /// Records one render of `fragment` that started at `start_time`.
    fn record_render(&self, fragment: &str, start_time: Instant, success: bool);

    fn snapshot(&self) -> MetricsSnapshot;
}

/// Collector used by the renderer, engine pool, render cache and live
/// reload broadcaster.
///
/// # Example
///
/// ```rust
/// use ssrkit_metrics::{MetricsCollector, RenderMetricsCollector};
/// use std::time::Instant;
///
/// let collector = RenderMetricsCollector::new(true);
/// collector.record_render("Cart.js", Instant::now(), false);
/// collector.record_engine_recycled();
///
/// let snapshot = collector.snapshot();
/// assert_eq!(snapshot.failed_renders, 1);
/// assert_eq!(snapshot.pool.engines_recycled, 1);
/// ```
pub struct RenderMetricsCollector {
    registry: Arc<MetricsRegistry>,
    mode: ServerMode,
}

impl RenderMetricsCollector {
    /// `dev` selects the mode reported by `/_info`.
    pub fn new(dev: bool) -> Self {
        Self::with_config(dev, MetricsConfig::default())
    }

    pub fn with_config(dev: bool, config: MetricsConfig) -> Self {
        Self {
            registry: Arc::new(MetricsRegistry::with_config(config)),
            mode: if dev { ServerMode::Development } else { ServerMode::Production },
        }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn record_cache_hit(&self) {
        self.registry.increment_cache_hit();
    }

    pub fn record_cache_miss(&self) {
        self.registry.increment_cache_miss();
    }

    pub fn record_cache_save(&self) {
        self.registry.increment_cache_save();
    }

    pub fn record_cache_evicted(&self, count: usize) {
        self.registry.add_cache_evicted(count as u64);
    }

    pub fn record_engine_recycled(&self) {
        self.registry.increment_engines_recycled();
    }

    pub fn record_pool_rebuild(&self) {
        self.registry.increment_pool_rebuilds();
    }

    pub fn record_hmr_event(&self) {
        self.registry.increment_hmr_events();
    }

    pub fn connection_opened(&self) {
        self.registry.increment_active_connections();
    }

    pub fn connection_closed(&self) {
        self.registry.decrement_active_connections();
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo::new(self.mode, self.registry.uptime_ms())
    }
}

impl Default for RenderMetricsCollector {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MetricsCollector for RenderMetricsCollector {
    fn is_metrics_path(&self, path: &str) -> bool {
        path == METRICS_PATH || path == INFO_PATH
    }

    fn handle_metrics_request(&self, path: &str) -> Result<Value> {
        match path {
            METRICS_PATH => Ok(serde_json::to_value(self.snapshot())?),
            INFO_PATH => Ok(serde_json::to_value(self.info())?),
            other => Err(SsrError::InvalidRequest(format!("not a metrics endpoint: {}", other))),
        }
    }

    fn record_render(&self, fragment: &str, start_time: Instant, success: bool) {
        let latency_us = start_time.elapsed().as_micros() as u64;
        self.registry.record_render(fragment, latency_us, success);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }
}
