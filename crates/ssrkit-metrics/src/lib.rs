//! ssrkit metrics
//!
//! Counters and latency histograms for the rendering subsystem: per-fragment
//! render outcomes, render cache hits and misses, engine recycling and pool
//! rebuilds, and live-reload events.
//!
//! # Architecture
//!
//! - [`MetricsRegistry`]: thread-safe storage, atomics on the hot path
//! - [`MetricsCollector`]: trait the HTTP layer uses to serve `/_metrics`
//!   and `/_info`
//! - [`MetricsSnapshot`]: serializable point-in-time view
//!
//! # Usage Example
//!
//! ```rust
//! use ssrkit_metrics::{MetricsCollector, RenderMetricsCollector};
//! use std::time::Instant;
//!
//! let collector = RenderMetricsCollector::new(false);
//! let start = Instant::now();
//! // ... render Home.js ...
//! collector.record_render("Home.js", start, true);
//! collector.record_cache_miss();
//!
//! let snapshot = collector.snapshot();
//! assert_eq!(snapshot.total_renders, 1);
//! ```

mod collector;
mod registry;
mod snapshot;

pub use collector::{MetricsCollector, RenderMetricsCollector, INFO_PATH, METRICS_PATH};
pub use registry::{monotonic_timestamp, MetricsConfig, MetricsRegistry};
pub use snapshot::{
    CacheMetrics, FragmentMetrics, MetricsSnapshot, PoolMetrics, ServerInfo, ServerMode,
};
