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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mode the server was started in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Production,
    Development,
}

/// Server information returned by `/_info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub mode: ServerMode,
    pub version: String,
    pub uptime_ms: u64,
}

impl ServerInfo {
    pub fn new(mode: ServerMode, uptime_ms: u64) -> Self {
        Self {
            mode,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms,
        }
    }
}

/// Render statistics for one fragment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FragmentMetrics {
    pub render_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
}

/// Render cache counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub evicted: u64,
}

impl CacheMetrics {
    /// Fraction of lookups served from cache, 0.0 when nothing was looked up
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Engine pool lifecycle counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PoolMetrics {
    /// Engines replaced after reaching their use ceiling
    pub engines_recycled: u64,
    /// Whole-pool rebuilds triggered by memory pressure
    pub rebuilds: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_renders: u64,
    pub successful_renders: u64,
    pub failed_renders: u64,
    pub active_connections: u64,
    pub uptime_ms: u64,
    pub fragments: HashMap<String, FragmentMetrics>,
    pub cache: CacheMetrics,
    pub pool: PoolMetrics,
    pub hmr_events: u64,
}

impl MetricsSnapshot {
    pub fn new(uptime_ms: u64) -> Self {
        Self {
            total_renders: 0,
            successful_renders: 0,
            failed_renders: 0,
            active_connections: 0,
            uptime_ms,
            fragments: HashMap::new(),
            cache: CacheMetrics::default(),
            pool: PoolMetrics::default(),
            hmr_events: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_serializes_mode_lowercase() {
        let info = ServerInfo::new(ServerMode::Development, 42);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["mode"], "development");
        assert_eq!(json["uptime_ms"], 42);
        assert!(!info.version.is_empty());
    }

    #[test]
    fn test_hit_ratio() {
        let empty = CacheMetrics::default();
        assert_eq!(empty.hit_ratio(), 0.0);

        let cache = CacheMetrics { hits: 3, misses: 1, ..Default::default() };
        assert!((cache.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
