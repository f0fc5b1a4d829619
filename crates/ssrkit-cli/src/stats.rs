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

use anyhow::{Context, Result};
use ssrkit_metrics::{MetricsSnapshot, ServerInfo, ServerMode, INFO_PATH, METRICS_PATH};
use std::fmt::Write;

/// Format duration in milliseconds to human-readable string
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{}s", ms / 1000)
    } else if ms < 3_600_000 {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    } else {
        format!("{}h {}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}

/// Format latency in microseconds to human-readable string
pub fn format_latency_us(us: u64) -> String {
    if us == 0 {
        "-".to_string()
    } else if us < 1000 {
        format!("{}μs", us)
    } else if us < 1_000_000 {
        format!("{}ms", us / 1000)
    } else {
        format!("{:.1}s", us as f64 / 1_000_000.0)
    }
}

async fn fetch<T: serde::de::DeserializeOwned>(client: &reqwest::Client, url: String) -> Result<T> {
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?
        .error_for_status()
        .with_context(|| format!("{} returned an error status", url))?;
    response
        .json::<T>()
        .await
        .with_context(|| format!("Invalid JSON from {}", url))
}

/// Fetches `/_info` and `/_metrics` from a running server.
pub async fn fetch_stats(server_address: &str) -> Result<(ServerInfo, MetricsSnapshot)> {
    let base = server_address.trim_end_matches('/');
    let client = reqwest::Client::new();
    let info = fetch(&client, format!("{}{}", base, INFO_PATH)).await?;
    let snapshot = fetch(&client, format!("{}{}", base, METRICS_PATH)).await?;
    Ok((info, snapshot))
}

/// Plain-text report, fragments sorted by render count.
pub fn render_report(info: &ServerInfo, snapshot: &MetricsSnapshot) -> String {
    let mode = match info.mode {
        ServerMode::Production => "production",
        ServerMode::Development => "development",
    };

    let mut out = String::new();
    let _ = writeln!(out, "ssrkit {} ({}), up {}", info.version, mode, format_duration_ms(snapshot.uptime_ms));
    let _ = writeln!(
        out,
        "renders: {} total, {} ok, {} failed | connections: {}",
        snapshot.total_renders, snapshot.successful_renders, snapshot.failed_renders, snapshot.active_connections
    );
    let _ = writeln!(
        out,
        "cache: {} hits, {} misses ({:.1}% hit), {} saved, {} evicted",
        snapshot.cache.hits,
        snapshot.cache.misses,
        snapshot.cache.hit_ratio() * 100.0,
        snapshot.cache.saves,
        snapshot.cache.evicted
    );
    let _ = writeln!(
        out,
        "pool: {} engines recycled, {} rebuilds | hmr events: {}",
        snapshot.pool.engines_recycled, snapshot.pool.rebuilds, snapshot.hmr_events
    );

    if snapshot.fragments.is_empty() {
        return out;
    }

    let mut fragments: Vec<_> = snapshot.fragments.iter().collect();
    fragments.sort_by(|a, b| b.1.render_count.cmp(&a.1.render_count).then_with(|| a.0.cmp(b.0)));

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<32} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "FRAGMENT", "RENDERS", "FAILED", "P50", "P95", "P99"
    );
    for (name, metrics) in fragments {
        let _ = writeln!(
            out,
            "{:<32} {:>8} {:>8} {:>8} {:>8} {:>8}",
            name,
            metrics.render_count,
            metrics.failure_count,
            format_latency_us(metrics.p50_latency_us),
            format_latency_us(metrics.p95_latency_us),
            format_latency_us(metrics.p99_latency_us)
        );
    }
    out
}

pub async fn run_stats(server_address: &str) -> Result<()> {
    let (info, snapshot) = fetch_stats(server_address).await?;
    print!("{}", render_report(&info, &snapshot));
    Ok(())
}
