//! Resident-memory watchdog for the engine pool.

use ssrkit_common::{PoolSettings, Result, SsrError};
use std::time::Duration;

use crate::runtime::engine::EngineFactory;
use crate::runtime::engine_pool::EnginePool;

/// Source of the process's resident memory.
pub trait MemoryProbe: Send + Sync + 'static {
    /// Resident bytes, or `None` when the platform does not expose it.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads `VmRSS` from `/proc/self/status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStatusProbe;

impl MemoryProbe for ProcStatusProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib * 1024)
}

/// Configuration for the memory monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub threshold_bytes: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            threshold_bytes: 500 * 1024 * 1024,
        }
    }
}

impl From<&PoolSettings> for MonitorConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            interval: settings.monitor_interval(),
            threshold_bytes: settings.memory_threshold_bytes,
        }
    }
}

/// Periodically samples memory and rebuilds the pool above the threshold.
pub struct MemoryMonitor<F: EngineFactory, P: MemoryProbe = ProcStatusProbe> {
    pool: EnginePool<F>,
    probe: P,
    config: MonitorConfig,
}

impl<F: EngineFactory> MemoryMonitor<F, ProcStatusProbe> {
    pub fn new(pool: EnginePool<F>, config: MonitorConfig) -> Self {
        Self::with_probe(pool, ProcStatusProbe, config)
    }
}

impl<F: EngineFactory, P: MemoryProbe> MemoryMonitor<F, P> {
    pub fn with_probe(pool: EnginePool<F>, probe: P, config: MonitorConfig) -> Self {
        Self { pool, probe, config }
    }

    /// Spawns the monitor on the current tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let start = tokio::time::Instant::now() + self.config.interval;
        let mut interval = tokio::time::interval_at(start, self.config.interval);

        loop {
            interval.tick().await;
            if let Err(e) = self.check_once().await {
                tracing::error!("Memory check failed: {}", e);
            }
        }
    }

    /// Samples once; returns whether the pool was rebuilt.
    pub async fn check_once(&self) -> Result<bool> {
        let Some(resident) = self.probe.resident_bytes() else {
            tracing::debug!("Resident memory unavailable on this platform");
            return Ok(false);
        };

        if resident <= self.config.threshold_bytes {
            tracing::trace!("Resident memory {} bytes within threshold", resident);
            return Ok(false);
        }

        tracing::warn!(
            "Resident memory {} MiB above {} MiB, rebuilding engine pool",
            resident / (1024 * 1024),
            self.config.threshold_bytes / (1024 * 1024)
        );
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.rebuild())
            .await
            .map_err(|e| SsrError::EngineCreation(format!("rebuild task failed: {}", e)))??;

        if let Some(after) = self.probe.resident_bytes() {
            tracing::info!("Resident memory after rebuild: {} MiB", after / (1024 * 1024));
        }
        Ok(true)
    }
}
