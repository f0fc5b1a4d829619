//! On-disk cache of rendered markup with capacity-based eviction.
//!
//! One file per entry (`<key>.html`) under the cache directory. Size and
//! last-access bookkeeping lives in memory behind an `RwLock`; last access
//! is an atomic per entry so lookups only need the read lock. Publishing a
//! file, deleting one and the matching bookkeeping change happen under the
//! write lock, so the index never lists a key whose file is gone. When a
//! save pushes the cache over its size threshold or file limit, an eviction
//! pass runs on a background thread and drops the least recently used
//! entries.

use serde::Serialize;
use ssrkit_common::{CacheConfig, Result, SsrError};
use ssrkit_metrics::{monotonic_timestamp, RenderMetricsCollector};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::render::cache_key::cache_key;

const ENTRY_EXTENSION: &str = "html";

struct Entry {
    size: u64,
    last_access: AtomicU64,
}

#[derive(Default)]
struct Accounting {
    entries: HashMap<String, Entry>,
    total_size: u64,
}

/// Current occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub max_size: u64,
    pub max_files: usize,
}

pub struct RenderCache {
    config: CacheConfig,
    state: RwLock<Accounting>,
    evicting: AtomicBool,
    metrics: Option<Arc<RenderMetricsCollector>>,
}

impl RenderCache {
    /// Opens (creating if needed) the cache directory and reconciles the
    /// bookkeeping with the files already there.
    pub fn open(config: CacheConfig) -> Result<Arc<Self>> {
        Self::build(config, None)
    }

    pub fn with_metrics(
        config: CacheConfig,
        metrics: Arc<RenderMetricsCollector>,
    ) -> Result<Arc<Self>> {
        Self::build(config, Some(metrics))
    }

    fn build(
        config: CacheConfig,
        metrics: Option<Arc<RenderMetricsCollector>>,
    ) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.dir).map_err(|e| {
            SsrError::Cache(format!("failed to create {}: {}", config.dir.display(), e))
        })?;

        let accounting = scan_dir(&config)?;
        tracing::info!(
            "Render cache at {}: {} entries, {} bytes",
            config.dir.display(),
            accounting.entries.len(),
            accounting.total_size
        );

        Ok(Arc::new(Self {
            config,
            state: RwLock::new(accounting),
            evicting: AtomicBool::new(false),
            metrics,
        }))
    }

    /// Deterministic key for `fragment` rendered with `payload`.
    pub fn key<T: Serialize + ?Sized>(fragment: &str, payload: &T) -> Result<String> {
        cache_key(fragment, payload)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Accounting> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Accounting> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        is_valid_key(key).then(|| self.config.dir.join(format!("{}.{}", key, ENTRY_EXTENSION)))
    }

    /// Returns the cached markup, or `None` on a miss.
    ///
    /// Read failures other than a missing file are logged and treated as a
    /// miss.
    pub fn load(&self, key: &str) -> Option<String> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(markup) => {
                if let Some(entry) = self.read_state().entries.get(key) {
                    entry.last_access.store(monotonic_timestamp(), Ordering::Relaxed);
                }
                touch(&path);
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit();
                }
                Some(markup)
            }
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    self.forget(key);
                } else {
                    tracing::warn!("Failed to read cache entry {}: {}", path.display(), e);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_miss();
                }
                None
            }
        }
    }

    /// Stores `markup` under `key`, then starts a background eviction if the
    /// cache crossed its limits.
    pub fn save(self: &Arc<Self>, key: &str, markup: &str) -> Result<()> {
        let path = self
            .path_for(key)
            .ok_or_else(|| SsrError::Cache(format!("invalid cache key '{}'", key)))?;

        static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);
        let tmp = path.with_extension(format!("{}.tmp", TMP_COUNTER.fetch_add(1, Ordering::Relaxed)));
        let write_failed = |e: std::io::Error| {
            let _ = fs::remove_file(&tmp);
            SsrError::Cache(format!("failed to write {}: {}", path.display(), e))
        };
        fs::write(&tmp, markup).map_err(write_failed)?;

        let size = markup.len() as u64;
        let over_limit = {
            let mut state = self.write_state();
            fs::rename(&tmp, &path).map_err(write_failed)?;
            let entry = Entry {
                size,
                last_access: AtomicU64::new(monotonic_timestamp()),
            };
            if let Some(old) = state.entries.insert(key.to_string(), entry) {
                state.total_size -= old.size;
            }
            state.total_size += size;
            self.needs_eviction(&state)
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_cache_save();
        }
        if over_limit {
            self.spawn_eviction();
        }
        Ok(())
    }

    fn needs_eviction(&self, state: &Accounting) -> bool {
        let size_limit = self.config.max_size_bytes as f64 * self.config.clean_threshold;
        state.total_size as f64 >= size_limit || state.entries.len() >= self.config.max_files
    }

    fn spawn_eviction(self: &Arc<Self>) {
        if self.evicting.swap(true, Ordering::AcqRel) {
            return;
        }
        let cache = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("ssrkit-cache-evict".to_string())
            .spawn(move || {
                cache.evict();
                cache.evicting.store(false, Ordering::Release);
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to start cache eviction: {}", e);
            self.evicting.store(false, Ordering::Release);
        }
    }

    /// Runs one eviction pass and returns the number of entries removed.
    ///
    /// Removes the least recently accessed `max(1, count * clean_ratio)`
    /// entries, plus whatever exceeds `max_files`. Does nothing when the
    /// cache is back within its limits. Holds the write lock for the whole
    /// pass.
    pub fn evict(&self) -> usize {
        let mut state = self.write_state();
        if !self.needs_eviction(&state) {
            return 0;
        }

        let count = state.entries.len();
        let mut by_age: Vec<(String, u64)> = state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_access.load(Ordering::Relaxed)))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut remove = (count as f64 * self.config.clean_ratio).floor() as usize;
        if count >= self.config.max_files {
            remove += count - self.config.max_files;
        }
        let remove = remove.max(1).min(count);

        let removed = by_age
            .iter()
            .take(remove)
            .filter(|(key, _)| self.remove_locked(&mut state, key))
            .count();
        drop(state);

        if removed > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_evicted(removed);
            }
        }
        tracing::debug!("Cache eviction removed {} entries", removed);
        removed
    }

    /// Deletes the file and its accounting; a failed delete leaves both.
    fn remove_locked(&self, state: &mut Accounting, key: &str) -> bool {
        let Some(path) = self.path_for(key) else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("Failed to delete cache entry {}: {}", path.display(), e);
                return false;
            }
        }
        if let Some(old) = state.entries.remove(key) {
            state.total_size -= old.size;
        }
        true
    }

    fn forget(&self, key: &str) {
        let mut state = self.write_state();
        if let Some(old) = state.entries.remove(key) {
            state.total_size -= old.size;
        }
    }

    /// Removes every entry; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut state = self.write_state();
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        let removed = keys.iter().filter(|key| self.remove_locked(&mut state, key)).count();
        drop(state);
        tracing::info!("Render cache cleared, {} entries removed", removed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.read_state();
        CacheStats {
            entries: state.entries.len(),
            total_size: state.total_size,
            max_size: self.config.max_size_bytes,
            max_files: self.config.max_files,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read_state().entries.contains_key(key)
    }
}

fn scan_dir(config: &CacheConfig) -> Result<Accounting> {
    let mut accounting = Accounting::default();
    for dir_entry in fs::read_dir(&config.dir)? {
        let dir_entry = dir_entry?;
        let path = dir_entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|s| s.to_str()).filter(|k| is_valid_key(k)) else {
            continue;
        };
        let metadata = match dir_entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let last_access = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        accounting.total_size += metadata.len();
        accounting.entries.insert(
            key.to_string(),
            Entry {
                size: metadata.len(),
                last_access: AtomicU64::new(last_access),
            },
        );
    }
    Ok(accounting)
}

/// Keys are the hex digests produced by [`cache_key`].
fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_hexdigit())
}

/// Best-effort mtime bump so a restart keeps recency.
fn touch(path: &std::path::Path) {
    if let Ok(file) = fs::File::options().write(true).open(path) {
        let _ = file.set_modified(SystemTime::now());
    }
}
