use ssrkit_common::{PoolSettings, Result, SsrError};
use ssrkit_metrics::RenderMetricsCollector;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::runtime::engine::{EngineFactory, ScriptEngine};

/// Configuration for the engine pool
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    pub size: usize,
    /// Renders an engine serves before it is replaced with a fresh one
    pub max_uses: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { size: 5, max_uses: 50 }
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            size: settings.size,
            max_uses: settings.max_uses,
        }
    }
}

/// Point-in-time pool counters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub generation: u64,
    pub recycled: u64,
    pub rebuilds: u64,
}

struct Slot<E> {
    id: u64,
    uses: u32,
    generation: u64,
    engine: E,
}

struct PoolInner<F: EngineFactory> {
    factory: F,
    config: PoolConfig,
    idle: Mutex<VecDeque<Slot<F::Engine>>>,
    semaphore: Arc<Semaphore>,
    generation: AtomicU64,
    next_id: AtomicU64,
    recycled: AtomicU64,
    rebuilds: AtomicU64,
    metrics: Option<Arc<RenderMetricsCollector>>,
}

impl<F: EngineFactory> PoolInner<F> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Slot<F::Engine>>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh_slot(&self, generation: u64) -> Result<Slot<F::Engine>> {
        let engine = self
            .factory
            .create()
            .map_err(|e| SsrError::EngineCreation(e.message))?;
        Ok(Slot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            uses: 0,
            generation,
            engine,
        })
    }

    fn release(&self, mut slot: Slot<F::Engine>) {
        if slot.generation != self.generation.load(Ordering::Acquire) {
            tracing::debug!(
                "Discarding engine {} from generation {} after rebuild",
                slot.id,
                slot.generation
            );
            return;
        }

        if let Err(e) = slot.engine.reset_to_baseline() {
            tracing::warn!("Engine {} failed to reset, discarding it: {}", slot.id, e);
            return;
        }

        // Generation is re-checked under the lock rebuild() holds while
        // bumping it, so a stale engine can never slip back in.
        let mut idle = self.idle();
        if slot.generation == self.generation.load(Ordering::Acquire) {
            idle.push_back(slot);
        }
    }
}

/// Guard that holds an engine and returns it to the pool when dropped
///
/// Dereferences to the engine. The permit is released after the engine has
/// been reset and re-queued, so a waiter never finds an empty queue because
/// of a release still in flight.
pub struct PooledEngine<F: EngineFactory> {
    // only `None` once drop has run
    slot: Option<Slot<F::Engine>>,
    pool: Arc<PoolInner<F>>,
    _permit: OwnedSemaphorePermit,
}

impl<F: EngineFactory> PooledEngine<F> {
    fn slot(&self) -> &Slot<F::Engine> {
        self.slot.as_ref().expect("slot is only taken in drop")
    }

    pub fn id(&self) -> u64 {
        self.slot().id
    }

    /// Renders served by this engine, including the current one
    pub fn uses(&self) -> u32 {
        self.slot().uses
    }

    pub fn generation(&self) -> u64 {
        self.slot().generation
    }
}

impl<F: EngineFactory> Deref for PooledEngine<F> {
    type Target = F::Engine;

    fn deref(&self) -> &F::Engine {
        &self.slot().engine
    }
}

impl<F: EngineFactory> DerefMut for PooledEngine<F> {
    fn deref_mut(&mut self) -> &mut F::Engine {
        &mut self.slot.as_mut().expect("slot is only taken in drop").engine
    }
}

impl<F: EngineFactory> Drop for PooledEngine<F> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
    }
}

/// Fixed-size pool of reusable script engines.
///
/// At most `size` engines are checked out at once; callers beyond that wait
/// on a semaphore. Engines are replaced after `max_uses` renders, and the
/// whole pool can be rebuilt when memory pressure calls for it. An engine
/// discarded on release (stale generation, failed reset) leaves a gap the
/// next `acquire` fills by constructing a replacement, so the number of
/// engines in circulation never exceeds `size` and recovers to it.
pub struct EnginePool<F: EngineFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: EngineFactory> Clone for EnginePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: EngineFactory> EnginePool<F> {
    /// Creates the pool with every engine constructed up front.
    ///
    /// # Errors
    ///
    /// `SsrError::EngineCreation` if any engine fails to construct; no
    /// partial pool is returned.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        Self::build(factory, config, None)
    }

    pub fn with_metrics(
        factory: F,
        config: PoolConfig,
        metrics: Arc<RenderMetricsCollector>,
    ) -> Result<Self> {
        Self::build(factory, config, Some(metrics))
    }

    fn build(
        factory: F,
        config: PoolConfig,
        metrics: Option<Arc<RenderMetricsCollector>>,
    ) -> Result<Self> {
        if config.size == 0 {
            return Err(SsrError::Config("engine pool size must be at least 1".into()));
        }
        if config.max_uses == 0 {
            return Err(SsrError::Config("engine max_uses must be at least 1".into()));
        }

        let inner = Arc::new(PoolInner {
            factory,
            idle: Mutex::new(VecDeque::with_capacity(config.size)),
            semaphore: Arc::new(Semaphore::new(config.size)),
            generation: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            metrics,
            config,
        });

        {
            let mut idle = inner.idle();
            for _ in 0..inner.config.size {
                idle.push_back(inner.fresh_slot(0)?);
            }
        }

        tracing::info!(
            "Engine pool ready: {} engines, recycled after {} uses",
            inner.config.size,
            inner.config.max_uses
        );
        Ok(Self { inner })
    }

    /// Acquires an engine, waiting while all of them are checked out.
    ///
    /// An engine that has reached its use ceiling is replaced before it is
    /// handed out, so the returned guard always reports `uses()` in
    /// `1..=max_uses`.
    pub async fn acquire(&self) -> Result<PooledEngine<F>> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SsrError::PoolClosed)?;

        let generation = self.inner.generation.load(Ordering::Acquire);
        let popped = self.inner.idle().pop_front();
        let mut slot = match popped {
            Some(slot) => slot,
            None => {
                tracing::debug!("No idle engine, constructing a replacement");
                self.inner.fresh_slot(generation)?
            }
        };

        if slot.uses >= self.inner.config.max_uses {
            tracing::debug!(
                "Engine {} reached {} uses, replacing it",
                slot.id,
                slot.uses
            );
            slot = self.inner.fresh_slot(slot.generation)?;
            self.inner.recycled.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_engine_recycled();
            }
        }

        slot.uses += 1;
        Ok(PooledEngine {
            slot: Some(slot),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Replaces every idle engine and invalidates the checked-out ones.
    ///
    /// Runs under the pool lock: acquirers and releasers wait, and engines
    /// checked out now are dropped instead of re-queued when they come
    /// back. Old engines are dropped once the lock is released, which frees
    /// their heaps. Returns the number of engines replaced.
    pub fn rebuild(&self) -> Result<usize> {
        let old = {
            let mut idle = self.inner.idle();
            let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let old: Vec<_> = idle.drain(..).collect();
            for _ in 0..old.len() {
                idle.push_back(self.inner.fresh_slot(generation)?);
            }
            old
        };
        let replaced = old.len();
        drop(old);

        self.inner.rebuilds.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_pool_rebuild();
        }
        tracing::info!("Engine pool rebuilt, {} idle engines replaced", replaced);
        Ok(replaced)
    }

    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.inner.config.size,
            idle: self.inner.idle().len(),
            generation: self.inner.generation.load(Ordering::Acquire),
            recycled: self.inner.recycled.load(Ordering::Relaxed),
            rebuilds: self.inner.rebuilds.load(Ordering::Relaxed),
        }
    }

    /// Engines currently checked out
    pub fn in_use(&self) -> usize {
        self.inner.config.size - self.inner.semaphore.available_permits()
    }
}
