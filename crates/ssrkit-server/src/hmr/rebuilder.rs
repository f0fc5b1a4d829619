use ssrkit_common::{HmrConfig, Result, SsrError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::change_detector::{ChangeCheck, ChangeDetector, WatchTarget};
use crate::hmr::broadcaster::EventBroadcaster;
use crate::render::RenderCache;

/// Event published after a successful rebuild.
pub const RELOAD_EVENT: &str = "hmr";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// No target changed and the rebuild was not forced
    Unchanged,
    Rebuilt,
    /// The build command failed; digests were invalidated
    Failed(String),
}

/// Runs the external build when watched sources changed, then drops stale
/// cached markup and tells browsers to reload.
pub struct Rebuilder {
    detector: ChangeDetector,
    targets: Vec<WatchTarget>,
    build_command: Vec<String>,
    cache: Option<Arc<RenderCache>>,
    broadcaster: EventBroadcaster,
    running: Mutex<()>,
}

impl Rebuilder {
    pub fn new(
        detector: ChangeDetector,
        targets: Vec<WatchTarget>,
        build_command: Vec<String>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            detector,
            targets,
            build_command,
            cache: None,
            broadcaster,
            running: Mutex::new(()),
        }
    }

    /// Source dirs and the manifest group from `config`.
    pub fn from_config(config: &HmrConfig, broadcaster: EventBroadcaster) -> Self {
        let mut targets: Vec<WatchTarget> = config
            .source_dirs
            .iter()
            .cloned()
            .map(WatchTarget::Directory)
            .collect();
        if !config.manifest_files.is_empty() {
            targets.push(WatchTarget::Files(config.manifest_files.clone()));
        }
        Self::new(
            ChangeDetector::new(config.state_dir()),
            targets,
            config.build_command.clone(),
            broadcaster,
        )
    }

    pub fn with_cache(mut self, cache: Arc<RenderCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    pub fn source_dirs(&self) -> Vec<PathBuf> {
        self.targets
            .iter()
            .filter_map(|t| match t {
                WatchTarget::Directory(dir) => Some(dir.clone()),
                WatchTarget::Files(_) => None,
            })
            .collect()
    }

    /// Rebuilds when any target changed, or unconditionally when `force`.
    /// Concurrent calls run one after another.
    ///
    /// A target whose digest cannot be computed counts as changed. Failing
    /// to persist or forget a digest is logged and never stops the reload.
    pub async fn rebuild_if_changed(&self, force: bool) -> Result<RebuildOutcome> {
        let _running = self.running.lock().await;

        let mut checks: Vec<ChangeCheck> = Vec::with_capacity(self.targets.len());
        let mut undetectable = false;
        for target in &self.targets {
            match self.detector.has_changed(target) {
                Ok(check) => checks.push(check),
                Err(e) => {
                    tracing::warn!("Treating {} as changed: {}", target.describe(), e);
                    undetectable = true;
                }
            }
        }

        if !force && !undetectable && !checks.iter().any(|c| c.changed) {
            tracing::debug!("Sources unchanged, skipping rebuild");
            return Ok(RebuildOutcome::Unchanged);
        }

        if let Err(e) = self.run_build().await {
            tracing::error!("Rebuild failed: {}", e);
            for check in &checks {
                if let Err(e) = check.invalidate() {
                    tracing::warn!("Failed to invalidate digest: {}", e);
                }
            }
            return Ok(RebuildOutcome::Failed(e.to_string()));
        }

        for check in &checks {
            if let Err(e) = check.commit() {
                tracing::warn!("Failed to store digest: {}", e);
            }
        }
        self.notify_reload();
        Ok(RebuildOutcome::Rebuilt)
    }

    /// Clears cached markup and publishes the reload event.
    pub fn notify_reload(&self) {
        if let Some(cache) = &self.cache {
            let removed = cache.clear();
            tracing::debug!("Cleared {} cached renders", removed);
        }
        self.broadcaster.publish(RELOAD_EVENT);
    }

    async fn run_build(&self) -> Result<()> {
        let Some((program, args)) = self.build_command.split_first() else {
            tracing::debug!("No build command configured");
            return Ok(());
        };

        tracing::info!("Running build: {}", self.build_command.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| SsrError::Build(format!("Failed to start {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SsrError::Build(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        tracing::info!("Build finished");
        Ok(())
    }
}
