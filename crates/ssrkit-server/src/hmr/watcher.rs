use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use ssrkit_common::{HmrConfig, Result, SsrError};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::change_detector::IGNORED_DIRS;
use crate::hmr::broadcaster::EventBroadcaster;
use crate::hmr::rebuilder::{Rebuilder, RELOAD_EVENT};

/// Accepts an event only when more than `interval` passed since the last
/// accepted one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        let due = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) > self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Source,
    Locale,
    Manifest,
}

/// Filesystem watcher for development mode.
///
/// Source trees trigger a rebuild, locale trees only a reload event, and
/// manifest files a rebuild that still goes through the content check.
/// Dropping the watcher stops it.
pub struct DevWatcher {
    _watchers: Vec<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl DevWatcher {
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: &HmrConfig,
        rebuilder: Arc<Rebuilder>,
        broadcaster: EventBroadcaster,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<WatchKind>();
        let mut watchers = Vec::new();

        for dir in &config.source_dirs {
            if let Some(w) = watch_tree(dir, WatchKind::Source, tx.clone())? {
                watchers.push(w);
            }
        }
        for dir in &config.locale_dirs {
            if let Some(w) = watch_tree(dir, WatchKind::Locale, tx.clone())? {
                watchers.push(w);
            }
        }
        if !config.manifest_files.is_empty() {
            watchers.push(watch_manifests(&config.manifest_files, tx)?);
        }

        let task = tokio::spawn(watch_loop(
            rx,
            Duration::from_millis(config.dir_debounce_ms),
            Duration::from_millis(config.file_debounce_ms),
            rebuilder,
            broadcaster,
        ));

        tracing::info!("Dev watcher started with {} watchers", watchers.len());
        Ok(Self {
            _watchers: watchers,
            task,
        })
    }
}

impl Drop for DevWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_loop(
    mut rx: mpsc::UnboundedReceiver<WatchKind>,
    dir_interval: Duration,
    file_interval: Duration,
    rebuilder: Arc<Rebuilder>,
    broadcaster: EventBroadcaster,
) {
    let mut sources = Debouncer::new(dir_interval);
    let mut locales = Debouncer::new(dir_interval);
    let mut manifests = Debouncer::new(file_interval);

    while let Some(kind) = rx.recv().await {
        let now = Instant::now();
        match kind {
            WatchKind::Source if sources.accept(now) => {
                tracing::debug!("Source change detected");
                rebuild(&rebuilder).await;
            }
            WatchKind::Manifest if manifests.accept(now) => {
                tracing::debug!("Manifest change detected");
                rebuild(&rebuilder).await;
            }
            WatchKind::Locale if locales.accept(now) => {
                tracing::debug!("Locale change detected");
                broadcaster.publish(RELOAD_EVENT);
            }
            _ => {}
        }
    }
}

async fn rebuild(rebuilder: &Rebuilder) {
    match rebuilder.rebuild_if_changed(false).await {
        Ok(outcome) => tracing::debug!("Rebuild outcome: {:?}", outcome),
        Err(e) => tracing::error!("Change check failed: {}", e),
    }
}

fn watcher_error(path: &Path, e: notify::Error) -> SsrError {
    SsrError::ChangeDetection {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn watch_tree(
    dir: &Path,
    kind: WatchKind,
    tx: mpsc::UnboundedSender<WatchKind>,
) -> Result<Option<RecommendedWatcher>> {
    if !dir.is_dir() {
        tracing::warn!("Not watching {}: not a directory", dir.display());
        return Ok(None);
    }

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if event_is_relevant(&event) {
                let _ = tx.send(kind);
            }
        }
        Err(e) => tracing::warn!("Watch error: {}", e),
    })
    .map_err(|e| watcher_error(dir, e))?;

    watcher
        .watch(dir, RecursiveMode::Recursive)
        .map_err(|e| watcher_error(dir, e))?;
    tracing::debug!("Watching {}", dir.display());
    Ok(Some(watcher))
}

/// Watches the parent directories of `files` and reports only events that
/// touch one of them.
fn watch_manifests(
    files: &[PathBuf],
    tx: mpsc::UnboundedSender<WatchKind>,
) -> Result<RecommendedWatcher> {
    let names: Vec<PathBuf> = files.to_vec();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if event_is_relevant(&event)
                && event.paths.iter().any(|p| names.iter().any(|f| p.ends_with(f)))
            {
                let _ = tx.send(WatchKind::Manifest);
            }
        }
        Err(e) => tracing::warn!("Watch error: {}", e),
    })
    .map_err(|e| watcher_error(Path::new("."), e))?;

    let mut parents: Vec<PathBuf> = files
        .iter()
        .map(|f| match f.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        })
        .collect();
    parents.sort();
    parents.dedup();

    for parent in parents {
        if !parent.is_dir() {
            tracing::warn!("Not watching {}: not a directory", parent.display());
            continue;
        }
        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| watcher_error(&parent, e))?;
    }
    Ok(watcher)
}

fn event_is_relevant(event: &Event) -> bool {
    if matches!(
        event.kind,
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_))
    ) {
        return false;
    }
    event.paths.iter().any(|p| !path_has_ignored_segment(p))
}

fn path_has_ignored_segment(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(seg) => IGNORED_DIRS.iter().any(|d| seg == *d),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, MetadataKind};

    #[test]
    fn test_debouncer_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        assert!(debouncer.accept(start));
        assert!(!debouncer.accept(start + Duration::from_millis(200)));
        assert!(!debouncer.accept(start + Duration::from_millis(500)));
        assert!(debouncer.accept(start + Duration::from_millis(501)));
        assert!(!debouncer.accept(start + Duration::from_millis(900)));
    }

    #[test]
    fn test_ignored_segments() {
        assert!(path_has_ignored_segment(Path::new("web/node_modules/react/index.js")));
        assert!(path_has_ignored_segment(Path::new("/repo/.git/HEAD")));
        assert!(path_has_ignored_segment(Path::new("web/dist/app.js")));
        assert!(!path_has_ignored_segment(Path::new("web/src/App.tsx")));
        assert!(!path_has_ignored_segment(Path::new("web/distribution/App.tsx")));
    }

    #[test]
    fn test_event_relevance() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("web/App.tsx".into());
        assert!(event_is_relevant(&create));

        let chmod = Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)))
            .add_path("web/App.tsx".into());
        assert!(!event_is_relevant(&chmod));

        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path("web/App.tsx".into());
        assert!(!event_is_relevant(&access));

        let ignored = Event::new(EventKind::Create(CreateKind::File))
            .add_path("web/node_modules/x.js".into());
        assert!(!event_is_relevant(&ignored));
    }

    #[tokio::test]
    async fn test_start_skips_missing_dirs() {
        let root = tempfile::TempDir::new().unwrap();
        let config = HmrConfig {
            source_dirs: vec![root.path().join("missing")],
            manifest_files: Vec::new(),
            state_dir: Some(root.path().join("state")),
            ..Default::default()
        };
        let broadcaster = EventBroadcaster::default();
        let rebuilder = Arc::new(Rebuilder::from_config(&config, broadcaster.clone()));
        let watcher = DevWatcher::start(&config, rebuilder, broadcaster).unwrap();
        assert!(watcher._watchers.is_empty());
    }
}
