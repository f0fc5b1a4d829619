//! Content digests for source trees and file groups.
//!
//! A digest is persisted per watch target in the state directory. A check
//! compares the current digest with the persisted one; the caller commits
//! the new digest only after the work it guards (a rebuild) succeeded, or
//! invalidates it so the next check reports a change again.

use sha2::{Digest, Sha256};
use ssrkit_common::{Result, SsrError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Directory names never descended into.
pub const IGNORED_DIRS: [&str; 4] = ["node_modules", ".git", "dist", "build"];

/// Extensions that contribute to a directory digest.
pub const WATCHED_EXTENSIONS: [&str; 8] = ["tsx", "ts", "jsx", "js", "css", "scss", "json", "html"];

/// Files at least this large contribute size and mtime but not content.
const CONTENT_LIMIT: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// Recursive source tree, filtered by [`WATCHED_EXTENSIONS`]
    Directory(PathBuf),
    /// Explicit files compared by content only
    Files(Vec<PathBuf>),
}

impl WatchTarget {
    /// Hex SHA-256 over the target's current state.
    pub fn digest(&self) -> Result<String> {
        match self {
            WatchTarget::Directory(dir) => digest_dir(dir),
            WatchTarget::Files(files) => digest_files(files),
        }
    }

    /// File name of the persisted digest for this target.
    pub fn record_name(&self) -> String {
        let (kind, identity) = match self {
            WatchTarget::Directory(dir) => ("dir", dir.to_string_lossy().into_owned()),
            WatchTarget::Files(files) => {
                let mut paths: Vec<String> = files
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect();
                paths.sort();
                ("files", paths.join("|"))
            }
        };
        let hash = Sha256::digest(identity.as_bytes());
        format!("ssrkit-{}-cache-{}.txt", kind, hex::encode(&hash[..8]))
    }

    pub fn describe(&self) -> String {
        match self {
            WatchTarget::Directory(dir) => dir.display().to_string(),
            WatchTarget::Files(files) => format!("{} files", files.len()),
        }
    }
}

fn detection_error(path: &Path, e: impl std::fmt::Display) -> SsrError {
    SsrError::ChangeDetection {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn collect_sources(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| detection_error(dir, e))? {
        let entry = entry.map_err(|e| detection_error(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| detection_error(&path, e))?;
        let name = entry.file_name();

        if file_type.is_dir() {
            if IGNORED_DIRS.contains(&name.to_string_lossy().as_ref()) {
                continue;
            }
            collect_sources(root, &path, out)?;
        } else if file_type.is_file() {
            let watched = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| WATCHED_EXTENSIONS.contains(&e));
            if watched {
                out.push((relative_key(root, &path), path));
            }
        }
    }
    Ok(())
}

/// Forward-slash relative path, stable across platforms.
fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn digest_dir(dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_sources(dir, dir, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (relative, path) in &files {
        let metadata = fs::metadata(path).map_err(|e| detection_error(path, e))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        hasher.update(relative.as_bytes());
        hasher.update([0]);
        hasher.update(metadata.len().to_string().as_bytes());
        hasher.update([0]);
        hasher.update(mtime.to_string().as_bytes());
        hasher.update([0]);
        if metadata.len() < CONTENT_LIMIT {
            let content = fs::read(path).map_err(|e| detection_error(path, e))?;
            hasher.update(&content);
        }
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn digest_files(files: &[PathBuf]) -> Result<String> {
    let mut sorted: Vec<&PathBuf> = files.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for path in sorted {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        match fs::read(path) {
            Ok(content) => hasher.update(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => hasher.update(b"NOT_EXIST"),
            Err(e) => return Err(detection_error(path, e)),
        }
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Result of a change check, carrying what is needed to commit or
/// invalidate it later.
#[derive(Debug, Clone)]
pub struct ChangeCheck {
    pub changed: bool,
    pub digest: String,
    record: PathBuf,
}

impl ChangeCheck {
    /// Persists the digest; call after the guarded work succeeded.
    pub fn commit(&self) -> Result<()> {
        if let Some(parent) = self.record.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.record, &self.digest).map_err(|e| detection_error(&self.record, e))
    }

    /// Forgets the persisted digest so the next check reports a change.
    pub fn invalidate(&self) -> Result<()> {
        match fs::remove_file(&self.record) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(detection_error(&self.record, e)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    state_dir: PathBuf,
}

impl ChangeDetector {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn record_path(&self, target: &WatchTarget) -> PathBuf {
        self.state_dir.join(target.record_name())
    }

    /// Compares the target's digest with the persisted one. A missing or
    /// unreadable record counts as changed.
    pub fn has_changed(&self, target: &WatchTarget) -> Result<ChangeCheck> {
        let digest = target.digest()?;
        let record = self.record_path(target);
        let changed = match fs::read_to_string(&record) {
            Ok(previous) => previous.trim() != digest,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("Failed to read digest record {}: {}", record.display(), e);
                true
            }
        };
        tracing::debug!("{} changed: {}", target.describe(), changed);
        Ok(ChangeCheck { changed, digest, record })
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Workspace {
        src: tempfile::TempDir,
        state: tempfile::TempDir,
    }

    fn workspace() -> Workspace {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("components")).unwrap();
        fs::write(src.path().join("index.tsx"), "export default 1;").unwrap();
        fs::write(src.path().join("components/Button.jsx"), "<button/>").unwrap();
        Workspace {
            src,
            state: tempfile::tempdir().unwrap(),
        }
    }

    #[test]
    fn test_first_check_reports_changed() {
        let ws = workspace();
        let detector = ChangeDetector::new(ws.state.path());
        let target = WatchTarget::Directory(ws.src.path().to_path_buf());
        assert!(detector.has_changed(&target).unwrap().changed);
    }

    #[test]
    fn test_commit_then_unchanged() {
        let ws = workspace();
        let detector = ChangeDetector::new(ws.state.path());
        let target = WatchTarget::Directory(ws.src.path().to_path_buf());

        detector.has_changed(&target).unwrap().commit().unwrap();
        let check = detector.has_changed(&target).unwrap();
        assert!(!check.changed);
        assert_eq!(check.digest, target.digest().unwrap());
    }

    #[test]
    fn test_source_edit_detected() {
        let ws = workspace();
        let detector = ChangeDetector::new(ws.state.path());
        let target = WatchTarget::Directory(ws.src.path().to_path_buf());
        detector.has_changed(&target).unwrap().commit().unwrap();

        fs::write(ws.src.path().join("components/Button.jsx"), "<button>x</button>").unwrap();
        assert!(detector.has_changed(&target).unwrap().changed);
    }

    #[test]
    fn test_ignored_dirs_and_extensions() {
        let ws = workspace();
        let detector = ChangeDetector::new(ws.state.path());
        let target = WatchTarget::Directory(ws.src.path().to_path_buf());
        detector.has_changed(&target).unwrap().commit().unwrap();

        fs::create_dir_all(ws.src.path().join("node_modules/react")).unwrap();
        fs::write(ws.src.path().join("node_modules/react/index.js"), "x").unwrap();
        fs::create_dir_all(ws.src.path().join("dist")).unwrap();
        fs::write(ws.src.path().join("dist/bundle.js"), "y").unwrap();
        fs::write(ws.src.path().join("README.md"), "docs").unwrap();

        assert!(!detector.has_changed(&target).unwrap().changed);
    }

    #[test]
    fn test_invalidate_forces_change() {
        let ws = workspace();
        let detector = ChangeDetector::new(ws.state.path());
        let target = WatchTarget::Directory(ws.src.path().to_path_buf());
        let check = detector.has_changed(&target).unwrap();
        check.commit().unwrap();
        check.invalidate().unwrap();
        // Invalidating twice is fine
        check.invalidate().unwrap();
        assert!(detector.has_changed(&target).unwrap().changed);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let state = tempfile::tempdir().unwrap();
        let detector = ChangeDetector::new(state.path());
        let target = WatchTarget::Directory(state.path().join("nope"));
        assert!(matches!(
            detector.has_changed(&target),
            Err(SsrError::ChangeDetection { .. })
        ));
    }

    #[test]
    fn test_file_group_digest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("package.json");
        let lock = dir.path().join("package-lock.json");
        fs::write(&manifest, r#"{"name":"app"}"#).unwrap();

        let target = WatchTarget::Files(vec![manifest.clone(), lock.clone()]);
        let reordered = WatchTarget::Files(vec![lock.clone(), manifest.clone()]);
        let before = target.digest().unwrap();
        assert_eq!(before, reordered.digest().unwrap());
        assert_eq!(target.record_name(), reordered.record_name());

        // Rewriting identical content keeps the digest
        fs::write(&manifest, r#"{"name":"app"}"#).unwrap();
        assert_eq!(before, target.digest().unwrap());

        // A missing file appearing changes it
        fs::write(&lock, "{}").unwrap();
        assert_ne!(before, target.digest().unwrap());
    }

    #[test]
    fn test_mtime_touch_changes_directories_but_not_file_groups() {
        let ws = workspace();
        let entry = ws.src.path().join("index.tsx");
        let dir_target = WatchTarget::Directory(ws.src.path().to_path_buf());
        let files_target = WatchTarget::Files(vec![entry.clone()]);

        let set_mtime = |secs: u64| {
            let file = fs::File::options().write(true).open(&entry).unwrap();
            file.set_modified(UNIX_EPOCH + std::time::Duration::from_secs(secs)).unwrap();
        };
        set_mtime(1_600_000_000);
        let dir_before = dir_target.digest().unwrap();
        let files_before = files_target.digest().unwrap();

        set_mtime(1_700_000_000);
        assert_eq!(fs::read_to_string(&entry).unwrap(), "export default 1;");
        assert_ne!(dir_before, dir_target.digest().unwrap());
        assert_eq!(files_before, files_target.digest().unwrap());
    }

    #[test]
    fn test_record_names_are_distinct() {
        let a = WatchTarget::Directory(PathBuf::from("/srv/a"));
        let b = WatchTarget::Directory(PathBuf::from("/srv/b"));
        let files = WatchTarget::Files(vec![PathBuf::from("/srv/a")]);
        assert_ne!(a.record_name(), b.record_name());
        assert_ne!(a.record_name(), files.record_name());
        assert!(a.record_name().starts_with("ssrkit-dir-cache-"));
        assert!(files.record_name().starts_with("ssrkit-files-cache-"));
        assert_eq!(a.record_name().len(), "ssrkit-dir-cache-".len() + 16 + 4);
    }
}
