//! Working directory and its persistent store
//!
//! The store is flat: only regular, non-hidden, top-level files travel
//! between it and the working directory. Scans walk the whole tree.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::protocol::FileMap;

/// Entries of a sync that were not written
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Paths that would escape the working directory
    pub rejected: Vec<String>,
    /// Paths whose write failed, with the rendered error
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    work_dir: PathBuf,
    persistent_dir: PathBuf,
    scan_max_file_bytes: u64,
}

impl Workspace {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        persistent_dir: impl Into<PathBuf>,
        scan_max_file_bytes: u64,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            persistent_dir: persistent_dir.into(),
            scan_max_file_bytes,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn persistent_dir(&self) -> &Path {
        &self.persistent_dir
    }

    /// Create both directories and restore saved files into the working
    /// directory. Returns the number of files restored.
    pub fn mount(&self) -> anyhow::Result<usize> {
        fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("creating {}", self.work_dir.display()))?;
        fs::create_dir_all(&self.persistent_dir)
            .with_context(|| format!("creating {}", self.persistent_dir.display()))?;
        let restored = copy_top_level_files(&self.persistent_dir, &self.work_dir)?;
        debug!(restored, "Persistent storage mounted");
        Ok(restored)
    }

    /// Copy working directory files back into the store
    pub fn flush_to_store(&self) -> anyhow::Result<usize> {
        fs::create_dir_all(&self.persistent_dir)
            .with_context(|| format!("creating {}", self.persistent_dir.display()))?;
        copy_top_level_files(&self.work_dir, &self.persistent_dir)
    }

    /// Write `files` under the working directory, creating parent
    /// directories. A failed entry does not stop the others; both escaping
    /// paths and I/O failures are reported back.
    pub fn write_files(&self, files: &FileMap) -> SyncReport {
        let mut report = SyncReport::default();
        for (path, content) in files {
            let Some(relative) = safe_relative_path(path) else {
                warn!(path = %path, "Refusing to sync path outside the working directory");
                report.rejected.push(path.clone());
                continue;
            };
            if let Err(e) = write_file(&self.work_dir.join(relative), content) {
                warn!(path = %path, error = %e, "Failed to sync file");
                report.failed.push((path.clone(), format!("{:#}", e)));
            }
        }
        report
    }

    /// Snapshot of readable text files in the working directory
    pub fn scan(&self) -> FileMap {
        let mut files = FileMap::new();
        let walker = WalkDir::new(&self.work_dir)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry) && entry.file_name() != "__pycache__");

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
            if size > self.scan_max_file_bytes {
                debug!(path = %entry.path().display(), size, "Skipping oversized file");
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let Ok(relative) = entry.path().strip_prefix(&self.work_dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(key, content);
        }
        files
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn write_file(target: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(target, content).with_context(|| format!("writing {}", target.display()))
}

/// Relative path made only of normal components, or None
fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn copy_top_level_files(from: &Path, to: &Path) -> anyhow::Result<usize> {
    let mut copied = 0;
    let entries = fs::read_dir(from).with_context(|| format!("reading {}", from.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') || !entry.file_type()?.is_file() {
            continue;
        }
        fs::copy(entry.path(), to.join(&name))
            .with_context(|| format!("copying {}", entry.path().display()))?;
        copied += 1;
    }
    Ok(copied)
}
