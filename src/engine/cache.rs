//! On-disk extraction cache.
//!
//! Layout: `{root}/{system}/{archive identity}`. A directory's modification time
//! is its last-used timestamp; every verified reuse touches it. Eviction only ever
//! deletes through [`ExtractionCache::remove_extraction`], which refuses symbolic
//! links and anything that does not resolve strictly inside a whitelisted root.

use crate::model::{ExtractionRecord, SweepReport};
use std::collections::HashMap;
use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use walkdir::WalkDir;

/// Size difference tolerated when comparing extracted files against the listing.
/// Listing tools disagree by a few bytes on some formats.
pub const SIZE_TOLERANCE_BYTES: u64 = 128;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to delete {path}: {reason}")]
    UnsafePath { path: PathBuf, reason: &'static str },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What a reusable extraction directory must contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedContents {
    /// A single extracted file; only its existence is checked.
    File(String),
    /// Every listed entry with its reported size.
    Entries(Vec<(String, u64)>),
}

/// Replace anything that is not safe as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '(' | ')' | '[' | ']') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Identity of an archive: its sanitized base name without extension.
pub fn archive_identity(archive: &Path) -> String {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    sanitize_component(&stem)
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn dir_is_non_empty(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut it| it.next().is_some())
        .unwrap_or(false)
}

/// Set both access and modification time of `path`.
pub fn set_times(path: &Path, when: SystemTime) -> std::io::Result<()> {
    let times = FileTimes::new().set_accessed(when).set_modified(when);
    File::open(path)?.set_times(times)
}

type DirLocks = HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>;

/// Exclusive use of one extraction directory. Requests hold it from resolving the
/// directory until the emulator is started; sweeps skip leased directories.
pub struct DirLease {
    guard: Option<OwnedMutexGuard<()>>,
    dir: PathBuf,
    locks: Arc<Mutex<DirLocks>>,
}

impl DirLease {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for DirLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(&self.dir).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.dir);
        }
    }
}

pub struct ExtractionCache {
    root: PathBuf,
    allowed_roots: Vec<PathBuf>,
    locks: Arc<Mutex<DirLocks>>,
}

impl ExtractionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            allowed_roots: vec![root.clone()],
            root,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn dir_lock(&self, dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(dir.to_path_buf()).or_default().clone()
    }

    /// Wait for exclusive use of `dir`.
    pub async fn lease(&self, dir: &Path) -> DirLease {
        let guard = self.dir_lock(dir).lock_owned().await;
        DirLease {
            guard: Some(guard),
            dir: dir.to_path_buf(),
            locks: self.locks.clone(),
        }
    }

    /// Exclusive use of `dir` if nobody holds it right now.
    pub fn try_lease(&self, dir: &Path) -> Option<DirLease> {
        let guard = self.dir_lock(dir).try_lock_owned().ok();
        // Built even on failure so Drop prunes the map entry.
        let lease = DirLease {
            guard,
            dir: dir.to_path_buf(),
            locks: self.locks.clone(),
        };
        lease.guard.is_some().then_some(lease)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{system}/{identity}`, without touching the filesystem.
    pub fn dir_for(&self, identity: &str, system: &str) -> PathBuf {
        self.root
            .join(sanitize_component(system))
            .join(sanitize_component(identity))
    }

    /// Idempotently create `{root}/{system}/{identity}`.
    pub fn resolve_dir(&self, identity: &str, system: &str) -> Result<PathBuf, CacheError> {
        let dir = self.dir_for(identity, system);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(dir)
    }

    /// Whether `dir` holds a usable prior extraction.
    pub fn verify(&self, dir: &Path, expected: &ExpectedContents) -> bool {
        match expected {
            ExpectedContents::File(name) if !name.is_empty() => dir.join(name).is_file(),
            ExpectedContents::Entries(list) if !list.is_empty() => {
                list.iter().all(|(name, size)| match fs::metadata(dir.join(name)) {
                    Ok(meta) if meta.is_file() => meta.len().abs_diff(*size) <= SIZE_TOLERANCE_BYTES,
                    _ => false,
                })
            }
            _ => dir_is_non_empty(dir),
        }
    }

    /// Mark `dir` as used now.
    pub fn touch(&self, dir: &Path) -> Result<(), CacheError> {
        set_times(dir, SystemTime::now()).map_err(io_err(dir))
    }

    /// All extraction directories currently on disk. Symbolic links are ignored.
    pub fn records(&self) -> Result<Vec<ExtractionRecord>, CacheError> {
        let mut records = Vec::new();
        if !self.root.exists() {
            return Ok(records);
        }
        for system in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let Ok(system) = system else { continue };
            if !system.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let system_name = system.file_name().to_string_lossy().to_string();
            let Ok(children) = fs::read_dir(system.path()) else {
                continue;
            };
            for child in children.filter_map(|c| c.ok()) {
                if !child.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let dir = child.path();
                let last_used = child
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                records.push(ExtractionRecord {
                    identity: child.file_name().to_string_lossy().to_string(),
                    system: system_name.clone(),
                    size_bytes: dir_size(&dir),
                    dir,
                    last_used,
                });
            }
        }
        Ok(records)
    }

    /// Resolve `path` for deletion, refusing links and anything outside the roots.
    fn guard(&self, path: &Path) -> Result<PathBuf, CacheError> {
        let meta = fs::symlink_metadata(path).map_err(io_err(path))?;
        if meta.file_type().is_symlink() {
            return Err(CacheError::UnsafePath {
                path: path.to_path_buf(),
                reason: "symbolic link",
            });
        }
        let canonical = path.canonicalize().map_err(io_err(path))?;
        let inside = self
            .allowed_roots
            .iter()
            .filter_map(|root| root.canonicalize().ok())
            .any(|root| canonical != root && canonical.starts_with(&root));
        if !inside {
            return Err(CacheError::UnsafePath {
                path: path.to_path_buf(),
                reason: "outside the extraction cache",
            });
        }
        Ok(canonical)
    }

    /// Delete one extraction directory. Returns the bytes freed.
    pub fn remove_extraction(&self, path: &Path) -> Result<u64, CacheError> {
        let target = self.guard(path)?;
        let size = dir_size(&target);
        fs::remove_dir_all(&target).map_err(io_err(&target))?;
        Ok(size)
    }

    fn remove_empty_system_dirs(&self) {
        let Ok(systems) = fs::read_dir(&self.root) else {
            return;
        };
        for system in systems.filter_map(|s| s.ok()) {
            let path = system.path();
            if !system.file_type().map(|t| t.is_dir()).unwrap_or(false) || dir_is_non_empty(&path) {
                continue;
            }
            let removed = self
                .guard(&path)
                .and_then(|p| fs::remove_dir(&p).map_err(io_err(&p)));
            if let Err(e) = removed {
                tracing::warn!(path = %path.display(), error = %e, "could not remove empty cache directory");
            }
        }
    }

    /// Evict by age, then oldest-first until under the size budget.
    pub fn sweep(&self, max_age_days: u64, max_total_size_mb: u64) -> SweepReport {
        self.sweep_at(SystemTime::now(), max_age_days, max_total_size_mb)
    }

    pub fn sweep_at(&self, now: SystemTime, max_age_days: u64, max_total_size_mb: u64) -> SweepReport {
        let mut report = SweepReport::default();
        let mut records = match self.records() {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "cache sweep could not enumerate extractions");
                return report;
            }
        };
        let max_age = Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY));
        let mut freed: u64 = 0;

        let mut remove = |record: &ExtractionRecord, why: &str| -> bool {
            let Some(_lease) = self.try_lease(&record.dir) else {
                tracing::debug!(dir = %record.dir.display(), "extraction in use, not evicting");
                return false;
            };
            match self.remove_extraction(&record.dir) {
                Ok(bytes) => {
                    tracing::info!(dir = %record.dir.display(), bytes, why, "evicted extraction");
                    report.deleted_folders += 1;
                    freed += bytes;
                    true
                }
                Err(e) => {
                    tracing::warn!(dir = %record.dir.display(), error = %e, "eviction failed");
                    false
                }
            }
        };

        records.retain(|r| {
            let age = now.duration_since(r.last_used).unwrap_or_default();
            !(age > max_age && remove(r, "age"))
        });

        let budget = max_total_size_mb.saturating_mul(1024 * 1024);
        let mut total: u64 = records.iter().map(|r| r.size_bytes).sum();
        if total > budget {
            records.sort_by_key(|r| r.last_used);
            for record in &records {
                if total <= budget {
                    break;
                }
                if remove(record, "size") {
                    total = total.saturating_sub(record.size_bytes);
                }
            }
        }

        self.remove_empty_system_dirs();
        report.freed_space_mb = freed as f64 / BYTES_PER_MB;
        report.total_size_mb = total as f64 / BYTES_PER_MB;
        report
    }
}
