//! Archive classification and the external archive tool seam.

use crate::model::ArchiveEntry;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

/// Extensions handled by the archive tool. Anything else is launched directly.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z", "rar", "gz", "tgz", "bz2", "xz", "tar"];

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to list {path}: {details}")]
    List { path: PathBuf, details: String },
    #[error("failed to extract {path}: {details}")]
    Extraction { path: PathBuf, details: String },
    #[error("archive tool `{tool}` could not be started: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Direct,
    Archive,
}

/// Which entries an extraction writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractScope {
    All,
    Single(String),
}

/// Discrete stages reported while the archive tool works.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionStage {
    EntriesListed(usize),
    Progress { percent: u8, detail: String },
    Completed,
    Failed(String),
}

/// External archive tool. Listing and extraction are delegated entirely; progress
/// is reported through `stages` as the tool produces it.
pub trait ArchiveTool: Send + Sync {
    fn list<'a>(&'a self, archive: &'a Path) -> BoxFuture<'a, Result<Vec<ArchiveEntry>, ArchiveError>>;

    fn extract<'a>(
        &'a self,
        archive: &'a Path,
        dest: &'a Path,
        scope: ExtractScope,
        stages: mpsc::UnboundedSender<ExtractionStage>,
    ) -> BoxFuture<'a, Result<(), ArchiveError>>;
}

pub fn classify(path: &Path) -> PathKind {
    let is_archive = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false);
    if is_archive {
        PathKind::Archive
    } else {
        PathKind::Direct
    }
}

/// Classifies paths and lists archives through an `ArchiveTool`.
pub struct ArchiveInspector<'a> {
    tool: &'a dyn ArchiveTool,
}

impl<'a> ArchiveInspector<'a> {
    pub fn new(tool: &'a dyn ArchiveTool) -> Self {
        Self { tool }
    }

    pub fn classify(&self, path: &Path) -> PathKind {
        classify(path)
    }

    /// Entries in listing order, directories already removed by the tool.
    pub async fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let entries = self.tool.list(archive).await?;
        tracing::debug!(archive = %archive.display(), entries = entries.len(), "archive listed");
        Ok(entries)
    }
}
