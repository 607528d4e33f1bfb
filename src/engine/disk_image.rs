//! Decide what to extract and which file the emulator receives.

use super::archive::ExtractScope;
use super::variant::{self, CountryWeights};
use crate::model::ArchiveEntry;
use std::path::Path;
use thiserror::Error;

/// Disk-image extensions in priority order. A playlist beats a cue sheet, a cue
/// sheet beats the raw track it references.
pub const DISK_IMAGE_EXTENSIONS: &[&str] =
    &["m3u", "cue", "gdi", "ccd", "mds", "cdi", "toc", "iso", "chd"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionPlan {
    /// Interdependent files: extract everything, hand `target` to the emulator.
    Full { target: String },
    /// Independent variants: extract only `target`.
    Single { target: String },
}

impl ExtractionPlan {
    pub fn target(&self) -> &str {
        match self {
            ExtractionPlan::Full { target } | ExtractionPlan::Single { target } => target,
        }
    }

    pub fn scope(&self) -> ExtractScope {
        match self {
            ExtractionPlan::Full { .. } => ExtractScope::All,
            ExtractionPlan::Single { target } => ExtractScope::Single(target.clone()),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ExtractionPlan::Full { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("archive contains no files")]
    EmptyArchive,
    #[error("entry not found in archive: {0}")]
    UnknownEntry(String),
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Entries belonging to a disk-image set, in listing order.
pub fn disk_image_entries(entries: &[ArchiveEntry]) -> Vec<&ArchiveEntry> {
    entries
        .iter()
        .filter(|e| {
            extension_of(&e.name)
                .map(|ext| DISK_IMAGE_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false)
        })
        .collect()
}

/// First disk-image entry scanning by extension priority, not by name.
pub fn disk_image_target(entries: &[ArchiveEntry]) -> Option<&ArchiveEntry> {
    let images = disk_image_entries(entries);
    DISK_IMAGE_EXTENSIONS.iter().find_map(|wanted| {
        images
            .iter()
            .copied()
            .find(|e| extension_of(&e.name).as_deref() == Some(*wanted))
    })
}

/// Plan the extraction for a listed archive. An explicit entry replaces the
/// automatic choice but still forces a full extraction for disk-image sets.
pub fn plan(
    entries: &[ArchiveEntry],
    explicit_entry: Option<&str>,
    country_weights: &CountryWeights,
    standard_weights: &[String],
) -> Result<ExtractionPlan, PlanError> {
    if entries.is_empty() {
        return Err(PlanError::EmptyArchive);
    }
    let is_disk_set = disk_image_target(entries).is_some();

    if let Some(name) = explicit_entry {
        if !entries.iter().any(|e| e.name == name) {
            return Err(PlanError::UnknownEntry(name.to_string()));
        }
        let target = name.to_string();
        return Ok(if is_disk_set {
            ExtractionPlan::Full { target }
        } else {
            ExtractionPlan::Single { target }
        });
    }

    if let Some(target) = disk_image_target(entries) {
        return Ok(ExtractionPlan::Full {
            target: target.name.clone(),
        });
    }

    let candidates: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
    variant::select(&candidates, country_weights, standard_weights)
        .map(|target| ExtractionPlan::Single { target })
        .ok_or(PlanError::EmptyArchive)
}
