//! Human-readable lines for text mode.

use crate::model::{EventKind, ExtractionRecord, LifecycleEvent, StatusMarker, SweepReport};
use crate::orchestrator::Preview;
use std::time::{Duration, SystemTime};

/// Where a rendered line should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

/// Render one lifecycle event. Emulator stdout stays on stdout untouched,
/// everything else is prefixed and goes to stderr.
pub(crate) fn render_event(ev: &LifecycleEvent) -> (Stream, String) {
    match ev.kind {
        EventKind::EmulatorLog => (Stream::Stdout, ev.data.clone()),
        EventKind::EmulatorErrorLog => (Stream::Stderr, format!("emulator: {}", ev.data)),
        EventKind::ExtractionLog => (Stream::Stderr, format!("extract: {}", ev.data)),
        EventKind::ConflictWarning => (Stream::Stderr, format!("warning: {}", ev.data)),
        EventKind::StatusMarker => {
            let line = match ev.marker() {
                Some(StatusMarker::IsZip) => "== Archive ==".to_string(),
                Some(StatusMarker::ZipSuccess) => "== Extracted ==".to_string(),
                Some(StatusMarker::ZipError(details)) => format!("== Extraction failed: {details} =="),
                Some(StatusMarker::Running) => "== Running ==".to_string(),
                Some(StatusMarker::Closed) => "== Closed ==".to_string(),
                None => format!("== {} ==", ev.data),
            };
            (Stream::Stderr, line)
        }
    }
}

pub(crate) fn sweep_lines(report: &SweepReport) -> Vec<String> {
    vec![
        format!("Deleted folders: {}", report.deleted_folders),
        format!("Freed:           {:.1} MB", report.freed_space_mb),
        format!("Cache size:      {:.1} MB", report.total_size_mb),
    ]
}

fn age_label(last_used: SystemTime, now: SystemTime) -> String {
    let age = now.duration_since(last_used).unwrap_or_default();
    let rounded = Duration::from_secs(age.as_secs() / 60 * 60);
    if rounded.is_zero() {
        "just now".to_string()
    } else {
        format!("{} ago", humantime::format_duration(rounded))
    }
}

pub(crate) fn record_lines(records: &[ExtractionRecord], now: SystemTime) -> Vec<String> {
    if records.is_empty() {
        return vec!["Extraction cache is empty".to_string()];
    }
    let total: u64 = records.iter().map(|r| r.size_bytes).sum();
    let mut lines: Vec<String> = records
        .iter()
        .map(|r| {
            format!(
                "{:>9.1} MB  {:<10} {}  ({})",
                r.size_bytes as f64 / (1024.0 * 1024.0),
                r.system,
                r.identity,
                age_label(r.last_used, now)
            )
        })
        .collect();
    lines.push(format!(
        "{} extractions, {:.1} MB",
        records.len(),
        total as f64 / (1024.0 * 1024.0)
    ));
    lines
}

pub(crate) fn preview_lines(preview: &Preview) -> Vec<String> {
    let mut lines = vec![format!("Archive: {}", preview.archive.display())];
    for entry in &preview.entries {
        let mark = if entry.name == preview.plan.target() {
            "*"
        } else {
            " "
        };
        lines.push(format!("{mark} {:>12}  {}", entry.size, entry.name));
    }
    lines.push(format!(
        "Extraction: {}",
        if preview.plan.is_full() {
            "all entries"
        } else {
            "selected entry only"
        }
    ));
    lines.push(format!("Launch: {}", preview.plan.target()));
    lines.push(format!("Cache directory: {}", preview.cache_dir.display()));
    lines
}
