//! Cache maintenance: eviction sweeps and inventory.
//!
//! Filesystem walks run on the blocking pool so they never stall request tasks.

use crate::engine::ExtractionCache;
use crate::model::{ExtractionRecord, SweepReport};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Limits applied by an eviction sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepLimits {
    pub max_age_days: u64,
    pub max_total_size_mb: u64,
}

pub(crate) async fn sweep_cache(
    cache: Arc<ExtractionCache>,
    limits: SweepLimits,
) -> Result<SweepReport> {
    let root = cache.root().display().to_string();
    let report = tokio::task::spawn_blocking(move || {
        cache.sweep(limits.max_age_days, limits.max_total_size_mb)
    })
    .await
    .context("cache sweep task failed")?;
    tracing::info!(
        root,
        deleted = report.deleted_folders,
        freed_mb = report.freed_space_mb,
        total_mb = report.total_size_mb,
        "cache sweep finished"
    );
    Ok(report)
}

/// Extractions on disk, most recently used first.
pub(crate) async fn cache_records(cache: Arc<ExtractionCache>) -> Result<Vec<ExtractionRecord>> {
    let mut records = tokio::task::spawn_blocking(move || cache.records())
        .await
        .context("cache inventory task failed")?
        .context("failed to read extraction cache")?;
    records.sort_by(|a, b| b.last_used.cmp(&a.last_used));
    Ok(records)
}

/// Remove one extraction directory through the deletion guard.
pub(crate) async fn remove_extraction(cache: Arc<ExtractionCache>, dir: PathBuf) -> Result<u64> {
    let shown = dir.display().to_string();
    tokio::task::spawn_blocking(move || cache.remove_extraction(&dir))
        .await
        .context("cache removal task failed")?
        .with_context(|| format!("failed to remove {shown}"))
}

/// Run the startup sweep in the background. Failures are logged, never fatal.
pub(crate) fn spawn_startup_sweep(
    cache: Arc<ExtractionCache>,
    limits: SweepLimits,
) -> tokio::task::JoinHandle<Option<SweepReport>> {
    tokio::spawn(async move {
        match sweep_cache(cache, limits).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "startup sweep failed");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::archive_identity;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn age(dir: &std::path::Path, days: u64) {
        let when = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        crate::engine::set_times(dir, when).unwrap();
    }

    #[tokio::test]
    async fn sweep_and_inventory_run_off_the_async_threads() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(ExtractionCache::new(tmp.path()));
        let old = cache
            .resolve_dir(&archive_identity(std::path::Path::new("Old.zip")), "snes")
            .unwrap();
        std::fs::write(old.join("Old.sfc"), vec![0u8; 1024]).unwrap();
        age(&old, 30);
        let fresh = cache.resolve_dir("Fresh", "snes").unwrap();
        std::fs::write(fresh.join("Fresh.sfc"), vec![0u8; 2048]).unwrap();

        let records = cache_records(cache.clone()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identity, "Fresh");

        let report = sweep_cache(
            cache.clone(),
            SweepLimits {
                max_age_days: 14,
                max_total_size_mb: 10_000,
            },
        )
        .await
        .unwrap();
        assert_eq!(report.deleted_folders, 1);
        assert!(!old.exists());
        assert!(fresh.exists());

        let freed = remove_extraction(cache.clone(), fresh.clone()).await.unwrap();
        assert_eq!(freed, 2048);
        assert!(remove_extraction(cache, tmp.path().to_path_buf()).await.is_err());
    }
}
