//! Launch request dispatcher.
//!
//! Turns launch requests into the extraction/launch lifecycle and publishes
//! lifecycle events for presentation layers.

use super::supervisor::{ProcessSupervisor, SupervisorError};
use crate::config::Settings;
use crate::engine::{
    archive_identity, plan, ArchiveInspector, ArchiveTool, DirLease, ExpectedContents,
    ExtractionCache, ExtractionPlan, ExtractionStage, PathKind,
};
use crate::events::EventChannel;
use crate::model::{
    ArchiveEntry, EventKind, LaunchRequest, LifecycleEvent, RequestId, RunningProcess,
    StatusMarker,
};
use crate::paths::{is_launchable, PathResolver};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinSet;

/// How a request ended from the dispatcher's point of view. Details are on the
/// event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Launched(RunningProcess),
    Busy,
    Failed,
    Cleared(Option<RunningProcess>),
}

/// Result of a dry run: what a launch of an archive would extract.
#[derive(Debug, Clone)]
pub(crate) struct Preview {
    pub archive: PathBuf,
    pub entries: Vec<ArchiveEntry>,
    pub plan: ExtractionPlan,
    pub cache_dir: PathBuf,
}

#[derive(Clone)]
pub(crate) struct Dispatcher {
    settings: Arc<Settings>,
    cache: Arc<ExtractionCache>,
    tool: Arc<dyn ArchiveTool>,
    resolver: Arc<dyn PathResolver>,
    supervisor: ProcessSupervisor,
    events: EventChannel,
}

fn describe_stage(stage: &ExtractionStage) -> String {
    match stage {
        ExtractionStage::EntriesListed(n) => format!("{n} entries listed"),
        ExtractionStage::Progress { percent, detail } if detail.is_empty() => {
            format!("extracting {percent}%")
        }
        ExtractionStage::Progress { percent, detail } => format!("extracting {percent}% {detail}"),
        ExtractionStage::Completed => "extraction complete".to_string(),
        ExtractionStage::Failed(details) => format!("extraction failed: {details}"),
    }
}

fn expected_contents(plan: &ExtractionPlan, entries: &[ArchiveEntry]) -> ExpectedContents {
    match plan {
        ExtractionPlan::Full { .. } => ExpectedContents::Entries(
            entries.iter().map(|e| (e.name.clone(), e.size)).collect(),
        ),
        ExtractionPlan::Single { target } => ExpectedContents::File(target.clone()),
    }
}

impl Dispatcher {
    pub(crate) fn new(
        settings: Settings,
        tool: Arc<dyn ArchiveTool>,
        resolver: Arc<dyn PathResolver>,
        events: EventChannel,
    ) -> Self {
        let cache = ExtractionCache::new(settings.cache_root());
        let supervisor = ProcessSupervisor::new(settings.emulators.clone(), events.clone());
        Self {
            settings: Arc::new(settings),
            cache: Arc::new(cache),
            tool,
            resolver,
            supervisor,
            events,
        }
    }

    pub(crate) fn events(&self) -> &EventChannel {
        &self.events
    }

    pub(crate) fn cache(&self) -> &Arc<ExtractionCache> {
        &self.cache
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    fn emit(&self, request_id: RequestId, kind: EventKind, data: impl Into<String>) {
        self.events.publish(LifecycleEvent::log(request_id, kind, data));
    }

    fn emit_status(&self, request_id: RequestId, marker: StatusMarker) {
        self.events.publish(LifecycleEvent::status(request_id, marker));
    }

    /// Handle one request to completion of its launch step. Every failure is
    /// reported on the event channel.
    pub(crate) async fn handle(&self, request_id: RequestId, request: LaunchRequest) -> Outcome {
        match request {
            LaunchRequest::Clear { .. } => Outcome::Cleared(self.supervisor.clear()),
            LaunchRequest::Launch {
                path,
                explicit_entry,
                emulator_id,
            } => {
                self.launch(request_id, &path, explicit_entry.as_deref(), &emulator_id)
                    .await
            }
        }
    }

    async fn launch(
        &self,
        request_id: RequestId,
        logical_path: &str,
        explicit_entry: Option<&str>,
        emulator_id: &str,
    ) -> Outcome {
        let path = self.resolver.resolve(logical_path);
        tracing::info!(request_id, path = %path.display(), emulator_id, "launch requested");

        let inspector = ArchiveInspector::new(self.tool.as_ref());
        // The lease keeps sweeps away from the extraction until the emulator has it.
        let (target, _lease) = match inspector.classify(&path) {
            PathKind::Direct => {
                if !is_launchable(&path) {
                    self.emit(
                        request_id,
                        EventKind::EmulatorErrorLog,
                        format!("file not found: {}", path.display()),
                    );
                    self.emit_status(request_id, StatusMarker::Closed);
                    return Outcome::Failed;
                }
                (path, None)
            }
            PathKind::Archive => {
                self.emit_status(request_id, StatusMarker::IsZip);
                match self
                    .prepare_archive(request_id, &path, explicit_entry, emulator_id)
                    .await
                {
                    Ok((target, lease)) => {
                        self.emit_status(request_id, StatusMarker::ZipSuccess);
                        (target, Some(lease))
                    }
                    Err(e) => {
                        tracing::warn!(request_id, archive = %path.display(), error = %format!("{e:#}"), "archive preparation failed");
                        self.emit_status(request_id, StatusMarker::ZipError(format!("{e:#}")));
                        return Outcome::Failed;
                    }
                }
            }
        };

        match self.supervisor.launch(request_id, &target, emulator_id) {
            Ok(process) => Outcome::Launched(process),
            Err(SupervisorError::Busy(_)) => Outcome::Busy,
            Err(_) => Outcome::Failed,
        }
    }

    /// Resolve, verify or extract `archive`. Returns the file to launch and the
    /// lease on its extraction directory.
    async fn prepare_archive(
        &self,
        request_id: RequestId,
        archive: &Path,
        explicit_entry: Option<&str>,
        system: &str,
    ) -> Result<(PathBuf, DirLease)> {
        let identity = archive_identity(archive);
        let lease = self.cache.lease(&self.cache.dir_for(&identity, system)).await;
        tracing::debug!(request_id, dir = %lease.dir().display(), "extraction directory leased");

        let cache = self.cache.clone();
        let system_owned = system.to_string();
        let dir = tokio::task::spawn_blocking(move || cache.resolve_dir(&identity, &system_owned))
            .await
            .context("cache task failed")??;
        let target = self
            .extract_locked(request_id, archive, &dir, explicit_entry)
            .await?;
        Ok((target, lease))
    }

    async fn extract_locked(
        &self,
        request_id: RequestId,
        archive: &Path,
        dir: &Path,
        explicit_entry: Option<&str>,
    ) -> Result<PathBuf> {
        let entries = ArchiveInspector::new(self.tool.as_ref())
            .list(archive)
            .await?;
        let plan = plan(
            &entries,
            explicit_entry,
            &self.settings.country_weights,
            &self.settings.standard_weights,
        )?;
        self.emit(
            request_id,
            EventKind::ExtractionLog,
            if plan.is_full() {
                format!("disk image set, launching {}", plan.target())
            } else {
                format!("selected {}", plan.target())
            },
        );

        let expected = expected_contents(&plan, &entries);
        let cache = self.cache.clone();
        let check_dir = dir.to_path_buf();
        let hit = tokio::task::spawn_blocking(move || cache.verify(&check_dir, &expected))
            .await
            .context("cache task failed")?;

        if hit {
            tracing::debug!(dir = %dir.display(), "extraction cache hit");
            self.emit(
                request_id,
                EventKind::ExtractionLog,
                format!("using cached extraction in {}", dir.display()),
            );
        } else {
            let (stage_tx, mut stage_rx) = mpsc::unbounded_channel::<ExtractionStage>();
            let events = self.events.clone();
            let relay = tokio::spawn(async move {
                while let Some(stage) = stage_rx.recv().await {
                    events.publish(LifecycleEvent::log(
                        request_id,
                        EventKind::ExtractionLog,
                        describe_stage(&stage),
                    ));
                }
            });
            let _ = stage_tx.send(ExtractionStage::EntriesListed(entries.len()));
            let res = self
                .tool
                .extract(archive, dir, plan.scope(), stage_tx)
                .await;
            let _ = relay.await;
            res?;
        }

        if let Err(e) = self.cache.touch(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "could not update last-used time");
        }
        Ok(dir.join(plan.target()))
    }

    /// List and plan without extracting or launching.
    pub(crate) async fn preview(
        &self,
        logical_path: &str,
        explicit_entry: Option<&str>,
        system: &str,
    ) -> Result<Preview> {
        let archive = self.resolver.resolve(logical_path);
        let inspector = ArchiveInspector::new(self.tool.as_ref());
        if inspector.classify(&archive) != PathKind::Archive {
            anyhow::bail!("{} is not an archive", archive.display());
        }
        let entries = inspector.list(&archive).await?;
        let plan = plan(
            &entries,
            explicit_entry,
            &self.settings.country_weights,
            &self.settings.standard_weights,
        )?;
        let cache_dir = self.cache.dir_for(&archive_identity(&archive), system);
        Ok(Preview {
            archive,
            entries,
            plan,
            cache_dir,
        })
    }
}

/// Dispatch requests as independent tasks until the sender side closes, then wait
/// for the outstanding ones.
pub(crate) async fn run_controller(
    dispatcher: Dispatcher,
    mut request_rx: UnboundedReceiver<(RequestId, LaunchRequest)>,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            req = request_rx.recv() => {
                let Some((request_id, request)) = req else { break };
                let d = dispatcher.clone();
                tasks.spawn(async move { (request_id, d.handle(request_id, request).await) });
            }
            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                match done {
                    Ok((request_id, outcome)) => tracing::debug!(request_id, ?outcome, "request handled"),
                    Err(e) => tracing::warn!(error = %e, "request task failed"),
                }
            }
        }
    }
    while let Some(done) = tasks.join_next().await {
        if let Err(e) = done {
            tracing::warn!(error = %e, "request task failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmulatorConfig;
    use crate::engine::{ArchiveError, ExtractScope};
    use crate::events::Subscription;
    use crate::orchestrator::maintenance::{spawn_startup_sweep, SweepLimits};
    use crate::paths::LocalPathResolver;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeTool {
        entries: Vec<ArchiveEntry>,
        fail_list: bool,
        fail_extract: bool,
        list_delay: Duration,
        extractions: AtomicUsize,
    }

    impl FakeTool {
        fn with_entries(entries: &[(&str, u64)]) -> Self {
            Self {
                entries: entries
                    .iter()
                    .map(|(n, s)| ArchiveEntry::new(*n, *s))
                    .collect(),
                ..Self::default()
            }
        }

        fn new(entries: &[(&str, u64)]) -> Arc<Self> {
            Arc::new(Self::with_entries(entries))
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                fail_list: true,
                ..Self::default()
            })
        }

        /// Writes the first entry, then reports a data error.
        fn failing_extract(entries: &[(&str, u64)]) -> Arc<Self> {
            Arc::new(Self {
                fail_extract: true,
                ..Self::with_entries(entries)
            })
        }

        fn slow_list(entries: &[(&str, u64)], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                list_delay: delay,
                ..Self::with_entries(entries)
            })
        }
    }

    impl ArchiveTool for FakeTool {
        fn list<'a>(
            &'a self,
            archive: &'a Path,
        ) -> BoxFuture<'a, Result<Vec<ArchiveEntry>, ArchiveError>> {
            async move {
                tokio::time::sleep(self.list_delay).await;
                if self.fail_list {
                    return Err(ArchiveError::List {
                        path: archive.to_path_buf(),
                        details: "Can not open the file as archive".into(),
                    });
                }
                Ok(self.entries.clone())
            }
            .boxed()
        }

        fn extract<'a>(
            &'a self,
            archive: &'a Path,
            dest: &'a Path,
            scope: ExtractScope,
            stages: mpsc::UnboundedSender<ExtractionStage>,
        ) -> BoxFuture<'a, Result<(), ArchiveError>> {
            async move {
                self.extractions.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                for entry in &self.entries {
                    if let ExtractScope::Single(name) = &scope {
                        if name != &entry.name {
                            continue;
                        }
                    }
                    std::fs::write(dest.join(&entry.name), vec![0u8; entry.size as usize])
                        .unwrap();
                    if self.fail_extract {
                        let _ = stages.send(ExtractionStage::Failed("Data Error".into()));
                        return Err(ArchiveError::Extraction {
                            path: archive.to_path_buf(),
                            details: "Data Error".into(),
                        });
                    }
                    let _ = stages.send(ExtractionStage::Progress {
                        percent: 100,
                        detail: entry.name.clone(),
                    });
                }
                let _ = stages.send(ExtractionStage::Completed);
                Ok(())
            }
            .boxed()
        }
    }

    struct Fixture {
        _tmp: TempDir,
        library: PathBuf,
        cache_root: PathBuf,
        dispatcher: Dispatcher,
    }

    fn fixture(tool: Arc<FakeTool>) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("library");
        let cache_root = tmp.path().join("cache");
        std::fs::create_dir_all(&library).unwrap();
        std::fs::write(library.join("Game.zip"), b"PK").unwrap();

        let mut settings = Settings {
            cache_dir: Some(cache_root.clone()),
            ..Settings::default()
        };
        settings.emulators.insert(
            "snes".into(),
            EmulatorConfig {
                program: "sh".into(),
                params: r#"-c 'echo "launched $0"' {rom}"#.into(),
                display_name: Some("Echo SNES".into()),
            },
        );
        settings.emulators.insert(
            "slow".into(),
            EmulatorConfig {
                program: "sh".into(),
                params: "-c 'sleep 1' {rom}".into(),
                display_name: Some("Slow".into()),
            },
        );
        let dispatcher = Dispatcher::new(
            settings,
            tool,
            Arc::new(LocalPathResolver::with_base(&library)),
            EventChannel::new(),
        );
        Fixture {
            _tmp: tmp,
            library,
            cache_root,
            dispatcher,
        }
    }

    async fn collect_until_terminal(sub: &mut Subscription) -> Vec<LifecycleEvent> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(ev) = sub.recv().await {
                let done = ev.is_terminal();
                seen.push(ev);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("request never reached a terminal event");
        seen
    }

    fn markers(events: &[LifecycleEvent]) -> Vec<StatusMarker> {
        events.iter().filter_map(|e| e.marker()).collect()
    }

    async fn wait_exit(d: &Dispatcher) {
        let mut rx = d.supervisor().subscribe_phase();
        tokio::time::timeout(
            Duration::from_secs(10),
            rx.wait_for(|p| !p.is_active()),
        )
        .await
        .expect("emulator did not exit")
        .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn archive_is_extracted_selected_and_launched() {
        let tool = FakeTool::new(&[("Game (J) [!].sfc", 300), ("Game (UE) [!].sfc", 300)]);
        let fx = fixture(tool.clone());
        let mut sub = fx.dispatcher.events().subscribe_request(1);

        let outcome = fx
            .dispatcher
            .handle(1, LaunchRequest::launch("Game.zip", "snes"))
            .await;
        let expected = fx.cache_root.join("snes").join("Game").join("Game (UE) [!].sfc");
        match &outcome {
            Outcome::Launched(p) => assert_eq!(p.output_path, expected),
            other => panic!("unexpected outcome {other:?}"),
        }

        let events = collect_until_terminal(&mut sub).await;
        assert_eq!(
            markers(&events),
            vec![
                StatusMarker::IsZip,
                StatusMarker::ZipSuccess,
                StatusMarker::Running,
                StatusMarker::Closed
            ]
        );
        let zip_success = events
            .iter()
            .position(|e| e.marker() == Some(StatusMarker::ZipSuccess))
            .unwrap();
        assert!(events[..zip_success]
            .iter()
            .any(|e| e.kind == EventKind::ExtractionLog && e.data == "extraction complete"));
        let launched = events
            .iter()
            .find(|e| e.kind == EventKind::EmulatorLog)
            .unwrap();
        assert_eq!(launched.data, format!("launched {}", expected.display()));
        assert!(expected.is_file());
        assert!(!fx
            .cache_root
            .join("snes/Game/Game (J) [!].sfc")
            .exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn verified_extraction_is_reused() {
        let tool = FakeTool::new(&[("Game (U) [!].sfc", 300)]);
        let fx = fixture(tool.clone());

        fx.dispatcher
            .handle(1, LaunchRequest::launch("Game.zip", "snes"))
            .await;
        wait_exit(&fx.dispatcher).await;

        let mut sub = fx.dispatcher.events().subscribe_request(2);
        let outcome = fx
            .dispatcher
            .handle(2, LaunchRequest::launch("Game.zip", "snes"))
            .await;
        assert!(matches!(outcome, Outcome::Launched(_)));
        let events = collect_until_terminal(&mut sub).await;
        assert!(events
            .iter()
            .any(|e| e.data.starts_with("using cached extraction")));
        assert_eq!(tool.extractions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn list_failure_becomes_zip_error() {
        let fx = fixture(FakeTool::broken());
        let mut sub = fx.dispatcher.events().subscribe_request(3);
        let outcome = fx
            .dispatcher
            .handle(3, LaunchRequest::launch("Game.zip", "snes"))
            .await;
        assert_eq!(outcome, Outcome::Failed);

        let events = collect_until_terminal(&mut sub).await;
        match markers(&events).as_slice() {
            [StatusMarker::IsZip, StatusMarker::ZipError(details)] => {
                assert!(details.contains("Can not open the file as archive"))
            }
            other => panic!("unexpected markers {other:?}"),
        }
        assert!(fx.dispatcher.supervisor().current().is_none());
    }

    #[tokio::test]
    async fn missing_direct_file_is_reported() {
        let fx = fixture(FakeTool::new(&[]));
        let mut sub = fx.dispatcher.events().subscribe_request(4);
        let outcome = fx
            .dispatcher
            .handle(4, LaunchRequest::launch("nope.sfc", "snes"))
            .await;
        assert_eq!(outcome, Outcome::Failed);
        let events = collect_until_terminal(&mut sub).await;
        assert_eq!(events[0].kind, EventKind::EmulatorErrorLog);
        assert_eq!(events[1].marker(), Some(StatusMarker::Closed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn busy_until_cleared() {
        let fx = fixture(FakeTool::new(&[]));
        std::fs::write(fx.library.join("a.sfc"), b"rom").unwrap();

        let first = fx
            .dispatcher
            .handle(1, LaunchRequest::launch("a.sfc", "slow"))
            .await;
        assert!(matches!(first, Outcome::Launched(_)));

        let mut sub = fx.dispatcher.events().subscribe_request(2);
        let second = fx
            .dispatcher
            .handle(2, LaunchRequest::launch("a.sfc", "snes"))
            .await;
        assert_eq!(second, Outcome::Busy);
        assert_eq!(sub.try_recv().map(|e| e.kind), Some(EventKind::ConflictWarning));

        let cleared = fx.dispatcher.handle(0, LaunchRequest::clear()).await;
        assert!(matches!(cleared, Outcome::Cleared(Some(_))));
        let third = fx
            .dispatcher
            .handle(3, LaunchRequest::launch("a.sfc", "snes"))
            .await;
        assert!(matches!(third, Outcome::Launched(_)));
        wait_exit(&fx.dispatcher).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_requests_for_one_archive_extract_once() {
        let tool = FakeTool::new(&[("Game.cue", 100), ("Game (Track 1).bin", 400)]);
        let fx = fixture(tool.clone());

        let (a, b) = tokio::join!(
            fx.dispatcher.handle(1, LaunchRequest::launch("Game.zip", "snes")),
            fx.dispatcher.handle(2, LaunchRequest::launch("Game.zip", "snes")),
        );
        assert_eq!(tool.extractions.load(Ordering::SeqCst), 1);
        let launched = [&a, &b]
            .iter()
            .filter(|o| matches!(o, Outcome::Launched(_)))
            .count();
        assert!(launched >= 1);
        assert!(fx.cache_root.join("snes/Game/Game (Track 1).bin").is_file());
        wait_exit(&fx.dispatcher).await;
        let dir = fx.cache_root.join("snes").join("Game");
        assert!(fx.dispatcher.cache().try_lease(&dir).is_some());
    }

    #[tokio::test]
    async fn extraction_failure_keeps_partial_output_and_reports_zip_error() {
        let tool = FakeTool::failing_extract(&[("Game.cue", 100), ("Game (Track 1).bin", 400)]);
        let fx = fixture(tool.clone());
        let mut sub = fx.dispatcher.events().subscribe_request(5);

        let outcome = fx
            .dispatcher
            .handle(5, LaunchRequest::launch("Game.zip", "snes"))
            .await;
        assert_eq!(outcome, Outcome::Failed);

        let events = collect_until_terminal(&mut sub).await;
        match markers(&events).as_slice() {
            [StatusMarker::IsZip, StatusMarker::ZipError(details)] => {
                assert!(details.contains("Data Error"), "{details}")
            }
            other => panic!("unexpected markers {other:?}"),
        }
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::ExtractionLog && e.data == "extraction failed: Data Error"));
        assert!(fx.cache_root.join("snes/Game/Game.cue").is_file());
        assert!(!fx.cache_root.join("snes/Game/Game (Track 1).bin").exists());
        assert!(fx.dispatcher.supervisor().current().is_none());
        assert_eq!(tool.extractions.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn startup_sweep_leaves_an_extraction_being_launched() {
        let tool = FakeTool::slow_list(&[("Game (U) [!].sfc", 300)], Duration::from_millis(200));
        let fx = fixture(tool.clone());
        let dir = fx.cache_root.join("snes").join("Game");
        std::fs::create_dir_all(&dir).unwrap();
        let rom = dir.join("Game (U) [!].sfc");
        std::fs::write(&rom, vec![0u8; 300]).unwrap();
        let stale = std::time::SystemTime::now() - Duration::from_secs(20 * 24 * 60 * 60);
        crate::engine::set_times(&dir, stale).unwrap();

        let limits = SweepLimits {
            max_age_days: 14,
            max_total_size_mb: 1024,
        };
        let cache = fx.dispatcher.cache().clone();
        let (outcome, report) = tokio::join!(
            fx.dispatcher.handle(1, LaunchRequest::launch("Game.zip", "snes")),
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                spawn_startup_sweep(cache, limits).await.unwrap()
            },
        );

        assert!(matches!(outcome, Outcome::Launched(_)), "{outcome:?}");
        assert_eq!(report.unwrap().deleted_folders, 0);
        assert_eq!(tool.extractions.load(Ordering::SeqCst), 0);
        assert!(rom.is_file());
        wait_exit(&fx.dispatcher).await;
    }

    #[tokio::test]
    async fn preview_plans_without_extracting() {
        let tool = FakeTool::new(&[("Game (J).sfc", 10), ("Game (U).sfc", 10)]);
        let fx = fixture(tool.clone());
        let preview = fx.dispatcher.preview("Game.zip", None, "snes").await.unwrap();
        assert_eq!(preview.plan.target(), "Game (U).sfc");
        assert_eq!(preview.entries.len(), 2);
        assert_eq!(preview.cache_dir, fx.cache_root.join("snes").join("Game"));
        assert_eq!(tool.extractions.load(Ordering::SeqCst), 0);
        assert!(fx.dispatcher.preview("a.sfc", None, "snes").await.is_err());
    }
}
