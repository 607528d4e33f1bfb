use crate::config::{EmulatorConfig, Settings};
use crate::engine::{ArchiveTool, SevenZipTool};
use crate::events::{EventChannel, Subscription};
use crate::model::{LaunchRequest, LifecycleEvent, RequestId};
use crate::orchestrator::{self, Dispatcher, Outcome, SweepLimits};
use crate::paths::LocalPathResolver;
use crate::text_summary::{self, Stream};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "romrunner",
    version,
    about = "Extract and launch ROMs with a single supervised emulator"
)]
pub struct Cli {
    /// ROM file or archive to launch
    pub path: Option<String>,

    /// Archive entry to launch instead of the automatic choice
    #[arg(long)]
    pub entry: Option<String>,

    /// Emulator id from the settings catalog
    #[arg(long, short = 'e')]
    pub emulator: Option<String>,

    /// Emulator program to use for this run (registered under --emulator, or "default")
    #[arg(long)]
    pub program: Option<String>,

    /// Parameters for --program; `{rom}` is replaced by the launched file
    #[arg(long, allow_hyphen_values = true)]
    pub params: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Print events as plain text (the default)
    #[arg(long, conflicts_with = "json")]
    pub text: bool,

    /// Run silently: suppress all output except errors
    #[arg(long)]
    pub silent: bool,

    /// Settings file (defaults to the platform config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Extraction cache root
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// 7-Zip executable
    #[arg(long)]
    pub seven_zip: Option<String>,

    /// Evict extractions unused for this many days
    #[arg(long)]
    pub max_age_days: Option<u64>,

    /// Evict oldest extractions until the cache is below this size
    #[arg(long)]
    pub max_total_size_mb: Option<u64>,

    /// Sweep the extraction cache and exit
    #[arg(long)]
    pub sweep: bool,

    /// Skip the eviction sweep normally run before launching
    #[arg(long)]
    pub no_startup_sweep: bool,

    /// Show the archive listing and the planned extraction without launching
    #[arg(long)]
    pub list: bool,

    /// Show the extraction cache contents and exit
    #[arg(long)]
    pub list_cache: bool,

    /// Delete one extraction directory from the cache and exit
    #[arg(long, value_name = "DIR")]
    pub evict: Option<PathBuf>,

    /// Read JSON launch requests from stdin, one per line
    #[arg(long)]
    pub stdin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Json,
    Silent,
}

impl OutputMode {
    fn from_args(args: &Cli) -> Self {
        if args.silent {
            OutputMode::Silent
        } else if args.json && !args.text {
            OutputMode::Json
        } else {
            OutputMode::Text
        }
    }
}

/// Routes lines to the blocking writer according to the output mode.
struct Printer {
    mode: OutputMode,
    tx: mpsc::UnboundedSender<OutputLine>,
}

impl Printer {
    fn event(&self, ev: &LifecycleEvent) -> Result<()> {
        match self.mode {
            OutputMode::Silent => {}
            OutputMode::Json => {
                let line = serde_json::to_string(ev)?;
                let _ = self.tx.send(OutputLine::Stdout(line));
            }
            OutputMode::Text => {
                let (stream, line) = text_summary::render_event(ev);
                let _ = self.tx.send(match stream {
                    Stream::Stdout => OutputLine::Stdout(line),
                    Stream::Stderr => OutputLine::Stderr(line),
                });
            }
        }
        Ok(())
    }

    fn report<T: serde::Serialize>(&self, value: &T, lines: Vec<String>) -> Result<()> {
        match self.mode {
            OutputMode::Silent => {}
            OutputMode::Json => {
                let out = serde_json::to_string_pretty(value)?;
                let _ = self.tx.send(OutputLine::Stdout(out));
            }
            OutputMode::Text => {
                for line in lines {
                    let _ = self.tx.send(OutputLine::Stdout(line));
                }
            }
        }
        Ok(())
    }
}

/// Generate a random request ID.
fn gen_request_id() -> RequestId {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b)
}

/// Load settings and apply CLI overrides.
pub fn build_settings(args: &Cli) -> Result<Settings> {
    let mut settings = match args.config.as_deref() {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load_default().context("failed to load settings")?,
    };
    if let Some(dir) = args.cache_dir.as_ref() {
        settings.cache_dir = Some(dir.clone());
    }
    if let Some(bin) = args.seven_zip.as_ref() {
        settings.seven_zip = bin.clone();
    }
    if let Some(days) = args.max_age_days {
        settings.max_age_days = days;
    }
    if let Some(mb) = args.max_total_size_mb {
        settings.max_total_size_mb = mb;
    }
    if let Some(program) = args.program.as_ref() {
        let id = args.emulator.clone().unwrap_or_else(|| "default".to_string());
        settings.emulators.insert(
            id,
            EmulatorConfig {
                program: program.clone(),
                params: args.params.clone().unwrap_or_default(),
                display_name: None,
            },
        );
    }
    Ok(settings)
}

/// Emulator to use: explicit flag, else the only catalog entry.
fn pick_emulator(args: &Cli, settings: &Settings) -> Result<String> {
    if let Some(id) = args.emulator.as_ref() {
        return Ok(id.clone());
    }
    if args.program.is_some() {
        return Ok("default".to_string());
    }
    let mut ids = settings.emulators.keys();
    match (ids.next(), ids.next()) {
        (Some(only), None) => Ok(only.clone()),
        (None, _) => Err(anyhow::anyhow!(
            "no emulator configured. Use --program or add one to the settings file."
        )),
        _ => Err(anyhow::anyhow!(
            "several emulators configured. Choose one with --emulator."
        )),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let settings = build_settings(&args)?;
    let limits = SweepLimits {
        max_age_days: settings.max_age_days,
        max_total_size_mb: settings.max_total_size_mb,
    };
    let tool: Arc<dyn ArchiveTool> = Arc::new(SevenZipTool::new(settings.seven_zip.clone()));
    let dispatcher = Dispatcher::new(
        settings,
        tool,
        Arc::new(LocalPathResolver::new()),
        EventChannel::new(),
    );

    let (out_tx, out_handle) = spawn_output_writer();
    let printer = Printer {
        mode: OutputMode::from_args(&args),
        tx: out_tx,
    };
    let res = run_mode(&args, &dispatcher, &printer, limits).await;
    drop(printer);
    let _ = out_handle.await;
    res
}

async fn run_mode(
    args: &Cli,
    dispatcher: &Dispatcher,
    printer: &Printer,
    limits: SweepLimits,
) -> Result<()> {
    let cache = dispatcher.cache().clone();

    if args.sweep {
        let report = orchestrator::sweep_cache(cache, limits).await?;
        return printer.report(&report, text_summary::sweep_lines(&report));
    }

    if args.list_cache {
        let records = orchestrator::cache_records(cache).await?;
        let now = std::time::SystemTime::now();
        let json: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "system": r.system,
                    "identity": r.identity,
                    "dir": r.dir,
                    "sizeBytes": r.size_bytes,
                    "lastUsed": time::OffsetDateTime::from(r.last_used)
                        .format(&time::format_description::well_known::Rfc3339)
                        .unwrap_or_default(),
                })
            })
            .collect();
        return printer.report(&json, text_summary::record_lines(&records, now));
    }

    if let Some(dir) = args.evict.as_ref() {
        let freed = orchestrator::remove_extraction(cache, dir.clone()).await?;
        let json = serde_json::json!({ "removed": dir, "freedBytes": freed });
        return printer.report(
            &json,
            vec![format!("Removed {} ({} bytes)", dir.display(), freed)],
        );
    }

    if args.list {
        let path = args
            .path
            .as_deref()
            .context("--list needs an archive path")?;
        let system = args.emulator.as_deref().unwrap_or("default");
        let preview = dispatcher
            .preview(path, args.entry.as_deref(), system)
            .await?;
        let json = serde_json::json!({
            "archive": preview.archive,
            "entries": preview.entries,
            "fullExtraction": preview.plan.is_full(),
            "target": preview.plan.target(),
            "cacheDir": preview.cache_dir,
        });
        return printer.report(&json, text_summary::preview_lines(&preview));
    }

    let startup_sweep = if args.no_startup_sweep {
        None
    } else {
        Some(orchestrator::spawn_startup_sweep(cache, limits))
    };

    let res = if args.stdin {
        run_stdin(dispatcher, printer).await
    } else {
        let path = args
            .path
            .clone()
            .context("no ROM given. Pass a path, or use --stdin, --sweep or --list-cache.")?;
        let emulator_id = pick_emulator(args, dispatcher.settings())?;
        let request = LaunchRequest::launch(path, emulator_id).with_entry(args.entry.clone());
        run_single(dispatcher, printer, request).await
    };

    if let Some(handle) = startup_sweep {
        let _ = handle.await;
    }
    res
}

fn drain(sub: &mut Subscription, printer: &Printer) -> Result<()> {
    while let Some(ev) = sub.try_recv() {
        printer.event(&ev)?;
    }
    Ok(())
}

/// Launch one request and follow it until the emulator closes.
async fn run_single(
    dispatcher: &Dispatcher,
    printer: &Printer,
    request: LaunchRequest,
) -> Result<()> {
    let request_id = gen_request_id();
    let mut sub = dispatcher.events().subscribe_request(request_id);
    let d = dispatcher.clone();
    let mut task = tokio::spawn(async move { d.handle(request_id, request).await });
    let mut outcome: Option<Outcome> = None;

    loop {
        tokio::select! {
            ev = sub.recv() => {
                let Some(ev) = ev else { break };
                printer.event(&ev)?;
                if ev.is_terminal() {
                    break;
                }
            }
            res = &mut task, if outcome.is_none() => {
                let o = res.context("dispatcher task failed")?;
                let launched = matches!(o, Outcome::Launched(_));
                outcome = Some(o);
                if !launched {
                    drain(&mut sub, printer)?;
                    break;
                }
            }
        }
    }

    let outcome = match outcome {
        Some(o) => o,
        None => task.await.context("dispatcher task failed")?,
    };
    dispatcher.events().forget(request_id);
    match outcome {
        Outcome::Launched(_) | Outcome::Cleared(_) => Ok(()),
        Outcome::Busy => Err(anyhow::anyhow!("another emulator is already running")),
        Outcome::Failed => Err(anyhow::anyhow!("launch failed")),
    }
}

/// Serve JSON launch requests from stdin until EOF, then wait for the emulator.
async fn run_stdin(dispatcher: &Dispatcher, printer: &Printer) -> Result<()> {
    let mut sub = dispatcher.events().subscribe();
    let (req_tx, req_rx) = mpsc::unbounded_channel::<(RequestId, LaunchRequest)>();
    let mut controller = tokio::spawn(orchestrator::run_controller(dispatcher.clone(), req_rx));

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut next_id: RequestId = 1;
    let mut stdin_open = true;
    while stdin_open {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match serde_json::from_str::<LaunchRequest>(&line) {
                        Ok(request) => {
                            let _ = req_tx.send((next_id, request));
                            next_id += 1;
                        }
                        Err(e) => tracing::warn!(error = %e, "ignoring malformed request"),
                    },
                    None => stdin_open = false,
                }
            }
            Some(ev) = sub.recv() => printer.event(&ev)?,
        }
    }
    drop(req_tx);

    let mut phase = dispatcher.supervisor().subscribe_phase();
    let mut controller_done = false;
    loop {
        tokio::select! {
            res = &mut controller, if !controller_done => {
                res.context("controller task failed")??;
                controller_done = true;
                if let Some(running) = dispatcher.supervisor().current() {
                    tracing::info!(
                        emulator = %running.display_name,
                        rom = %running.output_path.display(),
                        "input closed, waiting for emulator to exit"
                    );
                }
            }
            Some(ev) = sub.recv() => printer.event(&ev)?,
            changed = phase.changed(), if controller_done => {
                if changed.is_err() || !phase.borrow().is_active() {
                    break;
                }
            }
        }
        if controller_done && !dispatcher.supervisor().phase().is_active() {
            break;
        }
    }
    drain(&mut sub, printer)
}
