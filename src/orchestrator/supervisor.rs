//! Single-slot emulator process supervisor.
//!
//! At most one emulator process is tracked at a time. A second launch while one is
//! launching or running is rejected, never queued. Output of the tracked process is
//! relayed line by line onto the event channel, and its exit is reported exactly
//! once with a `closed` marker. `clear()` only forgets the process; it never kills it.

use crate::config::EmulatorConfig;
use crate::events::EventChannel;
use crate::model::{EventKind, LifecycleEvent, RequestId, RunningProcess, StatusMarker};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Lifecycle of the slot. `Closed` means the last tracked process exited; it
/// holds until the next launch or `clear()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Idle,
    Launching,
    Running,
    Closed,
}

impl SupervisorPhase {
    /// Whether an emulator is starting or running.
    pub fn is_active(self) -> bool {
        matches!(self, SupervisorPhase::Launching | SupervisorPhase::Running)
    }
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("{0} is already running")]
    Busy(String),
    #[error("unknown emulator: {0}")]
    UnknownEmulator(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

enum Slot {
    Idle,
    Launching,
    Running(RunningProcess),
}

struct Shared {
    slot: Slot,
    generation: u64,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<Mutex<Shared>>,
    catalog: Arc<BTreeMap<String, EmulatorConfig>>,
    events: EventChannel,
    phase_tx: Arc<watch::Sender<SupervisorPhase>>,
}

/// Split a parameter string into arguments, honoring single and double quotes.
pub fn split_params(params: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut has_token = false;

    for c in params.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                has_token = true;
            }
            None if c.is_whitespace() => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            None => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

/// Arguments for launching `target` with `emulator`.
pub fn launch_args(emulator: &EmulatorConfig, target: &Path) -> Vec<String> {
    let rom = target.to_string_lossy();
    let mut args = split_params(&emulator.params);
    let mut substituted = false;
    for arg in args.iter_mut() {
        if arg.contains("{rom}") {
            *arg = arg.replace("{rom}", &rom);
            substituted = true;
        }
    }
    if !substituted {
        args.push(rom.into_owned());
    }
    args
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

fn spawn_relay<R>(
    stream: R,
    kind: EventKind,
    request_id: RequestId,
    events: EventChannel,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    events.publish(LifecycleEvent::log(request_id, kind, line));
                }
            }
        }
    })
}

impl ProcessSupervisor {
    pub fn new(catalog: BTreeMap<String, EmulatorConfig>, events: EventChannel) -> Self {
        let (phase_tx, _) = watch::channel(SupervisorPhase::Idle);
        Self {
            shared: Arc::new(Mutex::new(Shared {
                slot: Slot::Idle,
                generation: 0,
            })),
            catalog: Arc::new(catalog),
            events,
            phase_tx: Arc::new(phase_tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: SupervisorPhase) {
        self.phase_tx.send_replace(phase);
    }

    pub fn phase(&self) -> SupervisorPhase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SupervisorPhase> {
        self.phase_tx.subscribe()
    }

    /// Snapshot of the tracked process, if any.
    pub fn current(&self) -> Option<RunningProcess> {
        match &self.lock().slot {
            Slot::Running(p) => Some(p.clone()),
            _ => None,
        }
    }

    fn terminal_error(&self, request_id: RequestId, message: String) {
        self.events.publish(LifecycleEvent::log(
            request_id,
            EventKind::EmulatorErrorLog,
            message,
        ));
        self.events
            .publish(LifecycleEvent::status(request_id, StatusMarker::Closed));
    }

    /// Start `target` with the emulator registered as `emulator_id`.
    pub fn launch(
        &self,
        request_id: RequestId,
        target: &Path,
        emulator_id: &str,
    ) -> Result<RunningProcess, SupervisorError> {
        let (emulator, generation) = {
            let mut shared = self.lock();
            let holder = match &shared.slot {
                Slot::Idle => None,
                Slot::Launching => Some("an emulator".to_string()),
                Slot::Running(p) => Some(p.display_name.clone()),
            };
            if let Some(holder) = holder {
                drop(shared);
                tracing::info!(%holder, target = %target.display(), "launch rejected, slot busy");
                self.events.publish(LifecycleEvent::log(
                    request_id,
                    EventKind::ConflictWarning,
                    format!(
                        "{holder} is already running; not launching {}",
                        target.display()
                    ),
                ));
                return Err(SupervisorError::Busy(holder));
            }

            let Some(emulator) = self.catalog.get(emulator_id).cloned() else {
                drop(shared);
                tracing::warn!(emulator_id, "unknown emulator");
                self.terminal_error(request_id, format!("unknown emulator: {emulator_id}"));
                return Err(SupervisorError::UnknownEmulator(emulator_id.to_string()));
            };

            shared.generation += 1;
            shared.slot = Slot::Launching;
            (emulator, shared.generation)
        };
        self.set_phase(SupervisorPhase::Launching);

        let args = launch_args(&emulator, target);
        tracing::info!(program = %emulator.program, ?args, "launching emulator");
        let spawned = Command::new(&emulator.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                {
                    let mut shared = self.lock();
                    if shared.generation == generation {
                        shared.slot = Slot::Idle;
                    }
                }
                self.set_phase(SupervisorPhase::Idle);
                self.terminal_error(
                    request_id,
                    format!("failed to start {}: {source}", emulator.program),
                );
                return Err(SupervisorError::Spawn {
                    program: emulator.program,
                    source,
                });
            }
        };

        let record = RunningProcess {
            emulator_id: emulator_id.to_string(),
            display_name: emulator.display_name_or(emulator_id).to_string(),
            output_path: target.to_path_buf(),
            pid: child.id(),
            started_at_utc: now_rfc3339(),
            generation,
        };
        {
            let mut shared = self.lock();
            if shared.generation == generation && matches!(shared.slot, Slot::Launching) {
                shared.slot = Slot::Running(record.clone());
            }
        }
        self.set_phase(SupervisorPhase::Running);
        self.events
            .publish(LifecycleEvent::status(request_id, StatusMarker::Running));

        let mut relays = Vec::new();
        if let Some(out) = child.stdout.take() {
            relays.push(spawn_relay(
                out,
                EventKind::EmulatorLog,
                request_id,
                self.events.clone(),
            ));
        }
        if let Some(err) = child.stderr.take() {
            relays.push(spawn_relay(
                err,
                EventKind::EmulatorErrorLog,
                request_id,
                self.events.clone(),
            ));
        }

        let supervisor = self.clone();
        let started = std::time::Instant::now();
        tokio::spawn(async move {
            let status = child.wait().await;
            for relay in relays {
                let _ = relay.await;
            }
            match &status {
                Ok(s) => tracing::info!(status = %s, elapsed = %humantime::format_duration(std::time::Duration::from_secs(started.elapsed().as_secs())), "emulator exited"),
                Err(e) => tracing::warn!(error = %e, "waiting on emulator failed"),
            }
            supervisor.finish(request_id, generation);
        });

        Ok(record)
    }

    fn finish(&self, request_id: RequestId, generation: u64) {
        let owns_slot = {
            let mut shared = self.lock();
            let owns = shared.generation == generation;
            if owns {
                shared.slot = Slot::Idle;
            }
            owns
        };
        self.events
            .publish(LifecycleEvent::status(request_id, StatusMarker::Closed));
        if owns_slot {
            self.set_phase(SupervisorPhase::Closed);
        }
    }

    /// Forget the tracked process without terminating it.
    pub fn clear(&self) -> Option<RunningProcess> {
        let previous = {
            let mut shared = self.lock();
            match std::mem::replace(&mut shared.slot, Slot::Idle) {
                Slot::Running(p) => Some(p),
                _ => None,
            }
        };
        self.set_phase(SupervisorPhase::Idle);
        if let Some(p) = previous.as_ref() {
            tracing::info!(display_name = %p.display_name, pid = ?p.pid, "stopped tracking emulator");
        }
        previous
    }
}
