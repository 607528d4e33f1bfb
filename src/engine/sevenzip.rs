//! `ArchiveTool` backed by the 7-Zip command line binary.

use super::archive::{ArchiveError, ArchiveTool, ExtractScope, ExtractionStage};
use crate::model::ArchiveEntry;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

/// Lines of stderr kept for error details.
const ERROR_TAIL_LINES: usize = 5;

pub struct SevenZipTool {
    program: String,
}

impl SevenZipTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::null());
        cmd
    }

    async fn list_impl(&self, archive: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        tracing::debug!(tool = %self.program, archive = %archive.display(), "listing archive");
        let output = self
            .command()
            .arg("l")
            .arg("-slt")
            .arg("--")
            .arg(archive)
            .output()
            .await
            .map_err(|source| ArchiveError::ToolUnavailable {
                tool: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ArchiveError::List {
                path: archive.to_path_buf(),
                details: error_details(&output.stderr, output.status.code()),
            });
        }
        Ok(parse_slt_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn extract_impl(
        &self,
        archive: &Path,
        dest: &Path,
        scope: ExtractScope,
        stages: mpsc::UnboundedSender<ExtractionStage>,
    ) -> Result<(), ArchiveError> {
        let mut cmd = self.command();
        cmd.arg("x")
            .arg("-y")
            .arg("-bsp1")
            .arg("-bb0")
            .arg(format!("-o{}", dest.display()))
            .arg("--")
            .arg(archive);
        if let ExtractScope::Single(entry) = &scope {
            cmd.arg(entry);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        tracing::debug!(tool = %self.program, archive = %archive.display(), dest = %dest.display(), ?scope, "extracting");
        let mut child = cmd.spawn().map_err(|source| ArchiveError::ToolUnavailable {
            tool: self.program.clone(),
            source,
        })?;

        let stderr_task = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf).await;
                buf
            })
        });

        if let Some(mut out) = child.stdout.take() {
            let mut chunk = [0u8; 1024];
            let mut pending: Vec<u8> = Vec::new();
            let mut last_percent: Option<u8> = None;
            loop {
                let n = match out.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                pending.extend_from_slice(&chunk[..n]);
                // 7z redraws progress in place with `\r` and backspaces.
                while let Some(pos) = pending
                    .iter()
                    .position(|&b| b == b'\r' || b == b'\n' || b == 0x08)
                {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
                    if let Some((percent, detail)) = parse_progress(&text) {
                        if last_percent != Some(percent) {
                            last_percent = Some(percent);
                            let _ = stages.send(ExtractionStage::Progress { percent, detail });
                        }
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| ArchiveError::Extraction {
            path: archive.to_path_buf(),
            details: e.to_string(),
        })?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if status.success() {
            let _ = stages.send(ExtractionStage::Completed);
            Ok(())
        } else {
            let details = error_details(&stderr, status.code());
            let _ = stages.send(ExtractionStage::Failed(details.clone()));
            Err(ArchiveError::Extraction {
                path: archive.to_path_buf(),
                details,
            })
        }
    }
}

impl ArchiveTool for SevenZipTool {
    fn list<'a>(&'a self, archive: &'a Path) -> BoxFuture<'a, Result<Vec<ArchiveEntry>, ArchiveError>> {
        self.list_impl(archive).boxed()
    }

    fn extract<'a>(
        &'a self,
        archive: &'a Path,
        dest: &'a Path,
        scope: ExtractScope,
        stages: mpsc::UnboundedSender<ExtractionStage>,
    ) -> BoxFuture<'a, Result<(), ArchiveError>> {
        self.extract_impl(archive, dest, scope, stages).boxed()
    }
}

fn error_details(stderr: &[u8], code: Option<i32>) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let tail = lines[lines.len().saturating_sub(ERROR_TAIL_LINES)..].join(" | ");
    match (tail.is_empty(), code) {
        (true, Some(c)) => format!("exit code {c}"),
        (true, None) => "terminated by signal".to_string(),
        (false, Some(c)) => format!("exit code {c}: {tail}"),
        (false, None) => tail,
    }
}

/// Parse a `7z l -slt` technical listing. Blocks before the `----------`
/// separator describe the archive itself and are skipped, as are folders.
pub fn parse_slt_listing(output: &str) -> Vec<ArchiveEntry> {
    let Some((_, body)) = output.split_once("\n----------") else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    let mut path: Option<String> = None;
    let mut size: u64 = 0;
    let mut is_dir = false;

    let mut flush = |path: &mut Option<String>, size: &mut u64, is_dir: &mut bool| {
        if let Some(p) = path.take() {
            if !*is_dir {
                entries.push(ArchiveEntry::new(p, *size));
            }
        }
        *size = 0;
        *is_dir = false;
    };

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            flush(&mut path, &mut size, &mut is_dir);
            continue;
        }
        let Some((key, value)) = line.split_once(" = ").or_else(|| {
            line.strip_suffix(" =").map(|k| (k, ""))
        }) else {
            continue;
        };
        match key {
            "Path" => {
                flush(&mut path, &mut size, &mut is_dir);
                path = Some(value.to_string());
            }
            "Size" => size = value.trim().parse().unwrap_or(0),
            "Folder" => is_dir = value.trim() == "+",
            "Attributes" => is_dir = is_dir || value.trim_start().starts_with('D'),
            _ => {}
        }
    }
    flush(&mut path, &mut size, &mut is_dir);
    entries
}

/// Parse a `-bsp1` progress fragment such as ` 42% 3 - Game (U) [!].bin`.
pub fn parse_progress(text: &str) -> Option<(u8, String)> {
    let trimmed = text.trim();
    let (num, rest) = trimmed.split_once('%')?;
    let percent: u8 = num.trim().parse().ok()?;
    let detail = rest
        .trim()
        .split_once(" - ")
        .map(|(_, name)| name.trim().to_string())
        .unwrap_or_default();
    Some((percent.min(100), detail))
}
