//! `pg_dump` / `psql` strategy.
//!
//! Exports are plain SQL scripts with `--clean --if-exists`, so replaying one
//! drops and recreates every object. Restores pipe the script into `psql`
//! inside a single transaction that stops on the first error; a failed
//! restore leaves the database as it was.

use super::{
    Availability, DatabaseStrategy, Dump, DumpFormat, ExportOutcome, PreparedDump, RestoreReport,
};
use crate::db::ConnectionTarget;
use crate::error::{SnapshotError, SnapshotResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Longest stretch of tool stderr carried into an error message
const MAX_STDERR: usize = 2048;

/// Strategy backed by the PostgreSQL client tools
#[derive(Debug, Clone)]
pub struct NativeToolStrategy {
    dump_program: PathBuf,
    restore_program: PathBuf,
}

impl Default for NativeToolStrategy {
    fn default() -> Self {
        Self::postgres()
    }
}

impl NativeToolStrategy {
    /// `pg_dump` and `psql` from `PATH`
    pub fn postgres() -> Self {
        Self::with_programs("pg_dump", "psql")
    }

    /// Use specific executables
    pub fn with_programs(dump: impl Into<PathBuf>, restore: impl Into<PathBuf>) -> Self {
        Self {
            dump_program: dump.into(),
            restore_program: restore.into(),
        }
    }

    /// Probe the restore tool
    pub async fn probe_restore(&self) -> Availability {
        probe_program(&self.restore_program).await
    }
}

/// Run `<program> --version`. Only a program that cannot be found counts
/// as missing; any other failure means the tool is there but broken.
pub async fn probe_program(program: &Path) -> Availability {
    let name = program.display().to_string();
    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
            log::debug!("{name} available: {version}");
            Availability::Available(version)
        }
        Ok(out) => Availability::Broken(format!(
            "{name} --version exited with {}: {}",
            out.status,
            truncate(String::from_utf8_lossy(&out.stderr).trim())
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Availability::Missing(format!("{name} is not installed"))
        }
        Err(e) => Availability::Broken(format!("{name} could not be started: {e}")),
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_STDERR {
        return text.to_string();
    }
    let mut end = MAX_STDERR;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[async_trait]
impl DatabaseStrategy for NativeToolStrategy {
    fn name(&self) -> &'static str {
        "native"
    }

    fn format(&self) -> DumpFormat {
        DumpFormat::Sql
    }

    async fn probe(&self) -> Availability {
        probe_program(&self.dump_program).await
    }

    async fn try_export(
        &self,
        target: &ConnectionTarget,
        dir: &Path,
    ) -> SnapshotResult<ExportOutcome> {
        match self.probe().await {
            Availability::Available(version) => log::info!("Exporting with {version}"),
            Availability::Missing(reason) => return Ok(ExportOutcome::ToolUnavailable(reason)),
            Availability::Broken(reason) => return Err(SnapshotError::NativeTool(reason)),
        }

        let path = dir.join(DumpFormat::Sql.file_name());
        let output = Command::new(&self.dump_program)
            .args([
                "--format=plain",
                "--clean",
                "--if-exists",
                "--no-owner",
                "--no-privileges",
                "--file",
            ])
            .arg(&path)
            .args(target.cli_args())
            .envs(target.cli_env())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = target.scrub(String::from_utf8_lossy(&output.stderr).trim());
            return Err(SnapshotError::NativeTool(format!(
                "pg_dump exited with {}: {}",
                output.status,
                truncate(&stderr)
            )));
        }

        let size = tokio::fs::metadata(&path).await?.len();
        log::info!("pg_dump wrote {size} bytes for {target}");

        Ok(ExportOutcome::Dumped(Dump {
            path,
            format: DumpFormat::Sql,
            strategy: self.name(),
            counts: BTreeMap::new(),
            skipped: Vec::new(),
        }))
    }

    async fn prepare(&self, dump: &Path) -> SnapshotResult<PreparedDump> {
        let metadata = tokio::fs::metadata(dump)
            .await
            .map_err(|_| SnapshotError::InvalidArchive("SQL dump is missing".to_string()))?;
        if metadata.len() == 0 {
            return Err(SnapshotError::InvalidArchive("SQL dump is empty".to_string()));
        }

        // An SQL dump can only be replayed by psql; there is nothing to
        // fall back to.
        match self.probe_restore().await {
            Availability::Available(_) => {}
            Availability::Missing(reason) => return Err(SnapshotError::ToolUnavailable(reason)),
            Availability::Broken(reason) => return Err(SnapshotError::NativeTool(reason)),
        }

        Ok(PreparedDump {
            path: dump.to_path_buf(),
            manifest: None,
        })
    }

    async fn restore(
        &self,
        target: &ConnectionTarget,
        dump: PreparedDump,
    ) -> SnapshotResult<RestoreReport> {
        let mut child = Command::new(&self.restore_program)
            .args([
                "--quiet",
                "--no-psqlrc",
                "--single-transaction",
                "--set",
                "ON_ERROR_STOP=1",
                "--file",
                "-",
            ])
            .args(target.cli_args())
            .envs(target.cli_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Drain stderr concurrently so a chatty psql cannot fill the pipe
        // and stall while we are still writing its input.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SnapshotError::Internal("psql stdin was not captured".to_string()))?;
        let mut script = tokio::fs::File::open(&dump.path).await?;
        let piped = tokio::io::copy(&mut script, &mut stdin).await;
        drop(stdin);

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let stderr = target.scrub(stderr.trim());
            return Err(SnapshotError::NativeTool(format!(
                "psql exited with {status}: {}",
                truncate(&stderr)
            )));
        }
        // psql finished cleanly, so a write error here means it stopped
        // reading early and the script was not fully applied.
        let bytes = piped?;
        log::info!("psql replayed {bytes} bytes into {target}");

        Ok(RestoreReport::new(self.name()))
    }
}
