//! Timeout-bounded child-process execution.
//!
//! `run_command` never returns an error: spawn failures and timeouts are
//! observations recorded in the returned [`RunOutcome`], because for a
//! differential oracle a crashing or hanging child is data, not a fault of
//! the harness itself.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use emuparity_error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use wait_timeout::ChildExt;

/// Current UTC time as ISO-8601 with second precision and `Z` suffix.
#[must_use]
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Terminal status of a single child run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The child ran to completion (any exit code, including signal death).
    Ok,
    /// The child was killed after exceeding the deadline.
    Timeout,
    /// The child could not be launched or reaped.
    Error,
}

/// Complete observation of one child run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub timed_out: bool,
    /// `None` when the child timed out, failed to launch, or died on a signal.
    pub exit_code: Option<i32>,
    pub command: Vec<String>,
    pub cwd: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutcome {
    /// Reads a standalone run document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|err| HarnessError::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }
}

/// Runs `command` to completion or until `timeout` expires.
///
/// The child inherits the harness environment plus `env_overrides`. Output
/// already buffered when a timeout fires is salvaged into the outcome.
#[must_use]
pub fn run_command(
    command: &[String],
    cwd: Option<&Path>,
    env_overrides: &BTreeMap<String, String>,
    timeout: Duration,
) -> RunOutcome {
    let started_at = utc_now_iso();
    let clock = Instant::now();

    let (status, timed_out, exit_code, stdout, stderr) =
        execute(command, cwd, env_overrides, timeout);

    let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
    RunOutcome {
        status,
        timed_out,
        exit_code,
        command: command.to_vec(),
        cwd: cwd.map(|dir| dir.display().to_string()),
        started_at,
        finished_at: utc_now_iso(),
        duration_ms,
        stdout,
        stderr,
    }
}

fn execute(
    command: &[String],
    cwd: Option<&Path>,
    env_overrides: &BTreeMap<String, String>,
    timeout: Duration,
) -> (RunStatus, bool, Option<i32>, String, String) {
    let Some((program, args)) = command.split_first() else {
        return (
            RunStatus::Error,
            false,
            None,
            String::new(),
            "empty command".to_string(),
        );
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env_overrides {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(program = %program, error = %err, "failed to spawn child");
            return (
                RunStatus::Error,
                false,
                None,
                String::new(),
                format!("spawn failed: {program}: {err}"),
            );
        }
    };

    let stdout_handle = drain(child.stdout.take());
    let stderr_handle = drain(child.stderr.take());

    match child.wait_timeout(timeout) {
        Ok(Some(exit)) => {
            let stdout = collect(stdout_handle);
            let stderr = collect(stderr_handle);
            (RunStatus::Ok, false, exit.code(), stdout, stderr)
        }
        Ok(None) => {
            warn!(program = %program, timeout_ms = timeout.as_millis() as u64, "child exceeded deadline, killing");
            let _ = child.kill();
            let _ = child.wait();
            let stdout = collect(stdout_handle);
            let stderr = collect(stderr_handle);
            (RunStatus::Timeout, true, None, stdout, stderr)
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            let stdout = collect(stdout_handle);
            (
                RunStatus::Error,
                false,
                None,
                stdout,
                format!("wait failed: {err}"),
            )
        }
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}
