//! Subprocess runner shared by the agent adapters

use eyre::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// stdout lines kept for classification when stderr is empty
pub const ERROR_TAIL_LINES: usize = 20;

/// Output from a subprocess execution
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Text an agent failure is classified from
    ///
    /// stderr when the agent wrote any, otherwise the tail of stdout. The
    /// rest of stdout is the agent's transcript and quotes arbitrary code.
    pub fn error_text(&self) -> String {
        if !self.stderr.trim().is_empty() {
            return self.stderr.trim_end().to_string();
        }
        let lines: Vec<&str> = self.stdout.trim_end().lines().collect();
        lines[lines.len().saturating_sub(ERROR_TAIL_LINES)..].join("\n")
    }
}

/// Run `program args...` directly (no shell) with a wall-clock timeout
///
/// The child is killed when the timeout fires.
pub async fn run_process(program: &str, args: &[String], cwd: &Path, timeout: Duration) -> Result<ProcessOutput> {
    debug!(%program, arg_count = args.len(), ?cwd, ?timeout, "run_process: called");

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        // Allow nested agent CLIs to run under a parent agent session
        .env_remove("CLAUDECODE")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context(format!("failed to spawn: {}", program))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let result = ProcessOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
            };
            debug!(exit_code = result.exit_code, stdout_len = result.stdout.len(), "run_process: completed");
            Ok(result)
        }
        Ok(Err(e)) => Err(e).context(format!("subprocess failed: {}", program)),
        Err(_) => {
            warn!(%program, ?timeout, "Subprocess timed out");
            Ok(ProcessOutput {
                stdout: String::new(),
                stderr: format!("Process timed out after {:?}", timeout),
                exit_code: -1,
                timed_out: true,
            })
        }
    }
}
