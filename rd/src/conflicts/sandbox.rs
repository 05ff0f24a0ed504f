//! Sandboxed regeneration of generated files
//!
//! Three independent checks guard every run: the command must be on the
//! allow-list and name a bare executable, the working directory must resolve
//! inside the base directory, and the child gets a minimal environment with
//! install scripts disabled. A wall-clock timeout escalates from SIGTERM to
//! SIGKILL.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::partition::regen_command_for;

/// Variables copied from the parent environment when present
const PASSTHROUGH_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "CARGO_HOME",
    "RUSTUP_HOME",
    "GOPATH",
    "GOCACHE",
    "GOMODCACHE",
];

/// Variables forced on every child
const FIXED_ENV: &[(&str, &str)] = &[
    ("LANG", "C.UTF-8"),
    ("npm_config_ignore_scripts", "true"),
    ("YARN_ENABLE_SCRIPTS", "false"),
    ("COMPOSER_NO_INTERACTION", "1"),
];

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("command not allowed: {0}")]
    DisallowedCommand(String),

    #[error("working directory {workdir} is outside {base}")]
    Escape { workdir: PathBuf, base: PathBuf },

    #[error("failed to resolve {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("{command} exited with {code}: {stderr}")]
    Failed { command: String, code: i32, stderr: String },
}

/// Output of a successful sandboxed run
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut p) = pipe {
        let _ = p.read_to_string(&mut buf).await;
    }
    buf
}

/// Minimal environment for a regeneration child
pub fn minimal_env() -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = PASSTHROUGH_ENV
        .iter()
        .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
        .collect();
    if !env.iter().any(|(k, _)| k == "PATH") {
        env.push(("PATH".to_string(), DEFAULT_PATH.to_string()));
    }
    env.extend(FIXED_ENV.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    env
}

/// Runs allow-listed commands under a base directory
pub struct Sandbox {
    base_dir: PathBuf,
    allowed: Vec<Vec<String>>,
    timeout: Duration,
    grace: Duration,
}

impl Sandbox {
    /// Sandbox allowing the regeneration commands of every known generated file
    pub fn new(base_dir: impl Into<PathBuf>, timeout: Duration, grace: Duration) -> Self {
        let allowed = [
            "Cargo.lock",
            "package-lock.json",
            "yarn.lock",
            "pnpm-lock.yaml",
            "poetry.lock",
            "Gemfile.lock",
            "go.sum",
            "composer.lock",
        ]
        .iter()
        .filter_map(|f| regen_command_for(f))
        .map(|argv| argv.iter().map(|s| s.to_string()).collect())
        .collect();
        Self {
            base_dir: base_dir.into(),
            allowed,
            timeout,
            grace,
        }
    }

    /// Replace the allow-list
    pub fn with_allowed(mut self, allowed: Vec<Vec<String>>) -> Self {
        self.allowed = allowed;
        self
    }

    fn check_command(&self, argv: &[&str]) -> Result<(), SandboxError> {
        let display = argv.join(" ");
        let Some(program) = argv.first() else {
            return Err(SandboxError::DisallowedCommand(display));
        };
        if program.contains('/') || program.contains('\\') {
            return Err(SandboxError::DisallowedCommand(display));
        }
        if !self.allowed.iter().any(|a| a.iter().map(|s| s.as_str()).eq(argv.iter().copied())) {
            return Err(SandboxError::DisallowedCommand(display));
        }
        Ok(())
    }

    fn check_workdir(&self, workdir: &Path) -> Result<PathBuf, SandboxError> {
        let resolve = |p: &Path| {
            p.canonicalize().map_err(|source| SandboxError::Resolve {
                path: p.to_path_buf(),
                source,
            })
        };
        let base = resolve(&self.base_dir)?;
        let real = resolve(workdir)?;
        if !real.starts_with(&base) {
            return Err(SandboxError::Escape { workdir: real, base });
        }
        Ok(real)
    }

    /// Run `argv` in `workdir`
    pub async fn run(&self, workdir: &Path, argv: &[&str]) -> Result<SandboxOutput, SandboxError> {
        debug!(?argv, ?workdir, "Sandbox::run: called");
        self.check_command(argv)?;
        let real = self.check_workdir(workdir)?;
        let command = argv.join(" ");
        info!(%command, workdir = %real.display(), "Regenerating in sandbox");

        let mut child = Command::new(argv[0])
            .args(&argv[1..])
            .current_dir(&real)
            .env_clear()
            .envs(minimal_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let readers = async { tokio::join!(read_pipe(stdout), read_pipe(stderr)) };

        let waited = tokio::time::timeout(self.timeout, async {
            let (out, err) = readers.await;
            (child.wait().await, out, err)
        })
        .await;

        match waited {
            Ok((Ok(status), stdout, stderr)) => {
                if status.success() {
                    Ok(SandboxOutput { stdout, stderr })
                } else {
                    Err(SandboxError::Failed {
                        command,
                        code: status.code().unwrap_or(-1),
                        stderr: stderr.trim().to_string(),
                    })
                }
            }
            Ok((Err(source), _, _)) => Err(SandboxError::Spawn { command, source }),
            Err(_) => {
                warn!(%command, timeout = ?self.timeout, "Regeneration timed out, terminating");
                self.terminate(&mut child).await;
                Err(SandboxError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
        }
    }

    /// SIGTERM, wait out the grace period, then SIGKILL
    async fn terminate(&self, child: &mut tokio::process::Child) {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            debug!(pid, "Sandbox::terminate: sending SIGTERM");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => debug!("Sandbox::terminate: child exited after SIGTERM"),
            Err(_) => {
                warn!("Child ignored SIGTERM, sending SIGKILL");
                let _ = child.kill().await;
            }
        }
    }
}
