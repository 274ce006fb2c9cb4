//! Command execution with captured output and a hard timeout.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default timeout when a spec does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A single invocation: program, arguments and timeout.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable command line for logs. Environment values are omitted.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Result of a completed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

impl ProcessOutput {
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("{program} exited with {}: {output}", exit_label(.status))]
    Failed {
        program: String,
        status: Option<i32>,
        output: String,
    },
}

#[allow(clippy::ref_option)]
fn exit_label(status: &Option<i32>) -> String {
    status.map_or_else(|| "signal".to_string(), |code| format!("status {code}"))
}

impl GatewayError {
    /// Captured output, when the process ran.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Failed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Runs external executables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessGateway;

impl ProcessGateway {
    pub const fn new() -> Self {
        Self
    }

    /// Run `spec` to completion, returning its exit status and output.
    ///
    /// A non-zero exit is not an error here; see [`Self::run_checked`].
    /// On timeout the child is killed.
    pub async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, GatewayError> {
        let program = spec.program.display().to_string();
        debug!(cmd = %spec.display(), "exec");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(GatewayError::Spawn {
                    program,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(program = %program, timeout = ?spec.timeout, "Process timed out, killed");
                return Err(GatewayError::Timeout {
                    program,
                    secs: spec.timeout.as_secs(),
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let result = ProcessOutput {
            status: output.status.code(),
            output: combined,
        };
        info!(program = %program, status = ?result.status, "Process exited");
        Ok(result)
    }

    /// Like [`Self::run`], but a non-zero exit becomes [`GatewayError::Failed`].
    pub async fn run_checked(&self, spec: &CommandSpec) -> Result<ProcessOutput, GatewayError> {
        let result = self.run(spec).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(GatewayError::Failed {
                program: spec.program.display().to_string(),
                status: result.status,
                output: result.output,
            })
        }
    }
}
