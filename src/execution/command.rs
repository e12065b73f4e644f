//! Infrastructure backed by an external program.
//!
//! [`CommandInfrastructure`] runs one process per operation:
//!
//! ```text
//! <program> [base args...] <op> <args-json>
//! ```
//!
//! Exit code 0 is a successful response carrying stdout as its message. A
//! non-zero exit code becomes the response code with stderr as the message.
//! Timeouts are reported as [`InfraError::Unavailable`] so that retryable
//! subtasks may try again; failing to launch the program is
//! [`InfraError::Io`].
//!
//! ```rust
//! use commissioner::CommandInfrastructure;
//! use std::time::Duration;
//!
//! let infra = CommandInfrastructure::builder("/opt/yb/bin/node-agent")
//!     .arg("--json")
//!     .env("YB_HOME", "/opt/yb")
//!     .timeout(Duration::from_secs(120))
//!     .build();
//! assert_eq!(infra.program(), "/opt/yb/bin/node-agent");
//! ```
//!
//! When a timeout occurs the child process is killed as the command future
//! is dropped; scripts that need cleanup should handle it themselves.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::core::infra::{InfraError, Infrastructure, OpRequest, OpResponse};

/// Infrastructure that shells out to an external program.
#[derive(Debug, Clone)]
pub struct CommandInfrastructure {
    /// Program to execute
    program: String,
    /// Arguments placed before the operation name
    args: Vec<String>,
    /// Environment variables
    env: HashMap<String, String>,
    /// Working directory
    working_dir: Option<PathBuf>,
    /// Per-operation timeout
    timeout: Option<Duration>,
}

impl CommandInfrastructure {
    /// Create a new builder for the given program.
    pub fn builder(program: impl Into<String>) -> CommandInfrastructureBuilder {
        CommandInfrastructureBuilder::new(program)
    }

    /// Get the program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the base arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get the timeout duration.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl Infrastructure for CommandInfrastructure {
    async fn invoke(&self, request: &OpRequest) -> Result<OpResponse, InfraError> {
        let args_json =
            serde_json::to_string(&request.args).map_err(|e| InfraError::Io(e.to_string()))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.arg(&request.op);
        cmd.arg(args_json);
        cmd.envs(&self.env);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(program = %self.program, op = %request.op, "invoking infrastructure command");

        let output = match self.timeout {
            Some(duration) => timeout(duration, cmd.output())
                .await
                .map_err(|_| {
                    InfraError::Unavailable(format!(
                        "{} timed out after {:?}",
                        request.op, duration
                    ))
                })?
                .map_err(|e| InfraError::Io(e.to_string()))?,
            None => cmd
                .output()
                .await
                .map_err(|e| InfraError::Io(e.to_string()))?,
        };

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(OpResponse {
                code: 0,
                message: stdout,
            })
        } else {
            // Killed by a signal: no exit code.
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Ok(OpResponse::error(code, stderr))
        }
    }
}

/// Builder for creating `CommandInfrastructure` instances.
#[derive(Debug, Clone)]
pub struct CommandInfrastructureBuilder {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandInfrastructureBuilder {
    /// Create a new builder for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Add a base argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple base arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the per-operation timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Build the infrastructure.
    pub fn build(self) -> CommandInfrastructure {
        CommandInfrastructure {
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
            timeout: self.timeout,
        }
    }
}
