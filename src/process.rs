//! External tool invocation: argument lists are built as plain values and handed to a
//! [`ProcessRunner`], so the encoder decision logic can be tested without spawning anything.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::EncoderError;

/// An ordered list of argument tokens plus the program that receives them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// True when `tokens` appear back to back somewhere in the argument list.
    pub fn contains(&self, tokens: &[&str]) -> bool {
        if tokens.is_empty() {
            return true;
        }
        self.args
            .windows(tokens.len())
            .any(|window| {
                window
                    .iter()
                    .zip(tokens)
                    .all(|(arg, token)| arg.as_os_str() == OsStr::new(token))
            })
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the command to completion. Failing to start or to finish in time is an
    /// [`EncoderError`]; a non-zero exit is reported through [`ProcessOutput::code`].
    async fn run(&self, command: &CommandLine) -> Result<ProcessOutput, EncoderError>;
}

/// Spawns real processes, one at a time, each bounded by a timeout.
pub struct TokioRunner {
    timeout: Duration,
    lock: Mutex<()>,
}

impl TokioRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(&self, command: &CommandLine) -> Result<ProcessOutput, EncoderError> {
        let program = command.program().to_string_lossy().into_owned();

        let _lock = self.lock.lock().await;
        debug!(%command, "spawning");

        let child = Command::new(command.program())
            .args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EncoderError::new(format!("failed to start '{program}': {e}")))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(EncoderError::new(format!("failed to wait on '{program}': {e}")))
            }
            Err(_) => {
                return Err(EncoderError::new(format!(
                    "'{program}' killed after running for {}",
                    humantime::format_duration(self.timeout)
                )))
            }
        };

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
