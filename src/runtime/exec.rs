//! Runtime invocation surface.
//!
//! A thin process-execution wrapper around `docker`/`podman` and their compose
//! tools: argument vectors in, `(stdout, stderr, exit code)` out. Callers treat
//! a non-zero exit as failure and only surface stderr to operators.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// A single process invocation with its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute (absolute path or bare name)
    pub program: PathBuf,
    /// Argument vector, excluding the program
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Hard deadline; the child is killed when it elapses
    pub timeout: Duration,
}

impl Invocation {
    /// Creates an invocation with no arguments.
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Short program name (file name of `program`).
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Human-readable command line for diagnostics.
    pub fn display(&self) -> String {
        let mut line = self.program_name();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` when terminated by a signal)
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a process that exited with `code`.
    pub fn with_code(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Default::default()
        }
    }

    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Trimmed stdout.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Errors starting or waiting on a runtime process.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The program could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        /// Command line
        command: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed
    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        /// Command line
        command: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its deadline and was killed
    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    TimedOut {
        /// Command line
        command: String,
        /// Deadline that elapsed
        timeout: Duration,
    },
}

impl ExecError {
    /// Timeouts are the only invocation failures worth retrying.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::TimedOut { .. })
    }
}

/// Executes runtime processes. Implemented by [`SystemRunner`] and by test doubles.
pub trait ProcessRunner: Send + Sync {
    /// Runs the invocation to completion or until its timeout elapses.
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<CommandOutput, ExecError>> + Send;

    /// Resolves a program name on the runner's search path.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Runs real processes through `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    search_path: Option<OsString>,
}

impl SystemRunner {
    /// Runner resolving programs on the process `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner resolving programs on an explicit search path.
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }
}

impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child on timeout or cancellation kills it
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }

        log::debug!("exec: {}", invocation.display());

        let child = command.spawn().map_err(|source| ExecError::Spawn {
            command: invocation.display(),
            source,
        })?;

        match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(source)) => Err(ExecError::Wait {
                command: invocation.display(),
                source,
            }),
            Err(_elapsed) => {
                log::warn!(
                    "`{}` timed out after {}s, terminating...",
                    invocation.display(),
                    invocation.timeout.as_secs()
                );
                Err(ExecError::TimedOut {
                    command: invocation.display(),
                    timeout: invocation.timeout,
                })
            }
        }
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| Path::new("/").to_path_buf());
                which::which_in(program, Some(paths), cwd)
            }
            None => which::which(program),
        };
        match found {
            Ok(path) => {
                log::debug!("Found {} at: {}", program, path.display());
                Some(path)
            }
            Err(e) => {
                log::debug!("{} not found in PATH: {}", program, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_name_and_args() {
        let inv = Invocation::new("/usr/bin/docker", Duration::from_secs(1))
            .arg("compose")
            .args(["-p", "stack", "up"]);
        assert_eq!(inv.display(), "docker compose -p stack up");
    }

    #[test]
    fn locate_on_empty_search_path_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner::with_search_path(dir.path().as_os_str());
        assert!(runner.locate("docker").is_none());
        assert!(runner.locate("podman").is_none());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = SystemRunner::new();
        let inv = Invocation::new("/nonexistent/definitely-not-a-runtime", Duration::from_secs(1));
        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert!(!err.is_timeout());
    }
}
