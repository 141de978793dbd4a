//! Narrow seam around child-process execution so the workflows can be
//! driven by a fake runner in tests.

use futures_util::future::BoxFuture;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    /// One element per argv entry; nothing is interpreted by a shell.
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

pub trait ToolRunner: Send + Sync {
    /// Runs the invocation to completion. `Err` means the process could not be
    /// spawned or did not finish in time; a nonzero exit is still `Ok`.
    fn run<'a>(&'a self, invocation: &'a ToolInvocation) -> BoxFuture<'a, io::Result<ToolOutput>>;
}

/// Runs tools as real child processes.
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ToolRunner for ProcessRunner {
    fn run<'a>(&'a self, invocation: &'a ToolInvocation) -> BoxFuture<'a, io::Result<ToolOutput>> {
        Box::pin(async move {
            let mut command = tokio::process::Command::new(&invocation.program);
            command
                .args(&invocation.args)
                .current_dir(&invocation.cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                // Only reached on timeout: the surrounding task is never aborted.
                .kill_on_drop(true);

            let output = match self.timeout {
                Some(limit) => tokio::time::timeout(limit, command.output())
                    .await
                    .map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("timed out after {}s", limit.as_secs()),
                        )
                    })??,
                None => command.output().await?,
            };

            Ok(ToolOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
