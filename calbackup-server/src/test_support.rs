//! Fake tool runner shared by the unit tests.

use crate::config::ToolConfig;
use crate::services::tool_runner::{ToolInvocation, ToolOutput, ToolRunner};
use futures_util::future::BoxFuture;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const DUMP_TOOL: &str = "/opt/mongo tools/mongodump";
pub const RESTORE_TOOL: &str = "/opt/mongo tools/mongorestore";

pub fn tool_config() -> ToolConfig {
    ToolConfig {
        dump_tool: DUMP_TOOL.into(),
        restore_tool: RESTORE_TOOL.into(),
        connection_target: "mongodb://admin:hunter2@db:27017".into(),
        timeout: None,
    }
}

/// `path` expressed relative to the current directory, by climbing to the
/// filesystem root with `..` and descending again.
pub fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let depth = cwd
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    let mut relative = PathBuf::new();
    for _ in 0..depth {
        relative.push("..");
    }
    for component in path.components() {
        if let Component::Normal(part) = component {
            relative.push(part);
        }
    }
    relative
}

struct Failure {
    only: Option<&'static str>,
    status: i32,
    stderr: String,
}

/// Mimics mongodump by writing a small dump tree into its working directory,
/// and records what the restore tool found in its extraction directory.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<ToolInvocation>>,
    restored: Mutex<Vec<Option<Vec<u8>>>>,
    failure: Option<Failure>,
    delay: Duration,
}

impl FakeRunner {
    /// `{cwd}` in `stderr` becomes the directory the tool ran in, the way
    /// real tools report the paths they failed on.
    pub fn failing(status: i32, stderr: &str) -> Self {
        Self {
            failure: Some(Failure {
                only: None,
                status,
                stderr: stderr.into(),
            }),
            ..Self::default()
        }
    }

    pub fn failing_restore(status: i32, stderr: &str) -> Self {
        Self {
            failure: Some(Failure {
                only: Some(RESTORE_TOOL),
                status,
                stderr: stderr.into(),
            }),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, program: &str) -> usize {
        self.calls().iter().filter(|c| c.program == program).count()
    }

    /// Contents of `appdb/users.bson` as seen by each restore invocation.
    pub fn restored(&self) -> Vec<Option<Vec<u8>>> {
        self.restored.lock().unwrap().clone()
    }
}

impl ToolRunner for FakeRunner {
    fn run<'a>(&'a self, invocation: &'a ToolInvocation) -> BoxFuture<'a, io::Result<ToolOutput>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(invocation.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if invocation.program == RESTORE_TOOL {
                let payload = std::fs::read(invocation.cwd.join("appdb/users.bson")).ok();
                self.restored.lock().unwrap().push(payload);
            }

            // Written before any failure so a failed dump leaves partial output.
            if invocation.program == DUMP_TOOL {
                std::fs::create_dir_all(invocation.cwd.join("appdb"))?;
                std::fs::write(invocation.cwd.join("appdb/users.bson"), b"users")?;
            }

            if let Some(failure) = &self.failure {
                if failure.only.map_or(true, |p| p == invocation.program) {
                    return Ok(ToolOutput {
                        status: Some(failure.status),
                        stdout: String::new(),
                        stderr: failure
                            .stderr
                            .replace("{cwd}", &invocation.cwd.to_string_lossy()),
                    });
                }
            }

            Ok(ToolOutput {
                status: Some(0),
                ..ToolOutput::default()
            })
        })
    }
}
