use crate::config::ToolConfig;
use crate::error::BackupError;
use crate::services::tool_runner::{ToolInvocation, ToolOutput, ToolRunner};
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// Builds dump/restore command lines and turns exit statuses into results.
/// Never retries: one failed invocation fails the request.
pub struct Invoker {
    runner: Arc<dyn ToolRunner>,
    tools: ToolConfig,
    archive_root: String,
}

impl Invoker {
    pub fn new(runner: Arc<dyn ToolRunner>, tools: ToolConfig, archive_root: &Path) -> Self {
        Self {
            runner,
            tools,
            archive_root: archive_root.to_string_lossy().into_owned(),
        }
    }

    /// `<dump> --uri=<target> --out=<working_dir>`
    pub async fn dump(&self, working_dir: &Path) -> Result<(), BackupError> {
        let invocation = ToolInvocation {
            program: self.tools.dump_tool.clone(),
            args: vec![
                self.uri_arg(),
                flag_with_path("--out=", working_dir),
            ],
            cwd: working_dir.to_path_buf(),
        };
        self.invoke("dump tool", &invocation).await
    }

    /// `<restore> --uri=<target> --dir=<extracted_dir>`
    pub async fn restore(&self, extracted_dir: &Path) -> Result<(), BackupError> {
        let invocation = ToolInvocation {
            program: self.tools.restore_tool.clone(),
            args: vec![
                self.uri_arg(),
                flag_with_path("--dir=", extracted_dir),
            ],
            cwd: extracted_dir.to_path_buf(),
        };
        self.invoke("restore tool", &invocation).await
    }

    fn uri_arg(&self) -> OsString {
        format!("--uri={}", self.tools.connection_target).into()
    }

    async fn invoke(&self, tool: &str, invocation: &ToolInvocation) -> Result<(), BackupError> {
        tracing::debug!(tool = %tool, cwd = %invocation.cwd.display(), "Invoking external tool");

        match self.runner.run(invocation).await {
            Ok(output) if output.success() => {
                tracing::debug!(tool = %tool, "External tool finished");
                Ok(())
            }
            Ok(output) => {
                let diagnostics = self.diagnostics(&output);
                tracing::warn!(tool = %tool, status = ?output.status, output = %diagnostics, "External tool failed");
                Err(BackupError::ExternalToolFailure {
                    tool: tool.to_string(),
                    status: output.status,
                    output: diagnostics,
                })
            }
            Err(e) => {
                tracing::warn!(tool = %tool, error = %e, "External tool could not run");
                Err(BackupError::ExternalToolFailure {
                    tool: tool.to_string(),
                    status: None,
                    output: self.redact(&e.to_string()),
                })
            }
        }
    }

    /// Captured stderr then stdout, with secrets and host paths masked.
    fn diagnostics(&self, output: &ToolOutput) -> String {
        let combined = [output.stderr.trim(), output.stdout.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let redacted = self.redact(&combined);
        truncate(&redacted, MAX_DIAGNOSTIC_CHARS)
    }

    fn redact(&self, text: &str) -> String {
        let mut text = text.to_string();
        if !self.tools.connection_target.is_empty() {
            text = text.replace(&self.tools.connection_target, "<connection>");
        }
        if !self.archive_root.is_empty() {
            text = text.replace(&self.archive_root, "<archive-dir>");
        }
        text
    }
}

fn flag_with_path(flag: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(path.as_os_str());
    arg
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{tool_config, FakeRunner};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dump_passes_each_argument_separately() {
        let temp_dir = TempDir::new().unwrap();
        let work = temp_dir.path().join("dump dir");
        std::fs::create_dir(&work).unwrap();
        let runner = Arc::new(FakeRunner::default());
        let invoker = Invoker::new(runner.clone(), tool_config(), temp_dir.path());

        invoker.dump(&work).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "/opt/mongo tools/mongodump");
        assert_eq!(calls[0].args[0], OsString::from("--uri=mongodb://admin:hunter2@db:27017"));
        assert_eq!(calls[0].args[1], flag_with_path("--out=", &work));
        assert_eq!(calls[0].cwd, work);
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_redacted_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::failing(
            1,
            "connection refused: mongodb://admin:hunter2@db:27017",
        ));
        let invoker = Invoker::new(runner, tool_config(), temp_dir.path());

        let err = invoker.dump(temp_dir.path()).await.unwrap_err();
        match err {
            BackupError::ExternalToolFailure { tool, status, output } => {
                assert_eq!(tool, "dump tool");
                assert_eq!(status, Some(1));
                assert!(output.contains("connection refused"));
                assert!(!output.contains("hunter2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_restore_uses_dir_flag() {
        let temp_dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::default());
        let invoker = Invoker::new(runner.clone(), tool_config(), temp_dir.path());

        invoker.restore(temp_dir.path()).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].program, "/opt/mongo tools/mongorestore");
        assert_eq!(calls[0].args[1], flag_with_path("--dir=", temp_dir.path()));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("ééé", 2), "éé…");
        assert_eq!(truncate("short", 10), "short");
    }
}
