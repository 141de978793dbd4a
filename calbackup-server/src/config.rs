use crate::error::BackupError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub backup_dir: PathBuf,
    pub tools: ToolConfig,
    /// Six-field cron expression (seconds first); `None` disables the scheduler.
    pub backup_cron: Option<String>,
    pub log_level: String,
}

/// External dump/restore executables and the database they point at.
#[derive(Clone)]
pub struct ToolConfig {
    pub dump_tool: String,
    pub restore_tool: String,
    pub connection_target: String,
    pub timeout: Option<Duration>,
}

// The connection target may embed credentials.
impl fmt::Debug for ToolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolConfig")
            .field("dump_tool", &self.dump_tool)
            .field("restore_tool", &self.restore_tool)
            .field("connection_target", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, BackupError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Every missing required key is
    /// reported at once so startup fails before the first request.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BackupError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            let value = non_empty(key);
            if value.is_none() {
                missing.push(key);
            }
            value.unwrap_or_default()
        };
        let dump_tool = required("DUMP_TOOL");
        let restore_tool = required("RESTORE_TOOL");
        let connection_target = required("DATABASE_URI");
        if !missing.is_empty() {
            return Err(BackupError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let port = match non_empty("PORT") {
            Some(v) => v
                .parse()
                .map_err(|_| BackupError::Config(format!("PORT '{v}' is not a valid port")))?,
            None => 5000,
        };

        let timeout_secs = match non_empty("TOOL_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().map_err(|_| {
                BackupError::Config(format!("TOOL_TIMEOUT_SECS '{v}' is not a number"))
            })?,
            None => DEFAULT_TOOL_TIMEOUT_SECS,
        };

        Ok(Self {
            port,
            backup_dir: PathBuf::from(non_empty("BACKUP_DIR").unwrap_or_else(|| "./backup".into())),
            tools: ToolConfig {
                dump_tool,
                restore_tool,
                connection_target,
                timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            },
            backup_cron: non_empty("BACKUP_CRON"),
            log_level: non_empty("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        })
    }
}
