use crate::config::AppConfig;
use crate::error::BackupError;
use crate::services::invoker::Invoker;
use crate::services::{BackupOrchestrator, ProcessRunner, ToolRunner};
use crate::store::{ArchiveStore, DateLocks};
use std::sync::Arc;
use std::time::Duration;

/// Grace on top of the tool timeout before another process's lock marker is
/// considered abandoned.
const LOCK_GRACE: Duration = Duration::from_secs(600);
const LOCK_STALE_WITHOUT_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: BackupOrchestrator,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, BackupError> {
        let runner = Arc::new(ProcessRunner::new(config.tools.timeout));
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: AppConfig, runner: Arc<dyn ToolRunner>) -> Result<Self, BackupError> {
        let store = ArchiveStore::open(&config.backup_dir)?;
        let invoker = Invoker::new(runner, config.tools.clone(), store.root());
        let stale_after = config
            .tools
            .timeout
            .map_or(LOCK_STALE_WITHOUT_TIMEOUT, |t| t + LOCK_GRACE);
        let locks = DateLocks::new(store.root(), stale_after);
        let orchestrator = BackupOrchestrator::open(store, invoker, locks)?;
        Ok(Self {
            config,
            orchestrator,
        })
    }
}
