use crate::services::BackupOrchestrator;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Takes today's backup on a cron schedule. Shares the orchestrator with the
/// HTTP handlers, so a scheduled run and a manual request for the same day
/// still produce a single archive.
pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    orchestrator: BackupOrchestrator,
}

impl BackupScheduler {
    pub async fn new(orchestrator: BackupOrchestrator) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            orchestrator,
        })
    }

    pub async fn schedule_daily(&self, cron_expression: &str) -> anyhow::Result<()> {
        let orchestrator = self.orchestrator.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let today = chrono::Local::now().date_naive();
                tracing::info!(date = %today, "Starting scheduled backup");
                match orchestrator.take_backup(today).await {
                    Ok(record) => {
                        tracing::info!(date = %today, archive = %record.archive_name, "Scheduled backup finished")
                    }
                    Err(e) => tracing::error!(date = %today, error = %e, "Scheduled backup failed"),
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Daily backup scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
