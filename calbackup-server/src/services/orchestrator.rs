//! Backup and restore workflows.
//!
//! Backup: `Requested -> Dumping -> Archiving -> Complete`, short-circuiting to
//! `Complete` when the day already has an archive. A failure in either phase
//! is terminal for that request and leaves neither an archive nor a working
//! directory behind; the next request for the same day starts over.
//!
//! Restore: extract, run the restore tool, always remove the extraction
//! directory. The inventory is never touched by a restore.
//!
//! Both workflows run on their own task holding the per-date guard, so a caller
//! that goes away does not interrupt a running dump or restore.

use crate::error::BackupError;
use crate::models::backup_record::{archive_name, resolve_identifier};
use crate::models::{BackupRecord, BackupStatus, DateRange};
use crate::services::inventory::Inventory;
use crate::services::invoker::Invoker;
use crate::store::{ArchiveStore, DateLocks};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;

/// An archive opened for download.
pub struct ArchiveDownload {
    pub name: String,
    pub len: u64,
    pub file: tokio::fs::File,
}

#[derive(Clone)]
pub struct BackupOrchestrator {
    store: Arc<ArchiveStore>,
    invoker: Arc<Invoker>,
    locks: Arc<DateLocks>,
    inventory: Arc<Inventory>,
}

impl BackupOrchestrator {
    /// Clears leftovers of a previous run and loads the inventory from disk.
    pub fn open(store: ArchiveStore, invoker: Invoker, locks: DateLocks) -> Result<Self, BackupError> {
        let swept = store.sweep_stale(|date| locks.is_marked(date))?;
        if swept > 0 {
            tracing::info!(count = swept, "Removed leftovers from an earlier run");
        }

        let records: Vec<BackupRecord> = store
            .list(None)?
            .into_iter()
            .map(|date| BackupRecord::complete(date, store.archive_path(date)))
            .collect();
        tracing::info!(count = records.len(), root = %store.root().display(), "Loaded backup inventory");

        Ok(Self {
            store: Arc::new(store),
            invoker: Arc::new(invoker),
            locks: Arc::new(locks),
            inventory: Arc::new(Inventory::from_records(records)),
        })
    }

    pub async fn take_backup(&self, date: NaiveDate) -> Result<BackupRecord, BackupError> {
        if let Some(record) = self.existing(date).await {
            tracing::debug!(date = %date, "Backup already exists");
            return Ok(record);
        }

        let this = self.clone();
        tokio::spawn(async move { this.run_backup(date).await })
            .await
            .map_err(|e| BackupError::Internal(format!("backup task failed: {e}")))?
    }

    pub async fn restore_backup(&self, identifier: &str) -> Result<NaiveDate, BackupError> {
        let date = resolve_identifier(identifier)?;
        if !self.store.exists(date) {
            return Err(BackupError::NotFound(archive_name(date)));
        }

        let this = self.clone();
        tokio::spawn(async move { this.run_restore(date).await })
            .await
            .map_err(|e| BackupError::Internal(format!("restore task failed: {e}")))??;
        Ok(date)
    }

    /// Completed backups, ascending; empty when nothing falls in `range`.
    ///
    /// The archive directory is read on every call, so archives written or
    /// removed by another process sharing it are reflected.
    pub async fn list_backups(
        &self,
        range: Option<&DateRange>,
    ) -> Result<Vec<BackupRecord>, BackupError> {
        let store = self.store.clone();
        let scan = range.copied();
        let on_disk: Vec<BackupRecord> = tokio::task::spawn_blocking(move || {
            store.list(scan.as_ref()).map(|dates| {
                dates
                    .into_iter()
                    .map(|date| BackupRecord::complete(date, store.archive_path(date)))
                    .collect()
            })
        })
        .await
        .map_err(|e| BackupError::Internal(format!("listing task failed: {e}")))??;

        self.inventory.reconcile(range, on_disk).await;
        Ok(self.inventory.list(range).await)
    }

    pub async fn download_archive(&self, identifier: &str) -> Result<ArchiveDownload, BackupError> {
        let date = resolve_identifier(identifier)?;
        let name = archive_name(date);
        let file = match tokio::fs::File::open(self.store.archive_path(date)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(name));
            }
            Err(e) => return Err(BackupError::archival("opening archive", e)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| BackupError::archival("reading archive metadata", e))?
            .len();
        Ok(ArchiveDownload { name, len, file })
    }

    /// Complete record for `date` if its archive is on disk. Picks up archives
    /// written by another process sharing the directory.
    async fn existing(&self, date: NaiveDate) -> Option<BackupRecord> {
        if !self.store.exists(date) {
            return None;
        }
        match self.inventory.get(date).await {
            Some(record) if record.status == BackupStatus::Complete => Some(record),
            _ => {
                let record = BackupRecord::complete(date, self.store.archive_path(date));
                self.inventory.upsert(record.clone()).await;
                Some(record)
            }
        }
    }

    async fn run_backup(&self, date: NaiveDate) -> Result<BackupRecord, BackupError> {
        let _guard = self.locks.acquire(date).await?;

        // A request queued behind the one that just finished lands here.
        if let Some(record) = self.existing(date).await {
            tracing::info!(date = %date, "Backup completed by a concurrent request");
            return Ok(record);
        }

        self.inventory
            .upsert(BackupRecord::pending(date, self.store.archive_path(date)))
            .await;

        match self.dump_and_archive(date).await {
            Ok(path) => {
                let record = BackupRecord::complete(date, path);
                self.inventory.upsert(record.clone()).await;
                tracing::info!(date = %date, status = ?record.status, "Backup complete");
                Ok(record)
            }
            Err(e) => {
                self.inventory.discard_pending(date).await;
                tracing::error!(date = %date, status = ?BackupStatus::Failed, error = %e, "Backup failed");
                Err(e)
            }
        }
    }

    async fn dump_and_archive(&self, date: NaiveDate) -> Result<PathBuf, BackupError> {
        let work = self.store.begin_write(date)?;

        tracing::info!(date = %date, "Dumping database");
        // On failure `work` drops here and takes the partial dump with it.
        self.invoker.dump(work.path()).await?;

        tracing::info!(date = %date, "Archiving dump");
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.finalize(work))
            .await
            .map_err(|e| BackupError::Internal(format!("archiving task failed: {e}")))?
    }

    async fn run_restore(&self, date: NaiveDate) -> Result<(), BackupError> {
        let _guard = self.locks.acquire(date).await?;

        let store = self.store.clone();
        let extracted = tokio::task::spawn_blocking(move || store.open_archive(date))
            .await
            .map_err(|e| BackupError::Internal(format!("extraction task failed: {e}")))??;

        tracing::info!(date = %date, "Restoring database");
        let result = self.invoker.restore(extracted.path()).await;

        if let Err(e) = extracted.close() {
            tracing::warn!(date = %date, error = %e, "Failed to remove extraction directory");
        }

        match &result {
            Ok(()) => tracing::info!(date = %date, "Restore complete"),
            Err(e) => tracing::error!(date = %date, error = %e, "Restore failed"),
        }
        result
    }
}
