use super::state::KnownBackups;
use super::store::CacheFile;
use crate::api::{BackupApi, BackupTaken, Restored};
use crate::utils::Result;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Tracked {
    known: KnownBackups,
    /// Sequence number of the newest fetch applied so far.
    applied: u64,
    /// Fetches issued at or before this number started before the latest
    /// optimistic write and cannot know about it.
    superseded: u64,
}

struct Inner {
    api: BackupApi,
    file: CacheFile,
    state: Mutex<Tracked>,
    issued: AtomicU64,
    refreshes: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Client-side mirror of the server's backup inventory.
///
/// Reads never block on the network: `has_backup` answers from the local
/// sets. Fetch failures keep the last-known-good state.
#[derive(Clone)]
pub struct CacheReconciler {
    inner: Arc<Inner>,
}

impl CacheReconciler {
    /// Load the persisted set and start fetching the authoritative inventory
    /// in the background.
    pub async fn initialize(api: BackupApi, file: CacheFile) -> Self {
        let persisted = match file.load().await {
            Ok(dates) => dates,
            Err(e) => {
                warn!(path = %file.path().display(), error = %e, "Could not read backup cache");
                BTreeSet::new()
            }
        };
        debug!(count = persisted.len(), "Loaded cached backup dates");

        let reconciler = Self {
            inner: Arc::new(Inner {
                api,
                file,
                state: Mutex::new(Tracked {
                    known: KnownBackups::from_persisted(persisted),
                    applied: 0,
                    superseded: 0,
                }),
                issued: AtomicU64::new(0),
                refreshes: std::sync::Mutex::new(Vec::new()),
            }),
        };
        reconciler.spawn_refresh();
        reconciler
    }

    pub fn api(&self) -> &BackupApi {
        &self.inner.api
    }

    /// Fetch the server inventory and replace the local state with it.
    /// Returns false when the fetch failed or a newer fetch already landed.
    pub async fn refresh(&self) -> bool {
        let seq = self.next_seq();
        match self.inner.api.list_backups(None).await {
            Ok(dates) => self.apply(seq, dates.into_iter().collect()).await,
            Err(e) => {
                warn!(error = %e, "Backup inventory unavailable, keeping cached state");
                false
            }
        }
    }

    fn next_seq(&self) -> u64 {
        self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn apply(&self, seq: u64, dates: BTreeSet<NaiveDate>) -> bool {
        let mut state = self.inner.state.lock().await;
        if seq <= state.applied || seq <= state.superseded {
            debug!(seq, applied = state.applied, "Dropping out-of-date inventory");
            return false;
        }
        state.applied = seq;
        state.known.apply_authoritative(dates);
        info!(count = state.known.authoritative.len(), "Backup inventory refreshed");

        let persisted = state.known.dates();
        if let Err(e) = self.inner.file.save(&persisted).await {
            warn!(error = %e, "Failed to persist backup cache");
        }
        true
    }

    fn spawn_refresh(&self) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.refresh().await;
        });
        if let Ok(mut refreshes) = self.inner.refreshes.lock() {
            refreshes.retain(|h| !h.is_finished());
            refreshes.push(handle);
        }
    }

    /// Wait for every background refresh started so far.
    pub async fn settle(&self) {
        let handles: Vec<JoinHandle<()>> = match self.inner.refreshes.lock() {
            Ok(mut refreshes) => refreshes.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Inventory refresh task failed");
            }
        }
    }

    /// Take a backup and record the date locally before the server's
    /// inventory is fetched again.
    pub async fn take_backup(&self, date: NaiveDate) -> Result<BackupTaken> {
        let taken = self.inner.api.take_backup(date).await?;

        {
            let mut state = self.inner.state.lock().await;
            state.known.record_optimistic(date);
            state.superseded = self.inner.issued.load(Ordering::SeqCst);
            let persisted = state.known.dates();
            if let Err(e) = self.inner.file.save(&persisted).await {
                warn!(date = %date, error = %e, "Failed to persist backup cache");
            }
        }

        self.spawn_refresh();
        Ok(taken)
    }

    pub async fn restore(&self, identifier: &str) -> Result<Restored> {
        self.inner.api.restore(identifier).await
    }

    /// Whether any fetch from the server has been applied yet.
    pub async fn is_synced(&self) -> bool {
        self.inner.state.lock().await.applied > 0
    }

    pub async fn has_backup(&self, date: NaiveDate) -> bool {
        self.inner.state.lock().await.known.contains(date)
    }

    pub async fn known_dates(&self) -> BTreeSet<NaiveDate> {
        self.inner.state.lock().await.known.dates()
    }
}
