//! Per-date mutual exclusion.
//!
//! Requests inside one process queue on an async mutex per date; processes
//! sharing the archive directory additionally contend on an exclusive marker
//! file (`.backup-YYYY-MM-DD.lock`) created with `create_new`.

use crate::error::BackupError;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

type LockTable = DashMap<NaiveDate, Arc<Mutex<()>>>;

pub struct DateLocks {
    root: PathBuf,
    table: Arc<LockTable>,
    /// A marker older than this is assumed to belong to a dead process.
    stale_after: Duration,
}

/// Held for the whole backup or restore of one date. Dropping it releases
/// the marker file and then the in-process mutex.
pub struct DateGuard {
    date: NaiveDate,
    marker: PathBuf,
    table: Arc<LockTable>,
    local: Option<OwnedMutexGuard<()>>,
}

impl DateGuard {
    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Drop for DateGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.marker) {
            tracing::warn!(date = %self.date, error = %e, "Failed to remove lock marker");
        }
        drop(self.local.take());
        // Only the table still refers to the mutex once nobody waits on it.
        self.table
            .remove_if(&self.date, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl DateLocks {
    pub fn new(root: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            root: root.into(),
            table: Arc::new(DashMap::new()),
            stale_after,
        }
    }

    pub fn marker_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!(".backup-{date}.lock"))
    }

    /// Whether some process currently holds the marker for `date`.
    pub fn is_marked(&self, date: NaiveDate) -> bool {
        self.marker_path(date).exists()
    }

    pub async fn acquire(&self, date: NaiveDate) -> Result<DateGuard, BackupError> {
        let mutex = self
            .table
            .entry(date)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let local = mutex.lock_owned().await;

        let marker = self.marker_path(date);
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&marker) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(owner_tag().as_bytes()) {
                        tracing::warn!(date = %date, error = %e, "Failed to record lock owner");
                    }
                    break;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match break_stale(&marker, self.stale_after) {
                        Ok(true) => {
                            tracing::warn!(date = %date, "Broke stale lock marker");
                            continue;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(date = %date, error = %e, "Failed to break stale lock marker")
                        }
                    }
                    tracing::debug!(date = %date, "Waiting for another process to release the date");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    return Err(BackupError::Internal(format!("cannot create lock marker: {e}")));
                }
            }
        }

        Ok(DateGuard {
            date,
            marker,
            table: self.table.clone(),
            local: Some(local),
        })
    }

    #[cfg(test)]
    fn tracked_dates(&self) -> usize {
        self.table.len()
    }
}

/// `<pid> <nanos>-<seq>`, unique per marker written by this process.
fn owner_tag() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{} {}-{}\n",
        std::process::id(),
        nanos,
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Removes `marker` if it is older than `stale_after`. Returns whether it
/// was removed.
fn break_stale(marker: &Path, stale_after: Duration) -> io::Result<bool> {
    let Some(seen) = stale_contents(marker, stale_after) else {
        return Ok(false);
    };
    remove_if_unchanged(marker, &seen)
}

fn stale_contents(marker: &Path, stale_after: Duration) -> Option<String> {
    let age = std::fs::metadata(marker)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
    if age <= stale_after {
        return None;
    }
    std::fs::read_to_string(marker).ok()
}

/// Moves the marker aside and deletes it only if it still holds `seen`.
/// Another process may have broken the stale marker and written a fresh one
/// in between; that one is linked back into place.
fn remove_if_unchanged(marker: &Path, seen: &str) -> io::Result<bool> {
    let mut aside = marker.as_os_str().to_owned();
    aside.push(format!(".stale-{}", owner_tag().trim_end().replace(' ', "-")));
    let aside = PathBuf::from(aside);

    match std::fs::rename(marker, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }

    let taken = std::fs::read_to_string(&aside).unwrap_or_default();
    if taken == seen {
        std::fs::remove_file(&aside)?;
        return Ok(true);
    }

    let restored = std::fs::hard_link(&aside, marker);
    std::fs::remove_file(&aside)?;
    restored?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_guard_creates_and_removes_marker() {
        let temp_dir = TempDir::new().unwrap();
        let locks = DateLocks::new(temp_dir.path(), Duration::from_secs(60));

        let guard = locks.acquire(day(5)).await.unwrap();
        assert_eq!(guard.date(), day(5));
        assert!(locks.is_marked(day(5)));
        drop(guard);
        assert!(!locks.is_marked(day(5)));
    }

    #[tokio::test]
    async fn test_same_date_is_serialized() {
        let temp_dir = TempDir::new().unwrap();
        let locks = Arc::new(DateLocks::new(temp_dir.path(), Duration::from_secs(60)));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(day(5)).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_dates_do_not_block() {
        let temp_dir = TempDir::new().unwrap();
        let locks = DateLocks::new(temp_dir.path(), Duration::from_secs(60));

        let _a = locks.acquire(day(5)).await.unwrap();
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(day(6))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_foreign_marker_blocks_until_removed() {
        let temp_dir = TempDir::new().unwrap();
        let locks = DateLocks::new(temp_dir.path(), Duration::from_secs(60));
        let marker = locks.marker_path(day(5));
        std::fs::write(&marker, b"4242\n").unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(400), locks.acquire(day(5))).await;
        assert!(blocked.is_err());

        std::fs::remove_file(&marker).unwrap();
        let guard = tokio::time::timeout(Duration::from_secs(2), locks.acquire(day(5))).await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_idle_dates_are_evicted() {
        let temp_dir = TempDir::new().unwrap();
        let locks = Arc::new(DateLocks::new(temp_dir.path(), Duration::from_secs(60)));

        let guard = locks.acquire(day(5)).await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(day(5)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);
        // Still tracked while the waiter queues, gone once it is done.
        waiter.await.unwrap().unwrap();

        assert_eq!(locks.tracked_dates(), 0);
        assert!(!locks.is_marked(day(5)));
    }

    #[tokio::test]
    async fn test_marker_records_owner() {
        let temp_dir = TempDir::new().unwrap();
        let locks = DateLocks::new(temp_dir.path(), Duration::from_secs(60));

        let _guard = locks.acquire(day(5)).await.unwrap();
        let contents = std::fs::read_to_string(locks.marker_path(day(5))).unwrap();
        assert!(contents.starts_with(&format!("{} ", std::process::id())));
    }

    #[test]
    fn test_fresh_marker_is_not_broken() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join(".backup-2024-03-05.lock");
        std::fs::write(&marker, b"4242 1-0\n").unwrap();

        assert!(!break_stale(&marker, Duration::from_secs(60)).unwrap());
        assert!(marker.exists());
    }

    #[test]
    fn test_replaced_marker_survives_stale_break() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join(".backup-2024-03-05.lock");
        // Judged stale while it said "4242", but a new owner has since written it.
        std::fs::write(&marker, b"5151 2-0\n").unwrap();

        assert!(!remove_if_unchanged(&marker, "4242 1-0\n").unwrap());

        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "5151 2-0\n");
        let leftovers = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_stale_marker_is_broken() {
        let temp_dir = TempDir::new().unwrap();
        let locks = DateLocks::new(temp_dir.path(), Duration::ZERO);
        std::fs::write(locks.marker_path(day(5)), b"4242\n").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let guard = tokio::time::timeout(Duration::from_secs(2), locks.acquire(day(5))).await;
        assert!(guard.is_ok());
    }
}
