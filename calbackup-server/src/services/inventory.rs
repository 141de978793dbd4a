use crate::models::{BackupRecord, BackupStatus, DateRange};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// In-memory map of backups by date. Concurrent reads, serialized writes.
#[derive(Default)]
pub struct Inventory {
    entries: RwLock<BTreeMap<NaiveDate, BackupRecord>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = BackupRecord>) -> Self {
        Self {
            entries: RwLock::new(records.into_iter().map(|r| (r.date, r)).collect()),
        }
    }

    pub async fn get(&self, date: NaiveDate) -> Option<BackupRecord> {
        self.entries.read().await.get(&date).cloned()
    }

    /// Complete entries, ascending by date.
    pub async fn list(&self, range: Option<&DateRange>) -> Vec<BackupRecord> {
        let entries = self.entries.read().await;
        let iter: Box<dyn Iterator<Item = &BackupRecord> + '_> = match range {
            Some(r) => Box::new(entries.range(r.start..=r.end).map(|(_, v)| v)),
            None => Box::new(entries.values()),
        };
        iter.filter(|r| r.status == BackupStatus::Complete)
            .cloned()
            .collect()
    }

    pub async fn upsert(&self, record: BackupRecord) {
        self.entries.write().await.insert(record.date, record);
    }

    /// Brings the entries covered by `range` (all when `None`) in line with
    /// the archives found on disk. Archives written elsewhere are added,
    /// Complete entries whose archive is gone are dropped, and in-flight
    /// entries without an archive are kept.
    pub async fn reconcile(&self, range: Option<&DateRange>, on_disk: Vec<BackupRecord>) {
        let mut entries = self.entries.write().await;
        let present: BTreeSet<NaiveDate> = on_disk.iter().map(|r| r.date).collect();
        entries.retain(|date, record| {
            let covered = range.map_or(true, |r| r.contains(*date));
            !covered || present.contains(date) || record.status != BackupStatus::Complete
        });
        for record in on_disk {
            entries.insert(record.date, record);
        }
    }

    /// Drops an in-flight entry after a failed attempt. Complete entries are
    /// left alone.
    pub async fn discard_pending(&self, date: NaiveDate) {
        let mut entries = self.entries.write().await;
        if entries
            .get(&date)
            .is_some_and(|r| r.status == BackupStatus::Pending)
        {
            entries.remove(&date);
        }
    }
}
