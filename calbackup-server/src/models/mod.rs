pub mod backup_record;

pub use backup_record::{BackupRecord, BackupStatus, DateRange};
