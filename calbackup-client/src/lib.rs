//! Calendar Backup Client Library
//!
//! Typed client for the backup server plus a locally persisted cache of the
//! days that have a backup.

pub mod api;
pub mod cache;
pub mod config;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use api::BackupApi;
pub use cache::CacheReconciler;
pub use config::Config;
pub use utils::errors::ClientError;
pub use utils::Result;
