//! Offline cache of the dates that have a backup.

pub mod reconciler;
pub mod state;
pub mod store;

pub use reconciler::CacheReconciler;
pub use state::KnownBackups;
pub use store::CacheFile;
