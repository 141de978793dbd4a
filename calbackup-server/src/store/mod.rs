pub mod archive;
pub mod lock;

pub use archive::{ArchiveStore, ExtractedDir, WorkingDir};
pub use lock::{DateGuard, DateLocks};
