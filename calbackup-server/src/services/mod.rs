pub mod backup_scheduler;
pub mod inventory;
pub mod invoker;
pub mod orchestrator;
pub mod tool_runner;

pub use orchestrator::{ArchiveDownload, BackupOrchestrator};
pub use tool_runner::{ProcessRunner, ToolInvocation, ToolOutput, ToolRunner};
