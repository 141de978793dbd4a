//! Calendar backup server.
//!
//! Takes at most one database backup per calendar day by driving an external
//! dump tool, keeps each day as a zip archive, and restores from any of them.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use error::{AppError, BackupError};
pub use state::AppState;
