use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures of the backup workflows, independent of the HTTP surface.
#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error("invalid backup identifier: {0}")]
    InvalidIdentifier(String),

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("{tool} failed ({}): {output}", exit_label(.status))]
    ExternalToolFailure {
        tool: String,
        status: Option<i32>,
        output: String,
    },

    #[error("archival failed: {0}")]
    ArchivalFailure(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BackupError {
    pub fn archival(context: &str, err: impl std::fmt::Display) -> Self {
        BackupError::ArchivalFailure(format!("{context}: {err}"))
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "no exit status".to_string(),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    ToolFailure(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::InvalidRange(_) | BackupError::InvalidIdentifier(_) => {
                AppError::BadRequest(err.to_string())
            }
            BackupError::NotFound(_) => AppError::NotFound(err.to_string()),
            BackupError::ExternalToolFailure { .. } => AppError::ToolFailure(err.to_string()),
            other => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::ToolFailure(m) => {
                tracing::error!("External tool failure: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
