use crate::error::AppError;
use crate::models::backup_record::parse_date;
use crate::models::DateRange;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/backups", get(list_backups))
        .route("/backup", post(take_backup_today))
        .route("/backup/{date}", post(take_backup))
        .route("/restore/{identifier}", post(restore_backup))
        .route("/download/{filename}", get(download_archive))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BackupsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let range = DateRange::from_query(query.start_date.as_deref(), query.end_date.as_deref())?;
    let names: Vec<String> = state
        .orchestrator
        .list_backups(range.as_ref())
        .await?
        .into_iter()
        .map(|r| r.archive_name)
        .collect();
    Ok(Json(json!({ "backups": names })))
}

async fn take_backup_today(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    backup_for(&state, chrono::Local::now().date_naive()).await
}

async fn take_backup(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let date = parse_date(&date)?;
    backup_for(&state, date).await
}

async fn backup_for(
    state: &AppState,
    date: NaiveDate,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let record = state.orchestrator.take_backup(date).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Backup taken for {date}"),
            "downloadLink": format!("/api/download/{}", record.archive_name),
        })),
    ))
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let date = state.orchestrator.restore_backup(&identifier).await?;
    Ok(Json(json!({ "message": format!("Database restored from {date}") })))
}

async fn download_archive(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let download = state.orchestrator.download_archive(&filename).await?;

    let body = Body::from_stream(ReaderStream::new(download.file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, download.len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.name),
            ),
        ],
        body,
    ))
}
