//! In-process fake of the backup server for client tests.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct FakeBackend {
    dates: Mutex<BTreeSet<NaiveDate>>,
    fail_listing: AtomicBool,
    pub list_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn set_dates(&self, dates: &[&str]) {
        *self.dates.lock().unwrap() = dates.iter().map(|d| date(d)).collect();
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }
}

pub struct FakeServer {
    pub url: String,
    pub backend: Arc<FakeBackend>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start(dates: &[&str]) -> Self {
        let backend = Arc::new(FakeBackend::default());
        backend.set_dates(dates);

        let app = Router::new()
            .route("/api/backups", get(list))
            .route("/api/backup/{date}", post(backup))
            .route("/api/restore/{identifier}", post(restore))
            .route("/api/download/{filename}", get(download))
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            backend,
            handle,
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// URL of a port nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn archive_name(date: NaiveDate) -> String {
    format!("backup-{date}.zip")
}

fn identifier_date(identifier: &str) -> Option<NaiveDate> {
    crate::api::parse_archive_name(identifier)
        .or_else(|| NaiveDate::parse_from_str(identifier, "%Y-%m-%d").ok())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeQuery {
    start_date: Option<String>,
    end_date: Option<String>,
}

async fn list(
    State(backend): State<Arc<FakeBackend>>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    backend.list_calls.fetch_add(1, Ordering::SeqCst);
    if backend.fail_listing.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "inventory unavailable" })),
        );
    }
    let start = query.start_date.as_deref().map(date).unwrap_or(NaiveDate::MIN);
    let end = query.end_date.as_deref().map(date).unwrap_or(NaiveDate::MAX);
    let names: Vec<String> = backend
        .dates
        .lock()
        .unwrap()
        .iter()
        .filter(|d| **d >= start && **d <= end)
        .map(|d| archive_name(*d))
        .collect();
    (StatusCode::OK, Json(json!({ "backups": names })))
}

async fn backup(
    State(backend): State<Arc<FakeBackend>>,
    Path(raw): Path<String>,
) -> impl IntoResponse {
    let Ok(day) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid date: {raw}") })),
        );
    };
    backend.dates.lock().unwrap().insert(day);
    (
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Backup taken for {day}"),
            "downloadLink": format!("/api/download/{}", archive_name(day)),
        })),
    )
}

async fn restore(
    State(backend): State<Arc<FakeBackend>>,
    Path(identifier): Path<String>,
) -> impl IntoResponse {
    match identifier_date(&identifier) {
        Some(day) if backend.dates.lock().unwrap().contains(&day) => (
            StatusCode::OK,
            Json(json!({ "message": format!("Database restored from {day}") })),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no backup for {identifier}") })),
        ),
    }
}

async fn download(
    State(backend): State<Arc<FakeBackend>>,
    Path(filename): Path<String>,
) -> axum::response::Response {
    match crate::api::parse_archive_name(&filename) {
        Some(day) if backend.dates.lock().unwrap().contains(&day) => {
            (StatusCode::OK, b"PK\x03\x04fake".to_vec()).into_response()
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no archive named {filename}") })),
        )
            .into_response(),
    }
}
