//! Typed HTTP client for the backup server.

use crate::utils::{ClientError, Result};
use chrono::NaiveDate;
use futures_util::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const ARCHIVE_PREFIX: &str = "backup-";
const ARCHIVE_EXTENSION: &str = ".zip";

#[derive(Debug, Deserialize)]
struct BackupsResponse {
    backups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupTaken {
    pub message: String,
    #[serde(default)]
    pub download_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Restored {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Strict zero-padded `YYYY-MM-DD`, the only form the server accepts.
fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Date of an archive name such as `backup-2024-03-05.zip`.
pub fn parse_archive_name(name: &str) -> Option<NaiveDate> {
    let date = name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_EXTENSION)?;
    parse_iso_date(date)
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    parse_iso_date(value).ok_or_else(|| ClientError::InvalidDate(value.to_string()))
}

#[derive(Debug, Clone)]
pub struct BackupApi {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl BackupApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Fetch the authoritative set of backup dates, optionally bounded.
    pub async fn list_backups(
        &self,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<NaiveDate>> {
        let mut request = self
            .client
            .get(self.url("/backups"))
            .timeout(self.request_timeout);
        if let Some((start, end)) = range {
            request = request.query(&[
                ("startDate", start.to_string()),
                ("endDate", end.to_string()),
            ]);
        }

        let response = check(request.send().await?).await?;
        let body: BackupsResponse = response.json().await?;

        let mut dates: Vec<NaiveDate> = body
            .backups
            .iter()
            .filter_map(|name| {
                let date = parse_archive_name(name);
                if date.is_none() {
                    warn!(name = %name, "Ignoring unrecognised archive name");
                }
                date
            })
            .collect();
        dates.sort_unstable();
        dates.dedup();
        debug!(count = dates.len(), "Fetched backup inventory");
        Ok(dates)
    }

    /// Take a backup for `date`. Waits for the dump to finish.
    pub async fn take_backup(&self, date: NaiveDate) -> Result<BackupTaken> {
        let response = self
            .client
            .post(self.url(&format!("/backup/{date}")))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Restore from an identifier (`YYYY-MM-DD` or `backup-YYYY-MM-DD.zip`).
    pub async fn restore(&self, identifier: &str) -> Result<Restored> {
        let response = self
            .client
            .post(self.url(&format!("/restore/{identifier}")))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Stream an archive to `dest`. Returns the number of bytes written.
    pub async fn download(&self, filename: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(self.url(&format!("/download/{filename}")))
            .send()
            .await?;
        let response = check(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Turn a non-2xx response into `ClientError::Server`, using the server's
/// `{"error": ...}` body when present.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        });
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}
