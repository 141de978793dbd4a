use crate::error::BackupError;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ARCHIVE_PREFIX: &str = "backup-";
pub const ARCHIVE_EXTENSION: &str = ".zip";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    /// Only while a request is in flight; never survives a restart.
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub date: NaiveDate,
    pub archive_name: String,
    #[serde(skip)]
    pub archive_path: PathBuf,
    pub status: BackupStatus,
}

impl BackupRecord {
    pub fn pending(date: NaiveDate, archive_path: PathBuf) -> Self {
        Self {
            date,
            archive_name: archive_name(date),
            archive_path,
            status: BackupStatus::Pending,
        }
    }

    pub fn complete(date: NaiveDate, archive_path: PathBuf) -> Self {
        Self {
            status: BackupStatus::Complete,
            ..Self::pending(date, archive_path)
        }
    }
}

/// `backup-YYYY-MM-DD.zip`
pub fn archive_name(date: NaiveDate) -> String {
    format!("{ARCHIVE_PREFIX}{}{ARCHIVE_EXTENSION}", date.format(DATE_FORMAT))
}

/// Inverse of [`archive_name`]; anything else in the archive directory yields `None`.
pub fn parse_archive_name(name: &str) -> Option<NaiveDate> {
    let stem = name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_EXTENSION)?;
    parse_iso_date(stem)
}

/// Strict `YYYY-MM-DD`.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

pub fn parse_date(value: &str) -> Result<NaiveDate, BackupError> {
    parse_iso_date(value)
        .ok_or_else(|| BackupError::InvalidIdentifier(format!("'{value}' is not a YYYY-MM-DD date")))
}

/// Resolves a restore/download identifier to its backup date.
///
/// The canonical identifier is the ISO date; the archive file name
/// (`backup-YYYY-MM-DD.zip`) is accepted as an alias for the same archive.
pub fn resolve_identifier(identifier: &str) -> Result<NaiveDate, BackupError> {
    parse_iso_date(identifier)
        .or_else(|| parse_archive_name(identifier))
        .ok_or_else(|| {
            BackupError::InvalidIdentifier(format!(
                "'{identifier}' is neither YYYY-MM-DD nor {ARCHIVE_PREFIX}YYYY-MM-DD{ARCHIVE_EXTENSION}"
            ))
        })
}

/// Inclusive range of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BackupError> {
        if start > end {
            return Err(BackupError::InvalidRange(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Bounds may be plain dates or RFC 3339 timestamps; only the day is kept.
    pub fn parse(start: &str, end: &str) -> Result<Self, BackupError> {
        Self::new(parse_bound("startDate", start)?, parse_bound("endDate", end)?)
    }

    /// Both bounds absent means "no filter"; exactly one present is an error.
    pub fn from_query(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>, BackupError> {
        match (start, end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Self::parse(start, end).map(Some),
            (Some(_), None) => Err(BackupError::InvalidRange("endDate is required".into())),
            (None, Some(_)) => Err(BackupError::InvalidRange("startDate is required".into())),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

fn parse_bound(name: &str, value: &str) -> Result<NaiveDate, BackupError> {
    let value = value.trim();
    if let Some(date) = parse_iso_date(value) {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.date_naive())
        .map_err(|_| BackupError::InvalidRange(format!("{name} '{value}' is not a valid date")))
}
