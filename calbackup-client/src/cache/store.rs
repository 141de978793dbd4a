use crate::utils::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheContents {
    dates: Vec<String>,
}

/// JSON file holding the known backup dates as ISO strings.
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted set. A missing file is an empty set; a corrupt one
    /// is logged and treated the same way.
    pub async fn load(&self) -> Result<BTreeSet<NaiveDate>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let contents: CacheContents = match serde_json::from_slice(&raw) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable backup cache");
                return Ok(BTreeSet::new());
            }
        };

        Ok(contents
            .dates
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .collect())
    }

    /// Write the set through a temporary file and rename it into place.
    pub async fn save(&self, dates: &BTreeSet<NaiveDate>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let contents = CacheContents {
            dates: dates.iter().map(|d| d.to_string()).collect(),
        };
        let json = serde_json::to_vec_pretty(&contents)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
