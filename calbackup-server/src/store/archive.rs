//! On-disk archive directory: one zip per backup date.
//!
//! Everything transient (working directories, extraction directories,
//! half-written archives) lives next to the archives so that renames stay on
//! one filesystem, and is removed when its handle drops.

use crate::error::BackupError;
use crate::models::backup_record::{
    archive_name, parse_archive_name, parse_iso_date, ARCHIVE_EXTENSION,
};
use crate::models::DateRange;
use chrono::NaiveDate;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const WORK_PREFIX: &str = ".work-";
const RESTORE_PREFIX: &str = ".restore-";
const PARTIAL_SUFFIX: &str = ".partial";

/// Scoped directory receiving the dump tool's raw output.
#[derive(Debug)]
pub struct WorkingDir {
    date: NaiveDate,
    dir: TempDir,
}

impl WorkingDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Scoped directory holding an unpacked archive for the restore tool.
#[derive(Debug)]
pub struct ExtractedDir {
    date: NaiveDate,
    dir: TempDir,
}

impl ExtractedDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Removes the directory now, reporting failures instead of swallowing them.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[derive(Debug)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    /// Opens (creating if needed) the archive directory. The root is kept in
    /// canonical form: every path handed to the tools starts with it, which
    /// is what lets diagnostics mask it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackupError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            BackupError::Config(format!("cannot create archive directory: {e}"))
        })?;
        let root = std::fs::canonicalize(&root).map_err(|e| {
            BackupError::Config(format!("cannot resolve archive directory: {e}"))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(archive_name(date))
    }

    /// True iff a complete archive for `date` is present. Archives only ever
    /// appear under their final name through an atomic rename.
    pub fn exists(&self, date: NaiveDate) -> bool {
        self.archive_path(date).is_file()
    }

    pub fn begin_write(&self, date: NaiveDate) -> Result<WorkingDir, BackupError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{WORK_PREFIX}{date}-"))
            .tempdir_in(&self.root)
            .map_err(|e| BackupError::archival("creating working directory", e))?;
        Ok(WorkingDir { date, dir })
    }

    /// Packs the working directory into `backup-<date>.zip` and removes it.
    ///
    /// The zip is built in a temporary file and renamed into place without
    /// clobbering, so a failure at any step leaves no archive behind. The
    /// working directory is removed on every path.
    pub fn finalize(&self, work: WorkingDir) -> Result<PathBuf, BackupError> {
        let date = work.date;
        let final_path = self.archive_path(date);

        let mut partial = tempfile::Builder::new()
            .prefix(&format!(".{}-", archive_name(date)))
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|e| BackupError::archival("creating archive file", e))?;

        write_zip(work.path(), partial.as_file_mut())?;
        partial
            .as_file()
            .sync_all()
            .map_err(|e| BackupError::archival("flushing archive", e))?;
        partial
            .persist_noclobber(&final_path)
            .map_err(|e| BackupError::archival("publishing archive", e.error))?;

        if let Err(e) = work.dir.close() {
            tracing::warn!(date = %date, error = %e, "Failed to remove working directory");
        }

        tracing::info!(date = %date, archive = %archive_name(date), "Archive written");
        Ok(final_path)
    }

    /// Extracts the archive for `date` into a fresh scoped directory.
    pub fn open_archive(&self, date: NaiveDate) -> Result<ExtractedDir, BackupError> {
        let path = self.archive_path(date);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(archive_name(date)));
            }
            Err(e) => return Err(BackupError::archival("opening archive", e)),
        };

        let dir = tempfile::Builder::new()
            .prefix(&format!("{RESTORE_PREFIX}{date}-"))
            .tempdir_in(&self.root)
            .map_err(|e| BackupError::archival("creating extraction directory", e))?;

        // Entries with absolute or `..` paths are refused by `extract`.
        let mut zip = ZipArchive::new(file).map_err(|e| BackupError::archival("reading archive", e))?;
        zip.extract(dir.path())
            .map_err(|e| BackupError::archival("extracting archive", e))?;

        Ok(ExtractedDir { date, dir })
    }

    /// Dates with a complete archive, ascending, optionally limited to `range`.
    pub fn list(&self, range: Option<&DateRange>) -> Result<Vec<NaiveDate>, BackupError> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| BackupError::archival("reading archive directory", e))?;

        let mut dates: Vec<NaiveDate> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| parse_archive_name(&e.file_name().to_string_lossy()))
            .filter(|date| range.map_or(true, |r| r.contains(*date)))
            .collect();

        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    /// Removes working/extraction directories and half-written archives left
    /// behind by a crashed process. Dates whose lock marker still exists are
    /// skipped, since another process may be using them.
    pub fn sweep_stale(&self, is_locked: impl Fn(NaiveDate) -> bool) -> Result<usize, BackupError> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| BackupError::archival("reading archive directory", e))?;

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(date) = transient_date(&name) else { continue };
            if is_locked(date) {
                continue;
            }

            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(entry = %name, "Removed stale transient entry");
                }
                Err(e) => tracing::warn!(entry = %name, error = %e, "Failed to remove stale entry"),
            }
        }
        Ok(removed)
    }
}

/// Date embedded in a transient entry name, if `name` is one.
fn transient_date(name: &str) -> Option<NaiveDate> {
    if let Some(rest) = name
        .strip_prefix(WORK_PREFIX)
        .or_else(|| name.strip_prefix(RESTORE_PREFIX))
    {
        return rest.get(..10).and_then(parse_iso_date);
    }
    // .backup-YYYY-MM-DD.zip-XXXXXX.partial
    if name.ends_with(PARTIAL_SUFFIX) {
        let inner = name.strip_prefix('.')?;
        let end = inner.find(ARCHIVE_EXTENSION)? + ARCHIVE_EXTENSION.len();
        return parse_archive_name(&inner[..end]);
    }
    None
}

fn write_zip(source: &Path, out: &mut File) -> Result<(), BackupError> {
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| BackupError::archival("walking dump output", e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| BackupError::archival("resolving dump output path", e))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options.clone())
                .map_err(|e| BackupError::archival("adding directory to archive", e))?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options.clone())
                .map_err(|e| BackupError::archival("adding file to archive", e))?;
            let mut input = File::open(entry.path())
                .map_err(|e| BackupError::archival("reading dump output", e))?;
            io::copy(&mut input, &mut zip)
                .map_err(|e| BackupError::archival("compressing dump output", e))?;
        }
    }

    zip.finish()
        .map_err(|e| BackupError::archival("finishing archive", e))?;
    Ok(())
}
