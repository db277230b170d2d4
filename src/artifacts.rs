// 🗂️ Side Artifacts - timestamped, write-once delimited files
//
// Backups, change reports and duplicate reviews are named
// `{stem}_{YYYYMMDD_HHMMSS}.csv` and are never overwritten: a name collision
// within the same second gets a numeric suffix instead.

use crate::error::Result;
use chrono::Local;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Timestamp used in artifact names, local time
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Exclusively create `dir/{stem}_{timestamp}[_n].csv`
fn create_new(dir: &Path, stem: &str, timestamp: &str) -> Result<(PathBuf, fs::File)> {
    fs::create_dir_all(dir)?;

    let mut attempt = 0;
    loop {
        let name = if attempt == 0 {
            format!("{}_{}.csv", stem, timestamp)
        } else {
            format!("{}_{}_{}.csv", stem, timestamp, attempt)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Write raw bytes to a fresh timestamped file
pub fn write_once_bytes(dir: &Path, stem: &str, timestamp: &str, contents: &[u8]) -> Result<PathBuf> {
    let (path, mut file) = create_new(dir, stem, timestamp)?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(path)
}

/// Serialize `records` with a header row to a fresh timestamped file
pub fn write_once_records<T: Serialize>(
    dir: &Path,
    stem: &str,
    timestamp: &str,
    records: &[T],
) -> Result<PathBuf> {
    let (path, file) = create_new(dir, stem, timestamp)?;

    let mut wtr = csv::Writer::from_writer(file);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;

    debug!("write csv: {} ({} rows)", path.display(), records.len());
    Ok(path)
}

/// Serialize `records` to `path`, replacing it. Used for stage snapshots.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Delete every file (not folder) directly inside `dir`
pub fn clean_folder(dir: &Path) -> Result<()> {
    if !dir.exists() {
        debug!("nothing to clean: {}", dir.display());
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }

    info!("cleaned: {}", dir.display());
    Ok(())
}
