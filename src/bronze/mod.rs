//! Bronze layer: raw API payloads stored as timestamped JSON files.
//!
//! Layout: `<base>/<source>/<domain>/<dataset>/city=<city>/<YYYYMMDDTHHMMSSZ>.json`.
//! File names sort chronologically.

mod archive;

pub use archive::{archive_bronze, read_archive_bundle, ArchiveReport};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

const FILE_TS_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Wrapper written around every raw payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BronzeRecord {
    pub retrieved_at: DateTime<Utc>,
    pub request: Value,
    pub payload: Value,
}

/// Identifies one bronze dataset directory
#[derive(Debug, Clone, Copy)]
pub struct BronzeKey<'a> {
    pub source: &'a str,
    pub domain: &'a str,
    pub dataset: &'a str,
    pub city: &'a str,
}

impl BronzeKey<'_> {
    pub fn dir(&self, base: &Path) -> PathBuf {
        base.join(self.source)
            .join(self.domain)
            .join(self.dataset)
            .join(format!("city={}", self.city))
    }
}

pub fn write_bronze_json(
    base: &Path,
    key: BronzeKey<'_>,
    retrieved_at: DateTime<Utc>,
    request: Value,
    payload: Value,
) -> Result<PathBuf> {
    let dir = key.dir(base);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create bronze dir {}", dir.display()))?;
    let path = dir.join(format!("{}.json", retrieved_at.format(FILE_TS_FORMAT)));

    let record = BronzeRecord {
        retrieved_at,
        request,
        payload,
    };
    let mut tmp = NamedTempFile::new_in(&dir)?;
    serde_json::to_writer(&mut tmp, &record)?;
    tmp.flush()?;
    tmp.persist(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    debug!("Wrote bronze file {}", path.display());
    Ok(path)
}

pub fn read_bronze_json(path: &Path) -> Result<BronzeRecord> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bronze file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid bronze file {}", path.display()))
}

/// JSON files of one dataset directory, oldest first. A missing directory is empty.
pub fn list_bronze_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
        .collect();
    files.sort();
    Ok(files)
}

pub fn latest_bronze_file(dir: &Path) -> Result<PathBuf> {
    match list_bronze_files(dir)?.pop() {
        Some(path) => Ok(path),
        None => bail!("No bronze files found in {}", dir.display()),
    }
}

/// Retrieval time encoded in a bronze file name.
pub fn parse_bronze_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    NaiveDateTime::parse_from_str(stem, FILE_TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Serialize)]
pub struct BronzeDatasetSummary {
    pub dataset: String,
    pub files: usize,
    pub latest_file: Option<String>,
    pub latest_retrieved_at: Option<DateTime<Utc>>,
}

/// One summary per directory holding bronze files, sorted by relative path.
pub fn bronze_datasets(base: &Path) -> Vec<BronzeDatasetSummary> {
    let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for entry in WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "json") {
            if let Some(parent) = path.parent() {
                by_dir
                    .entry(parent.to_path_buf())
                    .or_default()
                    .push(path.to_path_buf());
            }
        }
    }

    by_dir
        .into_iter()
        .map(|(dir, mut files)| {
            files.sort();
            let latest = files.last();
            BronzeDatasetSummary {
                dataset: dir
                    .strip_prefix(base)
                    .unwrap_or(&dir)
                    .to_string_lossy()
                    .replace('\\', "/"),
                files: files.len(),
                latest_file: latest
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().to_string()),
                latest_retrieved_at: latest.and_then(|p| parse_bronze_timestamp(p)),
            }
        })
        .collect()
}
