//! Bundling of old bronze files into gzip JSON-lines archives.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::{parse_bronze_timestamp, read_bronze_json, BronzeRecord};

#[derive(Debug, Default, Clone, Serialize)]
pub struct ArchiveReport {
    pub files_archived: usize,
    pub files_deleted: usize,
    pub bundles: Vec<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct BundleLine {
    file: String,
    record: BronzeRecord,
}

/// Move bronze files older than `older_than` into per-dataset, per-day
/// bundles under `archive_dir`. A bundle holds one line per bronze file name;
/// re-archiving a file replaces its line.
pub fn archive_bronze(
    bronze_dir: &Path,
    archive_dir: &Path,
    older_than: Duration,
    now: DateTime<Utc>,
    delete_after: bool,
) -> Result<ArchiveReport> {
    let mut report = ArchiveReport::default();
    let Some(cutoff) = now.checked_sub_signed(older_than) else {
        return Ok(report);
    };
    let mut groups: BTreeMap<(PathBuf, String), Vec<PathBuf>> = BTreeMap::new();

    for entry in WalkDir::new(bronze_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || !path.extension().is_some_and(|e| e == "json") {
            continue;
        }
        let Some(ts) = parse_bronze_timestamp(path) else {
            continue;
        };
        if ts >= cutoff {
            continue;
        }
        let rel_dir = path
            .parent()
            .and_then(|p| p.strip_prefix(bronze_dir).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        groups
            .entry((rel_dir, ts.format("%Y-%m-%d").to_string()))
            .or_default()
            .push(path.to_path_buf());
    }

    for ((rel_dir, day), mut files) in groups {
        files.sort();

        let mut fresh: BTreeMap<String, BronzeRecord> = BTreeMap::new();
        let mut archived = Vec::new();
        for path in &files {
            let record = match read_bronze_json(path) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping unreadable bronze file {}: {:#}", path.display(), e);
                    continue;
                }
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            fresh.insert(name, record);
            archived.push(path);
        }
        if archived.is_empty() {
            continue;
        }

        let out_dir = archive_dir.join(&rel_dir);
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create archive dir {}", out_dir.display()))?;
        let bundle = out_dir.join(format!("{}.jsonl.gz", day));

        let mut lines: BTreeMap<String, BronzeRecord> = if bundle.is_file() {
            read_archive_bundle(&bundle)?.into_iter().collect()
        } else {
            BTreeMap::new()
        };
        lines.extend(fresh);

        let tmp = NamedTempFile::new_in(&out_dir)?;
        let mut encoder = GzEncoder::new(tmp.as_file(), Compression::default());
        for (file, record) in lines {
            serde_json::to_writer(&mut encoder, &BundleLine { file, record })?;
            encoder.write_all(b"\n")?;
        }
        encoder.finish()?;
        tmp.persist(&bundle)
            .with_context(|| format!("Failed to write bundle {}", bundle.display()))?;

        report.files_archived += archived.len();
        report.bundles.push(bundle);

        if delete_after {
            for path in archived {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to delete {}", path.display()))?;
                report.files_deleted += 1;
            }
        }
    }

    info!(
        "Archived {} bronze files into {} bundles ({} deleted)",
        report.files_archived,
        report.bundles.len(),
        report.files_deleted
    );
    Ok(report)
}

/// Read every `(file name, record)` pair from a bundle.
pub fn read_archive_bundle(path: &Path) -> Result<Vec<(String, BronzeRecord)>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(MultiGzDecoder::new(file));
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: BundleLine = serde_json::from_str(&line)?;
        out.push((parsed.file, parsed.record));
    }
    Ok(out)
}
