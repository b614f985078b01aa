use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{error, info, warn};

use super::RawTable;
use crate::silver::{
    BIKE_STATIONS_CSV, BIKE_TIMESERIES_CSV, METRO_BIKE_LINKS_CSV, METRO_STATIONS_CSV,
    METRO_TIMESERIES_CSV,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub table: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            IssueLevel::Error => "ERROR",
            IssueLevel::Warning => "WARN",
        };
        write!(f, "[{}] {}: {}", level, self.table, self.message)
    }
}

#[derive(Default)]
struct Issues(Vec<ValidationIssue>);

impl Issues {
    fn error(&mut self, table: &str, message: impl Into<String>) {
        self.0.push(ValidationIssue {
            level: IssueLevel::Error,
            table: table.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, table: &str, message: impl Into<String>) {
        self.0.push(ValidationIssue {
            level: IssueLevel::Warning,
            table: table.to_string(),
            message: message.into(),
        });
    }
}

/// Load a table and check its columns. Returns `None` after recording an
/// error when the table cannot be used.
fn load(dir: &Path, table: &str, required: &[&str], issues: &mut Issues) -> Option<RawTable> {
    let path = dir.join(table);
    if !path.is_file() {
        issues.error(table, format!("missing file {}", path.display()));
        return None;
    }
    let raw = match RawTable::read(&path) {
        Ok(raw) => raw,
        Err(e) => {
            issues.error(table, format!("unreadable: {:#}", e));
            return None;
        }
    };
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| raw.column(c).is_none())
        .collect();
    if !missing.is_empty() {
        issues.error(table, format!("missing columns: {}", missing.join(", ")));
        return None;
    }
    Some(raw)
}

/// Empty and duplicate ids. Returns the set of non-empty ids.
fn check_ids(raw: &RawTable, col: &str, table: &str, issues: &mut Issues) -> HashSet<String> {
    let Some(idx) = raw.column(col) else {
        return HashSet::new();
    };
    let mut seen = HashSet::new();
    let mut empty = 0usize;
    let mut duplicates = 0usize;
    for id in raw.values(idx) {
        if id.is_empty() {
            empty += 1;
        } else if !seen.insert(id.to_string()) {
            duplicates += 1;
        }
    }
    if empty > 0 {
        issues.error(table, format!("{} rows with empty {}", empty, col));
    }
    if duplicates > 0 {
        issues.warn(table, format!("{} duplicate {} values", duplicates, col));
    }
    seen
}

fn check_coordinates(raw: &RawTable, table: &str, issues: &mut Issues) {
    for (col, limit) in [("lat", 90.0), ("lon", 180.0)] {
        let Some(idx) = raw.column(col) else {
            continue;
        };
        let mut bad = 0usize;
        let mut out_of_range = 0usize;
        for cell in raw.values(idx) {
            match cell.parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    if v.abs() > limit {
                        out_of_range += 1;
                    }
                }
                _ => bad += 1,
            }
        }
        if bad > 0 {
            issues.warn(table, format!("{} rows with non-numeric {}", bad, col));
        }
        if out_of_range > 0 {
            issues.warn(table, format!("{} rows with {} out of range", out_of_range, col));
        }
    }
}

fn count_negative(raw: &RawTable, col: &str) -> (usize, usize) {
    let Some(idx) = raw.column(col) else {
        return (0, 0);
    };
    let mut bad = 0usize;
    let mut negative = 0usize;
    for cell in raw.values(idx) {
        match cell.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                if v < 0.0 {
                    negative += 1;
                }
            }
            _ => bad += 1,
        }
    }
    (bad, negative)
}

/// Unparseable timestamps and per-station ordering, in file order.
fn check_timestamps(raw: &RawTable, table: &str, issues: &mut Issues) {
    let (Some(id_idx), Some(ts_idx)) = (raw.column("station_id"), raw.column("ts")) else {
        return;
    };
    let mut invalid = 0usize;
    let mut last: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut unordered: HashSet<&str> = HashSet::new();
    for row in &raw.rows {
        let id = row.get(id_idx).unwrap_or("").trim();
        let ts = match DateTime::parse_from_rfc3339(row.get(ts_idx).unwrap_or("").trim()) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(_) => {
                invalid += 1;
                continue;
            }
        };
        if let Some(prev) = last.insert(id, ts) {
            if ts < prev {
                unordered.insert(id);
            }
        }
    }
    if invalid > 0 {
        issues.warn(table, format!("{} rows with invalid ts", invalid));
    }
    if !unordered.is_empty() {
        issues.warn(
            table,
            format!("{} stations with non-monotonic ts", unordered.len()),
        );
    }
}

/// Validate the silver directory.
///
/// Returns every issue found. With `strict`, any error-level issue turns into
/// an `Err`.
pub fn validate_silver_dir(dir: &Path, strict: bool) -> Result<Vec<ValidationIssue>> {
    info!("Validating silver tables in {}", dir.display());
    let mut issues = Issues::default();

    let metro = load(dir, METRO_STATIONS_CSV, &["station_id", "name", "lat", "lon"], &mut issues);
    let metro_ids = metro.as_ref().map(|raw| {
        check_coordinates(raw, METRO_STATIONS_CSV, &mut issues);
        check_ids(raw, "station_id", METRO_STATIONS_CSV, &mut issues)
    });

    let bike = load(dir, BIKE_STATIONS_CSV, &["station_id", "name", "lat", "lon"], &mut issues);
    let bike_ids = bike.as_ref().map(|raw| {
        check_coordinates(raw, BIKE_STATIONS_CSV, &mut issues);
        check_ids(raw, "station_id", BIKE_STATIONS_CSV, &mut issues)
    });

    if let Some(links) = load(
        dir,
        METRO_BIKE_LINKS_CSV,
        &["metro_station_id", "bike_station_id", "distance_m"],
        &mut issues,
    ) {
        let (bad, negative) = count_negative(&links, "distance_m");
        if bad > 0 {
            issues.warn(METRO_BIKE_LINKS_CSV, format!("{} rows with non-numeric distance_m", bad));
        }
        if negative > 0 {
            issues.warn(METRO_BIKE_LINKS_CSV, format!("{} rows with negative distance_m", negative));
        }

        for (col, known, label) in [
            ("metro_station_id", metro_ids.as_ref(), "metro"),
            ("bike_station_id", bike_ids.as_ref(), "bike"),
        ] {
            let (Some(known), Some(idx)) = (known, links.column(col)) else {
                continue;
            };
            let unknown = links.values(idx).filter(|id| !known.contains(*id)).count();
            if unknown > 0 {
                issues.warn(
                    METRO_BIKE_LINKS_CSV,
                    format!("{} links reference unknown {} stations", unknown, label),
                );
            }
        }
    }

    let bike_ts_path = dir.join(BIKE_TIMESERIES_CSV);
    if !bike_ts_path.is_file() {
        issues.warn(BIKE_TIMESERIES_CSV, "missing (time series views will be empty)");
    } else if let Some(ts) = load(
        dir,
        BIKE_TIMESERIES_CSV,
        &["station_id", "ts", "available_bikes"],
        &mut issues,
    ) {
        let (_, negative) = count_negative(&ts, "available_bikes");
        if negative > 0 {
            issues.warn(BIKE_TIMESERIES_CSV, format!("{} rows with negative available_bikes", negative));
        }
        check_timestamps(&ts, BIKE_TIMESERIES_CSV, &mut issues);
    }

    if dir.join(METRO_TIMESERIES_CSV).is_file() {
        if let Some(ts) = load(dir, METRO_TIMESERIES_CSV, &["station_id", "ts", "value"], &mut issues) {
            let (bad, negative) = count_negative(&ts, "value");
            if bad > 0 {
                issues.warn(METRO_TIMESERIES_CSV, format!("{} rows with non-numeric value", bad));
            }
            if negative > 0 {
                issues.warn(METRO_TIMESERIES_CSV, format!("{} rows with negative value", negative));
            }
            check_timestamps(&ts, METRO_TIMESERIES_CSV, &mut issues);
        }
    }

    let issues = issues.0;
    for issue in &issues {
        match issue.level {
            IssueLevel::Error => error!("{}", issue),
            IssueLevel::Warning => warn!("{}", issue),
        }
    }
    let errors = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
    info!(
        "Silver validation finished: {} errors, {} warnings",
        errors,
        issues.len() - errors
    );

    if strict && errors > 0 {
        bail!("Silver validation failed with {} errors", errors);
    }
    Ok(issues)
}
