//! Normalization of external metro ridership tables.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use csv::ReaderBuilder;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use super::Agg;
use crate::models::MetroRidership;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpochUnit {
    S,
    Ms,
}

impl std::str::FromStr for EpochUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" => Ok(EpochUnit::S),
            "ms" => Ok(EpochUnit::Ms),
            other => Err(format!("unsupported ts_unit: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetroNormalizeOptions {
    pub station_id_col: String,
    pub ts_col: String,
    pub value_col: String,
    /// chrono format string; tried before the built-in formats
    pub ts_format: Option<String>,
    /// Treat the timestamp column as epoch seconds or milliseconds
    pub ts_unit: Option<EpochUnit>,
    /// Zone for timestamps without an offset
    pub input_timezone: Tz,
    pub output_timezone: Tz,
    pub dedup: Agg,
}

impl MetroNormalizeOptions {
    pub fn new(tz: Tz) -> Self {
        Self {
            station_id_col: "station_id".to_string(),
            ts_col: "ts".to_string(),
            value_col: "value".to_string(),
            ts_format: None,
            ts_unit: None,
            input_timezone: tz,
            output_timezone: tz,
            dedup: Agg::Sum,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct MetroImportReport {
    pub input_rows: usize,
    pub dropped_missing_station: usize,
    pub dropped_bad_ts: usize,
    pub dropped_bad_value: usize,
    pub output_rows: usize,
}

const NAIVE_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Parse one timestamp cell into a UTC instant.
pub fn parse_timestamp(raw: &str, opts: &MetroNormalizeOptions) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(unit) = opts.ts_unit {
        let n: f64 = raw.parse().ok()?;
        if !n.is_finite() {
            return None;
        }
        let millis = match unit {
            EpochUnit::S => (n * 1000.0).round() as i64,
            EpochUnit::Ms => n.round() as i64,
        };
        return DateTime::<Utc>::from_timestamp_millis(millis);
    }

    let localize = |naive: NaiveDateTime| {
        opts.input_timezone
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    };

    if let Some(fmt) = opts.ts_format.as_deref() {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return localize(naive);
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return localize(date.and_time(chrono::NaiveTime::MIN));
        }
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return localize(naive);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return localize(date.and_time(chrono::NaiveTime::MIN));
        }
    }
    None
}

/// Normalize raw ridership rows (column name to cell) into silver rows.
///
/// Rows with a blank station id, an unparseable timestamp or a non-numeric
/// value are dropped. Duplicate `(station_id, ts)` pairs are merged with
/// `opts.dedup`. Output is sorted by station, then time.
pub fn normalize_metro_timeseries<I>(
    rows: I,
    opts: &MetroNormalizeOptions,
) -> (Vec<MetroRidership>, MetroImportReport)
where
    I: IntoIterator<Item = HashMap<String, String>>,
{
    let mut report = MetroImportReport::default();
    let mut merged: BTreeMap<(String, DateTime<Utc>), (f64, usize)> = BTreeMap::new();

    for row in rows {
        report.input_rows += 1;

        let station_id = row
            .get(&opts.station_id_col)
            .map(|s| s.trim())
            .unwrap_or_default();
        if station_id.is_empty() || station_id.eq_ignore_ascii_case("nan") {
            report.dropped_missing_station += 1;
            continue;
        }

        let ts = match row.get(&opts.ts_col).and_then(|raw| parse_timestamp(raw, opts)) {
            Some(ts) => ts,
            None => {
                report.dropped_bad_ts += 1;
                continue;
            }
        };

        let value = match row
            .get(&opts.value_col)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
        {
            Some(v) => v,
            None => {
                report.dropped_bad_value += 1;
                continue;
            }
        };

        let entry = merged
            .entry((station_id.to_string(), ts))
            .or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    let out: Vec<MetroRidership> = merged
        .into_iter()
        .map(|((station_id, ts), (sum, count))| MetroRidership {
            station_id,
            ts: ts.with_timezone(&opts.output_timezone).fixed_offset(),
            value: match opts.dedup {
                Agg::Sum => sum,
                Agg::Mean => sum / count as f64,
            },
        })
        .collect();
    report.output_rows = out.len();

    if report.output_rows < report.input_rows {
        warn!(
            "Dropped {} of {} metro rows (station: {}, ts: {}, value: {})",
            report.input_rows - report.output_rows,
            report.input_rows,
            report.dropped_missing_station,
            report.dropped_bad_ts,
            report.dropped_bad_value
        );
    }

    (out, report)
}

/// Read a metro ridership CSV and normalize it.
pub fn read_metro_csv(
    path: &Path,
    opts: &MetroNormalizeOptions,
) -> Result<(Vec<MetroRidership>, MetroImportReport)> {
    info!("Reading metro time series from {}", path.display());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open metro time series {}", path.display()))?;
    let headers = reader.headers()?.clone();

    for col in [&opts.station_id_col, &opts.ts_col, &opts.value_col] {
        if !headers.iter().any(|h| h == col.as_str()) {
            anyhow::bail!("Column '{}' not found in {}", col, path.display());
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        rows.push(row);
    }

    let (out, report) = normalize_metro_timeseries(rows, opts);
    info!("Normalized {} metro rows", out.len());
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn row(station: &str, ts: &str, value: &str) -> HashMap<String, String> {
        let mut row = HashMap::new();
        row.insert("station_id".to_string(), station.to_string());
        row.insert("ts".to_string(), ts.to_string());
        row.insert("value".to_string(), value.to_string());
        row
    }

    #[test]
    fn test_naive_timestamps_are_localized() {
        let opts = MetroNormalizeOptions::new(Tz::Asia__Taipei);
        let (out, _) = normalize_metro_timeseries(vec![row("M1", "2026-01-01 08:00:00", "10")], &opts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ts.to_rfc3339(), "2026-01-01T08:00:00+08:00");
    }

    #[test]
    fn test_converts_between_zones() {
        let mut opts = MetroNormalizeOptions::new(Tz::Asia__Taipei);
        opts.input_timezone = Tz::UTC;
        let (out, _) = normalize_metro_timeseries(vec![row("M1", "2026-01-01 00:00:00", "1")], &opts);
        assert_eq!(out[0].ts.hour(), 8);
        assert_eq!(out[0].ts.offset().local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn test_duplicates_are_summed() {
        let opts = MetroNormalizeOptions::new(Tz::Asia__Taipei);
        let rows = vec![
            row(" M1 ", "2026-01-01 08:00:00", "10"),
            row("M1", "2026-01-01T08:00:00+08:00", "5"),
        ];
        let (out, report) = normalize_metro_timeseries(rows, &opts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].station_id, "M1");
        assert_eq!(out[0].value, 15.0);
        assert_eq!(report.input_rows, 2);
    }

    #[test]
    fn test_duplicates_mean() {
        let mut opts = MetroNormalizeOptions::new(Tz::Asia__Taipei);
        opts.dedup = Agg::Mean;
        let rows = vec![
            row("M1", "2026-01-01 08:00:00", "10"),
            row("M1", "2026-01-01 08:00:00", "5"),
        ];
        let (out, _) = normalize_metro_timeseries(rows, &opts);
        assert_eq!(out[0].value, 7.5);
    }

    #[test]
    fn test_bad_rows_are_dropped() {
        let opts = MetroNormalizeOptions::new(Tz::Asia__Taipei);
        let rows = vec![
            row("M1", "not a time", "10"),
            row("M1", "2026-01-01 09:00:00", "abc"),
            row("nan", "2026-01-01 09:00:00", "3"),
            row("", "2026-01-01 09:00:00", "3"),
            row("M2", "2026-01-01 09:00:00", "4"),
        ];
        let (out, report) = normalize_metro_timeseries(rows, &opts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].station_id, "M2");
        assert_eq!(report.dropped_bad_ts, 1);
        assert_eq!(report.dropped_bad_value, 1);
        assert_eq!(report.dropped_missing_station, 2);
    }

    #[test]
    fn test_epoch_seconds() {
        let mut opts = MetroNormalizeOptions::new(Tz::Asia__Taipei);
        opts.ts_unit = Some(EpochUnit::S);
        let (out, _) = normalize_metro_timeseries(vec![row("M1", "1767225600", "1")], &opts);
        assert_eq!(out[0].ts.to_rfc3339(), "2026-01-01T08:00:00+08:00");
    }

    #[test]
    fn test_explicit_format() {
        let mut opts = MetroNormalizeOptions::new(Tz::Asia__Taipei);
        opts.ts_format = Some("%d/%m/%Y %H:%M".to_string());
        let ts = parse_timestamp("01/01/2026 08:00", &opts).unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-01T00:00:00+00:00");
        assert!(parse_timestamp("2026-01-01 08:00", &opts).is_none());
    }

    #[test]
    fn test_output_sorted() {
        let opts = MetroNormalizeOptions::new(Tz::UTC);
        let rows = vec![
            row("M2", "2026-01-01 01:00:00", "1"),
            row("M1", "2026-01-01 02:00:00", "1"),
            row("M1", "2026-01-01 01:00:00", "1"),
        ];
        let (out, _) = normalize_metro_timeseries(rows, &opts);
        let keys: Vec<(String, u32)> = out.iter().map(|r| (r.station_id.clone(), r.ts.hour())).collect();
        assert_eq!(
            keys,
            vec![("M1".to_string(), 1), ("M1".to_string(), 2), ("M2".to_string(), 1)]
        );
    }
}
