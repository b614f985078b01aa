use chrono::{DateTime, Duration, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::TimeSeriesPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "15min")]
    FifteenMin,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
}

impl Granularity {
    fn step_seconds(self) -> i64 {
        match self {
            Granularity::FifteenMin => 15 * 60,
            Granularity::Hour => 3600,
            Granularity::Day => 86_400,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::FifteenMin => write!(f, "15min"),
            Granularity::Hour => write!(f, "hour"),
            Granularity::Day => write!(f, "day"),
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "15min" => Ok(Granularity::FifteenMin),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            other => Err(format!("unsupported granularity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agg {
    Mean,
    Sum,
}

/// Start of the bucket containing `ts`, in local time of `tz`.
pub fn bucket_start(ts: DateTime<Utc>, granularity: Granularity, tz: Tz) -> DateTime<Utc> {
    let local = ts.with_timezone(&tz);

    if granularity == Granularity::Day {
        let midnight = local.date_naive().and_time(chrono::NaiveTime::MIN);
        if let Some(start) = tz.from_local_datetime(&midnight).earliest() {
            return start.with_timezone(&Utc);
        }
    }

    let offset = local.offset().fix().local_minus_utc() as i64;
    let step = granularity.step_seconds();
    let local_secs = ts.timestamp() + offset;
    let floored = local_secs - local_secs.rem_euclid(step);
    DateTime::<Utc>::from_timestamp(floored - offset, 0).unwrap_or(ts)
}

/// Bucket and aggregate a single series. Non-finite values are ignored and
/// empty buckets are not produced.
pub fn align_series<I>(points: I, granularity: Granularity, tz: Tz, agg: Agg) -> Vec<TimeSeriesPoint>
where
    I: IntoIterator<Item = (DateTime<Utc>, f64)>,
{
    let mut buckets: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
    for (ts, value) in points {
        if !value.is_finite() {
            continue;
        }
        let entry = buckets
            .entry(bucket_start(ts, granularity, tz))
            .or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(start, (sum, count))| TimeSeriesPoint {
            ts: start.with_timezone(&tz).fixed_offset(),
            value: match agg {
                Agg::Sum => sum,
                Agg::Mean => sum / count as f64,
            },
        })
        .collect()
}

/// Align rows grouped by key (e.g. station id). Output is sorted by key, then time.
pub fn align_by_key<I>(
    rows: I,
    granularity: Granularity,
    tz: Tz,
    agg: Agg,
) -> Vec<(String, TimeSeriesPoint)>
where
    I: IntoIterator<Item = (String, DateTime<Utc>, f64)>,
{
    let mut groups: BTreeMap<String, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
    for (key, ts, value) in rows {
        groups.entry(key).or_default().push((ts, value));
    }

    groups
        .into_iter()
        .flat_map(|(key, points)| {
            align_series(points, granularity, tz, agg)
                .into_iter()
                .map(move |p| (key.clone(), p))
        })
        .collect()
}

/// Length of one bucket, used by callers that need to step through a range.
pub fn bucket_len(granularity: Granularity) -> Duration {
    Duration::seconds(granularity.step_seconds())
}
