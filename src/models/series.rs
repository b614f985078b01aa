//! Time-indexed rows.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// One availability observation as parsed from the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeAvailability {
    pub station_id: String,
    pub ts: DateTime<Utc>,
    pub available_bikes: i64,
    pub available_docks: Option<i64>,
    pub source: String,
}

/// Silver `bike_timeseries.csv` row: an availability observation plus the
/// derived rent/return proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeSnapshot {
    pub station_id: String,
    pub ts: DateTime<Utc>,
    pub available_bikes: i64,
    #[serde(default)]
    pub available_docks: Option<i64>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub rent_proxy: Option<f64>,
    #[serde(default)]
    pub return_proxy: Option<f64>,
}

impl BikeSnapshot {
    pub fn from_availability(record: BikeAvailability, city: &str) -> Self {
        Self {
            station_id: record.station_id,
            ts: record.ts,
            available_bikes: record.available_bikes,
            available_docks: record.available_docks,
            city: city.to_string(),
            source: record.source,
            rent_proxy: None,
            return_proxy: None,
        }
    }
}

/// Silver `metro_timeseries.csv` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetroRidership {
    pub station_id: String,
    pub ts: DateTime<FixedOffset>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub ts: DateTime<FixedOffset>,
    pub value: f64,
}

/// Gold `station_targets.csv` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationTarget {
    pub station_id: String,
    pub metric: String,
    pub value: f64,
    pub window_days: i64,
}
