//! Tolerant normalization of TDX station and availability records.
//!
//! TDX field names differ between endpoints and API versions, so each field is
//! looked up under every known key.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{BikeAvailability, BikeStation, MetroStation};

const ID_KEYS: [&str; 4] = ["StationUID", "StationId", "StationID", "UID"];
const POSITION_KEYS: [&str; 2] = ["StationPosition", "Position"];
const LAT_KEYS: [&str; 3] = ["PositionLat", "Lat", "latitude"];
const LON_KEYS: [&str; 3] = ["PositionLon", "Lon", "longitude"];
const OPERATOR_KEYS: [&str; 2] = ["OperatorID", "Operator"];
const CAPACITY_KEYS: [&str; 2] = ["BikesCapacity", "Capacity"];
const UPDATE_KEYS: [&str; 3] = ["UpdateTime", "SrcUpdateTime", "UpdateTimestamp"];
const BIKES_KEYS: [&str; 2] = ["AvailableRentBikes", "AvailableBikes"];
const DOCKS_KEYS: [&str; 2] = ["AvailableReturnBikes", "AvailableDocks"];

pub const SOURCE: &str = "tdx";

fn first<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find(|v| !v.is_null())
}

fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn number(value: &Value) -> Option<f64> {
    let n: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

fn station_id(item: &Value) -> Option<String> {
    first(item, &ID_KEYS).and_then(text)
}

/// `(zh, en)` names. `StationName` may be an object or a plain string.
fn station_names(item: &Value) -> (Option<String>, Option<String>) {
    match item.get("StationName") {
        Some(Value::Object(map)) => (
            map.get("Zh_tw").and_then(text),
            map.get("En").and_then(text),
        ),
        Some(other) => (text(other), None),
        None => (None, None),
    }
}

fn position(item: &Value) -> Option<(f64, f64)> {
    let pos = first(item, &POSITION_KEYS)?;
    let lat = first(pos, &LAT_KEYS).and_then(number)?;
    let lon = first(pos, &LON_KEYS).and_then(number)?;
    Some((lat, lon))
}

pub fn parse_metro_station(item: &Value, city: &str) -> Option<MetroStation> {
    let station_id = station_id(item)?;
    let (zh, en) = station_names(item);
    let (lat, lon) = position(item)?;
    let system = first(item, &OPERATOR_KEYS)
        .and_then(text)
        .unwrap_or_else(|| "METRO".to_string());

    Some(MetroStation {
        name: zh.or_else(|| en.clone()).unwrap_or_else(|| station_id.clone()),
        name_en: en,
        station_id,
        lat,
        lon,
        city: city.to_string(),
        system,
    })
}

pub fn parse_bike_station(item: &Value, city: &str) -> Option<BikeStation> {
    let station_id = station_id(item)?;
    let (zh, en) = station_names(item);
    let (lat, lon) = position(item)?;
    let operator = first(item, &OPERATOR_KEYS)
        .and_then(text)
        .unwrap_or_else(|| "BIKE".to_string());
    let capacity = first(item, &CAPACITY_KEYS)
        .and_then(number)
        .filter(|c| *c >= 0.0)
        .map(|c| c.round() as u32);

    Some(BikeStation {
        name: zh.or(en).unwrap_or_else(|| station_id.clone()),
        station_id,
        lat,
        lon,
        city: city.to_string(),
        operator,
        capacity,
    })
}

pub fn parse_bike_availability(item: &Value) -> Option<BikeAvailability> {
    let station_id = station_id(item)?;
    let ts = first(item, &UPDATE_KEYS)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())?
        .with_timezone(&Utc);
    let available_bikes = first(item, &BIKES_KEYS)
        .and_then(number)
        .map(|v| v.round() as i64)
        .unwrap_or(0);
    let available_docks = first(item, &DOCKS_KEYS)
        .and_then(number)
        .map(|v| v.round() as i64);

    Some(BikeAvailability {
        station_id,
        ts,
        available_bikes,
        available_docks,
        source: SOURCE.to_string(),
    })
}
