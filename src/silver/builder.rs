use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    BIKE_STATIONS_CSV, BIKE_TIMESERIES_CSV, METRO_BIKE_LINKS_CSV, METRO_STATIONS_CSV,
    SCHEMA_META_JSON,
};
use crate::bronze::{latest_bronze_file, list_bronze_files, read_bronze_json, BronzeKey};
use crate::config::Config;
use crate::models::{BikeSnapshot, BikeStation, MetroStation};
use crate::quality::compute_schema_meta;
use crate::spatial::{build_station_bike_links, JoinParams};
use crate::tables::{read_csv, write_csv, write_json_atomic};
use crate::tdx::{parse_bike_availability, parse_bike_station, parse_metro_station};
use crate::temporal::compute_rent_return_proxy;

#[derive(Debug, Clone)]
pub struct SilverBuildOptions {
    /// Use the external metro CSV even when bronze has metro stations
    pub prefer_external_metro: bool,
    /// Newest availability files read per city
    pub max_availability_files: usize,
}

impl Default for SilverBuildOptions {
    fn default() -> Self {
        Self {
            prefer_external_metro: false,
            max_availability_files: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SilverBuildReport {
    pub build_id: Uuid,
    pub metro_source: String,
    pub metro_stations: usize,
    pub bike_stations: usize,
    pub bike_snapshots: usize,
    pub links: usize,
    pub elapsed_ms: u128,
}

fn bronze_key<'a>(domain: &'a str, dataset: &'a str, city: &'a str) -> BronzeKey<'a> {
    BronzeKey {
        source: "tdx",
        domain,
        dataset,
        city,
    }
}

fn payload_items(payload: &serde_json::Value) -> &[serde_json::Value] {
    payload.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn metro_from_bronze(config: &Config) -> Result<Vec<MetroStation>> {
    let bronze = &config.paths.bronze_dir;
    let mut stations = Vec::new();
    for city in &config.tdx.metro.cities {
        let path = latest_bronze_file(&bronze_key("metro", "stations", city).dir(bronze))?;
        let record = read_bronze_json(&path)?;
        let items = payload_items(&record.payload);
        let before = stations.len();
        stations.extend(items.iter().filter_map(|item| parse_metro_station(item, city)));
        let parsed = stations.len() - before;
        if parsed < items.len() {
            warn!("{}: skipped {} unparseable metro records", city, items.len() - parsed);
        }
    }
    if stations.is_empty() {
        bail!("No metro stations found in bronze");
    }
    Ok(stations)
}

fn metro_from_external(config: &Config) -> Result<Vec<MetroStation>> {
    let path = config
        .paths
        .external_metro_stations_csv
        .as_deref()
        .context("paths.external_metro_stations_csv is not configured")?;
    let stations: Vec<MetroStation> = read_csv(path)?;
    if stations.is_empty() {
        bail!("External metro station file {} is empty", path.display());
    }
    Ok(stations)
}

fn load_metro(config: &Config, opts: &SilverBuildOptions) -> Result<(Vec<MetroStation>, String)> {
    if !opts.prefer_external_metro {
        match metro_from_bronze(config) {
            Ok(stations) => return Ok((stations, "bronze".to_string())),
            Err(e) => warn!("Metro stations unavailable from bronze ({:#}), trying external CSV", e),
        }
    }
    let stations = metro_from_external(config)
        .context("No usable metro station source (bronze or external CSV)")?;
    Ok((stations, "external_csv".to_string()))
}

fn load_bike_stations(config: &Config) -> Result<Vec<BikeStation>> {
    let bronze = &config.paths.bronze_dir;
    let mut stations = Vec::new();
    for city in &config.tdx.bike.cities {
        let dir = bronze_key("bike", "stations", city).dir(bronze);
        let path = match latest_bronze_file(&dir) {
            Ok(p) => p,
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };
        let record = read_bronze_json(&path)?;
        stations.extend(
            payload_items(&record.payload)
                .iter()
                .filter_map(|item| parse_bike_station(item, city)),
        );
    }
    if stations.is_empty() {
        bail!("No bike stations found in bronze");
    }
    Ok(stations)
}

fn load_bike_snapshots(config: &Config, max_files: usize) -> Result<Vec<BikeSnapshot>> {
    let bronze = &config.paths.bronze_dir;

    let mut files = Vec::new();
    for city in &config.tdx.bike.cities {
        let all = list_bronze_files(&bronze_key("bike", "availability", city).dir(bronze))?;
        let skip = all.len().saturating_sub(max_files);
        files.extend(all.into_iter().skip(skip).map(|p| (city.as_str(), p)));
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} availability files")?
            .progress_chars("#>-"),
    );

    let mut snapshots = Vec::new();
    let mut skipped = 0usize;
    for (city, path) in files {
        match read_bronze_json(&path) {
            Ok(record) => {
                for item in payload_items(&record.payload) {
                    match parse_bike_availability(item) {
                        Some(rec) => snapshots.push(BikeSnapshot::from_availability(rec, city)),
                        None => skipped += 1,
                    }
                }
            }
            Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if skipped > 0 {
        warn!("Skipped {} unparseable availability records", skipped);
    }

    compute_rent_return_proxy(&mut snapshots);
    Ok(snapshots)
}

/// Build every silver table from the latest bronze data.
pub fn build_silver(config: &Config, opts: &SilverBuildOptions) -> Result<SilverBuildReport> {
    let started = Instant::now();
    let build_id = Uuid::new_v4();
    let silver: &Path = &config.paths.silver_dir;
    info!("Building silver tables into {} (build {})", silver.display(), build_id);

    let (metro, metro_source) = load_metro(config, opts)?;
    write_csv(&silver.join(METRO_STATIONS_CSV), &metro)?;
    info!("metro_stations: {} rows from {}", metro.len(), metro_source);

    let bikes = load_bike_stations(config)?;
    write_csv(&silver.join(BIKE_STATIONS_CSV), &bikes)?;
    info!("bike_stations: {} rows", bikes.len());

    let snapshots = load_bike_snapshots(config, opts.max_availability_files)?;
    if snapshots.is_empty() {
        warn!("No bike availability found in bronze; skipping {}", BIKE_TIMESERIES_CSV);
    } else {
        write_csv(&silver.join(BIKE_TIMESERIES_CSV), &snapshots)?;
        info!("bike_timeseries: {} rows", snapshots.len());
    }

    let params = JoinParams {
        method: config.spatial.join_method,
        radius_m: config.spatial.radius_m,
        nearest_k: config.spatial.nearest_k,
    };
    let links = build_station_bike_links(&metro, &bikes, &params);
    write_csv(&silver.join(METRO_BIKE_LINKS_CSV), &links)?;

    let meta = compute_schema_meta(silver)?;
    write_json_atomic(&silver.join(SCHEMA_META_JSON), &meta)?;

    let report = SilverBuildReport {
        build_id,
        metro_source,
        metro_stations: metro.len(),
        bike_stations: bikes.len(),
        bike_snapshots: snapshots.len(),
        links: links.len(),
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        build_id = %report.build_id,
        metro = report.metro_stations,
        bikes = report.bike_stations,
        snapshots = report.bike_snapshots,
        links = report.links,
        elapsed_ms = report.elapsed_ms as u64,
        "Silver build complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bronze::write_bronze_json;
    use crate::tables::read_csv;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::Builder;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.tdx.metro.cities = vec!["Taipei".to_string()];
        config.tdx.bike.cities = vec!["Taipei".to_string()];
        config.paths.external_metro_stations_csv = None;
        config.resolve_paths(dir);
        config
    }

    fn seed_bronze(config: &Config) {
        let bronze = &config.paths.bronze_dir;
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        write_bronze_json(
            bronze,
            bronze_key("metro", "stations", "Taipei"),
            t0,
            json!({}),
            json!([{
                "StationUID": "M1",
                "StationName": {"Zh_tw": "台北車站", "En": "Taipei Main"},
                "StationPosition": {"PositionLat": 25.0478, "PositionLon": 121.5170}
            }]),
        )
        .unwrap();
        write_bronze_json(
            bronze,
            bronze_key("bike", "stations", "Taipei"),
            t0,
            json!({}),
            json!([
                {"StationUID": "B1", "StationName": {"Zh_tw": "B1"},
                 "StationPosition": {"PositionLat": 25.0484, "PositionLon": 121.5155},
                 "BikesCapacity": 40},
                {"StationUID": "B9", "StationName": {"Zh_tw": "far"},
                 "StationPosition": {"PositionLat": 25.2, "PositionLon": 121.7}}
            ]),
        )
        .unwrap();
        for (minute, bikes) in [(0, 10), (15, 6)] {
            let ts = t0 + chrono::Duration::minutes(minute);
            write_bronze_json(
                bronze,
                bronze_key("bike", "availability", "Taipei"),
                ts,
                json!({}),
                json!([{"StationUID": "B1", "AvailableRentBikes": bikes,
                        "UpdateTime": ts.to_rfc3339()}]),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_build_silver_end_to_end() {
        let dir = Builder::new().prefix("atlas-silver-").tempdir().unwrap();
        let config = config_in(dir.path());
        seed_bronze(&config);

        let report = build_silver(&config, &SilverBuildOptions::default()).unwrap();
        assert_eq!(report.metro_source, "bronze");
        assert_eq!(report.metro_stations, 1);
        assert_eq!(report.bike_stations, 2);
        assert_eq!(report.bike_snapshots, 2);
        assert_eq!(report.links, 1);

        let silver = &config.paths.silver_dir;
        let snapshots: Vec<BikeSnapshot> = read_csv(&silver.join(BIKE_TIMESERIES_CSV)).unwrap();
        assert_eq!(snapshots[1].rent_proxy, Some(4.0));
        assert_eq!(snapshots[0].rent_proxy, None);
        assert!(silver.join(SCHEMA_META_JSON).is_file());
    }

    #[test]
    fn test_falls_back_to_external_metro() {
        let dir = Builder::new().prefix("atlas-silver-").tempdir().unwrap();
        let mut config = config_in(dir.path());
        seed_bronze(&config);
        let external = dir.path().join("external_metro.csv");
        std::fs::write(
            &external,
            "station_id,name,lat,lon,city,system\nX1,Ext,25.0478,121.5170,Taipei,TRTC\n",
        )
        .unwrap();
        config.paths.external_metro_stations_csv = Some(external);

        let opts = SilverBuildOptions {
            prefer_external_metro: true,
            ..Default::default()
        };
        let report = build_silver(&config, &opts).unwrap();
        assert_eq!(report.metro_source, "external_csv");
        let metro: Vec<MetroStation> =
            read_csv(&config.paths.silver_dir.join(METRO_STATIONS_CSV)).unwrap();
        assert_eq!(metro[0].station_id, "X1");
        assert_eq!(metro[0].name_en, None);
    }

    #[test]
    fn test_fails_without_any_metro_source() {
        let dir = Builder::new().prefix("atlas-silver-").tempdir().unwrap();
        let config = config_in(dir.path());
        assert!(build_silver(&config, &SilverBuildOptions::default()).is_err());
    }
}
