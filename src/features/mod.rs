//! Gold layer: station-level features and targets derived from silver tables.

mod builder;
mod inputs;
mod table;

pub use builder::{
    build_station_features, build_station_targets, join_params, primary_metro_by_bike,
    within_window, FeatureInputs, TARGET_BIKE_FLOW_PROXY, TARGET_METRO_RIDERSHIP,
};
pub use inputs::{load_district_map, load_pois, Poi};
pub use table::{FeatureRow, FeatureTable};

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{BikeSnapshot, BikeStation, MetroRidership, MetroStation, StationBikeLink};
use crate::silver::{
    BIKE_STATIONS_CSV, BIKE_TIMESERIES_CSV, METRO_BIKE_LINKS_CSV, METRO_STATIONS_CSV,
    METRO_TIMESERIES_CSV,
};
use crate::tables::{read_csv, read_csv_optional, write_csv};
use crate::temporal::compute_rent_return_proxy;

#[derive(Debug, Clone, Serialize)]
pub struct FeatureBuildReport {
    pub stations: usize,
    pub feature_columns: usize,
    pub targets: usize,
}

fn optional_input<T>(path: Option<&Path>, load: impl Fn(&Path) -> Result<T>) -> Result<Option<T>> {
    match path {
        Some(p) if p.is_file() => load(p).map(Some),
        Some(p) => {
            warn!("{} not found; skipping", p.display());
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Read silver tables, then write `station_features.csv` and `station_targets.csv`.
pub fn build_features_from_silver(config: &Config) -> Result<FeatureBuildReport> {
    let silver = &config.paths.silver_dir;
    let metro: Vec<MetroStation> = read_csv(&silver.join(METRO_STATIONS_CSV))
        .context("Run build-silver first")?;
    let bikes: Vec<BikeStation> = read_csv(&silver.join(BIKE_STATIONS_CSV))?;
    let links: Vec<StationBikeLink> = read_csv(&silver.join(METRO_BIKE_LINKS_CSV))?;
    let mut bike_ts: Vec<BikeSnapshot> =
        read_csv_optional(&silver.join(BIKE_TIMESERIES_CSV))?.unwrap_or_default();
    let metro_ts: Option<Vec<MetroRidership>> =
        read_csv_optional(&silver.join(METRO_TIMESERIES_CSV))?;

    if !bike_ts.is_empty() && bike_ts.iter().all(|s| s.rent_proxy.is_none()) {
        compute_rent_return_proxy(&mut bike_ts);
    }

    let pois = match config.features.poi.as_ref() {
        Some(poi_cfg) => optional_input(Some(poi_cfg.path.as_path()), load_pois)?,
        None => None,
    };
    let district_map = optional_input(
        config.features.station_district_map_path.as_deref(),
        load_district_map,
    )?;

    let inputs = FeatureInputs {
        metro: &metro,
        bikes: &bikes,
        links: &links,
        bike_ts: Some(&bike_ts),
        pois: pois.as_deref(),
        district_map: district_map.as_ref(),
    };
    let table = build_station_features(config, &inputs)?;
    table.write_csv(&config.features.station_features_path)?;

    let targets = build_station_targets(config, &bike_ts, &links, metro_ts.as_deref());
    write_csv(&config.features.station_targets_path, &targets)?;

    let report = FeatureBuildReport {
        stations: table.len(),
        feature_columns: table.columns.len(),
        targets: targets.len(),
    };
    info!(
        stations = report.stations,
        columns = report.feature_columns,
        targets = report.targets,
        "Wrote {} and {}",
        config.features.station_features_path.display(),
        config.features.station_targets_path.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StationTarget;
    use std::fs;
    use tempfile::Builder;

    #[test]
    fn test_build_features_from_silver() {
        let dir = Builder::new().prefix("atlas-gold-").tempdir().unwrap();
        let mut config = Config::default();
        config.resolve_paths(dir.path());
        let silver = &config.paths.silver_dir;
        fs::create_dir_all(silver).unwrap();
        fs::write(
            silver.join(METRO_STATIONS_CSV),
            "station_id,name,name_en,lat,lon,city,system\nM1,A,,25.0478,121.5170,Taipei,TRTC\n",
        )
        .unwrap();
        fs::write(
            silver.join(BIKE_STATIONS_CSV),
            "station_id,name,lat,lon,city,operator,capacity\nB1,B,25.0484,121.5155,Taipei,YouBike,40\n",
        )
        .unwrap();
        fs::write(
            silver.join(METRO_BIKE_LINKS_CSV),
            "metro_station_id,bike_station_id,distance_m\nM1,B1,165.2\n",
        )
        .unwrap();
        fs::write(
            silver.join(BIKE_TIMESERIES_CSV),
            "station_id,ts,available_bikes,available_docks,city,source,rent_proxy,return_proxy\n\
             B1,2026-01-05T00:00:00Z,10,,Taipei,tdx,,\n\
             B1,2026-01-05T00:15:00Z,7,,Taipei,tdx,,\n",
        )
        .unwrap();

        let report = build_features_from_silver(&config).unwrap();
        assert_eq!(report.stations, 1);
        assert_eq!(report.targets, 1);

        let table = FeatureTable::read_csv(&config.features.station_features_path).unwrap();
        let idx = table.column_index("bike_rent_proxy_total_r500m_7d").unwrap();
        assert_eq!(table.rows[0].values[idx], Some(3.0));

        let targets: Vec<StationTarget> = read_csv(&config.features.station_targets_path).unwrap();
        assert_eq!(targets[0].metric, TARGET_BIKE_FLOW_PROXY);
        assert_eq!(targets[0].value, 3.0);
    }
}
