//! Read model behind the HTTP API.
//!
//! A [`StationRepository`] owns one complete data set, either read from the
//! silver/gold directories or generated by [`StationRepository::demo`], and
//! answers every station query from memory.

mod demo;
mod queries;
mod views;

pub use queries::{JoinOverrides, MetroSeries, SimilarityOverrides, TimeseriesOverrides};
pub use views::{
    AnalyticsOverview, BikeStationView, ClusterSize, CoefficientView, Factor, MetricSeries,
    NearbyBike, RegressionSummary, SimilarStationView, StationFactors, StationTimeseries,
    StationView, TimeseriesMeta,
};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use hashbrown::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::analytics::{
    ClusterLabel, FeatureCorrelation, RegressionRow, FEATURE_CORRELATIONS_CSV,
    REGRESSION_COEFFICIENTS_CSV, STATION_CLUSTERS_CSV,
};
use crate::config::Config;
use crate::features::{load_district_map, FeatureTable};
use crate::models::{BikeSnapshot, BikeStation, MetroRidership, MetroStation, StationBikeLink};
use crate::silver::{
    BIKE_STATIONS_CSV, BIKE_TIMESERIES_CSV, METRO_BIKE_LINKS_CSV, METRO_STATIONS_CSV,
    METRO_TIMESERIES_CSV,
};
use crate::tables::{read_csv, read_csv_optional};

pub struct StationRepository {
    config: Config,
    tz: Tz,
    metro: Vec<MetroStation>,
    bikes: Vec<BikeStation>,
    links: Vec<StationBikeLink>,
    bike_ts: Vec<BikeSnapshot>,
    metro_ts: Vec<MetroRidership>,
    features: Option<FeatureTable>,
    districts: HashMap<String, String>,
    clusters: HashMap<String, usize>,
    correlations: Vec<FeatureCorrelation>,
    regression: Vec<RegressionRow>,
}

impl StationRepository {
    /// Load silver tables plus whatever gold artifacts exist.
    pub fn from_dirs(config: &Config, silver: &Path, gold: &Path) -> Result<Self> {
        let required = |name: &str| {
            let path = silver.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(anyhow::anyhow!("Missing required silver table: {}", path.display()))
            }
        };
        let metro: Vec<MetroStation> = read_csv(&required(METRO_STATIONS_CSV)?)?;
        let bikes: Vec<BikeStation> = read_csv(&required(BIKE_STATIONS_CSV)?)?;
        let links: Vec<StationBikeLink> = read_csv(&required(METRO_BIKE_LINKS_CSV)?)?;
        let bike_ts: Vec<BikeSnapshot> =
            read_csv_optional(&silver.join(BIKE_TIMESERIES_CSV))?.unwrap_or_default();
        let metro_ts: Vec<MetroRidership> =
            read_csv_optional(&silver.join(METRO_TIMESERIES_CSV))?.unwrap_or_default();

        let features_path = &config.features.station_features_path;
        let features = if features_path.is_file() {
            Some(FeatureTable::read_csv(features_path)?)
        } else {
            None
        };

        let mut districts = match config.features.station_district_map_path.as_deref() {
            Some(path) if path.is_file() => load_district_map(path)?,
            _ => HashMap::new(),
        };
        if let Some(table) = &features {
            for row in &table.rows {
                if let Some(d) = &row.district {
                    districts.entry(row.station_id.clone()).or_insert_with(|| d.clone());
                }
            }
        }

        let clusters: HashMap<String, usize> =
            read_csv_optional::<ClusterLabel>(&gold.join(STATION_CLUSTERS_CSV))?
                .unwrap_or_default()
                .into_iter()
                .map(|l| (l.station_id, l.cluster))
                .collect();
        let correlations =
            read_csv_optional(&gold.join(FEATURE_CORRELATIONS_CSV))?.unwrap_or_default();
        let regression =
            read_csv_optional(&gold.join(REGRESSION_COEFFICIENTS_CSV))?.unwrap_or_default();

        if features.is_none() {
            warn!("No gold features at {}; factors and similarity are unavailable", features_path.display());
        }
        info!(
            metro = metro.len(),
            bikes = bikes.len(),
            links = links.len(),
            bike_snapshots = bike_ts.len(),
            metro_rows = metro_ts.len(),
            "Loaded repository from {}",
            silver.display()
        );

        Ok(Self {
            tz: config.temporal.tz()?,
            config: config.clone(),
            metro,
            bikes,
            links,
            bike_ts,
            metro_ts,
            features,
            districts,
            clusters,
            correlations,
            regression,
        })
    }

    /// Demo data set when `app.demo_mode` is set, silver/gold otherwise.
    pub fn for_config(config: &Config) -> Result<Self> {
        if config.app.demo_mode {
            Self::demo(config)
        } else {
            Self::from_dirs(config, &config.paths.silver_dir, &config.paths.gold_dir)
                .context("Failed to load silver/gold data (set app.demo_mode to run without it)")
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metro_count(&self) -> usize {
        self.metro.len()
    }

    pub fn has_features(&self) -> bool {
        self.features.is_some()
    }

    fn metro_station(&self, id: &str) -> Option<&MetroStation> {
        self.metro.iter().find(|m| m.station_id == id)
    }
}
