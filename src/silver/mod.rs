//! Silver layer: normalized CSV tables built from bronze.

mod builder;

pub use builder::{build_silver, SilverBuildOptions, SilverBuildReport};

pub const METRO_STATIONS_CSV: &str = "metro_stations.csv";
pub const BIKE_STATIONS_CSV: &str = "bike_stations.csv";
pub const BIKE_TIMESERIES_CSV: &str = "bike_timeseries.csv";
pub const METRO_BIKE_LINKS_CSV: &str = "metro_bike_links.csv";
pub const METRO_TIMESERIES_CSV: &str = "metro_timeseries.csv";
pub const SCHEMA_META_JSON: &str = "_schema_meta.json";

/// Tables every consumer needs; the rest are optional.
pub const REQUIRED_TABLES: [&str; 3] = [METRO_STATIONS_CSV, BIKE_STATIONS_CSV, METRO_BIKE_LINKS_CSV];
