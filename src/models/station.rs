//! Station and link rows.

use serde::{Deserialize, Serialize};

/// Metro station (silver `metro_stations.csv`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetroStation {
    pub station_id: String,
    pub name: String,
    #[serde(default)]
    pub name_en: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub system: String,
}

/// Bike-share station (silver `bike_stations.csv`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeStation {
    pub station_id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub capacity: Option<u32>,
}

/// Metro to bike station association (silver `metro_bike_links.csv`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationBikeLink {
    pub metro_station_id: String,
    pub bike_station_id: String,
    pub distance_m: f64,
}

/// Row of the station to district map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictAssignment {
    pub station_id: String,
    pub district: Option<String>,
}

/// Common view over anything with a position, used by the spatial join.
pub trait Located {
    fn id(&self) -> &str;
    fn lat(&self) -> f64;
    fn lon(&self) -> f64;

    fn has_position(&self) -> bool {
        self.lat().is_finite() && self.lon().is_finite()
    }
}

impl Located for MetroStation {
    fn id(&self) -> &str {
        &self.station_id
    }
    fn lat(&self) -> f64 {
        self.lat
    }
    fn lon(&self) -> f64 {
        self.lon
    }
}

impl Located for BikeStation {
    fn id(&self) -> &str {
        &self.station_id
    }
    fn lat(&self) -> f64 {
        self.lat
    }
    fn lon(&self) -> f64 {
        self.lon
    }
}
