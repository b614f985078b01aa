//! Serializable results returned by [`super::StationRepository`] queries.

use serde::{Deserialize, Serialize};

use crate::analytics::FeatureCorrelation;
use crate::models::TimeSeriesPoint;
use crate::spatial::JoinMethod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationView {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub city: String,
    pub system: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeStationView {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub city: String,
    pub operator: String,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyBike {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub distance_m: f64,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric: String,
    pub points: Vec<TimeSeriesPoint>,
    pub source: Option<String>,
    pub is_proxy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesMeta {
    pub join_method: JoinMethod,
    pub radius_m: f64,
    pub nearest_k: usize,
    pub window_days: i64,
    pub metro_series: String,
    pub bike_stations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationTimeseries {
    pub station_id: String,
    pub granularity: String,
    pub timezone: String,
    pub series: Vec<MetricSeries>,
    pub meta: TimeseriesMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationFactors {
    pub station_id: String,
    pub available: bool,
    pub district: Option<String>,
    pub factors: Vec<Factor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarStationView {
    pub id: String,
    pub name: Option<String>,
    pub distance: f64,
    pub cluster: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientView {
    pub feature: String,
    pub coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSummary {
    /// `None` when undefined (constant target)
    pub r2: Option<f64>,
    pub n: usize,
    pub intercept: Option<f64>,
    pub coefficients: Vec<CoefficientView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSize {
    pub cluster: usize,
    pub stations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub available: bool,
    pub correlations: Vec<FeatureCorrelation>,
    pub regression: Option<RegressionSummary>,
    pub clusters: Vec<ClusterSize>,
}
