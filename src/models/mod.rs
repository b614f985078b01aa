//! Core data models shared by the pipeline, the repository and the API.
//!
//! Every row type here doubles as a CSV record for the silver and gold tables.

pub mod series;
pub mod station;

pub use series::{
    BikeAvailability, BikeSnapshot, MetroRidership, StationTarget, TimeSeriesPoint,
};
pub use station::{BikeStation, DistrictAssignment, Located, MetroStation, StationBikeLink};
