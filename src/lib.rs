//! MetroBike Atlas - metro and bike-share station analytics
//!
//! This library holds the medallion pipeline (bronze, silver, gold), the
//! spatial and temporal building blocks it uses, and the HTTP API shared by
//! the `pipeline` and `serve` binaries.

pub mod analytics;
pub mod api;
pub mod bronze;
pub mod config;
pub mod error;
pub mod features;
pub mod logging;
pub mod models;
pub mod quality;
pub mod repository;
pub mod silver;
pub mod spatial;
pub mod tables;
pub mod tdx;
pub mod temporal;

pub use config::Config;
pub use error::{AtlasError, AtlasResult};
pub use repository::StationRepository;
