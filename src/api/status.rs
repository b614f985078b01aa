use axum::{extract::State, response::Json};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::AppState;
use crate::bronze::{bronze_datasets, BronzeDatasetSummary};
use crate::config::{AnalyticsConfig, Config, MapConfig, SpatialConfig, TemporalConfig};
use crate::silver::{
    BIKE_STATIONS_CSV, BIKE_TIMESERIES_CSV, METRO_BIKE_LINKS_CSV, METRO_STATIONS_CSV,
    METRO_TIMESERIES_CSV, REQUIRED_TABLES,
};

/// Availability bronze older than this raises an alert.
pub const STALE_AVAILABILITY_MINUTES: i64 = 30;

const AVAILABILITY_DATASET: &str = "bike/availability";

/// Defaults the map UI starts from
#[derive(Debug, Serialize)]
pub struct UiConfig {
    app_name: String,
    demo_mode: bool,
    temporal: TemporalConfig,
    spatial: SpatialConfig,
    analytics: AnalyticsConfig,
    map: MapConfig,
}

pub async fn config_handler(State(state): State<Arc<AppState>>) -> Json<UiConfig> {
    let config = &state.config;
    Json(UiConfig {
        app_name: config.app.name.clone(),
        demo_mode: config.app.demo_mode,
        temporal: config.temporal.clone(),
        spatial: config.spatial.clone(),
        analytics: config.analytics.clone(),
        map: config.web.map.clone(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SilverTableStatus {
    pub name: String,
    pub required: bool,
    pub exists: bool,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub now_utc: DateTime<Utc>,
    pub demo_mode: bool,
    pub bronze_dir: String,
    pub silver_dir: String,
    pub silver_tables: Vec<SilverTableStatus>,
    pub bronze_datasets: Vec<BronzeDatasetSummary>,
    pub alerts: Vec<String>,
}

fn table_status(dir: &Path, name: &str) -> SilverTableStatus {
    let path = dir.join(name);
    let modified_at = fs::metadata(&path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    SilverTableStatus {
        name: name.to_string(),
        required: REQUIRED_TABLES.contains(&name),
        exists: path.is_file(),
        modified_at,
    }
}

/// Snapshot of what is on disk, plus alerts for anything that needs attention.
pub fn collect_status(config: &Config, now: DateTime<Utc>) -> StatusResponse {
    let silver_dir = &config.paths.silver_dir;
    let silver_tables: Vec<SilverTableStatus> = [
        METRO_STATIONS_CSV,
        BIKE_STATIONS_CSV,
        METRO_BIKE_LINKS_CSV,
        BIKE_TIMESERIES_CSV,
        METRO_TIMESERIES_CSV,
    ]
    .into_iter()
    .map(|name| table_status(silver_dir, name))
    .collect();
    let datasets = bronze_datasets(&config.paths.bronze_dir);

    let mut alerts = Vec::new();
    for table in silver_tables.iter().filter(|t| t.required && !t.exists) {
        alerts.push(format!("Missing silver table: {}", table.name));
    }

    let latest_availability = datasets
        .iter()
        .filter(|d| d.dataset.contains(AVAILABILITY_DATASET))
        .filter_map(|d| d.latest_retrieved_at)
        .max();
    match latest_availability {
        None if !config.app.demo_mode => {
            alerts.push("No bike availability bronze files found".to_string());
        }
        Some(latest) if now - latest > Duration::minutes(STALE_AVAILABILITY_MINUTES) => {
            alerts.push(format!(
                "Latest bike availability is {} minutes old",
                (now - latest).num_minutes()
            ));
        }
        _ => {}
    }

    StatusResponse {
        now_utc: now,
        demo_mode: config.app.demo_mode,
        bronze_dir: config.paths.bronze_dir.display().to_string(),
        silver_dir: silver_dir.display().to_string(),
        silver_tables,
        bronze_datasets: datasets,
        alerts,
    }
}

pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(collect_status(&state.config, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bronze::{write_bronze_json, BronzeKey};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::Builder;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.app.demo_mode = false;
        config.paths.bronze_dir = dir.join("bronze");
        config.paths.silver_dir = dir.join("silver");
        config
    }

    fn write_availability(base: &Path, ts: DateTime<Utc>) {
        let key = BronzeKey {
            source: "tdx",
            domain: "bike",
            dataset: "availability",
            city: "Taipei",
        };
        write_bronze_json(base, key, ts, json!({}), json!([])).unwrap();
    }

    #[test]
    fn test_status_alerts_on_empty_dirs() {
        let dir = Builder::new().prefix("atlas-status-").tempdir().unwrap();
        let config = config_in(dir.path());
        let status = collect_status(&config, Utc::now());

        assert_eq!(status.silver_tables.len(), 5);
        assert!(status.silver_tables.iter().all(|t| !t.exists));
        let missing = status
            .alerts
            .iter()
            .filter(|a| a.starts_with("Missing silver table"))
            .count();
        assert_eq!(missing, 3);
        assert!(status.alerts.iter().any(|a| a.contains("No bike availability")));
    }

    #[test]
    fn test_status_stale_availability() {
        let dir = Builder::new().prefix("atlas-status-").tempdir().unwrap();
        let config = config_in(dir.path());
        let retrieved = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        write_availability(&config.paths.bronze_dir, retrieved);

        let fresh = collect_status(&config, retrieved + Duration::minutes(10));
        assert!(!fresh.alerts.iter().any(|a| a.contains("availability")));
        assert_eq!(fresh.bronze_datasets.len(), 1);

        let stale = collect_status(&config, retrieved + Duration::minutes(45));
        assert!(stale.alerts.iter().any(|a| a.contains("45 minutes old")));
    }

    #[test]
    fn test_demo_mode_without_bronze_is_quiet() {
        let dir = Builder::new().prefix("atlas-status-").tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.app.demo_mode = true;
        let status = collect_status(&config, Utc::now());
        assert!(!status.alerts.iter().any(|a| a.contains("availability")));
    }
}
