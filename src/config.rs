//! TOML configuration with environment overrides.
//!
//! Every section has serde defaults so a partial file (or none at all in demo
//! mode) still yields a usable [`Config`].

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::spatial::JoinMethod;
use crate::temporal::Granularity;

pub const CONFIG_PATH_ENV: &str = "METROBIKEATLAS_CONFIG_PATH";
pub const DEMO_MODE_ENV: &str = "METROBIKEATLAS_DEMO_MODE";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub paths: PathsConfig,
    pub tdx: TdxConfig,
    pub temporal: TemporalConfig,
    pub spatial: SpatialConfig,
    pub cache: CacheConfig,
    pub features: FeaturesConfig,
    pub analytics: AnalyticsConfig,
    pub logging: LoggingConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub demo_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "MetroBikeAtlas".to_string(),
            demo_mode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub bronze_dir: PathBuf,
    pub silver_dir: PathBuf,
    pub gold_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// External metro station CSV used when bronze has no metro stations.
    pub external_metro_stations_csv: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            bronze_dir: PathBuf::from("data/bronze"),
            silver_dir: PathBuf::from("data/silver"),
            gold_dir: PathBuf::from("data/gold"),
            archive_dir: PathBuf::from("data/archive/bronze"),
            external_metro_stations_csv: Some(PathBuf::from(
                "data/external/metro_stations.csv",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TdxConfig {
    pub base_url: String,
    pub token_url: String,
    pub timeout_s: u64,
    pub max_retries: u32,
    pub backoff_s: f64,
    pub min_request_interval_s: f64,
    pub request_jitter_s: f64,
    pub max_pages: usize,
    pub metro: TdxMetroConfig,
    pub bike: TdxBikeConfig,
}

impl Default for TdxConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tdx.transportdata.tw/api/basic".to_string(),
            token_url:
                "https://tdx.transportdata.tw/auth/realms/TDXConnect/protocol/openid-connect/token"
                    .to_string(),
            timeout_s: 30,
            max_retries: 3,
            backoff_s: 1.0,
            min_request_interval_s: 0.5,
            request_jitter_s: 0.1,
            max_pages: 100,
            metro: TdxMetroConfig::default(),
            bike: TdxBikeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TdxMetroConfig {
    pub cities: Vec<String>,
    pub stations_path_template: String,
    pub ridership_path_template: Option<String>,
}

impl Default for TdxMetroConfig {
    fn default() -> Self {
        Self {
            cities: vec!["Taipei".to_string()],
            stations_path_template: "/v2/Rail/Metro/Station/TRTC".to_string(),
            ridership_path_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TdxBikeConfig {
    pub cities: Vec<String>,
    pub stations_path_template: String,
    pub availability_path_template: String,
}

impl Default for TdxBikeConfig {
    fn default() -> Self {
        Self {
            cities: vec!["Taipei".to_string(), "NewTaipei".to_string()],
            stations_path_template: "/v2/Bike/Station/City/{city}".to_string(),
            availability_path_template: "/v2/Bike/Availability/City/{city}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub timezone: String,
    pub granularity: Granularity,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Taipei".to_string(),
            granularity: Granularity::Hour,
        }
    }
}

impl TemporalConfig {
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub join_method: JoinMethod,
    pub radius_m: f64,
    pub nearest_k: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            join_method: JoinMethod::Buffer,
            radius_m: 500.0,
            nearest_k: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/cache"),
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub station_features_path: PathBuf,
    pub station_targets_path: PathBuf,
    pub timeseries_window_days: i64,
    pub admin_boundaries_geojson_path: Option<PathBuf>,
    pub station_district_map_path: Option<PathBuf>,
    pub poi: Option<PoiConfig>,
    pub time_patterns: TimePatternConfig,
    pub accessibility: AccessibilityConfig,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            station_features_path: PathBuf::from("data/gold/station_features.csv"),
            station_targets_path: PathBuf::from("data/gold/station_targets.csv"),
            timeseries_window_days: 7,
            admin_boundaries_geojson_path: None,
            station_district_map_path: Some(PathBuf::from(
                "data/external/metro_station_district.csv",
            )),
            poi: None,
            time_patterns: TimePatternConfig::default(),
            accessibility: AccessibilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoiConfig {
    pub path: PathBuf,
    pub radii_m: Vec<f64>,
    pub categories: Vec<String>,
}

impl Default for PoiConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/external/poi.csv"),
            radii_m: vec![300.0, 500.0],
            categories: Vec::new(),
        }
    }
}

/// Local hour windows, half-open `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimePatternConfig {
    pub peak_am_start_hour: u32,
    pub peak_am_end_hour: u32,
    pub peak_pm_start_hour: u32,
    pub peak_pm_end_hour: u32,
}

impl Default for TimePatternConfig {
    fn default() -> Self {
        Self {
            peak_am_start_hour: 7,
            peak_am_end_hour: 10,
            peak_pm_start_hour: 17,
            peak_pm_end_hour: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessibilityConfig {
    pub bike: BikeAccessibilityWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BikeAccessibilityWeights {
    pub w_station_count: f64,
    pub w_capacity_sum: f64,
    pub w_distance_mean_m: f64,
    pub bias: f64,
}

impl Default for BikeAccessibilityWeights {
    fn default() -> Self {
        Self {
            w_station_count: 1.0,
            w_capacity_sum: 0.02,
            w_distance_mean_m: -0.005,
            bias: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub similarity: SimilarityConfig,
    pub clustering: ClusteringConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub top_k: usize,
    pub metric: DistanceMetric,
    pub standardize: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            metric: DistanceMetric::Euclidean,
            standardize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub k: usize,
    pub standardize: bool,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k: 5,
            standardize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub static_dir: PathBuf,
    pub map: MapConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("web"),
            map: MapConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center_lat: 25.0375,
            center_lon: 121.5637,
            zoom: 12,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration the way both binaries do it.
    ///
    /// Path precedence: explicit argument, then `METROBIKEATLAS_CONFIG_PATH`,
    /// then `config/default.toml`. A missing default file falls back to
    /// built-in defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::load_from_file(&path)
                    .with_context(|| format!("config path {}", path.display()))?
            }
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                info!("Loading config from {}", DEFAULT_CONFIG_PATH);
                Self::load_from_file(DEFAULT_CONFIG_PATH)?
            }
            None => {
                debug!("No config file found, using built-in defaults");
                Config::default()
            }
        };

        if let Ok(raw) = std::env::var(DEMO_MODE_ENV) {
            config.apply_demo_override(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_demo_override(&mut self, raw: &str) -> Result<()> {
        self.app.demo_mode = parse_bool_flag(raw)
            .with_context(|| format!("{} must be a boolean, got {:?}", DEMO_MODE_ENV, raw))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tdx.base_url.trim().is_empty() {
            bail!("tdx.base_url must not be empty");
        }
        if self.tdx.token_url.trim().is_empty() {
            bail!("tdx.token_url must not be empty");
        }
        self.temporal.tz()?;
        if !(self.spatial.radius_m.is_finite() && self.spatial.radius_m > 0.0) {
            bail!("spatial.radius_m must be > 0");
        }
        if self.spatial.nearest_k < 1 {
            bail!("spatial.nearest_k must be >= 1");
        }
        if self.features.timeseries_window_days < 1 {
            bail!("features.timeseries_window_days must be >= 1");
        }
        if self.tdx.max_pages < 1 {
            bail!("tdx.max_pages must be >= 1");
        }
        for (name, value) in [
            ("tdx.backoff_s", self.tdx.backoff_s),
            ("tdx.min_request_interval_s", self.tdx.min_request_interval_s),
            ("tdx.request_jitter_s", self.tdx.request_jitter_s),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                bail!("{} must be a finite number >= 0", name);
            }
        }
        Ok(())
    }

    /// Resolve relative data paths against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.paths.bronze_dir);
        fix(&mut self.paths.silver_dir);
        fix(&mut self.paths.gold_dir);
        fix(&mut self.paths.archive_dir);
        if let Some(p) = self.paths.external_metro_stations_csv.as_mut() {
            fix(p);
        }
        fix(&mut self.cache.dir);
        fix(&mut self.features.station_features_path);
        fix(&mut self.features.station_targets_path);
        if let Some(p) = self.features.admin_boundaries_geojson_path.as_mut() {
            fix(p);
        }
        if let Some(p) = self.features.station_district_map_path.as_mut() {
            fix(p);
        }
        if let Some(poi) = self.features.poi.as_mut() {
            fix(&mut poi.path);
        }
        if let Some(p) = self.logging.file.as_mut() {
            fix(p);
        }
        fix(&mut self.web.static_dir);
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("Unknown timezone {:?}: {}", name, e))
}

fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.temporal.timezone, "Asia/Taipei");
        assert_eq!(config.spatial.join_method, JoinMethod::Buffer);
        assert_eq!(config.analytics.similarity.top_k, 5);
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = Config::load_from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.tdx.bike.cities, vec!["Taipei", "NewTaipei"]);
        assert!(config.features.poi.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [app]
            demo_mode = false

            [spatial]
            join_method = "nearest"
            nearest_k = 2

            [temporal]
            granularity = "15min"
            "#,
        )
        .unwrap();

        assert!(!config.app.demo_mode);
        assert_eq!(config.app.name, "MetroBikeAtlas");
        assert_eq!(config.spatial.join_method, JoinMethod::Nearest);
        assert_eq!(config.spatial.nearest_k, 2);
        assert_eq!(config.spatial.radius_m, 500.0);
        assert_eq!(config.temporal.granularity, Granularity::FifteenMin);
    }

    #[test]
    fn test_rejects_unknown_enum_values() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [spatial]
            join_method = "voronoi"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.temporal.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.spatial.radius_m = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tdx.token_url = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tdx.min_request_interval_s = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tdx.backoff_s = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_demo_override() {
        let mut config = Config::default();
        config.apply_demo_override("off").unwrap();
        assert!(!config.app.demo_mode);
        config.apply_demo_override("YES").unwrap();
        assert!(config.app.demo_mode);
        assert!(config.apply_demo_override("maybe").is_err());
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = Config::default();
        config.paths.gold_dir = PathBuf::from("/abs/gold");
        config.resolve_paths(Path::new("/srv/atlas"));
        assert_eq!(config.paths.silver_dir, PathBuf::from("/srv/atlas/data/silver"));
        assert_eq!(config.paths.gold_dir, PathBuf::from("/abs/gold"));
        assert_eq!(config.web.static_dir, PathBuf::from("/srv/atlas/web"));
    }
}
