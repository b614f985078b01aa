//! One-shot pipeline steps: bronze collection, silver, gold and maintenance.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use hashbrown::HashSet;
use tracing::{info, warn};

use metrobikeatlas::analytics::build_analytics;
use metrobikeatlas::bronze::archive_bronze;
use metrobikeatlas::config::Config;
use metrobikeatlas::features::{build_features_from_silver, TARGET_BIKE_FLOW_PROXY};
use metrobikeatlas::logging::init_logging;
use metrobikeatlas::models::{MetroRidership, MetroStation};
use metrobikeatlas::quality::{compute_schema_meta, validate_silver_dir, IssueLevel};
use metrobikeatlas::silver::{
    build_silver, SilverBuildOptions, METRO_STATIONS_CSV, METRO_TIMESERIES_CSV, SCHEMA_META_JSON,
};
use metrobikeatlas::spatial::BoundaryIndex;
use metrobikeatlas::tables::{read_csv, write_csv, write_json_atomic};
use metrobikeatlas::tdx::{collect_snapshot, CollectOptions, ResponseCache, TdxClient, TdxCredentials};
use metrobikeatlas::temporal::{align_by_key, read_metro_csv, Agg, MetroNormalizeOptions};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "MetroBike Atlas data pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConfigArg {
    /// Config file (defaults to $METROBIKEATLAS_CONFIG_PATH, then config/default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch one TDX snapshot into bronze
    Collect {
        #[command(flatten)]
        cfg: ConfigArg,
        /// Bike station listings
        #[arg(long)]
        stations: bool,
        /// Bike availability
        #[arg(long)]
        availability: bool,
        /// Metro station listings
        #[arg(long)]
        metro: bool,
    },
    /// Build silver tables from the latest bronze files
    BuildSilver {
        #[command(flatten)]
        cfg: ConfigArg,
        /// Use the external metro CSV even when bronze has metro stations
        #[arg(long)]
        prefer_external_metro: bool,
        /// Newest availability files read per city
        #[arg(long, default_value = "500")]
        max_availability_files: usize,
    },
    /// Assign metro stations to districts from a boundary GeoJSON
    DistrictMap {
        #[command(flatten)]
        cfg: ConfigArg,
        /// Boundary GeoJSON (defaults to features.admin_boundaries_geojson_path)
        #[arg(long)]
        boundaries: Option<PathBuf>,
        /// Feature property holding the district name
        #[arg(long)]
        name_property: Option<String>,
        /// Output CSV (defaults to features.station_district_map_path)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Normalize an external ridership CSV into silver
    ImportMetroTimeseries {
        #[command(flatten)]
        cfg: ConfigArg,
        /// Input CSV
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "station_id")]
        station_id_col: String,
        #[arg(long, default_value = "ts")]
        ts_col: String,
        #[arg(long, default_value = "value")]
        value_col: String,
        /// chrono format string for the timestamp column
        #[arg(long)]
        ts_format: Option<String>,
        /// Bucket rows to the configured granularity
        #[arg(long)]
        align: bool,
        /// Drop rows whose station is not in silver metro stations
        #[arg(long)]
        drop_unknown_stations: bool,
    },
    /// Build gold station features and targets
    BuildFeatures {
        #[command(flatten)]
        cfg: ConfigArg,
    },
    /// Build gold analytics from features and targets
    BuildAnalytics {
        #[command(flatten)]
        cfg: ConfigArg,
        #[arg(long, default_value = TARGET_BIKE_FLOW_PROXY)]
        target_metric: String,
        /// Output directory (defaults to paths.gold_dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Validate silver tables and refresh the schema contract
    ValidateSilver {
        #[command(flatten)]
        cfg: ConfigArg,
        /// Fail on error-level issues
        #[arg(long)]
        strict: bool,
    },
    /// Bundle old bronze files into gzip archives
    ArchiveBronze {
        #[command(flatten)]
        cfg: ConfigArg,
        #[arg(long, default_value = "7")]
        older_than_days: i64,
        /// Remove originals after bundling
        #[arg(long)]
        delete: bool,
    },
}

impl Command {
    fn config_path(&self) -> Option<&std::path::Path> {
        let cfg = match self {
            Command::Collect { cfg, .. }
            | Command::BuildSilver { cfg, .. }
            | Command::DistrictMap { cfg, .. }
            | Command::ImportMetroTimeseries { cfg, .. }
            | Command::BuildFeatures { cfg }
            | Command::BuildAnalytics { cfg, .. }
            | Command::ValidateSilver { cfg, .. }
            | Command::ArchiveBronze { cfg, .. } => cfg,
        };
        cfg.config.as_deref()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.command.config_path())?;
    config.resolve_paths(&std::env::current_dir()?);
    let _guard = init_logging(&config.logging)?;

    match cli.command {
        Command::Collect {
            stations,
            availability,
            metro,
            ..
        } => {
            let all = !(stations || availability || metro);
            let opts = CollectOptions {
                bike_stations: all || stations,
                bike_availability: all || availability,
                metro_stations: all || metro,
            };
            let client = TdxClient::new(&config.tdx, TdxCredentials::from_env()?)?;
            let cache = match ResponseCache::open(&config.cache.dir, config.cache.ttl_seconds) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("Response cache unavailable: {:#}", e);
                    None
                }
            };
            let report = collect_snapshot(&client, &config, cache.as_ref(), opts).await?;
            info!(
                written = report.written.len(),
                failures = report.failures,
                "Collect finished"
            );
            if report.written.is_empty() && report.failures > 0 {
                bail!("Every collect job failed");
            }
        }

        Command::BuildSilver {
            prefer_external_metro,
            max_availability_files,
            ..
        } => {
            let report = build_silver(
                &config,
                &SilverBuildOptions {
                    prefer_external_metro,
                    max_availability_files,
                },
            )?;
            info!("{}", serde_json::to_string(&report)?);
        }

        Command::DistrictMap {
            boundaries,
            name_property,
            out,
            ..
        } => {
            let Some(boundaries) = boundaries.or(config.features.admin_boundaries_geojson_path.clone())
            else {
                bail!("No boundary file: pass --boundaries or set features.admin_boundaries_geojson_path");
            };
            let Some(out) = out.or(config.features.station_district_map_path.clone()) else {
                bail!("No output: pass --out or set features.station_district_map_path");
            };
            let index = BoundaryIndex::from_geojson(&boundaries, name_property.as_deref())?;
            let metro: Vec<MetroStation> =
                read_csv(&config.paths.silver_dir.join(METRO_STATIONS_CSV))?;
            let (rows, missing) = index.assign_districts(&metro);
            if missing > 0 {
                warn!("{} of {} stations fall outside every boundary", missing, rows.len());
            }
            write_csv(&out, &rows)?;
            info!("Wrote {} district rows to {}", rows.len(), out.display());
        }

        Command::ImportMetroTimeseries {
            input,
            station_id_col,
            ts_col,
            value_col,
            ts_format,
            align,
            drop_unknown_stations,
            ..
        } => {
            let tz = config.temporal.tz()?;
            let mut opts = MetroNormalizeOptions::new(tz);
            opts.station_id_col = station_id_col;
            opts.ts_col = ts_col;
            opts.value_col = value_col;
            opts.ts_format = ts_format;

            let (mut rows, report) = read_metro_csv(&input, &opts)?;
            info!("{}", serde_json::to_string(&report)?);

            if drop_unknown_stations {
                let metro: Vec<MetroStation> =
                    read_csv(&config.paths.silver_dir.join(METRO_STATIONS_CSV))
                        .context("--drop-unknown-stations needs silver metro stations")?;
                let known: HashSet<&str> = metro.iter().map(|m| m.station_id.as_str()).collect();
                let before = rows.len();
                rows.retain(|r| known.contains(r.station_id.as_str()));
                if rows.len() < before {
                    warn!("Dropped {} rows for unknown stations", before - rows.len());
                }
            }

            if align {
                rows = align_by_key(
                    rows.into_iter()
                        .map(|r| (r.station_id, r.ts.with_timezone(&Utc), r.value)),
                    config.temporal.granularity,
                    tz,
                    Agg::Sum,
                )
                .into_iter()
                .map(|(station_id, p)| MetroRidership {
                    station_id,
                    ts: p.ts,
                    value: p.value,
                })
                .collect();
            }

            let out = config.paths.silver_dir.join(METRO_TIMESERIES_CSV);
            write_csv(&out, &rows)?;
            info!("Wrote {} metro rows to {}", rows.len(), out.display());
        }

        Command::BuildFeatures { .. } => {
            let report = build_features_from_silver(&config)?;
            info!("{}", serde_json::to_string(&report)?);
        }

        Command::BuildAnalytics {
            target_metric,
            out_dir,
            ..
        } => {
            let out_dir = out_dir.unwrap_or_else(|| config.paths.gold_dir.clone());
            let report = build_analytics(&config, &target_metric, &out_dir)?;
            info!("{}", serde_json::to_string(&report)?);
        }

        Command::ValidateSilver { strict, .. } => {
            let dir = &config.paths.silver_dir;
            let issues = validate_silver_dir(dir, strict)?;
            let errors = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
            let meta = compute_schema_meta(dir)?;
            write_json_atomic(&dir.join(SCHEMA_META_JSON), &meta)?;
            info!(
                errors,
                warnings = issues.len() - errors,
                "Silver validation finished"
            );
        }

        Command::ArchiveBronze {
            older_than_days,
            delete,
            ..
        } => {
            if older_than_days < 0 {
                bail!("--older-than-days must be >= 0");
            }
            let Some(older_than) = Duration::try_days(older_than_days) else {
                bail!("--older-than-days is out of range");
            };
            let report = archive_bronze(
                &config.paths.bronze_dir,
                &config.paths.archive_dir,
                older_than,
                Utc::now(),
                delete,
            )?;
            info!("{}", serde_json::to_string(&report)?);
        }
    }

    Ok(())
}
