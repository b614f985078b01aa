//! One-shot collection of TDX datasets into bronze.

use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

use super::{ResponseCache, TdxClient};
use crate::bronze::{write_bronze_json, BronzeKey};
use crate::config::Config;

const FORMAT_PARAMS: [(&str, &str); 1] = [("$format", "JSON")];

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    pub bike_stations: bool,
    pub bike_availability: bool,
    pub metro_stations: bool,
}

#[derive(Debug, Default)]
pub struct CollectReport {
    pub written: Vec<PathBuf>,
    pub failures: usize,
}

struct Job<'a> {
    domain: &'a str,
    dataset: &'a str,
    city: &'a str,
    path: String,
    cacheable: bool,
}

fn expand(template: &str, city: &str) -> String {
    template.replace("{city}", city)
}

fn plan<'a>(config: &'a Config, opts: &CollectOptions) -> Vec<Job<'a>> {
    let mut jobs = Vec::new();
    let tdx = &config.tdx;
    if opts.metro_stations {
        for city in &tdx.metro.cities {
            jobs.push(Job {
                domain: "metro",
                dataset: "stations",
                city,
                path: expand(&tdx.metro.stations_path_template, city),
                cacheable: true,
            });
        }
    }
    if opts.bike_stations {
        for city in &tdx.bike.cities {
            jobs.push(Job {
                domain: "bike",
                dataset: "stations",
                city,
                path: expand(&tdx.bike.stations_path_template, city),
                cacheable: true,
            });
        }
    }
    if opts.bike_availability {
        for city in &tdx.bike.cities {
            jobs.push(Job {
                domain: "bike",
                dataset: "availability",
                city,
                path: expand(&tdx.bike.availability_path_template, city),
                cacheable: false,
            });
        }
    }
    jobs
}

/// Fetch the selected datasets for every configured city and write one bronze
/// file per dataset and city. Station listings are served from `cache` when fresh.
pub async fn collect_snapshot(
    client: &TdxClient,
    config: &Config,
    cache: Option<&ResponseCache>,
    opts: CollectOptions,
) -> Result<CollectReport> {
    let mut report = CollectReport::default();
    let jobs = plan(config, &opts);

    for job in jobs {
        let namespace = format!("{}/{}", job.domain, job.dataset);
        let cached = if job.cacheable {
            cache.and_then(|c| c.get(&namespace, &job.path))
        } else {
            None
        };

        let payload = match cached {
            Some(value) => {
                info!("Using cached {} for {}", namespace, job.city);
                value
            }
            None => match client
                .get_json_all(&job.path, &FORMAT_PARAMS, config.tdx.max_pages)
                .await
            {
                Ok(items) => {
                    let value = Value::Array(items);
                    if job.cacheable {
                        if let Some(c) = cache {
                            if let Err(e) = c.put(&namespace, &job.path, &value) {
                                warn!("Failed to cache {}: {:#}", namespace, e);
                            }
                        }
                    }
                    value
                }
                Err(e) => {
                    warn!("Failed to fetch {} for {}: {}", namespace, job.city, e);
                    report.failures += 1;
                    continue;
                }
            },
        };

        let count = payload.as_array().map(Vec::len).unwrap_or(0);
        let key = BronzeKey {
            source: "tdx",
            domain: job.domain,
            dataset: job.dataset,
            city: job.city,
        };
        let request = json!({"path": job.path, "params": {"$format": "JSON"}});
        let path = write_bronze_json(&config.paths.bronze_dir, key, Utc::now(), request, payload)?;
        info!("Wrote {} {} records to {}", count, namespace, path.display());
        report.written.push(path);
    }

    if report.written.is_empty() && report.failures > 0 {
        bail!("All {} TDX requests failed", report.failures);
    }
    Ok(report)
}
