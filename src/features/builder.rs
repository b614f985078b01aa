use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::{debug, info};

use super::inputs::Poi;
use super::table::FeatureTable;
use crate::config::Config;
use crate::models::{
    BikeSnapshot, BikeStation, Located, MetroRidership, MetroStation, StationBikeLink,
    StationTarget,
};
use crate::spatial::{JoinParams, PointIndex};

pub const TARGET_BIKE_FLOW_PROXY: &str = "metro_flow_proxy_from_bike_rent";
pub const TARGET_METRO_RIDERSHIP: &str = "metro_ridership";

/// Everything the feature builder reads. Only the stations and links are required.
#[derive(Debug, Clone, Copy)]
pub struct FeatureInputs<'a> {
    pub metro: &'a [MetroStation],
    pub bikes: &'a [BikeStation],
    pub links: &'a [StationBikeLink],
    pub bike_ts: Option<&'a [BikeSnapshot]>,
    pub pois: Option<&'a [Poi]>,
    pub district_map: Option<&'a HashMap<String, String>>,
}

pub fn join_params(config: &Config) -> JoinParams {
    JoinParams {
        method: config.spatial.join_method,
        radius_m: config.spatial.radius_m,
        nearest_k: config.spatial.nearest_k,
    }
}

/// Each bike station's nearest linked metro station. Equal distances keep link order.
pub fn primary_metro_by_bike(links: &[StationBikeLink]) -> HashMap<&str, &str> {
    let mut sorted: Vec<&StationBikeLink> = links.iter().collect();
    sorted.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));

    let mut primary = HashMap::new();
    for link in sorted {
        primary
            .entry(link.bike_station_id.as_str())
            .or_insert(link.metro_station_id.as_str());
    }
    primary
}

/// Rows within `days` of the latest timestamp. A window reaching past the
/// representable range keeps every row.
pub fn within_window<T, F>(rows: &[T], days: i64, ts: F) -> Vec<&T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    let Some(end) = rows.iter().map(&ts).max() else {
        return Vec::new();
    };
    match Duration::try_days(days).and_then(|d| end.checked_sub_signed(d)) {
        Some(start) => rows.iter().filter(|r| ts(*r) >= start).collect(),
        None => rows.iter().collect(),
    }
}

fn radius_label(radius_m: f64) -> i64 {
    radius_m.round() as i64
}

fn push_bike_access(table: &mut FeatureTable, config: &Config, inputs: &FeatureInputs, suffix: &str) {
    let capacity: HashMap<&str, Option<u32>> = inputs
        .bikes
        .iter()
        .map(|b| (b.station_id.as_str(), b.capacity))
        .collect();

    let mut grouped: HashMap<&str, Vec<&StationBikeLink>> = HashMap::new();
    for link in inputs.links {
        grouped.entry(link.metro_station_id.as_str()).or_default().push(link);
    }

    let n = table.len();
    let mut counts = Vec::with_capacity(n);
    let mut capacities = Vec::with_capacity(n);
    let mut distances = Vec::with_capacity(n);
    for row in &table.rows {
        match grouped.get(row.station_id.as_str()) {
            Some(links) => {
                let distinct: HashSet<&str> =
                    links.iter().map(|l| l.bike_station_id.as_str()).collect();
                let cap: f64 = links
                    .iter()
                    .filter_map(|l| capacity.get(l.bike_station_id.as_str()).copied().flatten())
                    .map(f64::from)
                    .sum();
                let mean = links.iter().map(|l| l.distance_m).sum::<f64>() / links.len() as f64;
                counts.push(Some(distinct.len() as f64));
                capacities.push(Some(cap));
                distances.push(Some(mean));
            }
            None => {
                counts.push(Some(0.0));
                capacities.push(None);
                distances.push(None);
            }
        }
    }

    let w = &config.features.accessibility.bike;
    let scores = (0..n)
        .map(|i| {
            Some(
                w.bias
                    + w.w_station_count * counts[i].unwrap_or(0.0)
                    + w.w_capacity_sum * capacities[i].unwrap_or(0.0)
                    + w.w_distance_mean_m * distances[i].unwrap_or(0.0),
            )
        })
        .collect();

    table.push_column(format!("bike_station_count_{}", suffix), counts);
    table.push_column(format!("bike_capacity_sum_{}", suffix), capacities);
    table.push_column(format!("bike_distance_mean_m_{}", suffix), distances);
    table.push_column(format!("bike_accessibility_score_{}", suffix), scores);
}

fn push_poi_counts(table: &mut FeatureTable, config: &Config, metro: &[MetroStation], pois: &[Poi]) {
    let Some(poi_cfg) = config.features.poi.as_ref() else {
        return;
    };
    let index = PointIndex::build(pois);

    for &radius_m in &poi_cfg.radii_m {
        let label = radius_label(radius_m);
        let area_km2 = (PI * (radius_m / 1000.0).powi(2)).max(1e-9);
        let mut totals = Vec::with_capacity(metro.len());
        let mut densities = Vec::with_capacity(metro.len());
        let mut by_category: Vec<Vec<Option<f64>>> = vec![Vec::new(); poi_cfg.categories.len()];

        for station in metro {
            let hits = if station.has_position() {
                index.within(station.lat, station.lon, radius_m)
            } else {
                Vec::new()
            };
            totals.push(Some(hits.len() as f64));
            densities.push(Some(hits.len() as f64 / area_km2));
            for (c, category) in poi_cfg.categories.iter().enumerate() {
                let count = hits.iter().filter(|(i, _)| &pois[*i].category == category).count();
                by_category[c].push(Some(count as f64));
            }
        }

        table.push_column(format!("poi_count_{}m", label), totals);
        table.push_column(format!("poi_density_{}m_per_km2", label), densities);
        for (category, values) in poi_cfg.categories.iter().zip(by_category) {
            table.push_column(format!("poi_count_{}_{}m", category, label), values);
        }
    }
}

#[derive(Default)]
struct RentTotals {
    total: f64,
    weekend: f64,
    peak_am: f64,
    peak_pm: f64,
}

fn push_time_patterns(
    table: &mut FeatureTable,
    config: &Config,
    snapshots: &[BikeSnapshot],
    links: &[StationBikeLink],
    suffix: &str,
) -> Result<()> {
    let tz = config.temporal.tz()?;
    let tp = &config.features.time_patterns;
    let window_days = config.features.timeseries_window_days;
    let primary = primary_metro_by_bike(links);

    let mut totals: HashMap<&str, RentTotals> = HashMap::new();
    for snap in within_window(snapshots, window_days, |s| s.ts) {
        let Some(metro_id) = primary.get(snap.station_id.as_str()) else {
            continue;
        };
        let rent = snap.rent_proxy.filter(|v| v.is_finite()).unwrap_or(0.0);
        let local = snap.ts.with_timezone(&tz);
        let hour = local.hour();

        let entry = totals.entry(*metro_id).or_default();
        entry.total += rent;
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            entry.weekend += rent;
        }
        if hour >= tp.peak_am_start_hour && hour < tp.peak_am_end_hour {
            entry.peak_am += rent;
        }
        if hour >= tp.peak_pm_start_hour && hour < tp.peak_pm_end_hour {
            entry.peak_pm += rent;
        }
    }
    if totals.is_empty() {
        debug!("No bike snapshots map to a metro station; skipping time patterns");
        return Ok(());
    }

    let share = |part: f64, total: f64| (total != 0.0).then(|| part / total);
    let mut cols: [Vec<Option<f64>>; 4] = Default::default();
    for row in &table.rows {
        match totals.get(row.station_id.as_str()) {
            Some(t) => {
                cols[0].push(Some(t.total));
                cols[1].push(share(t.weekend, t.total));
                cols[2].push(share(t.peak_am, t.total));
                cols[3].push(share(t.peak_pm, t.total));
            }
            None => cols.iter_mut().for_each(|c| c.push(None)),
        }
    }

    let [total, weekend, am, pm] = cols;
    table.push_column(format!("bike_rent_proxy_total_{}_{}d", suffix, window_days), total);
    table.push_column(format!("bike_rent_proxy_weekend_share_{}_{}d", suffix, window_days), weekend);
    table.push_column(format!("bike_rent_proxy_peak_am_share_{}_{}d", suffix, window_days), am);
    table.push_column(format!("bike_rent_proxy_peak_pm_share_{}_{}d", suffix, window_days), pm);
    Ok(())
}

/// One feature row per metro station, in input order.
pub fn build_station_features(config: &Config, inputs: &FeatureInputs) -> Result<FeatureTable> {
    if inputs.metro.is_empty() {
        bail!("No metro stations to build features for");
    }
    let suffix = join_params(config).suffix();
    let mut table = FeatureTable::with_stations(inputs.metro.iter().map(|m| m.station_id.clone()));

    if let Some(map) = inputs.district_map.filter(|m| !m.is_empty()) {
        for row in &mut table.rows {
            row.district = map.get(&row.station_id).cloned();
        }
    }

    push_bike_access(&mut table, config, inputs, &suffix);

    if let Some(pois) = inputs.pois.filter(|p| !p.is_empty()) {
        push_poi_counts(&mut table, config, inputs.metro, pois);
    }

    if let Some(snapshots) = inputs.bike_ts.filter(|s| !s.is_empty()) {
        if !inputs.links.is_empty() {
            push_time_patterns(&mut table, config, snapshots, inputs.links, &suffix)?;
        }
    }

    info!(
        "Built {} feature columns for {} stations",
        table.columns.len(),
        table.len()
    );
    Ok(table)
}

/// Station-level targets: bike rent proxy flow and, when present, metro ridership.
pub fn build_station_targets(
    config: &Config,
    bike_ts: &[BikeSnapshot],
    links: &[StationBikeLink],
    metro_ts: Option<&[MetroRidership]>,
) -> Vec<StationTarget> {
    let window_days = config.features.timeseries_window_days;
    let mut targets = Vec::new();

    if !bike_ts.is_empty() && !links.is_empty() {
        let primary = primary_metro_by_bike(links);
        let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
        for snap in within_window(bike_ts, window_days, |s| s.ts) {
            if let Some(metro_id) = primary.get(snap.station_id.as_str()) {
                *sums.entry(*metro_id).or_default() +=
                    snap.rent_proxy.filter(|v| v.is_finite()).unwrap_or(0.0);
            }
        }
        targets.extend(sums.into_iter().map(|(station_id, value)| StationTarget {
            station_id: station_id.to_string(),
            metric: TARGET_BIKE_FLOW_PROXY.to_string(),
            value,
            window_days,
        }));
    }

    if let Some(metro_ts) = metro_ts.filter(|m| !m.is_empty()) {
        let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
        for row in within_window(metro_ts, window_days, |r| r.ts.with_timezone(&Utc)) {
            if row.value.is_finite() {
                *sums.entry(row.station_id.as_str()).or_default() += row.value;
            }
        }
        targets.extend(sums.into_iter().map(|(station_id, value)| StationTarget {
            station_id: station_id.to_string(),
            metric: TARGET_METRO_RIDERSHIP.to_string(),
            value,
            window_days,
        }));
    }

    targets
}
