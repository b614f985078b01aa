use anyhow::Result;
use chrono::{DateTime, Datelike, DurationRound, TimeDelta, Timelike, Utc, Weekday};
use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tracing::info;
use xxhash_rust::xxh64::xxh64;

use super::StationRepository;
use crate::analytics::{
    compute_feature_correlations, fit_linear_regression, kmeans_cluster, KMeansOptions,
};
use crate::config::Config;
use crate::features::{
    build_station_features, build_station_targets, join_params, FeatureInputs,
    TARGET_BIKE_FLOW_PROXY,
};
use crate::models::{BikeSnapshot, BikeStation, MetroRidership, MetroStation};
use crate::spatial::build_station_bike_links;
use crate::temporal::{bucket_len, compute_rent_return_proxy};

const DEMO_DAYS: i64 = 7;
const DEMO_SOURCE: &str = "demo";

fn demo_metro() -> Vec<MetroStation> {
    [
        ("MRT_TAIPEI_MAIN", "台北車站", "Taipei Main Station", 25.0478, 121.5170),
        ("MRT_ZHONGXIAO_FUXING", "忠孝復興", "Zhongxiao Fuxing", 25.0413, 121.5445),
        ("MRT_CITY_HALL", "市政府", "Taipei City Hall", 25.0403, 121.5672),
    ]
    .into_iter()
    .map(|(id, name, name_en, lat, lon)| MetroStation {
        station_id: id.to_string(),
        name: name.to_string(),
        name_en: Some(name_en.to_string()),
        lat,
        lon,
        city: "Taipei".to_string(),
        system: "TRTC".to_string(),
    })
    .collect()
}

fn demo_bikes() -> Vec<BikeStation> {
    [
        ("BIKE_0001", "Bike Station A", 25.0484, 121.5155, 40),
        ("BIKE_0002", "Bike Station B", 25.0462, 121.5204, 32),
        ("BIKE_0003", "Bike Station C", 25.0418, 121.5430, 28),
        ("BIKE_0004", "Bike Station D", 25.0399, 121.5682, 36),
        ("BIKE_0005", "Bike Station E", 25.0410, 121.5654, 24),
    ]
    .into_iter()
    .map(|(id, name, lat, lon, capacity)| BikeStation {
        station_id: id.to_string(),
        name: name.to_string(),
        lat,
        lon,
        city: "Taipei".to_string(),
        operator: "YouBike".to_string(),
        capacity: Some(capacity),
    })
    .collect()
}

fn station_rng(station_id: &str) -> StdRng {
    StdRng::seed_from_u64(xxh64(station_id.as_bytes(), 0))
}

/// Timestamps from `end - 7 days` to `end` at the configured granularity.
fn demo_steps(config: &Config, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let step = bucket_len(config.temporal.granularity);
    let start = end - TimeDelta::days(DEMO_DAYS);
    let n = (end - start).num_seconds() / step.num_seconds().max(1);
    (0..=n).map(|i| start + step * i as i32).collect()
}

/// `sin` of the local time of day, plus a weekend damping factor.
fn daily_shape(ts: DateTime<Utc>, tz: chrono_tz::Tz) -> (f64, f64) {
    let local = ts.with_timezone(&tz);
    let hour = local.hour() as f64 + local.minute() as f64 / 60.0;
    let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
    ((2.0 * PI * hour / 24.0).sin(), if weekend { 0.85 } else { 1.0 })
}

impl StationRepository {
    /// Deterministic synthetic data set ending at the current hour.
    pub fn demo(config: &Config) -> Result<Self> {
        let now = Utc::now();
        let end = now.duration_trunc(TimeDelta::hours(1)).unwrap_or(now);
        Self::demo_at(config, end)
    }

    /// Synthetic data set ending at `end`. Values depend only on the station ids.
    pub fn demo_at(config: &Config, end: DateTime<Utc>) -> Result<Self> {
        let tz = config.temporal.tz()?;
        let metro = demo_metro();
        let bikes = demo_bikes();
        let steps = demo_steps(config, end);

        let mut bike_ts = Vec::with_capacity(steps.len() * bikes.len());
        for bike in &bikes {
            let mut rng = station_rng(&bike.station_id);
            let capacity = f64::from(bike.capacity.unwrap_or(30));
            let base = rng.gen_range(0.3..0.9) * capacity;
            let amp = rng.gen_range(0.1..0.3) * capacity;
            for &ts in &steps {
                let (daily, _) = daily_shape(ts, tz);
                let value = base - amp * daily + rng.gen_range(-2.0..2.0);
                let available = value.round().clamp(0.0, capacity) as i64;
                bike_ts.push(BikeSnapshot {
                    station_id: bike.station_id.clone(),
                    ts,
                    available_bikes: available,
                    available_docks: Some(capacity as i64 - available),
                    city: bike.city.clone(),
                    source: DEMO_SOURCE.to_string(),
                    rent_proxy: None,
                    return_proxy: None,
                });
            }
        }
        compute_rent_return_proxy(&mut bike_ts);

        let mut metro_ts = Vec::with_capacity(steps.len() * metro.len());
        for station in &metro {
            let mut rng = station_rng(&station.station_id);
            let base = rng.gen_range(5000.0..15000.0);
            let amp = rng.gen_range(1500.0..4000.0);
            for &ts in &steps {
                let (daily, weekend) = daily_shape(ts, tz);
                metro_ts.push(MetroRidership {
                    station_id: station.station_id.clone(),
                    ts: ts.with_timezone(&tz).fixed_offset(),
                    value: ((base + amp * daily) * weekend).max(0.0).round(),
                });
            }
        }

        let links = build_station_bike_links(&metro, &bikes, &join_params(config));
        let features = build_station_features(
            config,
            &FeatureInputs {
                metro: &metro,
                bikes: &bikes,
                links: &links,
                bike_ts: Some(&bike_ts),
                pois: None,
                district_map: None,
            },
        )?;
        let targets = build_station_targets(config, &bike_ts, &links, Some(&metro_ts));
        let correlations = compute_feature_correlations(&features, &targets, TARGET_BIKE_FLOW_PROXY);
        let regression = fit_linear_regression(&features, &targets, TARGET_BIKE_FLOW_PROXY).rows();
        let clusters: HashMap<String, usize> = kmeans_cluster(
            &features,
            &KMeansOptions {
                k: config.analytics.clustering.k,
                standardize: config.analytics.clustering.standardize,
                ..Default::default()
            },
        )
        .labels
        .into_iter()
        .map(|l| (l.station_id, l.cluster))
        .collect();

        info!(
            metro = metro.len(),
            bikes = bikes.len(),
            links = links.len(),
            points = steps.len(),
            "Built demo repository ending at {}",
            end
        );

        Ok(Self {
            config: config.clone(),
            tz,
            metro,
            bikes,
            links,
            bike_ts,
            metro_ts,
            features: Some(features),
            districts: HashMap::new(),
            clusters,
            correlations,
            regression,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_demo_is_deterministic() {
        let config = Config::default();
        let end = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        let a = StationRepository::demo_at(&config, end).unwrap();
        let b = StationRepository::demo_at(&config, end).unwrap();

        assert_eq!(a.metro.len(), 3);
        assert_eq!(a.bikes.len(), 5);
        assert_eq!(a.bike_ts, b.bike_ts);
        assert_eq!(a.metro_ts, b.metro_ts);
        // Hourly over seven days, both ends included.
        assert_eq!(a.bike_ts.len(), 5 * (7 * 24 + 1));
        assert!(a.bike_ts.iter().all(|s| s.available_bikes >= 0));
    }

    #[test]
    fn test_demo_links_follow_config() {
        let config = Config::default();
        let end = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        let repo = StationRepository::demo_at(&config, end).unwrap();
        let main: Vec<&str> = repo
            .links
            .iter()
            .filter(|l| l.metro_station_id == "MRT_TAIPEI_MAIN")
            .map(|l| l.bike_station_id.as_str())
            .collect();
        assert_eq!(main, vec!["BIKE_0001", "BIKE_0002"]);
        assert!(repo.features.is_some());
    }

    #[test]
    fn test_demo_day_granularity() {
        let mut config = Config::default();
        config.temporal.granularity = crate::temporal::Granularity::Day;
        let end = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let repo = StationRepository::demo_at(&config, end).unwrap();
        assert_eq!(repo.metro_ts.len(), 3 * 8);
    }
}
