use chrono::{DateTime, FixedOffset, Utc};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::views::*;
use super::StationRepository;
use crate::analytics::{find_similar_stations, INTERCEPT_LABEL};
use crate::config::{parse_timezone, DistanceMetric};
use crate::error::{AtlasError, AtlasResult};
use crate::features::{within_window, TARGET_BIKE_FLOW_PROXY, TARGET_METRO_RIDERSHIP};
use crate::models::{MetroStation, StationBikeLink, TimeSeriesPoint};
use crate::spatial::{build_station_bike_links, links_for_station, JoinMethod, JoinParams};
use crate::temporal::{align_by_key, align_series, Agg, Granularity};

const BIKE_AVAILABLE_TOTAL: &str = "bike_available_bikes_total";
const OVERVIEW_CORRELATIONS: usize = 10;

/// Per-request spatial join parameters. Any set field triggers a fresh join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct JoinOverrides {
    pub join_method: Option<JoinMethod>,
    pub radius_m: Option<f64>,
    pub nearest_k: Option<usize>,
}

impl JoinOverrides {
    pub fn is_empty(&self) -> bool {
        self.join_method.is_none() && self.radius_m.is_none() && self.nearest_k.is_none()
    }

    fn resolve(&self, base: JoinParams) -> AtlasResult<JoinParams> {
        let params = JoinParams {
            method: self.join_method.unwrap_or(base.method),
            radius_m: self.radius_m.unwrap_or(base.radius_m),
            nearest_k: self.nearest_k.unwrap_or(base.nearest_k),
        };
        if !(params.radius_m.is_finite() && params.radius_m > 0.0) {
            return Err(AtlasError::InvalidInput("radius_m must be > 0".to_string()));
        }
        if params.nearest_k < 1 {
            return Err(AtlasError::InvalidInput("nearest_k must be >= 1".to_string()));
        }
        Ok(params)
    }
}

/// Which metro series a timeseries response carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetroSeries {
    /// Ridership when the station has any, the bike proxy otherwise
    #[default]
    Auto,
    Ridership,
    Proxy,
}

impl fmt::Display for MetroSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetroSeries::Auto => write!(f, "auto"),
            MetroSeries::Ridership => write!(f, "ridership"),
            MetroSeries::Proxy => write!(f, "proxy"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeseriesOverrides {
    pub join: JoinOverrides,
    pub granularity: Option<Granularity>,
    pub timezone: Option<String>,
    pub window_days: Option<i64>,
    pub metro_series: MetroSeries,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityOverrides {
    pub top_k: Option<usize>,
    pub metric: Option<DistanceMetric>,
    pub standardize: Option<bool>,
}

/// Sum per-station series that share a bucket.
fn sum_by_bucket(rows: Vec<(String, TimeSeriesPoint)>) -> Vec<TimeSeriesPoint> {
    let mut totals: BTreeMap<DateTime<FixedOffset>, f64> = BTreeMap::new();
    for (_, point) in rows {
        *totals.entry(point.ts).or_default() += point.value;
    }
    totals
        .into_iter()
        .map(|(ts, value)| TimeSeriesPoint { ts, value })
        .collect()
}

impl StationRepository {
    fn base_join(&self) -> JoinParams {
        JoinParams {
            method: self.config.spatial.join_method,
            radius_m: self.config.spatial.radius_m,
            nearest_k: self.config.spatial.nearest_k,
        }
    }

    fn require_station(&self, id: &str) -> AtlasResult<&MetroStation> {
        self.metro_station(id)
            .ok_or_else(|| AtlasError::NotFound(format!("station {}", id)))
    }

    /// Stored links without overrides, a fresh join for this station otherwise.
    fn selected_links(
        &self,
        station: &MetroStation,
        overrides: &JoinOverrides,
    ) -> AtlasResult<(JoinParams, Vec<StationBikeLink>)> {
        let params = overrides.resolve(self.base_join())?;
        let links = if overrides.is_empty() {
            links_for_station(&self.links, &station.station_id)
                .into_iter()
                .cloned()
                .collect()
        } else {
            build_station_bike_links(std::slice::from_ref(station), &self.bikes, &params)
        };
        Ok((params, links))
    }

    pub fn list_metro_stations(&self) -> Vec<StationView> {
        self.metro
            .iter()
            .map(|m| StationView {
                id: m.station_id.clone(),
                name: m.name.clone(),
                lat: m.lat,
                lon: m.lon,
                city: m.city.clone(),
                system: m.system.clone(),
                district: self.districts.get(&m.station_id).cloned(),
                cluster: self.clusters.get(&m.station_id).copied(),
            })
            .collect()
    }

    pub fn list_bike_stations(&self) -> Vec<BikeStationView> {
        self.bikes
            .iter()
            .map(|b| BikeStationView {
                id: b.station_id.clone(),
                name: b.name.clone(),
                lat: b.lat,
                lon: b.lon,
                city: b.city.clone(),
                operator: b.operator.clone(),
                capacity: b.capacity,
            })
            .collect()
    }

    /// Bike stations linked to a metro station, nearest first.
    pub fn nearby_bike(
        &self,
        id: &str,
        overrides: &JoinOverrides,
        limit: Option<usize>,
    ) -> AtlasResult<Vec<NearbyBike>> {
        let station = self.require_station(id)?;
        let (_, links) = self.selected_links(station, overrides)?;
        let bikes: HashMap<&str, _> = self
            .bikes
            .iter()
            .map(|b| (b.station_id.as_str(), b))
            .collect();

        let mut out: Vec<NearbyBike> = links
            .iter()
            .filter_map(|l| {
                let bike = bikes.get(l.bike_station_id.as_str())?;
                Some(NearbyBike {
                    id: bike.station_id.clone(),
                    name: bike.name.clone(),
                    lat: bike.lat,
                    lon: bike.lon,
                    distance_m: l.distance_m,
                    capacity: bike.capacity,
                })
            })
            .collect();
        out.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    pub fn station_timeseries(
        &self,
        id: &str,
        overrides: &TimeseriesOverrides,
    ) -> AtlasResult<StationTimeseries> {
        let station = self.require_station(id)?;
        let (params, links) = self.selected_links(station, &overrides.join)?;

        let granularity = overrides.granularity.unwrap_or(self.config.temporal.granularity);
        let (tz, tz_name) = match overrides.timezone.as_deref() {
            Some(name) => (
                parse_timezone(name).map_err(|e| AtlasError::InvalidInput(e.to_string()))?,
                name.to_string(),
            ),
            None => (self.tz, self.config.temporal.timezone.clone()),
        };
        let window_days = overrides
            .window_days
            .unwrap_or(self.config.features.timeseries_window_days);
        if window_days < 1 {
            return Err(AtlasError::InvalidInput("window_days must be >= 1".to_string()));
        }

        let bike_ids: HashSet<&str> = links.iter().map(|l| l.bike_station_id.as_str()).collect();
        let selected: Vec<_> = self
            .bike_ts
            .iter()
            .filter(|s| bike_ids.contains(s.station_id.as_str()))
            .collect();
        let bike_rows = within_window(&selected, window_days, |s| s.ts);

        let bike_total = sum_by_bucket(align_by_key(
            bike_rows
                .iter()
                .map(|s| (s.station_id.clone(), s.ts, s.available_bikes as f64)),
            granularity,
            tz,
            Agg::Mean,
        ));

        let ridership_rows: Vec<_> = self
            .metro_ts
            .iter()
            .filter(|r| r.station_id == station.station_id)
            .collect();
        let use_ridership = match overrides.metro_series {
            MetroSeries::Auto => !ridership_rows.is_empty(),
            MetroSeries::Ridership => true,
            MetroSeries::Proxy => false,
        };

        let metro_series = if use_ridership {
            let rows = within_window(&ridership_rows, window_days, |r| r.ts.with_timezone(&Utc));
            MetricSeries {
                metric: TARGET_METRO_RIDERSHIP.to_string(),
                points: align_series(
                    rows.iter().map(|r| (r.ts.with_timezone(&Utc), r.value)),
                    granularity,
                    tz,
                    Agg::Sum,
                ),
                source: Some("metro_ridership".to_string()),
                is_proxy: false,
            }
        } else {
            MetricSeries {
                metric: TARGET_BIKE_FLOW_PROXY.to_string(),
                points: align_series(
                    bike_rows
                        .iter()
                        .filter_map(|s| s.rent_proxy.map(|v| (s.ts, v))),
                    granularity,
                    tz,
                    Agg::Sum,
                ),
                source: Some("bike_proxy".to_string()),
                is_proxy: true,
            }
        };

        Ok(StationTimeseries {
            station_id: station.station_id.clone(),
            granularity: granularity.to_string(),
            timezone: tz_name,
            series: vec![
                metro_series,
                MetricSeries {
                    metric: BIKE_AVAILABLE_TOTAL.to_string(),
                    points: bike_total,
                    source: Some("bike_availability".to_string()),
                    is_proxy: false,
                },
            ],
            meta: TimeseriesMeta {
                join_method: params.method,
                radius_m: params.radius_m,
                nearest_k: params.nearest_k,
                window_days,
                metro_series: overrides.metro_series.to_string(),
                bike_stations: bike_ids.len(),
            },
        })
    }

    pub fn station_factors(&self, id: &str) -> AtlasResult<StationFactors> {
        let station = self.require_station(id)?;
        let district = self.districts.get(&station.station_id).cloned();
        let row = self
            .features
            .as_ref()
            .and_then(|t| t.row(&station.station_id).map(|r| (t, r)));

        let Some((table, row)) = row else {
            return Ok(StationFactors {
                station_id: station.station_id.clone(),
                available: false,
                district,
                factors: Vec::new(),
            });
        };
        Ok(StationFactors {
            station_id: station.station_id.clone(),
            available: true,
            district: district.or_else(|| row.district.clone()),
            factors: table
                .columns
                .iter()
                .zip(&row.values)
                .map(|(name, value)| Factor {
                    name: name.clone(),
                    value: *value,
                })
                .collect(),
        })
    }

    pub fn similar_stations(
        &self,
        id: &str,
        overrides: &SimilarityOverrides,
    ) -> AtlasResult<Vec<SimilarStationView>> {
        let station = self.require_station(id)?;
        let Some(features) = self.features.as_ref() else {
            return Ok(Vec::new());
        };
        if features.row(&station.station_id).is_none() {
            return Ok(Vec::new());
        }

        let cfg = &self.config.analytics.similarity;
        let similar = find_similar_stations(
            features,
            &station.station_id,
            overrides.top_k.unwrap_or(cfg.top_k),
            overrides.metric.unwrap_or(cfg.metric),
            overrides.standardize.unwrap_or(cfg.standardize),
        )?;

        Ok(similar
            .into_iter()
            .map(|s| SimilarStationView {
                name: self.metro_station(&s.station_id).map(|m| m.name.clone()),
                cluster: self.clusters.get(&s.station_id).copied(),
                id: s.station_id,
                distance: s.distance,
            })
            .collect())
    }

    pub fn analytics_overview(&self) -> AnalyticsOverview {
        let correlations: Vec<_> = self
            .correlations
            .iter()
            .take(OVERVIEW_CORRELATIONS)
            .cloned()
            .collect();

        let regression = (!self.regression.is_empty()).then(|| {
            let finite = |v: f64| v.is_finite().then_some(v);
            let first = &self.regression[0];
            let mut coefficients: Vec<CoefficientView> = self
                .regression
                .iter()
                .filter(|r| r.feature != INTERCEPT_LABEL)
                .map(|r| CoefficientView {
                    feature: r.feature.clone(),
                    coefficient: r.coefficient,
                })
                .collect();
            coefficients.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));
            RegressionSummary {
                r2: finite(first.r2),
                n: first.n,
                intercept: self
                    .regression
                    .iter()
                    .find(|r| r.feature == INTERCEPT_LABEL)
                    .and_then(|r| finite(r.coefficient)),
                coefficients,
            }
        });

        let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
        for cluster in self.clusters.values() {
            *sizes.entry(*cluster).or_default() += 1;
        }
        let clusters: Vec<ClusterSize> = sizes
            .into_iter()
            .map(|(cluster, stations)| ClusterSize { cluster, stations })
            .collect();

        AnalyticsOverview {
            available: !correlations.is_empty() || regression.is_some() || !clusters.is_empty(),
            correlations,
            regression,
            clusters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::features::FeatureTable;
    use crate::models::{BikeSnapshot, BikeStation, MetroRidership};
    use chrono::TimeZone;

    fn metro(id: &str, lat: f64, lon: f64) -> MetroStation {
        MetroStation {
            station_id: id.to_string(),
            name: format!("{} name", id),
            name_en: None,
            lat,
            lon,
            city: "Taipei".to_string(),
            system: "TRTC".to_string(),
        }
    }

    fn bike(id: &str, lat: f64, lon: f64) -> BikeStation {
        BikeStation {
            station_id: id.to_string(),
            name: id.to_string(),
            lat,
            lon,
            city: "Taipei".to_string(),
            operator: "YouBike".to_string(),
            capacity: Some(20),
        }
    }

    fn snap(id: &str, minute: i64, bikes: i64, rent: Option<f64>) -> BikeSnapshot {
        BikeSnapshot {
            station_id: id.to_string(),
            ts: Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute),
            available_bikes: bikes,
            available_docks: None,
            city: "Taipei".to_string(),
            source: "test".to_string(),
            rent_proxy: rent,
            return_proxy: None,
        }
    }

    fn repo() -> StationRepository {
        let config = Config::default();
        StationRepository {
            tz: config.temporal.tz().unwrap(),
            metro: vec![metro("M1", 25.0478, 121.5170), metro("M2", 25.0403, 121.5672)],
            bikes: vec![bike("B1", 25.0484, 121.5155), bike("B2", 25.0462, 121.5204)],
            links: vec![
                StationBikeLink {
                    metro_station_id: "M1".to_string(),
                    bike_station_id: "B2".to_string(),
                    distance_m: 380.0,
                },
                StationBikeLink {
                    metro_station_id: "M1".to_string(),
                    bike_station_id: "B1".to_string(),
                    distance_m: 165.0,
                },
            ],
            bike_ts: vec![
                snap("B1", 0, 4, None),
                snap("B1", 30, 5, Some(1.0)),
                snap("B2", 10, 9, Some(2.0)),
            ],
            metro_ts: vec![MetroRidership {
                station_id: "M1".to_string(),
                ts: Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap().fixed_offset(),
                value: 1234.0,
            }],
            features: None,
            districts: HashMap::new(),
            clusters: HashMap::new(),
            correlations: Vec::new(),
            regression: Vec::new(),
            config,
        }
    }

    #[test]
    fn test_nearby_bike_sorted_and_limited() {
        let repo = repo();
        let all = repo.nearby_bike("M1", &JoinOverrides::default(), None).unwrap();
        let ids: Vec<&str> = all.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["B1", "B2"]);

        let one = repo.nearby_bike("M1", &JoinOverrides::default(), Some(1)).unwrap();
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn test_nearby_bike_override_can_be_empty() {
        let overrides = JoinOverrides {
            radius_m: Some(50.0),
            ..Default::default()
        };
        assert!(repo().nearby_bike("M1", &overrides, None).unwrap().is_empty());
    }

    #[test]
    fn test_nearby_bike_errors() {
        let repo = repo();
        assert!(matches!(
            repo.nearby_bike("NOPE", &JoinOverrides::default(), None),
            Err(AtlasError::NotFound(_))
        ));
        let bad = JoinOverrides {
            nearest_k: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            repo.nearby_bike("M1", &bad, None),
            Err(AtlasError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_timeseries_ridership_and_bike_total() {
        let ts = repo()
            .station_timeseries("M1", &TimeseriesOverrides::default())
            .unwrap();
        assert_eq!(ts.granularity, "hour");
        assert_eq!(ts.timezone, "Asia/Taipei");
        assert_eq!(ts.meta.bike_stations, 2);

        let metro = &ts.series[0];
        assert_eq!(metro.metric, "metro_ridership");
        assert!(!metro.is_proxy);
        assert_eq!(metro.points[0].value, 1234.0);

        let bike = &ts.series[1];
        assert_eq!(bike.metric, "bike_available_bikes_total");
        assert_eq!(bike.points.len(), 1);
        assert_eq!(bike.points[0].value, 13.5);
    }

    #[test]
    fn test_timeseries_proxy_and_overrides() {
        let overrides = TimeseriesOverrides {
            granularity: Some(Granularity::Day),
            metro_series: MetroSeries::Proxy,
            ..Default::default()
        };
        let ts = repo().station_timeseries("M1", &overrides).unwrap();
        assert_eq!(ts.granularity, "day");
        assert_eq!(ts.meta.metro_series, "proxy");
        let metro = &ts.series[0];
        assert_eq!(metro.metric, "metro_flow_proxy_from_bike_rent");
        assert!(metro.is_proxy);
        assert_eq!(metro.points[0].value, 3.0);
    }

    #[test]
    fn test_timeseries_auto_falls_back_to_proxy() {
        let ts = repo()
            .station_timeseries("M2", &TimeseriesOverrides::default())
            .unwrap();
        assert!(ts.series[0].is_proxy);
        assert!(ts.series[0].points.is_empty());

        let forced = TimeseriesOverrides {
            metro_series: MetroSeries::Ridership,
            ..Default::default()
        };
        let ts = repo().station_timeseries("M2", &forced).unwrap();
        assert_eq!(ts.series[0].metric, "metro_ridership");
        assert!(ts.series[0].points.is_empty());
    }

    #[test]
    fn test_timeseries_rejects_bad_overrides() {
        let repo = repo();
        for overrides in [
            TimeseriesOverrides {
                timezone: Some("Nowhere/City".to_string()),
                ..Default::default()
            },
            TimeseriesOverrides {
                window_days: Some(0),
                ..Default::default()
            },
            TimeseriesOverrides {
                join: JoinOverrides {
                    radius_m: Some(-1.0),
                    ..Default::default()
                },
                ..Default::default()
            },
        ] {
            assert!(matches!(
                repo.station_timeseries("M1", &overrides),
                Err(AtlasError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_factors_and_similarity() {
        let mut repo = repo();
        let factors = repo.station_factors("M1").unwrap();
        assert!(!factors.available);
        assert!(repo.similar_stations("M1", &SimilarityOverrides::default()).unwrap().is_empty());
        assert!(!repo.analytics_overview().available);

        let mut table = FeatureTable::with_stations(["M1", "M2"]);
        table.push_column("bike_station_count_r500m", vec![Some(2.0), Some(0.0)]);
        repo.features = Some(table);
        repo.clusters.insert("M2".to_string(), 1);

        let factors = repo.station_factors("M1").unwrap();
        assert!(factors.available);
        assert_eq!(factors.factors[0].name, "bike_station_count_r500m");
        assert_eq!(factors.factors[0].value, Some(2.0));

        let similar = repo.similar_stations("M1", &SimilarityOverrides::default()).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].id, "M2");
        assert_eq!(similar[0].name.as_deref(), Some("M2 name"));
        assert_eq!(similar[0].cluster, Some(1));

        assert!(matches!(
            repo.station_factors("NOPE"),
            Err(AtlasError::NotFound(_))
        ));
        let overview = repo.analytics_overview();
        assert!(overview.available);
        assert_eq!(overview.clusters, vec![ClusterSize { cluster: 1, stations: 1 }]);
    }
}
