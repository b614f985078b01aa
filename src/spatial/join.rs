//! Metro to bike station spatial join.

use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use super::distance::{haversine_m, radius_to_degrees};
use crate::models::{Located, StationBikeLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMethod {
    /// Every bike station within `radius_m`
    Buffer,
    /// The `nearest_k` closest bike stations
    Nearest,
}

impl fmt::Display for JoinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinMethod::Buffer => write!(f, "buffer"),
            JoinMethod::Nearest => write!(f, "nearest"),
        }
    }
}

impl std::str::FromStr for JoinMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer" => Ok(JoinMethod::Buffer),
            "nearest" => Ok(JoinMethod::Nearest),
            other => Err(format!("unsupported join_method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoinParams {
    pub method: JoinMethod,
    pub radius_m: f64,
    pub nearest_k: usize,
}

impl JoinParams {
    /// Column suffix used by the gold feature table (`r500m`, `k3`).
    pub fn suffix(&self) -> String {
        match self.method {
            JoinMethod::Buffer => format!("r{}m", self.radius_m.round() as i64),
            JoinMethod::Nearest => format!("k{}", self.nearest_k.max(1)),
        }
    }
}

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// R-tree over point positions, keyed by input order.
pub struct PointIndex<'a, P: Located> {
    points: &'a [P],
    tree: RTree<IndexedPoint>,
}

impl<'a, P: Located> PointIndex<'a, P> {
    pub fn build(points: &'a [P]) -> Self {
        let indexed: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.has_position())
            .map(|(i, p)| GeomWithData::new([p.lon(), p.lat()], i))
            .collect();
        let tree = RTree::bulk_load(indexed);
        debug!("Point index built with {} entries", tree.size());
        Self { points, tree }
    }

    /// Indexed points within `radius_m` of the location, nearest first.
    pub fn within(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<(usize, f64)> {
        if !(lat.is_finite() && lon.is_finite()) || radius_m < 0.0 {
            return Vec::new();
        }
        let (dlat, dlon) = radius_to_degrees(lat, radius_m);
        let envelope = AABB::from_corners([lon - dlon, lat - dlat], [lon + dlon, lat + dlat]);

        let mut hits: Vec<(usize, f64)> = self
            .tree
            .locate_in_envelope(&envelope)
            .filter_map(|p| {
                let target = &self.points[p.data];
                let d = haversine_m(lat, lon, target.lat(), target.lon());
                (d <= radius_m).then_some((p.data, d))
            })
            .collect();
        sort_hits(&mut hits);
        hits
    }

    /// The `k` closest points by haversine distance.
    pub fn nearest(&self, lat: f64, lon: f64, k: usize) -> Vec<(usize, f64)> {
        if !(lat.is_finite() && lon.is_finite()) {
            return Vec::new();
        }
        let mut hits: Vec<(usize, f64)> = self
            .tree
            .iter()
            .map(|p| {
                let target = &self.points[p.data];
                (p.data, haversine_m(lat, lon, target.lat(), target.lon()))
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k.max(1));
        hits
    }

    pub fn query(&self, lat: f64, lon: f64, params: &JoinParams) -> Vec<(usize, f64)> {
        match params.method {
            JoinMethod::Buffer => self.within(lat, lon, params.radius_m),
            JoinMethod::Nearest => self.nearest(lat, lon, params.nearest_k),
        }
    }
}

/// Distance ascending, input order breaks ties.
fn sort_hits(hits: &mut [(usize, f64)]) {
    hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
}

/// Link every metro station to bike stations.
///
/// Output is grouped by metro input order, nearest bike first within a group.
/// Stations without a usable position produce no links.
pub fn build_station_bike_links<M, B>(
    metro: &[M],
    bikes: &[B],
    params: &JoinParams,
) -> Vec<StationBikeLink>
where
    M: Located + Sync,
    B: Located + Sync,
{
    let index = PointIndex::build(bikes);

    let links: Vec<StationBikeLink> = metro
        .par_iter()
        .map(|m| {
            if !m.has_position() {
                return Vec::new();
            }
            index
                .query(m.lat(), m.lon(), params)
                .into_iter()
                .map(|(i, distance_m)| StationBikeLink {
                    metro_station_id: m.id().to_string(),
                    bike_station_id: bikes[i].id().to_string(),
                    distance_m,
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    info!(
        "Spatial join ({}, radius_m={}, k={}): {} metro x {} bike -> {} links",
        params.method,
        params.radius_m,
        params.nearest_k,
        metro.len(),
        bikes.len(),
        links.len()
    );

    links
}

/// Links of a single metro station, nearest first.
pub fn links_for_station<'a>(
    links: &'a [StationBikeLink],
    metro_station_id: &str,
) -> Vec<&'a StationBikeLink> {
    let mut out: Vec<&StationBikeLink> = links
        .iter()
        .filter(|l| l.metro_station_id == metro_station_id)
        .collect();
    out.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BikeStation, MetroStation};

    fn metro(id: &str, lat: f64, lon: f64) -> MetroStation {
        MetroStation {
            station_id: id.to_string(),
            name: id.to_string(),
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

    fn fixture() -> (Vec<MetroStation>, Vec<BikeStation>) {
        let metro = vec![metro("M1", 25.0478, 121.5170), metro("M2", 25.0403, 121.5672)];
        let bikes = vec![
            bike("B_FAR", 25.0900, 121.6000),
            bike("B1", 25.0484, 121.5155),
            bike("B2", 25.0462, 121.5204),
            bike("B3", 25.0399, 121.5682),
        ];
        (metro, bikes)
    }

    #[test]
    fn test_buffer_join() {
        let (metro, bikes) = fixture();
        let params = JoinParams {
            method: JoinMethod::Buffer,
            radius_m: 500.0,
            nearest_k: 3,
        };
        let links = build_station_bike_links(&metro, &bikes, &params);

        let m1: Vec<&str> = links
            .iter()
            .filter(|l| l.metro_station_id == "M1")
            .map(|l| l.bike_station_id.as_str())
            .collect();
        assert_eq!(m1, vec!["B1", "B2"]);
        assert!(links.iter().all(|l| l.distance_m <= 500.0));
        assert_eq!(links.last().map(|l| l.bike_station_id.as_str()), Some("B3"));
    }

    #[test]
    fn test_buffer_small_radius_can_be_empty() {
        let (metro, bikes) = fixture();
        let params = JoinParams {
            method: JoinMethod::Buffer,
            radius_m: 50.0,
            nearest_k: 3,
        };
        let links = build_station_bike_links(&metro, &bikes, &params);
        assert!(links.is_empty());
    }

    #[test]
    fn test_nearest_join_clamps_k() {
        let (metro, bikes) = fixture();
        let params = JoinParams {
            method: JoinMethod::Nearest,
            radius_m: 500.0,
            nearest_k: 0,
        };
        let links = build_station_bike_links(&metro, &bikes, &params);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].bike_station_id, "B1");
        assert_eq!(links[1].bike_station_id, "B3");
    }

    #[test]
    fn test_nearest_join_takes_k_sorted() {
        let (metro, bikes) = fixture();
        let params = JoinParams {
            method: JoinMethod::Nearest,
            radius_m: 500.0,
            nearest_k: 3,
        };
        let links = build_station_bike_links(&metro[..1], &bikes, &params);
        assert_eq!(links.len(), 3);
        assert!(links.windows(2).all(|w| w[0].distance_m <= w[1].distance_m));
        assert_eq!(links[0].bike_station_id, "B1");
    }

    #[test]
    fn test_missing_position_yields_no_links() {
        let (_, bikes) = fixture();
        let metro = vec![metro("M_NAN", f64::NAN, 121.5)];
        let params = JoinParams {
            method: JoinMethod::Nearest,
            radius_m: 500.0,
            nearest_k: 3,
        };
        assert!(build_station_bike_links(&metro, &bikes, &params).is_empty());
    }

    #[test]
    fn test_links_for_station() {
        let links = vec![
            StationBikeLink {
                metro_station_id: "M1".into(),
                bike_station_id: "B2".into(),
                distance_m: 300.0,
            },
            StationBikeLink {
                metro_station_id: "M2".into(),
                bike_station_id: "B3".into(),
                distance_m: 100.0,
            },
            StationBikeLink {
                metro_station_id: "M1".into(),
                bike_station_id: "B1".into(),
                distance_m: 160.0,
            },
        ];
        let got: Vec<&str> = links_for_station(&links, "M1")
            .iter()
            .map(|l| l.bike_station_id.as_str())
            .collect();
        assert_eq!(got, vec!["B1", "B2"]);
        assert!(links_for_station(&links, "M9").is_empty());
    }

    #[test]
    fn test_suffix() {
        let buffer = JoinParams {
            method: JoinMethod::Buffer,
            radius_m: 500.0,
            nearest_k: 3,
        };
        assert_eq!(buffer.suffix(), "r500m");
        let nearest = JoinParams {
            method: JoinMethod::Nearest,
            ..buffer
        };
        assert_eq!(nearest.suffix(), "k3");
    }
}
