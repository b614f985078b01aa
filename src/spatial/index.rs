//! Spatial index for fast district lookups.

use anyhow::Result;
use geo::{Contains, Point};
use rstar::{RTree, RTreeObject, AABB};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::boundary::{load_district_boundaries, DistrictBoundary};
use crate::models::{DistrictAssignment, MetroStation};

/// Wrapper for R-tree indexing of district boundaries
#[derive(Clone)]
pub struct IndexedBoundary {
    pub boundary: Arc<DistrictBoundary>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedBoundary {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedBoundary {
    pub fn new(boundary: DistrictBoundary) -> Option<Self> {
        let (min_x, min_y, max_x, max_y) = boundary.bbox()?;
        Some(Self {
            boundary: Arc::new(boundary),
            envelope: AABB::from_corners([min_x, min_y], [max_x, max_y]),
        })
    }
}

/// Point-in-polygon index over district boundaries.
///
/// When polygons overlap, the feature that came first in the source file wins.
pub struct BoundaryIndex {
    tree: RTree<IndexedBoundary>,
}

impl BoundaryIndex {
    /// Build spatial index from district boundaries
    pub fn build(boundaries: Vec<DistrictBoundary>) -> Self {
        info!(
            "Building spatial index for {} boundaries...",
            boundaries.len()
        );

        let indexed: Vec<IndexedBoundary> = boundaries
            .into_iter()
            .filter_map(IndexedBoundary::new)
            .collect();
        let tree = RTree::bulk_load(indexed);

        info!("Spatial index built with {} entries", tree.size());
        Self { tree }
    }

    pub fn from_geojson(path: &Path, name_property: Option<&str>) -> Result<Self> {
        Ok(Self::build(load_district_boundaries(path, name_property)?))
    }

    /// District containing the point, if any
    pub fn lookup(&self, lat: f64, lon: f64) -> Option<&str> {
        if !(lat.is_finite() && lon.is_finite()) {
            return None;
        }
        let point = Point::new(lon, lat);
        let query_envelope = AABB::from_point([lon, lat]);

        // Use R-tree to get candidates via envelope intersection, then filter with exact containment
        self.tree
            .locate_in_envelope_intersecting(&query_envelope)
            .filter(|ib| ib.boundary.geometry.contains(&point))
            .min_by_key(|ib| ib.boundary.ordinal)
            .map(|ib| ib.boundary.name.as_str())
    }

    /// Assign each station to its district. Returns the rows and the miss count.
    pub fn assign_districts(&self, stations: &[MetroStation]) -> (Vec<DistrictAssignment>, usize) {
        let rows: Vec<DistrictAssignment> = stations
            .iter()
            .map(|s| DistrictAssignment {
                station_id: s.station_id.clone(),
                district: self.lookup(s.lat, s.lon).map(str::to_string),
            })
            .collect();
        let missing = rows.iter().filter(|r| r.district.is_none()).count();
        (rows, missing)
    }

    /// Get total number of indexed boundaries
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::boundary::parse_district_boundaries;

    const OVERLAPPING: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"district": "Ring"},
             "geometry": {"type": "Polygon", "coordinates": [
                [[0,0],[10,0],[10,10],[0,10],[0,0]],
                [[4,4],[6,4],[6,6],[4,6],[4,4]]
             ]}},
            {"type": "Feature", "properties": {"district": "Overlap"},
             "geometry": {"type": "Polygon", "coordinates": [[[1,1],[5,1],[5,5],[1,5],[1,1]]]}}
        ]
    }"#;

    fn index() -> BoundaryIndex {
        BoundaryIndex::build(parse_district_boundaries(OVERLAPPING, None).unwrap())
    }

    #[test]
    fn test_first_feature_wins_on_overlap() {
        assert_eq!(index().lookup(2.0, 2.0), Some("Ring"));
    }

    #[test]
    fn test_hole_excludes() {
        let idx = index();
        // Inside the hole of Ring but still inside Overlap
        assert_eq!(idx.lookup(4.5, 4.5), Some("Overlap"));
        // Inside the hole and outside Overlap
        assert_eq!(idx.lookup(5.5, 5.5), None);
    }

    #[test]
    fn test_outside_and_invalid() {
        let idx = index();
        assert_eq!(idx.lookup(20.0, 20.0), None);
        assert_eq!(idx.lookup(f64::NAN, 1.0), None);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn test_assign_districts() {
        let station = |id: &str, lat: f64, lon: f64| MetroStation {
            station_id: id.to_string(),
            name: id.to_string(),
            name_en: None,
            lat,
            lon,
            city: String::new(),
            system: String::new(),
        };
        let stations = vec![station("A", 8.0, 8.0), station("B", 50.0, 50.0)];
        let (rows, missing) = index().assign_districts(&stations);
        assert_eq!(rows[0].district.as_deref(), Some("Ring"));
        assert_eq!(rows[1].district, None);
        assert_eq!(missing, 1);
    }
}
