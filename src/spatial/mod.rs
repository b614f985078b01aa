//! Spatial primitives: haversine distance, the metro to bike station join,
//! and the district point-in-polygon index.

mod boundary;
mod distance;
mod index;
mod join;

pub use boundary::{load_district_boundaries, parse_district_boundaries, DistrictBoundary};
pub use distance::{haversine_m, radius_to_degrees, EARTH_RADIUS_M};
pub use index::BoundaryIndex;
pub use join::{build_station_bike_links, links_for_station, PointIndex, JoinMethod, JoinParams};
