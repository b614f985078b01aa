/// Mean Earth radius used for every distance in the atlas.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Degree half-extents `(dlat, dlon)` of a box that contains every point
/// within `radius_m` of `lat`.
pub fn radius_to_degrees(lat: f64, radius_m: f64) -> (f64, f64) {
    let dlat = radius_m / 111_000.0;
    let cos_lat = lat.to_radians().cos().abs().max(1e-6);
    let dlon = radius_m / (111_000.0 * cos_lat);
    (dlat, dlon)
}
