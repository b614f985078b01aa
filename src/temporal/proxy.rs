use crate::models::BikeSnapshot;

/// Fill `rent_proxy`/`return_proxy` from consecutive snapshots of each station.
///
/// Sorts by `(station_id, ts)`. A drop in available bikes counts as rentals,
/// a rise as returns. The first snapshot of every station has no proxy.
pub fn compute_rent_return_proxy(snapshots: &mut [BikeSnapshot]) {
    snapshots.sort_by(|a, b| a.station_id.cmp(&b.station_id).then(a.ts.cmp(&b.ts)));

    let mut previous: Option<(&str, i64)> = None;
    let mut deltas = Vec::with_capacity(snapshots.len());
    for snap in snapshots.iter() {
        let delta = match previous {
            Some((id, bikes)) if id == snap.station_id => Some(snap.available_bikes - bikes),
            _ => None,
        };
        deltas.push(delta);
        previous = Some((snap.station_id.as_str(), snap.available_bikes));
    }

    for (snap, delta) in snapshots.iter_mut().zip(deltas) {
        snap.rent_proxy = delta.map(|d| (-d).max(0) as f64);
        snap.return_proxy = delta.map(|d| d.max(0) as f64);
    }
}
