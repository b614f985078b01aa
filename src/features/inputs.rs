//! Optional side inputs for the feature builder: POIs and the district map.

use anyhow::{bail, Context, Result};
use hashbrown::HashMap;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::models::Located;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Poi {
    #[serde(default)]
    pub poi_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub category: String,
    pub lat: f64,
    pub lon: f64,
}

impl Located for Poi {
    fn id(&self) -> &str {
        self.poi_id.as_deref().or(self.name.as_deref()).unwrap_or("")
    }
    fn lat(&self) -> f64 {
        self.lat
    }
    fn lon(&self) -> f64 {
        self.lon
    }
}

fn require_columns(path: &Path, headers: &csv::StringRecord, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .collect();
    if !missing.is_empty() {
        bail!("{} missing columns: {:?}", path.display(), missing);
    }
    Ok(())
}

/// Load a POI CSV with at least `category, lat, lon`. Unparseable rows are skipped.
pub fn load_pois(path: &Path) -> Result<Vec<Poi>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open POI file {}", path.display()))?;
    require_columns(path, reader.headers()?, &["category", "lat", "lon"])?;

    let mut pois = Vec::new();
    let mut skipped = 0usize;
    for record in reader.deserialize::<Poi>() {
        match record {
            Ok(poi) if poi.has_position() => pois.push(poi),
            Ok(_) => skipped += 1,
            Err(e) => {
                debug!("Skipping POI row: {}", e);
                skipped += 1;
            }
        }
    }
    info!("Loaded {} POIs from {} ({} skipped)", pois.len(), path.display(), skipped);
    Ok(pois)
}

#[derive(Deserialize)]
struct DistrictRow {
    station_id: String,
    #[serde(default)]
    district: Option<String>,
}

/// Load `station_id -> district` from a CSV with `station_id, district`.
pub fn load_district_map(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open district map {}", path.display()))?;
    require_columns(path, reader.headers()?, &["station_id", "district"])?;

    let mut map = HashMap::new();
    for record in reader.deserialize::<DistrictRow>() {
        let row = record.with_context(|| format!("{}: bad row", path.display()))?;
        let district = row.district.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        if let Some(district) = district {
            map.insert(row.station_id.trim().to_string(), district);
        }
    }
    Ok(map)
}
