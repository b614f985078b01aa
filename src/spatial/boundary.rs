//! District boundary extraction from GeoJSON.

use anyhow::{bail, Context, Result};
use geo::{BoundingRect, Coord, LineString, MultiPolygon, Polygon};
use geojson::{GeoJson, Value};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Property keys tried in order when no explicit name property is configured.
pub const NAME_CANDIDATES: [&str; 5] = ["district", "town", "TOWNNAME", "NAME", "name"];

/// A single named district polygon
#[derive(Debug, Clone)]
pub struct DistrictBoundary {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    /// Position of the feature in the source file
    pub ordinal: usize,
}

impl DistrictBoundary {
    /// Get the bounding box of this boundary
    pub fn bbox(&self) -> Option<(f64, f64, f64, f64)> {
        self.geometry
            .bounding_rect()
            .map(|rect| (rect.min().x, rect.min().y, rect.max().x, rect.max().y))
    }
}

/// Read district boundaries from a GeoJSON FeatureCollection file.
pub fn load_district_boundaries(
    path: &Path,
    name_property: Option<&str>,
) -> Result<Vec<DistrictBoundary>> {
    info!("Loading district boundaries from {}", path.display());
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read boundaries file {}", path.display()))?;
    parse_district_boundaries(&content, name_property)
}

/// Parse district boundaries from GeoJSON text.
///
/// Features without a name, without geometry, or with a non-polygonal
/// geometry are skipped. Fails when nothing usable remains.
pub fn parse_district_boundaries(
    content: &str,
    name_property: Option<&str>,
) -> Result<Vec<DistrictBoundary>> {
    let geojson: GeoJson = content.parse().context("Invalid GeoJSON")?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => bail!("Boundaries GeoJSON must be a FeatureCollection"),
    };

    let mut boundaries = Vec::new();

    for (ordinal, feature) in collection.features.iter().enumerate() {
        let name = match feature
            .properties
            .as_ref()
            .and_then(|props| feature_name(props, name_property))
        {
            Some(n) => n,
            None => {
                debug!("Skipping feature {} without a name", ordinal);
                continue;
            }
        };

        let geometry = match feature.geometry.as_ref().and_then(|g| to_multipolygon(&g.value)) {
            Some(g) => g,
            None => {
                debug!("Skipping feature {} ({}) without polygon geometry", ordinal, name);
                continue;
            }
        };

        boundaries.push(DistrictBoundary {
            name,
            geometry,
            ordinal,
        });
    }

    if boundaries.is_empty() {
        bail!("No usable polygon features found in boundaries GeoJSON");
    }

    info!("Found {} district boundaries", boundaries.len());
    Ok(boundaries)
}

fn feature_name(
    props: &serde_json::Map<String, JsonValue>,
    name_property: Option<&str>,
) -> Option<String> {
    match name_property {
        Some(key) => props.get(key).and_then(non_empty_text),
        None => NAME_CANDIDATES
            .iter()
            .find_map(|key| props.get(*key).and_then(non_empty_text)),
    }
}

fn non_empty_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn to_multipolygon(value: &Value) -> Option<MultiPolygon<f64>> {
    match value {
        Value::Polygon(rings) => to_polygon(rings).map(|p| MultiPolygon(vec![p])),
        Value::MultiPolygon(polys) => {
            let parts: Vec<Polygon<f64>> = polys.iter().filter_map(|p| to_polygon(p)).collect();
            (!parts.is_empty()).then_some(MultiPolygon(parts))
        }
        _ => None,
    }
}

fn to_polygon(rings: &[Vec<Vec<f64>>]) -> Option<Polygon<f64>> {
    let mut rings = rings.iter().map(|r| to_ring(r));
    let exterior = rings.next()??;
    let interiors: Vec<LineString<f64>> = rings.flatten().collect();
    Some(Polygon::new(exterior, interiors))
}

fn to_ring(positions: &[Vec<f64>]) -> Option<LineString<f64>> {
    let coords: Vec<Coord<f64>> = positions
        .iter()
        .filter(|p| p.len() >= 2)
        .map(|p| Coord { x: p[0], y: p[1] })
        .collect();
    (coords.len() >= 3).then(|| LineString::from(coords))
}
