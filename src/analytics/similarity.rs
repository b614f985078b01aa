use serde::{Deserialize, Serialize};

use super::{dense_rows, impute_column_means, standardize};
use crate::config::DistanceMetric;
use crate::error::{AtlasError, AtlasResult};
use crate::features::FeatureTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarStation {
    pub station_id: String,
    pub distance: f64,
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn distance(metric: DistanceMetric, a: &[f64], anchor: &[f64], anchor_norm: f64) -> f64 {
    match metric {
        DistanceMetric::Euclidean => a
            .iter()
            .zip(anchor)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt(),
        DistanceMetric::Cosine => {
            let dot: f64 = a.iter().zip(anchor).map(|(x, y)| x * y).sum();
            let denom = norm(a) * anchor_norm.max(1e-12);
            let denom = if denom == 0.0 { 1.0 } else { denom };
            1.0 - dot / denom
        }
    }
}

/// Stations closest to `station_id` in feature space, nearest first.
pub fn find_similar_stations(
    features: &FeatureTable,
    station_id: &str,
    top_k: usize,
    metric: DistanceMetric,
    standardize_columns: bool,
) -> AtlasResult<Vec<SimilarStation>> {
    let Some(anchor_idx) = features.rows.iter().position(|r| r.station_id == station_id) else {
        return Err(AtlasError::NotFound(format!("station {}", station_id)));
    };
    if features.columns.is_empty() {
        return Err(AtlasError::InvalidInput(
            "No numeric feature columns found".to_string(),
        ));
    }

    let mut x = dense_rows(features);
    impute_column_means(&mut x);
    if standardize_columns {
        standardize(&mut x);
    }

    let anchor = &x[anchor_idx];
    let anchor_norm = norm(anchor);
    let mut out: Vec<SimilarStation> = features
        .rows
        .iter()
        .zip(&x)
        .filter(|(row, _)| row.station_id != station_id)
        .map(|(row, v)| SimilarStation {
            station_id: row.station_id.clone(),
            distance: distance(metric, v, anchor, anchor_norm),
        })
        .collect();

    out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    out.truncate(top_k);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FeatureTable {
        let mut table = FeatureTable::with_stations(["A", "B", "C", "D"]);
        table.push_column("x", vec![Some(1.0), Some(1.1), Some(5.0), Some(2.0)]);
        table.push_column("y", vec![Some(1.0), Some(1.0), Some(5.0), None]);
        table
    }

    #[test]
    fn test_euclidean_excludes_self() {
        let out = find_similar_stations(&table(), "A", 2, DistanceMetric::Euclidean, false).unwrap();
        let ids: Vec<&str> = out.iter().map(|s| s.station_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "D"]);
        assert!((out[0].distance - 0.1).abs() < 1e-9);
        // D's missing y is imputed with the mean of 1, 1 and 5.
        let expected = (1.0f64 + (7.0f64 / 3.0 - 1.0).powi(2)).sqrt();
        assert!((out[1].distance - expected).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_distance() {
        let mut table = FeatureTable::with_stations(["A", "B", "C"]);
        table.push_column("x", vec![Some(1.0), Some(2.0), Some(0.0)]);
        table.push_column("y", vec![Some(0.0), Some(0.0), Some(3.0)]);

        let out = find_similar_stations(&table, "A", 5, DistanceMetric::Cosine, false).unwrap();
        assert_eq!(out[0].station_id, "B");
        assert!(out[0].distance.abs() < 1e-12);
        assert!((out[1].distance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_errors() {
        let err = find_similar_stations(&table(), "ZZ", 3, DistanceMetric::Euclidean, true)
            .unwrap_err();
        assert!(matches!(err, AtlasError::NotFound(_)));

        let empty = FeatureTable::with_stations(["A", "B"]);
        let err =
            find_similar_stations(&empty, "A", 3, DistanceMetric::Euclidean, true).unwrap_err();
        assert!(matches!(err, AtlasError::InvalidInput(_)));
    }

    #[test]
    fn test_top_k_zero_is_empty() {
        let out = find_similar_stations(&table(), "A", 0, DistanceMetric::Euclidean, true).unwrap();
        assert!(out.is_empty());
    }
}
