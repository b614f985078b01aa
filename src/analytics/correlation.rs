use serde::{Deserialize, Serialize};

use super::target_values;
use crate::features::FeatureTable;
use crate::models::StationTarget;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCorrelation {
    pub feature: String,
    pub correlation: f64,
    pub n: usize,
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    (denom > 0.0).then(|| sxy / denom)
}

/// Pearson correlation of every feature column against one target metric,
/// strongest positive first.
pub fn compute_feature_correlations(
    features: &FeatureTable,
    targets: &[StationTarget],
    metric: &str,
) -> Vec<FeatureCorrelation> {
    let target = target_values(targets, metric);
    let mut out = Vec::new();

    for (idx, name) in features.columns.iter().enumerate() {
        let pairs: Vec<(f64, f64)> = features
            .rows
            .iter()
            .filter_map(|row| {
                let x = row.values.get(idx).copied().flatten()?;
                let y = *target.get(row.station_id.as_str())?;
                y.is_finite().then_some((x, y))
            })
            .collect();
        if pairs.len() < 3 {
            continue;
        }
        if let Some(correlation) = pearson(&pairs) {
            out.push(FeatureCorrelation {
                feature: name.clone(),
                correlation,
                n: pairs.len(),
            });
        }
    }

    out.sort_by(|a, b| b.correlation.total_cmp(&a.correlation));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, value: f64) -> StationTarget {
        StationTarget {
            station_id: id.to_string(),
            metric: "flow".to_string(),
            value,
            window_days: 7,
        }
    }

    #[test]
    fn test_correlations_sorted_and_filtered() {
        let mut table = FeatureTable::with_stations(["A", "B", "C", "D"]);
        table.push_column("up", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        table.push_column("down", vec![Some(4.0), Some(3.0), Some(2.0), Some(1.0)]);
        table.push_column("flat", vec![Some(5.0), Some(5.0), Some(5.0), Some(5.0)]);
        table.push_column("sparse", vec![Some(1.0), None, None, Some(2.0)]);

        let targets = vec![
            target("A", 10.0),
            target("B", 20.0),
            target("C", 30.0),
            target("D", 40.0),
            StationTarget {
                metric: "other".to_string(),
                ..target("A", 99.0)
            },
        ];
        let out = compute_feature_correlations(&table, &targets, "flow");

        let names: Vec<&str> = out.iter().map(|c| c.feature.as_str()).collect();
        assert_eq!(names, vec!["up", "down"]);
        assert!((out[0].correlation - 1.0).abs() < 1e-12);
        assert!((out[1].correlation + 1.0).abs() < 1e-12);
        assert_eq!(out[0].n, 4);
    }

    #[test]
    fn test_unknown_metric_is_empty() {
        let mut table = FeatureTable::with_stations(["A", "B", "C"]);
        table.push_column("x", vec![Some(1.0), Some(2.0), Some(3.0)]);
        assert!(compute_feature_correlations(&table, &[target("A", 1.0)], "missing").is_empty());
    }
}
