//! Station analytics over the gold feature table: correlation, regression,
//! clustering and similarity search.

mod correlation;
mod kmeans;
mod regression;
mod similarity;

pub use correlation::{compute_feature_correlations, FeatureCorrelation};
pub use kmeans::{kmeans_cluster, ClusterLabel, KMeansOptions, KMeansResult};
pub use regression::{fit_linear_regression, LinearRegressionResult, RegressionRow};
pub use similarity::{find_similar_stations, SimilarStation};

use anyhow::{Context, Result};
use hashbrown::HashMap;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::features::FeatureTable;
use crate::models::StationTarget;
use crate::tables::{read_csv, write_csv};

pub const FEATURE_CORRELATIONS_CSV: &str = "feature_correlations.csv";
pub const REGRESSION_COEFFICIENTS_CSV: &str = "regression_coefficients.csv";
pub const STATION_CLUSTERS_CSV: &str = "station_clusters.csv";
pub const INTERCEPT_LABEL: &str = "__intercept__";

/// `station_id -> value` for one target metric. The first row per station wins.
pub(crate) fn target_values<'a>(
    targets: &'a [StationTarget],
    metric: &str,
) -> HashMap<&'a str, f64> {
    let mut out = HashMap::new();
    for t in targets.iter().filter(|t| t.metric == metric) {
        out.entry(t.station_id.as_str()).or_insert(t.value);
    }
    out
}

/// Dense copy of the feature table with `NaN` for missing cells.
pub(crate) fn dense_rows(features: &FeatureTable) -> Vec<Vec<f64>> {
    let width = features.columns.len();
    features
        .rows
        .iter()
        .map(|r| {
            (0..width)
                .map(|i| r.values.get(i).copied().flatten().unwrap_or(f64::NAN))
                .collect()
        })
        .collect()
}

/// Replace `NaN` with the column mean; a column with no values becomes 0.
pub(crate) fn impute_column_means(rows: &mut [Vec<f64>]) {
    let Some(width) = rows.first().map(Vec::len) else {
        return;
    };
    for c in 0..width {
        let (sum, n) = rows
            .iter()
            .map(|r| r[c])
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        let mean = if n > 0 { sum / n as f64 } else { 0.0 };
        for row in rows.iter_mut() {
            if !row[c].is_finite() {
                row[c] = mean;
            }
        }
    }
}

/// Column means and population standard deviations. A zero deviation is reported as 1.
pub(crate) fn column_moments(rows: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    let n = rows.len().max(1) as f64;
    let means: Vec<f64> = (0..width)
        .map(|c| rows.iter().map(|r| r[c]).sum::<f64>() / n)
        .collect();
    let stds = (0..width)
        .map(|c| {
            let var = rows.iter().map(|r| (r[c] - means[c]).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            if std > 0.0 {
                std
            } else {
                1.0
            }
        })
        .collect();
    (means, stds)
}

pub(crate) fn standardize(rows: &mut [Vec<f64>]) {
    let (means, stds) = column_moments(rows);
    for row in rows.iter_mut() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = (*v - means[c]) / stds[c];
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub target_metric: String,
    pub correlations: usize,
    pub regression_n: usize,
    pub regression_r2: f64,
    pub clustered_stations: usize,
}

/// Compute every analytics artifact from the gold features and targets and
/// write them to `out_dir`.
pub fn build_analytics(config: &Config, target_metric: &str, out_dir: &Path) -> Result<AnalyticsReport> {
    let features_path = &config.features.station_features_path;
    let targets_path = &config.features.station_targets_path;
    let features = FeatureTable::read_csv(features_path)
        .with_context(|| format!("Missing station features: {}", features_path.display()))?;
    let targets: Vec<StationTarget> = read_csv(targets_path)
        .with_context(|| format!("Missing station targets: {}", targets_path.display()))?;

    let correlations = compute_feature_correlations(&features, &targets, target_metric);
    write_csv(&out_dir.join(FEATURE_CORRELATIONS_CSV), &correlations)?;

    let regression = fit_linear_regression(&features, &targets, target_metric);
    write_csv(&out_dir.join(REGRESSION_COEFFICIENTS_CSV), &regression.rows())?;

    let clustering = &config.analytics.clustering;
    let kmeans = kmeans_cluster(
        &features,
        &KMeansOptions {
            k: clustering.k,
            standardize: clustering.standardize,
            ..Default::default()
        },
    );
    write_csv(&out_dir.join(STATION_CLUSTERS_CSV), &kmeans.labels)?;

    let report = AnalyticsReport {
        target_metric: target_metric.to_string(),
        correlations: correlations.len(),
        regression_n: regression.n,
        regression_r2: regression.r2,
        clustered_stations: kmeans.labels.len(),
    };
    info!(
        target = %report.target_metric,
        correlations = report.correlations,
        regression_n = report.regression_n,
        clustered = report.clustered_stations,
        "Wrote analytics to {}",
        out_dir.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;

    #[test]
    fn test_impute_and_standardize() {
        let mut rows = vec![
            vec![1.0, f64::NAN, 5.0],
            vec![3.0, f64::NAN, 5.0],
            vec![f64::NAN, f64::NAN, 5.0],
        ];
        impute_column_means(&mut rows);
        assert_eq!(rows[2][0], 2.0);
        assert_eq!(rows[0][1], 0.0);

        standardize(&mut rows);
        assert!((rows[0][0] + 1.224744871).abs() < 1e-6);
        assert_eq!(rows[1][2], 0.0);
    }

    #[test]
    fn test_build_analytics_writes_outputs() {
        let dir = Builder::new().prefix("atlas-analytics-").tempdir().unwrap();
        let mut config = Config::default();
        config.resolve_paths(dir.path());

        let mut table = FeatureTable::with_stations(["M1", "M2", "M3", "M4"]);
        table.push_column("a", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        table.push_column("b", vec![Some(2.0), Some(1.0), Some(4.0), Some(3.0)]);
        table.write_csv(&config.features.station_features_path).unwrap();
        let targets: Vec<StationTarget> = [10.0, 20.0, 30.0, 40.0]
            .iter()
            .enumerate()
            .map(|(i, v)| StationTarget {
                station_id: format!("M{}", i + 1),
                metric: "m".to_string(),
                value: *v,
                window_days: 7,
            })
            .collect();
        write_csv(&config.features.station_targets_path, &targets).unwrap();

        let out = dir.path().join("gold");
        let report = build_analytics(&config, "m", &out).unwrap();
        assert_eq!(report.correlations, 2);
        assert_eq!(report.regression_n, 4);
        assert_eq!(report.clustered_stations, 4);

        let rows: Vec<RegressionRow> = read_csv(&out.join(REGRESSION_COEFFICIENTS_CSV)).unwrap();
        assert_eq!(rows.last().unwrap().feature, INTERCEPT_LABEL);
        assert!(rows.iter().all(|r| r.n == 4));
        let clusters: Vec<ClusterLabel> = read_csv(&out.join(STATION_CLUSTERS_CSV)).unwrap();
        assert_eq!(clusters.len(), 4);
        let corr: Vec<FeatureCorrelation> = read_csv(&out.join(FEATURE_CORRELATIONS_CSV)).unwrap();
        assert_eq!(corr[0].feature, "a");
    }
}
