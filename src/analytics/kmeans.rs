use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{dense_rows, impute_column_means, standardize};
use crate::features::FeatureTable;

#[derive(Debug, Clone)]
pub struct KMeansOptions {
    pub k: usize,
    pub standardize: bool,
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            k: 5,
            standardize: true,
            seed: 0,
            n_init: 5,
            max_iter: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLabel {
    pub station_id: String,
    pub cluster: usize,
}

#[derive(Debug, Clone, Default)]
pub struct KMeansResult {
    pub labels: Vec<ClusterLabel>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = (0, f64::INFINITY);
    for (j, c) in centroids.iter().enumerate() {
        let d = sq_dist(point, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best.0
}

fn converged(old: &[Vec<f64>], new: &[Vec<f64>]) -> bool {
    old.iter()
        .flatten()
        .zip(new.iter().flatten())
        .all(|(a, b)| (a - b).abs() <= 1e-8 + 1e-5 * b.abs())
}

/// One Lloyd run from the given initial centroids.
fn lloyd(x: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, max_iter: usize) -> (Vec<usize>, Vec<Vec<f64>>, f64) {
    let width = centroids.first().map(Vec::len).unwrap_or(0);
    let mut labels = vec![0; x.len()];

    for _ in 0..max_iter.max(1) {
        for (label, point) in labels.iter_mut().zip(x) {
            *label = nearest_centroid(point, &centroids);
        }

        let mut sums = vec![vec![0.0; width]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (point, &label) in x.iter().zip(&labels) {
            counts[label] += 1;
            for (s, v) in sums[label].iter_mut().zip(point) {
                *s += v;
            }
        }
        // Empty clusters keep their previous centroid.
        let updated: Vec<Vec<f64>> = sums
            .into_iter()
            .zip(&counts)
            .zip(&centroids)
            .map(|((sum, &count), old)| {
                if count == 0 {
                    old.clone()
                } else {
                    sum.into_iter().map(|s| s / count as f64).collect()
                }
            })
            .collect();

        let done = converged(&centroids, &updated);
        centroids = updated;
        if done {
            break;
        }
    }

    let inertia = x
        .iter()
        .zip(&labels)
        .map(|(p, &l)| sq_dist(p, &centroids[l]))
        .sum();
    (labels, centroids, inertia)
}

/// K-means over the numeric feature columns. Deterministic for a given seed.
pub fn kmeans_cluster(features: &FeatureTable, opts: &KMeansOptions) -> KMeansResult {
    if features.columns.is_empty() {
        return KMeansResult::default();
    }

    let mut ids = Vec::new();
    let mut x = Vec::new();
    for (row, dense) in features.rows.iter().zip(dense_rows(features)) {
        if dense.iter().any(|v| v.is_finite()) {
            ids.push(row.station_id.clone());
            x.push(dense);
        }
    }
    if x.is_empty() {
        return KMeansResult::default();
    }

    impute_column_means(&mut x);
    if opts.standardize {
        standardize(&mut x);
    }

    let k = opts.k.clamp(1, x.len());
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best: Option<(Vec<usize>, Vec<Vec<f64>>, f64)> = None;

    for _ in 0..opts.n_init.max(1) {
        let init: Vec<Vec<f64>> = sample(&mut rng, x.len(), k)
            .into_iter()
            .map(|i| x[i].clone())
            .collect();
        let run = lloyd(&x, init, opts.max_iter);
        if best.as_ref().map_or(true, |b| run.2 < b.2) {
            best = Some(run);
        }
    }

    let Some((labels, centroids, inertia)) = best else {
        return KMeansResult::default();
    };
    debug!("k-means k={} over {} stations, inertia {:.4}", k, ids.len(), inertia);

    KMeansResult {
        labels: ids
            .into_iter()
            .zip(labels)
            .map(|(station_id, cluster)| ClusterLabel { station_id, cluster })
            .collect(),
        centroids,
        inertia,
    }
}
