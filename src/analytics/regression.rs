use serde::{Deserialize, Serialize};

use super::{column_moments, target_values, INTERCEPT_LABEL};
use crate::features::FeatureTable;
use crate::models::StationTarget;

const PIVOT_EPS: f64 = 1e-12;
const RIDGE_EPS: f64 = 1e-8;

/// OLS fit on standardized features. Coefficients are per standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegressionResult {
    pub intercept: f64,
    pub coefficients: Vec<(String, f64)>,
    pub r2: f64,
    pub n: usize,
}

/// One line of `regression_coefficients.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionRow {
    pub feature: String,
    pub coefficient: f64,
    pub r2: f64,
    pub n: usize,
}

impl LinearRegressionResult {
    fn empty(n: usize) -> Self {
        Self {
            intercept: f64::NAN,
            coefficients: Vec::new(),
            r2: f64::NAN,
            n,
        }
    }

    /// Coefficient rows followed by the intercept row.
    pub fn rows(&self) -> Vec<RegressionRow> {
        self.coefficients
            .iter()
            .map(|(feature, coefficient)| (feature.as_str(), *coefficient))
            .chain(std::iter::once((INTERCEPT_LABEL, self.intercept)))
            .map(|(feature, coefficient)| RegressionRow {
                feature: feature.to_string(),
                coefficient,
                r2: self.r2,
                n: self.n,
            })
            .collect()
    }
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPS {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Least squares through the normal equations, with a small ridge term when
/// the design matrix is rank deficient.
fn least_squares(design: &[Vec<f64>], y: &[f64]) -> Option<Vec<f64>> {
    let p = design.first()?.len();
    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for (row, &target) in design.iter().zip(y) {
        for i in 0..p {
            xty[i] += row[i] * target;
            for j in 0..p {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }

    solve(xtx.clone(), xty.clone()).or_else(|| {
        for (i, row) in xtx.iter_mut().enumerate() {
            row[i] += RIDGE_EPS * (1.0 + row[i].abs());
        }
        solve(xtx, xty)
    })
}

/// `y ~ 1 + X` over stations that have the target and every feature.
pub fn fit_linear_regression(
    features: &FeatureTable,
    targets: &[StationTarget],
    metric: &str,
) -> LinearRegressionResult {
    let target = target_values(targets, metric);
    if features.columns.is_empty() {
        return LinearRegressionResult::empty(0);
    }

    let mut x: Vec<Vec<f64>> = Vec::new();
    let mut y: Vec<f64> = Vec::new();
    for row in &features.rows {
        let Some(&value) = target.get(row.station_id.as_str()) else {
            continue;
        };
        let cells: Option<Vec<f64>> = (0..features.columns.len())
            .map(|i| row.values.get(i).copied().flatten())
            .collect();
        if let Some(cells) = cells.filter(|_| value.is_finite()) {
            x.push(cells);
            y.push(value);
        }
    }
    if x.len() < 3 {
        return LinearRegressionResult::empty(x.len());
    }

    let (means, stds) = column_moments(&x);
    let design: Vec<Vec<f64>> = x
        .iter()
        .map(|r| {
            std::iter::once(1.0)
                .chain(r.iter().enumerate().map(|(c, v)| (v - means[c]) / stds[c]))
                .collect()
        })
        .collect();

    let Some(beta) = least_squares(&design, &y) else {
        return LinearRegressionResult::empty(y.len());
    };

    let y_mean = y.iter().sum::<f64>() / y.len() as f64;
    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (row, &actual) in design.iter().zip(&y) {
        let predicted: f64 = row.iter().zip(&beta).map(|(a, b)| a * b).sum();
        ss_res += (actual - predicted).powi(2);
        ss_tot += (actual - y_mean).powi(2);
    }
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        f64::NAN
    };

    LinearRegressionResult {
        intercept: beta[0],
        coefficients: features
            .columns
            .iter()
            .cloned()
            .zip(beta[1..].iter().copied())
            .collect(),
        r2,
        n: y.len(),
    }
}
