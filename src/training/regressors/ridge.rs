//! L2-regularized linear regression fitted by cyclic coordinate descent on
//! standardized features.

use serde::{Deserialize, Serialize};

use super::{FitError, ModelError, Regressor, check_shape};

/// Columns with a spread below this are treated as constant and ignored.
const MIN_SCALE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    /// L2 penalty on the sum-of-squares scale.
    pub lambda: f64,
    pub max_rounds: usize,
    /// Stop once no weight moves by more than this in a round.
    pub tolerance: f64,

    #[serde(default)]
    means: Vec<f64>,
    #[serde(default)]
    scales: Vec<f64>,
    #[serde(default)]
    weights: Vec<f64>,
    #[serde(default)]
    bias: f64,
}

impl Default for RidgeRegressor {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            max_rounds: 200,
            tolerance: 1e-7,
            means: Vec::new(),
            scales: Vec::new(),
            weights: Vec::new(),
            bias: 0.0,
        }
    }
}

impl Regressor for RidgeRegressor {
    fn name(&self) -> &'static str {
        "ridge"
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), FitError> {
        let n_features = check_shape(x, y)?;
        let n = y.len() as f64;

        // Standardized copy, column-major for the coordinate sweeps.
        let mut means = vec![0.0; n_features];
        let mut scales = vec![0.0; n_features];
        let mut columns = vec![Vec::with_capacity(y.len()); n_features];
        for j in 0..n_features {
            let mean = x.iter().map(|r| r[j]).sum::<f64>() / n;
            let var = x.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n;
            means[j] = mean;
            scales[j] = if var.sqrt() < MIN_SCALE { 0.0 } else { var.sqrt() };
            for row in x {
                columns[j].push(if scales[j] == 0.0 {
                    0.0
                } else {
                    (row[j] - mean) / scales[j]
                });
            }
        }
        let sum_sq: Vec<f64> = columns
            .iter()
            .map(|c| c.iter().map(|v| v * v).sum())
            .collect();

        let bias = y.iter().sum::<f64>() / n;
        let mut residual: Vec<f64> = y.iter().map(|v| v - bias).collect();
        let mut weights = vec![0.0; n_features];

        for _ in 0..self.max_rounds {
            let mut max_delta = 0.0f64;
            for j in 0..n_features {
                if scales[j] == 0.0 {
                    continue;
                }
                let col = &columns[j];
                let rho: f64 =
                    col.iter().zip(&residual).map(|(c, r)| c * r).sum::<f64>() + sum_sq[j] * weights[j];
                let updated = rho / (sum_sq[j] + self.lambda);
                let delta = updated - weights[j];
                if delta != 0.0 {
                    for (r, c) in residual.iter_mut().zip(col) {
                        *r -= delta * c;
                    }
                    weights[j] = updated;
                }
                max_delta = max_delta.max(delta.abs());
            }
            if max_delta < self.tolerance {
                break;
            }
        }

        self.means = means;
        self.scales = scales;
        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(&self.means)
            .zip(&self.scales)
            .zip(row)
            .filter(|(((_, _), scale), _)| **scale != 0.0)
            .map(|(((w, mean), scale), x)| w * (x - mean) / scale)
            .sum::<f64>()
            + self.bias
    }

    fn validate(&self) -> Result<(), ModelError> {
        let n = self.weights.len();
        if self.means.len() != n || self.scales.len() != n {
            return Err(ModelError::Malformed(format!(
                "{n} weights but {} means and {} scales",
                self.means.len(),
                self.scales.len()
            )));
        }
        Ok(())
    }
}
