//! Candidate algorithms for every training unit.

pub mod gbdt;
pub mod ridge;

pub use gbdt::GbdtRegressor;
pub use ridge::RidgeRegressor;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FitError {
    #[error("No training rows")]
    Empty,

    #[error("Expected {expected} targets, got {got}")]
    TargetMismatch { expected: usize, got: usize },

    #[error("Row {row} has {got} features, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model expects {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Model produced a non-finite value ({0})")]
    NonFinite(f64),

    #[error("Malformed model: {0}")]
    Malformed(String),
}

/// Validates a design matrix and returns its width.
pub fn check_shape(x: &[Vec<f64>], y: &[f64]) -> Result<usize, FitError> {
    if x.is_empty() {
        return Err(FitError::Empty);
    }
    if x.len() != y.len() {
        return Err(FitError::TargetMismatch {
            expected: x.len(),
            got: y.len(),
        });
    }
    let width = x[0].len();
    if let Some((row, r)) = x.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(FitError::RaggedRow {
            row,
            expected: width,
            got: r.len(),
        });
    }
    Ok(width)
}

pub trait Regressor {
    /// Key used for this algorithm in metrics documents.
    fn name(&self) -> &'static str;

    /// Width of the rows the fitted model expects.
    fn n_features(&self) -> usize;

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), FitError>;

    fn predict_row(&self, row: &[f64]) -> f64;

    fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Structural checks for a model read back from disk.
    fn validate(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// A persisted predictor. The `algorithm` tag names the variant on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum TrainedModel {
    Ridge(RidgeRegressor),
    Gbdt(GbdtRegressor),
}

impl TrainedModel {
    fn inner(&self) -> &dyn Regressor {
        match self {
            TrainedModel::Ridge(m) => m,
            TrainedModel::Gbdt(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Regressor {
        match self {
            TrainedModel::Ridge(m) => m,
            TrainedModel::Gbdt(m) => m,
        }
    }

    /// Single-row prediction with the checks a loaded artifact needs.
    pub fn predict_checked(&self, row: &[f64]) -> Result<f64, ModelError> {
        let expected = self.n_features();
        if row.len() != expected {
            return Err(ModelError::DimensionMismatch {
                expected,
                got: row.len(),
            });
        }
        let value = self.predict_row(row);
        if !value.is_finite() {
            return Err(ModelError::NonFinite(value));
        }
        Ok(value)
    }
}

impl Regressor for TrainedModel {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), FitError> {
        self.inner_mut().fit(x, y)
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.inner().predict_row(row)
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.inner().validate()
    }
}

/// Fresh, unfitted candidates in evaluation order. On equal error the earlier
/// one wins.
pub fn candidates() -> Vec<TrainedModel> {
    vec![
        TrainedModel::Ridge(RidgeRegressor::default()),
        TrainedModel::Gbdt(GbdtRegressor::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_shape() {
        assert_eq!(check_shape(&[vec![1.0, 2.0]], &[1.0]), Ok(2));
        assert_eq!(check_shape(&[], &[]), Err(FitError::Empty));
        assert_eq!(
            check_shape(&[vec![1.0]], &[1.0, 2.0]),
            Err(FitError::TargetMismatch { expected: 1, got: 2 })
        );
        assert!(matches!(
            check_shape(&[vec![1.0], vec![1.0, 2.0]], &[1.0, 2.0]),
            Err(FitError::RaggedRow { row: 1, .. })
        ));
    }

    #[test]
    fn test_candidate_order_and_names() {
        let names: Vec<_> = candidates().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["ridge", "gbdt"]);
    }

    #[test]
    fn test_tagged_json() {
        let mut model = TrainedModel::Ridge(RidgeRegressor::default());
        model.fit(&[vec![1.0], vec![2.0], vec![3.0]], &[1.0, 2.0, 3.0]).unwrap();

        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["algorithm"], "ridge");

        let back: TrainedModel = serde_json::from_value(json).unwrap();
        assert_eq!(back.predict_row(&[2.0]), model.predict_row(&[2.0]));
    }

    #[test]
    fn test_predict_checked_rejects_wrong_width() {
        let mut model = TrainedModel::Gbdt(GbdtRegressor::default());
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 1.0]).collect();
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        model.fit(&x, &y).unwrap();

        assert!(model.predict_checked(&[3.0, 1.0]).is_ok());
        assert_eq!(
            model.predict_checked(&[3.0]),
            Err(ModelError::DimensionMismatch { expected: 2, got: 1 })
        );
    }

    #[test]
    fn test_unknown_algorithm_fails_to_load() {
        let err = serde_json::from_str::<TrainedModel>(r#"{"algorithm": "xgboost"}"#);
        assert!(err.is_err());
    }
}
