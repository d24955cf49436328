//! Per-unit model selection and the per-tier training loop.

use std::collections::BTreeMap;
use tracing::{debug, info, info_span, warn};

use super::metrics::{CandidateMetric, UnitMetrics};
use super::regressors::{FitError, Regressor, TrainedModel, candidates};
use super::split::train_test_split;
use super::table::{FeatureTable, TableLoadError};
use crate::artifacts::{ArtifactKey, ArtifactStore, TrainingUnit};
use crate::types::Tier;

/// Units with fewer rows get no model and no metrics entry.
pub const MIN_UNIT_ROWS: usize = 20;
pub const SPLIT_SEED: u64 = 42;
pub const TEST_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub metrics: UnitMetrics,
    /// The winning candidate, refit on every row of the unit.
    pub model: TrainedModel,
}

/// Scores every candidate on a seeded 80/20 split and refits the one with the
/// lowest held-out MAE. The earlier candidate wins a tie.
pub fn fit_unit(x: &[Vec<f64>], y: &[f64]) -> Result<UnitOutcome, FitError> {
    let (train, test) = train_test_split(y.len(), TEST_FRACTION, SPLIT_SEED);
    let pick = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
        (
            idx.iter().map(|&i| x[i].clone()).collect(),
            idx.iter().map(|&i| y[i]).collect(),
        )
    };
    let (x_train, y_train) = pick(&train);
    let (x_test, y_test) = pick(&test);

    let fresh = candidates();
    let mut metrics = UnitMetrics::default();
    let mut best: Option<(usize, f64)> = None;

    for (i, candidate) in fresh.iter().enumerate() {
        let mut model = candidate.clone();
        model.fit(&x_train, &y_train)?;
        let scored = CandidateMetric::evaluate(&model.predict(&x_test), &y_test);
        debug!(candidate = model.name(), mae = scored.mae, r2 = scored.r2, "Candidate scored");

        if best.is_none_or(|(_, mae)| scored.mae < mae) {
            best = Some((i, scored.mae));
        }
        metrics.candidates.insert(model.name().to_string(), scored);
    }

    let (winner_idx, _) = best.ok_or(FitError::Empty)?;
    let mut model = fresh[winner_idx].clone();
    model.fit(x, y)?;
    metrics.best_model = Some(model.name().to_string());

    Ok(UnitOutcome { metrics, model })
}

/// Trains every unit of `tier` in `table` and persists the winners.
///
/// Small units are skipped silently; a unit that fails to fit or save is
/// logged and skipped. Only a table missing the tier's grouping column is an
/// error.
pub fn train_tier(
    table: &FeatureTable,
    tier: Tier,
    store: &ArtifactStore,
) -> Result<BTreeMap<TrainingUnit, UnitMetrics>, TableLoadError> {
    let _span = info_span!("train_tier", task = %table.task, tier = %tier).entered();

    let units = table.units(tier)?;
    let mut results = BTreeMap::new();
    let mut skipped = 0usize;

    for (unit, rows) in units {
        if rows.len() < MIN_UNIT_ROWS {
            debug!(unit = %unit, rows = rows.len(), "Too few rows, skipping unit");
            skipped += 1;
            continue;
        }

        let (x, y) = table.select(&rows);
        let outcome = match fit_unit(&x, &y) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(unit = %unit, error = %e, "Training failed, skipping unit");
                continue;
            }
        };

        let key = ArtifactKey::new(table.task, unit.clone());
        if let Err(e) = store.save(&key, &outcome.model, &table.feature_names) {
            warn!(unit = %unit, error = %e, "Failed to persist artifact, skipping unit");
            continue;
        }

        if let Some(best) = outcome.metrics.best() {
            debug!(
                unit = %unit,
                rows = rows.len(),
                best_model = outcome.model.name(),
                mae = best.mae,
                r2 = best.r2,
                "Unit trained"
            );
        }
        results.insert(unit, outcome.metrics);
    }

    info!(trained = results.len(), skipped, "Tier trained");
    Ok(results)
}
