//! Out-of-fold probability estimation for a group of forest units.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, instrument};

use crate::cancel::CancellationToken;
use crate::error::GcForestError;
use crate::folds::FoldPlan;
use crate::seed::derive_seed;
use crate::unit::{ForestUnit, ForestUnitSpec};

/// Cross-validated output of one unit.
#[derive(Debug)]
pub(crate) struct CrossValOutput {
    /// The unit retrained on every row, kept for inference.
    pub(crate) unit: ForestUnit,
    /// Out-of-fold probabilities, one vector per row position of the plan.
    pub(crate) oof: Vec<Vec<f64>>,
}

/// One independent training job.
#[derive(Debug, Clone, Copy)]
enum Job {
    Fold { unit: usize, fold: usize },
    Full { unit: usize },
}

enum JobOutput {
    Fold {
        unit: usize,
        positions: Vec<usize>,
        proba: Vec<Vec<f64>>,
    },
    Full {
        unit: usize,
        fitted: ForestUnit,
    },
}

/// Train every unit on each fold complement and on all rows, in parallel.
///
/// Jobs are listed unit by unit (folds first, then the full fit) and rayon
/// collects them in that order, so the output does not depend on scheduling.
/// Fold models only live long enough to predict their held-out rows.
#[instrument(skip_all, fields(stage = %stage, n_units = specs.len(), n_rows = features.len(), n_folds = plan.n_folds()))]
pub(crate) fn cross_val_predict(
    specs: &[ForestUnitSpec],
    features: &[Vec<f64>],
    labels: &[usize],
    plan: &FoldPlan,
    n_classes: usize,
    stage: &str,
    cancel: &CancellationToken,
) -> Result<Vec<CrossValOutput>, GcForestError> {
    let n_folds = plan.n_folds();
    let jobs: Vec<Job> = (0..specs.len())
        .flat_map(|unit| {
            (0..n_folds)
                .map(move |fold| Job::Fold { unit, fold })
                .chain(std::iter::once(Job::Full { unit }))
        })
        .collect();

    let all_rows: Vec<usize> = (0..features.len()).collect();
    let outputs: Vec<JobOutput> = jobs
        .into_par_iter()
        .map(|job| {
            cancel.check()?;
            match job {
                Job::Fold { unit, fold } => {
                    let spec = specs[unit].reseeded(derive_seed(specs[unit].seed(), &[fold as u64 + 1]));
                    let fitted = spec.fit(features, labels, &plan.train_positions(fold), n_classes)?;
                    let positions = plan.test_positions(fold);
                    let proba = fitted.predict_proba_rows(features, &positions)?;
                    debug!(stage, unit, fold, n_test = positions.len(), "fold model scored");
                    Ok(JobOutput::Fold {
                        unit,
                        positions,
                        proba,
                    })
                }
                Job::Full { unit } => {
                    let spec = specs[unit].reseeded(derive_seed(specs[unit].seed(), &[0]));
                    let fitted = spec.fit(features, labels, &all_rows, n_classes)?;
                    Ok(JobOutput::Full { unit, fitted })
                }
            }
        })
        .collect::<Result<_, GcForestError>>()?;

    let mut oof: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); features.len()]; specs.len()];
    let mut full: Vec<Option<ForestUnit>> = vec![None; specs.len()];
    for output in outputs {
        match output {
            JobOutput::Fold {
                unit,
                positions,
                proba,
            } => {
                for (pos, p) in positions.into_iter().zip(proba) {
                    oof[unit][pos] = p;
                }
            }
            JobOutput::Full { unit, fitted } => full[unit] = Some(fitted),
        }
    }

    Ok(full
        .into_iter()
        .zip(oof)
        .filter_map(|(unit, oof)| unit.map(|unit| CrossValOutput { unit, oof }))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::ForestKind;

    fn data() -> (Vec<Vec<f64>>, Vec<usize>) {
        let features: Vec<Vec<f64>> = (0..24)
            .map(|i| vec![(i % 2) as f64 * 4.0 + (i % 7) as f64 * 0.1, (i % 3) as f64])
            .collect();
        let labels: Vec<usize> = (0..24).map(|i| i % 2).collect();
        (features, labels)
    }

    #[test]
    fn every_row_gets_an_out_of_fold_vector() {
        let (features, labels) = data();
        let plan = FoldPlan::stratified(&labels, 3, 1, "test").unwrap();
        let specs = vec![
            ForestUnitSpec::new(ForestKind::RandomForest, 5),
            ForestUnitSpec::new(ForestKind::CompletelyRandom, 5),
        ];
        let out = cross_val_predict(
            &specs,
            &features,
            &labels,
            &plan,
            2,
            "test",
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        for unit_out in &out {
            assert_eq!(unit_out.oof.len(), 24);
            assert!(unit_out.oof.iter().all(|p| p.len() == 2));
        }
        assert_eq!(out[1].unit.kind(), ForestKind::CompletelyRandom);
    }

    #[test]
    fn cancelled_token_stops_jobs() {
        let (features, labels) = data();
        let plan = FoldPlan::stratified(&labels, 2, 1, "test").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = cross_val_predict(
            &[ForestUnitSpec::new(ForestKind::RandomForest, 3)],
            &features,
            &labels,
            &plan,
            2,
            "test",
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, GcForestError::Cancelled { .. }));
    }
}
