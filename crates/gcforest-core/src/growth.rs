//! Early stopping and best-prefix selection for cascade growth.

/// Why layer growth ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GrowthOutcome {
    /// A layer reached perfect accuracy; no strict improvement is possible.
    Converged,
    /// Too many layers followed the best one without improving on it.
    StoppedEarly,
    /// The configured maximum number of layers was fitted.
    MaxIterationReached,
}

/// What the growth loop should do after a layer is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthDecision {
    /// Fit another layer.
    Continue,
    /// Stop growing.
    Stop(GrowthOutcome),
}

/// Tracks the best layer seen so far.
///
/// The best layer is the earliest one with the highest score. Growth stops
/// early once more than `rounds` layers have been fitted after the best one,
/// so a sequence `[0.70, 0.75, 0.74, 0.73, 0.73]` with `rounds = 2` stops
/// after layer 5 and keeps 2 layers.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    rounds: usize,
    max_iteration: usize,
    best_score: f64,
    best_layer: usize,
    n_observed: usize,
}

impl EarlyStopping {
    /// Create a tracker with `rounds` patience and a hard cap of `max_iteration` layers.
    #[must_use]
    pub fn new(rounds: usize, max_iteration: usize) -> Self {
        Self {
            rounds,
            max_iteration,
            best_score: f64::NEG_INFINITY,
            best_layer: 0,
            n_observed: 0,
        }
    }

    /// Record the score of the next layer and decide whether to continue.
    pub fn observe(&mut self, score: f64) -> GrowthDecision {
        self.n_observed += 1;
        if score > self.best_score {
            self.best_score = score;
            self.best_layer = self.n_observed;
        }

        if score >= 1.0 {
            GrowthDecision::Stop(GrowthOutcome::Converged)
        } else if self.n_observed - self.best_layer > self.rounds {
            GrowthDecision::Stop(GrowthOutcome::StoppedEarly)
        } else if self.n_observed >= self.max_iteration {
            GrowthDecision::Stop(GrowthOutcome::MaxIterationReached)
        } else {
            GrowthDecision::Continue
        }
    }

    /// One-based index of the best layer (0 before any observation).
    #[must_use]
    pub fn best_layer(&self) -> usize {
        self.best_layer
    }

    /// Score of the best layer.
    #[must_use]
    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Number of layers observed.
    #[must_use]
    pub fn n_observed(&self) -> usize {
        self.n_observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(scores: &[f64], rounds: usize, max_iteration: usize) -> (usize, GrowthOutcome, usize) {
        let mut stopper = EarlyStopping::new(rounds, max_iteration);
        for &score in scores {
            if let GrowthDecision::Stop(outcome) = stopper.observe(score) {
                return (stopper.n_observed(), outcome, stopper.best_layer());
            }
        }
        panic!("growth never stopped");
    }

    #[test]
    fn stops_after_fifth_layer_and_keeps_two() {
        let (fitted, outcome, best) = run(&[0.70, 0.75, 0.74, 0.73, 0.73, 0.9], 2, 10);
        assert_eq!(fitted, 5);
        assert_eq!(outcome, GrowthOutcome::StoppedEarly);
        assert_eq!(best, 2);
    }

    #[test]
    fn ties_keep_the_earliest_layer() {
        let (fitted, outcome, best) = run(&[0.8, 0.8, 0.8, 0.8], 2, 10);
        assert_eq!((fitted, outcome, best), (4, GrowthOutcome::StoppedEarly, 1));
    }

    #[test]
    fn max_iteration_still_keeps_best_prefix() {
        let (fitted, outcome, best) = run(&[0.5, 0.7, 0.6], 5, 3);
        assert_eq!((fitted, outcome, best), (3, GrowthOutcome::MaxIterationReached, 2));
    }

    #[test]
    fn perfect_score_converges() {
        let (fitted, outcome, best) = run(&[0.9, 1.0, 0.5], 2, 10);
        assert_eq!((fitted, outcome, best), (2, GrowthOutcome::Converged, 2));
    }

    #[test]
    fn zero_rounds_stops_on_first_non_improvement() {
        let (fitted, outcome, best) = run(&[0.6, 0.7, 0.7], 0, 10);
        assert_eq!((fitted, outcome, best), (3, GrowthOutcome::StoppedEarly, 2));
    }

    #[test]
    fn single_layer_cap() {
        let (fitted, outcome, best) = run(&[0.4], 2, 1);
        assert_eq!((fitted, outcome, best), (1, GrowthOutcome::MaxIterationReached, 1));
    }
}
