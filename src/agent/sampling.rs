//! Thompson sampling over Beta posteriors.

use rand::seq::SliceRandom;
use rand::RngCore;
use rand_distr::{Beta, Distribution};

use crate::assignment::Assignment;
use crate::environment::Environment;
use crate::error::{BanditResult, ExecutionError};
use crate::observation::ObservationLog;

/// Running arg-max with uniform random tie-breaking.
///
/// A strictly larger score resets the tie set to the new leader; a score
/// exactly equal to the current best joins it.
#[derive(Debug, Clone)]
pub(crate) struct BestSet {
    best: f64,
    leaders: Vec<Assignment>,
}

impl BestSet {
    pub(crate) fn new() -> Self {
        Self {
            best: f64::NEG_INFINITY,
            leaders: Vec::new(),
        }
    }

    pub(crate) fn offer(&mut self, action: Assignment, score: f64) {
        if score > self.best {
            self.best = score;
            self.leaders.clear();
            self.leaders.push(action);
        } else if score == self.best {
            self.leaders.push(action);
        }
    }

    pub(crate) fn pick(&self, rng: &mut dyn RngCore) -> Option<Assignment> {
        self.leaders.choose(&mut *rng).cloned()
    }
}

/// Draws one sample from `Beta(alpha + 1, beta + 1)`.
pub(crate) fn beta_sample(rng: &mut dyn RngCore, alpha: f64, beta: f64) -> BanditResult<f64> {
    let dist = Beta::new(alpha + 1.0, beta + 1.0).map_err(|e| ExecutionError::Sampling {
        reason: format!("Beta({}, {}): {e}", alpha + 1.0, beta + 1.0),
    })?;
    Ok(dist.sample(&mut *rng))
}

/// Thompson-samples an action from raw success and failure tallies.
///
/// For each action, successes (`reward = 1`) and failures (`reward = 0`) are
/// counted among the observations of `data` matching the action and
/// `context`, and one `Beta(successes + 1, failures + 1)` sample is drawn.
/// The largest sample wins; exact ties are broken uniformly at random.
///
/// # Errors
///
/// Returns `ExecutionError::Sampling` if a Beta draw fails.
#[allow(clippy::cast_precision_loss)]
pub fn thompson_from_log(
    data: &ObservationLog,
    environment: &dyn Environment,
    rng: &mut dyn RngCore,
    context: &Assignment,
) -> BanditResult<Option<Assignment>> {
    let reward = environment.reward_variable();
    let in_context = data.query(context);
    let mut best = BestSet::new();

    for action in environment.action_domain().assignments() {
        let successes = in_context.count(&action.clone().with(reward, 1));
        let failures = in_context.count(&action.clone().with(reward, 0));
        let sample = beta_sample(rng, successes as f64, failures as f64)?;
        best.offer(action, sample);
    }

    Ok(best.pick(rng))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::scm::presets;

    #[test]
    fn best_set_resets_on_strict_improvement() {
        let mut best = BestSet::new();
        best.offer(Assignment::from([("X", 0)]), 0.5);
        best.offer(Assignment::from([("X", 1)]), 0.5);
        best.offer(Assignment::from([("X", 2)]), 0.9);
        assert_eq!(best.leaders, vec![Assignment::from([("X", 2)])]);
        best.offer(Assignment::from([("X", 3)]), 0.9);
        assert_eq!(best.leaders.len(), 2);
    }

    #[test]
    fn thompson_prefers_successful_action() {
        let env = presets::environment(presets::chain().unwrap()).unwrap();
        let mut data = ObservationLog::new();
        for _ in 0..100 {
            data.push(Assignment::from([("X", 0), ("Y", 1)]));
            data.push(Assignment::from([("X", 1), ("Y", 0)]));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut wins = 0;
        for _ in 0..200 {
            let pick = thompson_from_log(&data, &env, &mut rng, &Assignment::new())
                .unwrap()
                .unwrap();
            if pick.get("X") == Some(0) {
                wins += 1;
            }
        }
        assert!(wins > 190);
    }

    #[test]
    fn thompson_without_data_still_picks() {
        let env = presets::environment(presets::chain().unwrap()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let pick = thompson_from_log(&ObservationLog::new(), &env, &mut rng, &Assignment::new()).unwrap();
        assert!(pick.is_some());
    }
}
