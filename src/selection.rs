//! Action-selection rules (exploration vs. exploitation).
//!
//! A rule never picks an action itself. It only decides, per trial, whether
//! the agent should explore (uniformly random action), exploit (its
//! variant's optimal action), or Thompson-sample from its visible data. The
//! agent variant decides which data backs the latter two.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::assignment::{Assignment, Domains};
use crate::error::ValidationError;

/// Which exploration rule an agent uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Explore with fixed probability.
    EpsilonGreedy,
    /// Explore for a fixed number of trials per context, then exploit.
    EpsilonFirst,
    /// Explore with a probability that decays after each decision.
    EpsilonDecreasing,
    /// Sample from per-action Beta posteriors.
    Thompson,
}

impl RuleKind {
    /// Short stable identifier suitable for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EpsilonGreedy => "EG",
            Self::EpsilonFirst => "EF",
            Self::EpsilonDecreasing => "ED",
            Self::Thompson => "TS",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eg" | "epsilon-greedy" | "epsilon_greedy" => Ok(Self::EpsilonGreedy),
            "ef" | "epsilon-first" | "epsilon_first" => Ok(Self::EpsilonFirst),
            "ed" | "epsilon-decreasing" | "epsilon_decreasing" => Ok(Self::EpsilonDecreasing),
            "ts" | "thompson" | "thompson-sampling" | "thompson_sampling" => Ok(Self::Thompson),
            _ => Err(ValidationError::UnknownSelectionRule { name: s.to_string() }),
        }
    }
}

/// A fully parameterized selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SelectionRule {
    /// Explore with probability `epsilon`.
    EpsilonGreedy {
        /// Exploration probability in `[0, 1]`.
        epsilon: f64,
    },

    /// Explore for the first `rand_trials` decisions of each context.
    EpsilonFirst {
        /// Forced random decisions per context.
        rand_trials: u64,
    },

    /// Explore with probability `ε`, starting at `initial_epsilon` and
    /// multiplied by `cooling_rate` after every decision.
    EpsilonDecreasing {
        /// Starting exploration probability in `[0, 1]`.
        initial_epsilon: f64,
        /// Multiplicative decay per decision in `[0, 1]`.
        cooling_rate: f64,
    },

    /// Thompson sampling (stateless).
    Thompson,
}

impl SelectionRule {
    /// The rule's kind.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        match self {
            Self::EpsilonGreedy { .. } => RuleKind::EpsilonGreedy,
            Self::EpsilonFirst { .. } => RuleKind::EpsilonFirst,
            Self::EpsilonDecreasing { .. } => RuleKind::EpsilonDecreasing,
            Self::Thompson => RuleKind::Thompson,
        }
    }

    /// Checks parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ParameterOutOfRange` for a probability or
    /// cooling rate outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let unit = |name: &str, v: f64| {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ValidationError::out_of_range(name, v))
            }
        };
        match *self {
            Self::EpsilonGreedy { epsilon } => unit("epsilon", epsilon),
            Self::EpsilonDecreasing {
                initial_epsilon,
                cooling_rate,
            } => {
                unit("initial_epsilon", initial_epsilon)?;
                unit("cooling_rate", cooling_rate)
            }
            Self::EpsilonFirst { .. } | Self::Thompson => Ok(()),
        }
    }
}

/// Outcome of one exploration decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Take a uniformly random action.
    Explore,
    /// Take the variant's empirically optimal action.
    Exploit,
    /// Thompson-sample from the variant's visible data.
    Sample,
}

/// Exploration state of one agent.
///
/// When the environment has context variables, the countdown (EF) and the
/// decaying probability (ED) are tracked per context, keyed by the context
/// restricted to the feature variables. Otherwise one global value is kept.
/// Per-context entries are created lazily on first use.
#[derive(Debug, Clone)]
pub struct ExplorationStrategy {
    rule: SelectionRule,
    features: Vec<String>,
    remaining: HashMap<Assignment, u64>,
    epsilons: HashMap<Assignment, f64>,
}

impl ExplorationStrategy {
    /// Creates a strategy for an environment with `feature_domains`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ParameterOutOfRange` if a probability
    /// parameter is outside `[0, 1]`.
    pub fn new(rule: SelectionRule, feature_domains: &Domains) -> Result<Self, ValidationError> {
        rule.validate()?;
        Ok(Self {
            rule,
            features: feature_domains.variables().map(str::to_string).collect(),
            remaining: HashMap::new(),
            epsilons: HashMap::new(),
        })
    }

    /// The configured rule.
    #[must_use]
    pub const fn rule(&self) -> &SelectionRule {
        &self.rule
    }

    /// Returns true if exploration state is keyed by context.
    #[must_use]
    pub fn is_per_context(&self) -> bool {
        !self.features.is_empty()
    }

    fn key(&self, context: &Assignment) -> Assignment {
        context.restrict(self.features.iter().map(String::as_str))
    }

    /// Forced random decisions left for `context` (EF only).
    #[must_use]
    pub fn remaining_random_trials(&self, context: &Assignment) -> Option<u64> {
        match self.rule {
            SelectionRule::EpsilonFirst { rand_trials } => {
                Some(self.remaining.get(&self.key(context)).copied().unwrap_or(rand_trials))
            }
            _ => None,
        }
    }

    /// Current exploration probability for `context`.
    #[must_use]
    pub fn current_epsilon(&self, context: &Assignment) -> Option<f64> {
        match self.rule {
            SelectionRule::EpsilonGreedy { epsilon } => Some(epsilon),
            SelectionRule::EpsilonDecreasing { initial_epsilon, .. } => Some(
                self.epsilons
                    .get(&self.key(context))
                    .copied()
                    .unwrap_or(initial_epsilon),
            ),
            _ => None,
        }
    }

    /// Decides how to act for `context`, updating exploration state.
    ///
    /// EG with `epsilon == 0` exploits without consuming a random draw. ED
    /// decays the probability that governed this decision exactly once,
    /// whichever branch is taken.
    pub fn decide(&mut self, rng: &mut dyn RngCore, context: &Assignment) -> Decision {
        match self.rule {
            SelectionRule::EpsilonGreedy { epsilon } => {
                if epsilon > 0.0 && rng.gen::<f64>() < epsilon {
                    Decision::Explore
                } else {
                    Decision::Exploit
                }
            }
            SelectionRule::EpsilonFirst { rand_trials } => {
                let key = self.key(context);
                let left = self.remaining.entry(key).or_insert(rand_trials);
                if *left > 0 {
                    *left -= 1;
                    Decision::Explore
                } else {
                    Decision::Exploit
                }
            }
            SelectionRule::EpsilonDecreasing {
                initial_epsilon,
                cooling_rate,
            } => {
                let key = self.key(context);
                let eps = self.epsilons.entry(key).or_insert(initial_epsilon);
                let explore = *eps > 0.0 && rng.gen::<f64>() < *eps;
                *eps *= cooling_rate;
                if explore {
                    Decision::Explore
                } else {
                    Decision::Exploit
                }
            }
            SelectionRule::Thompson => Decision::Sample,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    /// Random source that counts how many words were drawn.
    struct CountingRng {
        inner: ChaCha8Rng,
        draws: usize,
    }

    impl RngCore for CountingRng {
        fn next_u32(&mut self) -> u32 {
            self.draws += 1;
            self.inner.next_u32()
        }

        fn next_u64(&mut self) -> u64 {
            self.draws += 1;
            self.inner.next_u64()
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            self.draws += 1;
            self.inner.fill_bytes(dest);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.draws += 1;
            self.inner.try_fill_bytes(dest)
        }
    }

    fn counting(seed: u64) -> CountingRng {
        CountingRng {
            inner: ChaCha8Rng::seed_from_u64(seed),
            draws: 0,
        }
    }

    #[test]
    fn parses_rule_names() {
        assert_eq!("EG".parse::<RuleKind>().unwrap(), RuleKind::EpsilonGreedy);
        assert_eq!("epsilon-first".parse::<RuleKind>().unwrap(), RuleKind::EpsilonFirst);
        assert_eq!(" ed ".parse::<RuleKind>().unwrap(), RuleKind::EpsilonDecreasing);
        assert_eq!("Thompson".parse::<RuleKind>().unwrap(), RuleKind::Thompson);
        assert!(matches!(
            "softmax".parse::<RuleKind>(),
            Err(ValidationError::UnknownSelectionRule { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let doms = Domains::new();
        assert!(ExplorationStrategy::new(SelectionRule::EpsilonGreedy { epsilon: 1.5 }, &doms).is_err());
        assert!(ExplorationStrategy::new(
            SelectionRule::EpsilonDecreasing {
                initial_epsilon: 1.0,
                cooling_rate: -0.1,
            },
            &doms,
        )
        .is_err());
    }

    #[test]
    fn greedy_with_zero_epsilon_draws_nothing() {
        let mut rng = counting(1);
        let mut s = ExplorationStrategy::new(SelectionRule::EpsilonGreedy { epsilon: 0.0 }, &Domains::new()).unwrap();
        for _ in 0..50 {
            assert_eq!(s.decide(&mut rng, &Assignment::new()), Decision::Exploit);
        }
        assert_eq!(rng.draws, 0);
    }

    #[test]
    fn greedy_with_full_epsilon_always_explores() {
        let mut rng = counting(1);
        let mut s = ExplorationStrategy::new(SelectionRule::EpsilonGreedy { epsilon: 1.0 }, &Domains::new()).unwrap();
        for _ in 0..50 {
            assert_eq!(s.decide(&mut rng, &Assignment::new()), Decision::Explore);
        }
        assert!(rng.draws >= 50);
    }

    #[test]
    fn epsilon_first_counts_down_per_context() {
        let doms = Domains::new().with("Z", [0, 1]);
        let mut rng = counting(1);
        let mut s = ExplorationStrategy::new(SelectionRule::EpsilonFirst { rand_trials: 3 }, &doms).unwrap();
        let z0 = Assignment::from([("Z", 0)]);
        let z1 = Assignment::from([("Z", 1)]);

        for _ in 0..3 {
            assert_eq!(s.decide(&mut rng, &z0), Decision::Explore);
        }
        assert_eq!(s.decide(&mut rng, &z0), Decision::Exploit);
        assert_eq!(s.remaining_random_trials(&z0), Some(0));
        assert_eq!(s.remaining_random_trials(&z1), Some(3));
        assert_eq!(s.decide(&mut rng, &z1), Decision::Explore);
        assert_eq!(rng.draws, 0);
    }

    #[test]
    fn epsilon_first_global_without_features() {
        let mut rng = counting(1);
        let mut s = ExplorationStrategy::new(SelectionRule::EpsilonFirst { rand_trials: 2 }, &Domains::new()).unwrap();
        assert!(!s.is_per_context());
        let ctx = Assignment::from([("Z", 4)]);
        assert_eq!(s.decide(&mut rng, &ctx), Decision::Explore);
        assert_eq!(s.decide(&mut rng, &Assignment::new()), Decision::Explore);
        assert_eq!(s.decide(&mut rng, &ctx), Decision::Exploit);
    }

    #[test]
    fn epsilon_decreasing_decays_once_per_decision() {
        let doms = Domains::new().with("Z", [0, 1]);
        let mut rng = counting(9);
        let mut s = ExplorationStrategy::new(
            SelectionRule::EpsilonDecreasing {
                initial_epsilon: 1.0,
                cooling_rate: 0.5,
            },
            &doms,
        )
        .unwrap();
        let z0 = Assignment::from([("Z", 0)]);
        let z1 = Assignment::from([("Z", 1)]);

        assert_eq!(s.decide(&mut rng, &z0), Decision::Explore);
        assert_eq!(s.current_epsilon(&z0), Some(0.5));
        let _ = s.decide(&mut rng, &z0);
        assert_eq!(s.current_epsilon(&z0), Some(0.25));
        assert_eq!(s.current_epsilon(&z1), Some(1.0));
    }

    #[test]
    fn thompson_always_samples() {
        let mut rng = counting(1);
        let mut s = ExplorationStrategy::new(SelectionRule::Thompson, &Domains::new()).unwrap();
        assert_eq!(s.decide(&mut rng, &Assignment::new()), Decision::Sample);
        assert_eq!(rng.draws, 0);
    }
}
