//! Observations and the append-only observation log.
//!
//! An `Observation` is one completed trial: the context, the chosen action
//! and every sampled outcome variable including the reward. Observations are
//! shared (`Arc`) between an agent's own log and every pooled view built from
//! it, so pooling never copies trial data.

use std::ops::Deref;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::assignment::{Assignment, Domains};

/// One completed, immutable trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation(Arc<Assignment>);

impl Observation {
    /// Freezes an assignment into an observation.
    #[must_use]
    pub fn new(values: Assignment) -> Self {
        Self(Arc::new(values))
    }

    /// The observed values.
    #[must_use]
    pub fn values(&self) -> &Assignment {
        &self.0
    }
}

impl Deref for Observation {
    type Target = Assignment;

    fn deref(&self) -> &Assignment {
        &self.0
    }
}

impl From<Assignment> for Observation {
    fn from(values: Assignment) -> Self {
        Self::new(values)
    }
}

/// Ordered, append-only sequence of observations.
///
/// Insertion order carries no meaning for queries: every query is an
/// order-independent filter or aggregate.
///
/// # Examples
///
/// ```
/// use transbandit::{Assignment, ObservationLog};
///
/// let log: ObservationLog = vec![
///     Assignment::from([("X", 0), ("Y", 1)]),
///     Assignment::from([("X", 0), ("Y", 0)]),
///     Assignment::from([("X", 1), ("Y", 1)]),
/// ]
/// .into_iter()
/// .collect();
///
/// let x0 = log.query(&Assignment::from([("X", 0)]));
/// assert_eq!(x0.len(), 2);
/// assert_eq!(x0.mean("Y"), Some(0.5));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationLog {
    entries: Vec<Observation>,
}

impl ObservationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one observation.
    pub fn push(&mut self, observation: impl Into<Observation>) {
        self.entries.push(observation.into());
    }

    /// Appends every observation of `other` (pooling).
    pub fn extend_from(&mut self, other: &ObservationLog) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log holds no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates observations in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.entries.iter()
    }

    /// The most recently appended observation.
    #[must_use]
    pub fn most_recent(&self) -> Option<&Observation> {
        self.entries.last()
    }

    /// Subsequence of observations that agree with `filter` on every key of
    /// `filter`.
    #[must_use]
    pub fn query(&self, filter: &Assignment) -> ObservationLog {
        self.entries
            .iter()
            .filter(|obs| obs.matches(filter))
            .cloned()
            .collect()
    }

    /// Number of observations matching `filter`, without materializing them.
    #[must_use]
    pub fn count(&self, filter: &Assignment) -> usize {
        self.entries.iter().filter(|obs| obs.matches(filter)).count()
    }

    /// Arithmetic mean of `variable` over the log.
    ///
    /// Returns `None` when no entry carries `variable` (in particular, when
    /// the log is empty). `None` means "no evidence"; `Some(0.0)` is evidence
    /// of zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self, variable: &str) -> Option<f64> {
        let mut total = 0.0f64;
        let mut n = 0usize;
        for obs in &self.entries {
            if let Some(v) = obs.get(variable) {
                total += v as f64;
                n += 1;
            }
        }
        if n == 0 {
            return None;
        }
        Some(total / n as f64)
    }

    /// Empirically best action for `context`.
    ///
    /// Every assignment in the product of `action_domain` is scored by the
    /// mean of `reward_variable` over the observations matching the action and
    /// the context. Actions without supporting observations are skipped. Ties
    /// for the best mean are broken uniformly at random with `rng`.
    ///
    /// Returns `None` when no action has support; the caller is expected to
    /// fall back to a uniformly random action.
    pub fn optimal_choice(
        &self,
        rng: &mut dyn RngCore,
        action_domain: &Domains,
        reward_variable: &str,
        context: &Assignment,
    ) -> Option<Assignment> {
        let mut best: Vec<Assignment> = Vec::new();
        let mut best_reward = f64::NEG_INFINITY;

        for action in action_domain.assignments() {
            let filter = action.merged(context);
            let Some(expected) = self.query(&filter).mean(reward_variable) else {
                continue;
            };
            if expected > best_reward {
                best_reward = expected;
                best.clear();
                best.push(action);
            } else if expected == best_reward {
                best.push(action);
            }
        }

        best.choose(&mut *rng).cloned()
    }
}

impl FromIterator<Observation> for ObservationLog {
    fn from_iter<I: IntoIterator<Item = Observation>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<Assignment> for ObservationLog {
    fn from_iter<I: IntoIterator<Item = Assignment>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Observation::new).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ObservationLog {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
