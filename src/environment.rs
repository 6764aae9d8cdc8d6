//! Environment interface.
//!
//! An environment is one agent's causal world: it samples contexts and
//! outcomes, describes its variables, and exposes the causal structure the
//! trust ledger needs (local conditional queries and causal paths).

use std::collections::BTreeSet;

use rand::RngCore;

use crate::assignment::{Assignment, Domains};
use crate::error::BanditResult;
use crate::query::ConditionalQuery;

/// A causal environment an agent acts in.
///
/// Implementations must be deterministic given the random source, so that a
/// seeded run is reproducible.
pub trait Environment: Send + Sync {
    /// Samples the context (feature assignment) observed before acting.
    fn sample_context(&self, rng: &mut dyn RngCore) -> BanditResult<Assignment>;

    /// Samples every remaining variable given `assignment` (context plus
    /// action) and returns the completed observation.
    fn sample_outcome(&self, rng: &mut dyn RngCore, assignment: &Assignment) -> BanditResult<Assignment>;

    /// Name of the action variable.
    fn action_variable(&self) -> &str;

    /// Domain of the action variable (a single-variable domain set).
    fn action_domain(&self) -> &Domains;

    /// Name of the reward variable.
    fn reward_variable(&self) -> &str;

    /// Domain of the reward variable.
    fn reward_domain(&self) -> &[i64];

    /// Domains of the context variables.
    fn feature_domains(&self) -> &Domains;

    /// Domains of every variable.
    fn domains(&self) -> &Domains;

    /// Every variable except the action variable.
    fn non_action_variables(&self) -> Vec<String> {
        self.domains()
            .variables()
            .filter(|v| *v != self.action_variable())
            .map(str::to_string)
            .collect()
    }

    /// Variables, excluding `from`, that lie on a directed path from `from`
    /// to `to` (`to` included when reachable).
    fn causal_path_between(&self, from: &str, to: &str) -> BTreeSet<String>;

    /// `P(variable | parents(variable))` under this environment's structure.
    fn local_conditional_query(&self, variable: &str) -> Option<ConditionalQuery>;

    /// Best achievable expected reward for `context`.
    fn optimal_reward(&self, context: &Assignment) -> BanditResult<f64>;

    /// Actions attaining `optimal_reward` for `context`.
    fn optimal_actions(&self, context: &Assignment) -> BanditResult<Vec<Assignment>>;
}
