//! Causal adjustment along a mediator chain.
//!
//! For the chain `action -> mediator -> intermediate -> reward`, the
//! probability of success under an action is
//!
//! ```text
//! P(y=1 | do(a)) = Σ_s Σ_r P(y=1 | r) · P(r | s) · P(s | a)
//! ```
//!
//! Each factor is answered by the oracle over the data that is transportable
//! for that factor's variable: the pooled logs of every member whose
//! divergence on that variable is within the agent's tolerance. A factor the
//! oracle cannot answer removes its whole term from the sum.

use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::agent::policy::AgentView;
use crate::agent::sampling::{beta_sample, BestSet};
use crate::assignment::{Assignment, Domains};
use crate::error::{BanditResult, ExecutionError, ValidationError};
use crate::id::AgentId;
use crate::observation::ObservationLog;
use crate::query::Query;

/// Mediator and intermediate variable names of the adjustment chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalChain {
    /// Variable directly caused by the action.
    pub mediator: String,
    /// Variable between the mediator and the reward.
    pub intermediate: String,
}

impl Default for CausalChain {
    fn default() -> Self {
        Self::new("S", "R")
    }
}

/// Success and failure mass of one action.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChainEstimate {
    /// `Σ P(y=1 | r) P(r | s) P(s | a)` over answerable terms.
    pub success: f64,
    /// `Σ P(y=0 | r) P(r | s) P(s | a)` over answerable terms.
    pub failure: f64,
    /// Terms skipped because a factor was unknown.
    pub unknown_terms: usize,
}

/// Transportable data for each variable of the chain.
struct Transportable {
    by_variable: BTreeMap<String, ObservationLog>,
}

impl Transportable {
    fn collect(view: AgentView<'_>, variables: [&str; 3]) -> BanditResult<Self> {
        let mut by_variable = BTreeMap::new();
        for v in variables {
            by_variable.insert(v.to_string(), view.ledger.transportable(view.id, v)?);
        }
        Ok(Self { by_variable })
    }

    fn solve(&self, view: AgentView<'_>, query: &Query) -> Option<f64> {
        let data = self.by_variable.get(query.variable()?)?;
        let answer = view.oracle.solve(query, data);
        if answer.is_none() {
            trace!(agent = %view.id, oracle = view.oracle.name(), query = %query, "oracle answered unknown");
        }
        answer
    }
}

impl CausalChain {
    /// Chain through `mediator` then `intermediate`.
    #[must_use]
    pub fn new(mediator: impl Into<String>, intermediate: impl Into<String>) -> Self {
        Self {
            mediator: mediator.into(),
            intermediate: intermediate.into(),
        }
    }

    /// Checks that both chain variables exist in `domains`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` naming the first missing
    /// variable.
    pub fn validate(&self, domains: &Domains) -> Result<(), ValidationError> {
        for variable in [&self.mediator, &self.intermediate] {
            if domains.get(variable).is_none() {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("causal chain variable '{variable}' is not in the environment"),
                });
            }
        }
        Ok(())
    }

    fn domain<'a>(&self, view: AgentView<'a>, variable: &str) -> BanditResult<&'a [i64]> {
        Ok(view
            .environment
            .domains()
            .get(variable)
            .ok_or_else(|| ExecutionError::UnknownVariable {
                variable: variable.to_string(),
            })?)
    }

    fn estimate_with(
        &self,
        view: AgentView<'_>,
        data: &Transportable,
        action: &Assignment,
    ) -> BanditResult<ChainEstimate> {
        let reward = view.environment.reward_variable();
        let mut out = ChainEstimate::default();

        for &s in self.domain(view, &self.mediator)? {
            let s_event = Assignment::new().with(self.mediator.clone(), s);
            for &r in self.domain(view, &self.intermediate)? {
                let r_event = Assignment::new().with(self.intermediate.clone(), r);

                let success = data.solve(view, &Query::new(Assignment::new().with(reward, 1), r_event.clone()));
                let failure = data.solve(view, &Query::new(Assignment::new().with(reward, 0), r_event.clone()));
                let r_prob = data.solve(view, &Query::new(r_event, s_event.clone()));
                let s_prob = data.solve(view, &Query::new(s_event.clone(), action.clone()));

                match (success, failure, r_prob, s_prob) {
                    (Some(y1), Some(y0), Some(pr), Some(ps)) => {
                        out.success += y1 * pr * ps;
                        out.failure += y0 * pr * ps;
                    }
                    _ => out.unknown_terms += 1,
                }
            }
        }
        Ok(out)
    }

    fn transportable(&self, view: AgentView<'_>) -> BanditResult<Transportable> {
        Transportable::collect(
            view,
            [
                self.mediator.as_str(),
                self.intermediate.as_str(),
                view.environment.reward_variable(),
            ],
        )
    }

    /// Adjusted success and failure mass of `action`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::UnknownVariable` if a chain variable has no
    /// domain, and propagates ledger errors.
    pub fn estimate(&self, view: AgentView<'_>, action: &Assignment) -> BanditResult<ChainEstimate> {
        let data = self.transportable(view)?;
        self.estimate_with(view, &data, action)
    }

    /// Action with the largest adjusted success probability; ties are broken
    /// uniformly at random.
    ///
    /// # Errors
    ///
    /// See [`CausalChain::estimate`].
    pub fn optimal_action(
        &self,
        view: AgentView<'_>,
        rng: &mut dyn RngCore,
        _context: &Assignment,
    ) -> BanditResult<Option<Assignment>> {
        let data = self.transportable(view)?;
        let mut best = BestSet::new();
        for action in view.environment.action_domain().assignments() {
            let estimate = self.estimate_with(view, &data, &action)?;
            best.offer(action, estimate.success);
        }
        Ok(best.pick(rng))
    }

    /// Thompson sampling with adjusted pseudo-counts.
    ///
    /// For each action the adjusted success and failure mass are scaled by
    /// the number of observations matching the action and `context` in each
    /// member's own log, summed over members whose causal path from action to
    /// reward is not entirely divergent. The agent's own log always counts.
    ///
    /// # Errors
    ///
    /// See [`CausalChain::estimate`]; also `ExecutionError::Sampling` if a
    /// Beta draw fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn thompson_sample(
        &self,
        view: AgentView<'_>,
        rng: &mut dyn RngCore,
        context: &Assignment,
    ) -> BanditResult<Option<Assignment>> {
        let contributors = contributors(view)?;
        let data = self.transportable(view)?;
        let mut best = BestSet::new();
        for action in view.environment.action_domain().assignments() {
            let estimate = self.estimate_with(view, &data, &action)?;
            let n = matching(view, &contributors, &action.merged(context))? as f64;
            let sample = beta_sample(rng, estimate.success * n, estimate.failure * n)?;
            best.offer(action, sample);
        }
        Ok(best.pick(rng))
    }

}

/// Members whose causal path from action to reward is not entirely divergent
/// from the agent's point of view. An empty path never counts as corrupted,
/// so the agent itself is always included.
fn contributors(view: AgentView<'_>) -> BanditResult<Vec<AgentId>> {
    let env = view.environment;
    let path = env.causal_path_between(env.action_variable(), env.reward_variable());

    let mut out = Vec::new();
    for member in view.ledger.members()? {
        let divergent = view.ledger.divergent_variables(view.id, &member)?;
        if path.is_empty() || !path.is_subset(&divergent) {
            out.push(member);
        }
    }
    Ok(out)
}

fn matching(view: AgentView<'_>, contributors: &[AgentId], filter: &Assignment) -> BanditResult<usize> {
    let mut total = 0;
    for member in contributors {
        total += view.ledger.count(member, filter)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::environment::Environment;
    use crate::id::AgentId;
    use crate::ledger::TrustLedger;
    use crate::query::{CausalOracle, EmpiricalOracle};
    use crate::scm::presets;

    struct Fixture {
        env: Arc<dyn Environment>,
        ledger: TrustLedger,
        id: AgentId,
        oracle: EmpiricalOracle,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_peers(&[])
        }

        fn with_peers(peers: &[&str]) -> Self {
            let env: Arc<dyn Environment> = Arc::new(presets::environment(presets::chain().unwrap()).unwrap());
            let ledger = TrustLedger::for_environment(env.as_ref()).unwrap();
            let id = AgentId::new("adjuster");
            ledger.register_agent(id.clone(), Arc::clone(&env), 0.2).unwrap();
            for peer in peers {
                ledger.register_agent(AgentId::new(*peer), Arc::clone(&env), 0.2).unwrap();
            }
            Self {
                env,
                ledger,
                id,
                oracle: EmpiricalOracle::default(),
            }
        }

        fn view(&self) -> AgentView<'_> {
            AgentView {
                id: &self.id,
                environment: self.env.as_ref(),
                ledger: &self.ledger,
                oracle: &self.oracle as &dyn CausalOracle,
            }
        }

        fn record(&self, x: i64, s: i64, r: i64, y: i64, times: usize) {
            self.record_as(&self.id, x, s, r, y, times);
        }

        fn record_as(&self, agent: &AgentId, x: i64, s: i64, r: i64, y: i64, times: usize) {
            for _ in 0..times {
                self.ledger
                    .append(agent, Assignment::from([("X", x), ("S", s), ("R", r), ("Y", y)]))
                    .unwrap();
            }
        }

        /// Own data copies each parent; five samples per action.
        fn record_copying(&self) {
            self.record(0, 0, 0, 0, 5);
            self.record(1, 1, 1, 1, 5);
        }

        fn transportable_len(&self, variable: &str) -> usize {
            self.ledger.transportable(&self.id, variable).unwrap().len()
        }
    }

    #[test]
    fn deterministic_chain_estimate() {
        let f = Fixture::new();
        f.record(0, 0, 0, 0, 5);
        f.record(1, 1, 1, 1, 5);

        let est = CausalChain::default()
            .estimate(f.view(), &Assignment::from([("X", 1)]))
            .unwrap();
        assert!((est.success - 1.0).abs() < 1e-12);
        assert!(est.failure.abs() < 1e-12);
        assert_eq!(est.unknown_terms, 0);
    }

    #[test]
    fn unknown_terms_contribute_nothing() {
        let f = Fixture::new();
        // R=1 never observed, so P(y | R=1) is unknown.
        f.record(0, 0, 0, 0, 3);
        f.record(1, 1, 0, 1, 3);

        let est = CausalChain::default()
            .estimate(f.view(), &Assignment::from([("X", 1)]))
            .unwrap();
        assert_eq!(est.unknown_terms, 2);
        assert!((est.success + est.failure - 1.0).abs() < 1e-12);
    }

    #[test]
    fn optimal_action_follows_adjusted_estimate() {
        let f = Fixture::new();
        f.record(0, 0, 0, 0, 5);
        f.record(1, 1, 1, 1, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..20 {
            let pick = CausalChain::default()
                .optimal_action(f.view(), &mut rng, &Assignment::new())
                .unwrap();
            assert_eq!(pick, Some(Assignment::from([("X", 1)])));
        }
    }

    #[test]
    fn adjusted_thompson_prefers_better_action() {
        let f = Fixture::new();
        f.record(0, 0, 0, 0, 50);
        f.record(1, 1, 1, 1, 50);
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut wins = 0;
        for _ in 0..100 {
            let pick = CausalChain::default()
                .thompson_sample(f.view(), &mut rng, &Assignment::new())
                .unwrap()
                .unwrap();
            if pick.get("X") == Some(1) {
                wins += 1;
            }
        }
        assert!(wins > 95);
    }

    fn names(ids: &[AgentId]) -> Vec<&str> {
        ids.iter().map(AgentId::as_str).collect()
    }

    #[test]
    fn fully_divergent_peer_adds_no_pseudo_counts() {
        let f = Fixture::with_peers(&["flipped"]);
        let peer = AgentId::new("flipped");
        f.record_copying();
        // S, R and Y all flip their parent.
        f.record_as(&peer, 0, 1, 0, 1, 5);
        f.record_as(&peer, 1, 0, 1, 0, 5);
        f.ledger.refresh_divergence().unwrap();

        let divergent = f.ledger.divergent_variables(&f.id, &peer).unwrap();
        assert_eq!(divergent.into_iter().collect::<Vec<_>>(), vec!["R", "S", "Y"]);
        assert_eq!(names(&contributors(f.view()).unwrap()), vec!["adjuster"]);

        let x1 = Assignment::from([("X", 1)]);
        let contributing = contributors(f.view()).unwrap();
        assert_eq!(matching(f.view(), &contributing, &x1).unwrap(), 5);
        for v in ["S", "R", "Y"] {
            assert_eq!(f.transportable_len(v), 10);
        }
    }

    #[test]
    fn peer_divergent_on_mediator_only_still_contributes() {
        let f = Fixture::with_peers(&["shifted"]);
        let peer = AgentId::new("shifted");
        f.record_copying();
        // Only S flips; R and Y copy their parent as in the agent's own data.
        f.record_as(&peer, 0, 1, 1, 1, 5);
        f.record_as(&peer, 1, 0, 0, 0, 5);

        // Every cell starts untrusted, so nothing is shared before a refresh.
        assert_eq!(names(&contributors(f.view()).unwrap()), vec!["adjuster"]);

        f.ledger.refresh_divergence().unwrap();
        let divergent = f.ledger.divergent_variables(&f.id, &peer).unwrap();
        assert_eq!(divergent.into_iter().collect::<Vec<_>>(), vec!["S"]);
        assert_eq!(names(&contributors(f.view()).unwrap()), vec!["adjuster", "shifted"]);

        let x1 = Assignment::from([("X", 1)]);
        let contributing = contributors(f.view()).unwrap();
        assert_eq!(matching(f.view(), &contributing, &x1).unwrap(), 10);

        assert_eq!(f.transportable_len("S"), 10);
        assert_eq!(f.transportable_len("R"), 20);
        assert_eq!(f.transportable_len("Y"), 20);

        // P(s | do(x)) comes from own data only, so the flipped S does not leak in.
        let est = CausalChain::default().estimate(f.view(), &x1).unwrap();
        assert!((est.success - 1.0).abs() < 1e-12);
        assert_eq!(est.unknown_terms, 0);
    }

    #[test]
    fn chain_validation_names_missing_variable() {
        let f = Fixture::new();
        assert!(CausalChain::default().validate(f.env.domains()).is_ok());
        let err = CausalChain::new("S", "Q").validate(f.env.domains()).unwrap_err();
        assert!(err.to_string().contains("'Q'"));
    }

    #[test]
    fn missing_chain_variable_is_an_error() {
        let f = Fixture::new();
        let chain = CausalChain::new("Q", "R");
        assert!(chain.estimate(f.view(), &Assignment::from([("X", 0)])).is_err());
    }
}
