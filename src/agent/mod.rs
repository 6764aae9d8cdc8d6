//! Bandit agents.
//!
//! An agent composes three parts:
//! - an [`ExplorationStrategy`] deciding whether to explore, exploit or
//!   Thompson-sample,
//! - a [`VisibilityPolicy`] deciding which data backs exploit and sampling,
//! - a handle on the shared [`TrustLedger`], where its own log lives.
//!
//! Agents are identified by name. Each owns a private seeded random stream so
//! that a world is reproducible regardless of how many agents it holds.

pub mod adjust;
pub mod builder;
pub mod policy;
pub mod sampling;

use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

pub use adjust::{CausalChain, ChainEstimate};
pub use builder::{AgentBuilder, DEFAULT_DIVERGENCE_TOLERANCE};
pub use policy::{
    AgentView, CausallyAdjusted, Communication, Community, DivergenceAware, Isolated, Variant,
    VisibilityPolicy,
};
pub use sampling::thompson_from_log;

use crate::assignment::Assignment;
use crate::environment::Environment;
use crate::error::{BanditResult, ExecutionError};
use crate::id::AgentId;
use crate::ledger::TrustLedger;
use crate::observation::{Observation, ObservationLog};
use crate::query::CausalOracle;
use crate::selection::{Decision, ExplorationStrategy, SelectionRule};

/// One completed trial as seen by the acting agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial {
    /// Context sampled before acting.
    pub context: Assignment,
    /// Chosen action.
    pub action: Assignment,
    /// How the action was chosen.
    pub decision: Decision,
    /// The full observation appended to the agent's log.
    pub observation: Observation,
}

/// A bandit agent.
pub struct Agent {
    id: AgentId,
    environment: Arc<dyn Environment>,
    ledger: Arc<TrustLedger>,
    oracle: Arc<dyn CausalOracle>,
    strategy: ExplorationStrategy,
    policy: Box<dyn VisibilityPolicy>,
    tolerance: f64,
    rng: ChaCha8Rng,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("variant", &self.policy.variant())
            .field("rule", self.strategy.rule())
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Agent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Agent {}

impl Agent {
    /// Starts building an agent named `id`.
    pub fn builder(id: impl Into<AgentId>) -> AgentBuilder {
        AgentBuilder::new(id)
    }

    /// The agent's name.
    #[must_use]
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// The agent's variant.
    #[must_use]
    pub fn variant(&self) -> Variant {
        self.policy.variant()
    }

    /// The agent's selection rule.
    #[must_use]
    pub fn rule(&self) -> &SelectionRule {
        self.strategy.rule()
    }

    /// Exploration state.
    #[must_use]
    pub fn strategy(&self) -> &ExplorationStrategy {
        &self.strategy
    }

    /// Divergence tolerance registered with the ledger.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// The agent's environment.
    #[must_use]
    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.environment
    }

    /// The shared ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<TrustLedger> {
        &self.ledger
    }

    fn view(&self) -> AgentView<'_> {
        AgentView {
            id: &self.id,
            environment: self.environment.as_ref(),
            ledger: &self.ledger,
            oracle: self.oracle.as_ref(),
        }
    }

    /// Observations backing this agent's decisions.
    ///
    /// # Errors
    ///
    /// Propagates ledger errors.
    pub fn visible_data(&self) -> BanditResult<ObservationLog> {
        self.policy.visible_data(self.view())
    }

    /// The agent's own log.
    ///
    /// # Errors
    ///
    /// Propagates ledger errors.
    pub fn own_data(&self) -> BanditResult<ObservationLog> {
        self.ledger.log(&self.id)
    }

    /// Uniformly random action.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Sampling` if the action domain is empty.
    pub fn choose_random(&mut self) -> BanditResult<Assignment> {
        let actions = self.environment.action_domain().assignments();
        actions
            .choose(&mut self.rng)
            .cloned()
            .ok_or_else(|| {
                ExecutionError::Sampling {
                    reason: "empty action domain".to_string(),
                }
                .into()
            })
    }

    /// Chooses an action for `context`.
    ///
    /// A policy with no preference (no supporting evidence) falls back to a
    /// uniformly random action.
    ///
    /// # Errors
    ///
    /// Propagates ledger, oracle and sampling errors.
    pub fn choose(&mut self, context: &Assignment) -> BanditResult<Assignment> {
        self.choose_with_decision(context).map(|(action, _)| action)
    }

    fn choose_with_decision(&mut self, context: &Assignment) -> BanditResult<(Assignment, Decision)> {
        let decision = self.strategy.decide(&mut self.rng, context);
        let view = AgentView {
            id: &self.id,
            environment: self.environment.as_ref(),
            ledger: &self.ledger,
            oracle: self.oracle.as_ref(),
        };
        let preferred = match decision {
            Decision::Explore => None,
            Decision::Exploit => self.policy.optimal_action(view, &mut self.rng, context)?,
            Decision::Sample => self.policy.thompson_sample(view, &mut self.rng, context)?,
        };
        let action = match preferred {
            Some(action) => action,
            None => self.choose_random()?,
        };
        Ok((action, decision))
    }

    /// Appends a completed observation to the agent's own log.
    ///
    /// # Errors
    ///
    /// Propagates ledger errors.
    pub fn observe(&self, outcome: impl Into<Observation>) -> BanditResult<()> {
        self.ledger.append(&self.id, outcome)
    }

    /// Runs one trial: sample context, choose, sample outcome, observe.
    ///
    /// # Errors
    ///
    /// Propagates environment sampling and ledger errors.
    pub fn act(&mut self) -> BanditResult<Trial> {
        let context = self.environment.sample_context(&mut self.rng)?;
        let (action, decision) = self.choose_with_decision(&context)?;
        let outcome = self
            .environment
            .sample_outcome(&mut self.rng, &context.merged(&action))?;
        let observation = Observation::new(outcome);
        self.observe(observation.clone())?;
        Ok(Trial {
            context,
            action,
            decision,
            observation,
        })
    }

    /// Per-round communication step with `peers`.
    ///
    /// # Errors
    ///
    /// Propagates ledger errors.
    pub fn communicate(&self, peers: &[AgentId]) -> BanditResult<Communication> {
        self.policy.communicate(self.view(), peers)
    }

    /// The agent's most recent observation.
    ///
    /// # Errors
    ///
    /// Propagates ledger errors.
    pub fn most_recent(&self) -> BanditResult<Option<Observation>> {
        self.ledger.most_recent(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::presets;

    fn setup(variant: Variant, rule: SelectionRule) -> Agent {
        let env: Arc<dyn Environment> = Arc::new(presets::environment(presets::chain().unwrap()).unwrap());
        let ledger = Arc::new(TrustLedger::for_environment(env.as_ref()).unwrap());
        Agent::builder("a0")
            .environment(env)
            .ledger(ledger)
            .variant(variant)
            .rule(rule)
            .seed(17)
            .build()
            .unwrap()
    }

    #[test]
    fn act_appends_to_own_log() {
        let mut agent = setup(Variant::Isolated, SelectionRule::EpsilonGreedy { epsilon: 0.1 });
        for _ in 0..10 {
            let trial = agent.act().unwrap();
            assert_eq!(trial.observation.get("X"), trial.action.get("X"));
            assert!(trial.observation.contains("Y"));
        }
        assert_eq!(agent.own_data().unwrap().len(), 10);
        assert!(agent.most_recent().unwrap().is_some());
    }

    #[test]
    fn exploit_without_data_falls_back_to_random() {
        let mut agent = setup(Variant::Isolated, SelectionRule::EpsilonGreedy { epsilon: 0.0 });
        let action = agent.choose(&Assignment::new()).unwrap();
        assert!(matches!(action.get("X"), Some(0 | 1)));
    }

    #[test]
    fn exploit_uses_best_observed_action() {
        let mut agent = setup(Variant::Isolated, SelectionRule::EpsilonGreedy { epsilon: 0.0 });
        agent
            .observe(Assignment::from([("X", 0), ("S", 0), ("R", 0), ("Y", 0)]))
            .unwrap();
        agent
            .observe(Assignment::from([("X", 1), ("S", 1), ("R", 1), ("Y", 1)]))
            .unwrap();
        for _ in 0..10 {
            assert_eq!(agent.choose(&Assignment::new()).unwrap(), Assignment::from([("X", 1)]));
        }
    }

    #[test]
    fn isolated_agent_does_not_communicate() {
        let agent = setup(Variant::Isolated, SelectionRule::Thompson);
        assert_eq!(agent.communicate(&[AgentId::new("a0")]).unwrap(), Communication::Silent);
    }

    #[test]
    fn agents_compare_by_name() {
        let a = setup(Variant::Isolated, SelectionRule::Thompson);
        let b = setup(Variant::Community, SelectionRule::Thompson);
        assert_eq!(a, b);
    }
}
