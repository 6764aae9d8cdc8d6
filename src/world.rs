//! One simulated world.
//!
//! A world holds a community of agents sharing one ledger and runs them for a
//! fixed horizon. Each round the ledger is refreshed once (when any agent
//! reads divergence scores), then every agent in fixed order communicates and
//! plays one trial. All decisions of a round therefore see the same
//! divergence snapshot.
//!
//! Per agent and round the world records the cumulative pseudo-regret
//! (optimal expected reward minus reward received) and whether the chosen
//! action was optimal for the sampled context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{Agent, Trial, Variant};
use crate::error::{BanditResult, ExecutionError, ValidationError};
use crate::id::AgentId;
use crate::ledger::TrustLedger;
use crate::selection::RuleKind;

/// Per-agent results of one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    /// Agent name.
    pub agent: AgentId,
    /// Agent variant.
    pub variant: Variant,
    /// Selection rule kind.
    pub rule: RuleKind,
    /// Cumulative pseudo-regret after each round.
    pub cumulative_regret: Vec<f64>,
    /// 1 if the round's action was optimal for its context, else 0.
    pub optimal_action: Vec<u8>,
}

/// Results of one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldReport {
    /// Rounds played.
    pub horizon: usize,
    /// One entry per agent, in play order.
    pub agents: Vec<AgentReport>,
}

/// A community of agents sharing one ledger.
#[derive(Debug)]
pub struct World {
    ledger: Arc<TrustLedger>,
    agents: Vec<Agent>,
    peers: Vec<AgentId>,
    horizon: usize,
    refresh: bool,
    reports: Vec<AgentReport>,
}

impl World {
    /// Creates a world running `agents` for `horizon` rounds.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `horizon` is zero, there are
    /// no agents, or an agent is bound to a different ledger.
    pub fn new(ledger: Arc<TrustLedger>, agents: Vec<Agent>, horizon: usize) -> Result<Self, ValidationError> {
        if horizon == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "horizon must be at least 1".to_string(),
            });
        }
        if agents.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "a world needs at least one agent".to_string(),
            });
        }
        if let Some(stray) = agents.iter().find(|a| !Arc::ptr_eq(a.ledger(), &ledger)) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("agent '{}' is bound to another ledger", stray.id()),
            });
        }

        let refresh = agents.iter().any(|a| a.variant().is_trust_aware());
        let peers = agents.iter().map(|a| a.id().clone()).collect();
        let reports = agents
            .iter()
            .map(|a| AgentReport {
                agent: a.id().clone(),
                variant: a.variant(),
                rule: a.rule().kind(),
                cumulative_regret: Vec::with_capacity(horizon),
                optimal_action: Vec::with_capacity(horizon),
            })
            .collect();

        Ok(Self {
            ledger,
            agents,
            peers,
            horizon,
            refresh,
            reports,
        })
    }

    /// Overrides whether the ledger is refreshed each round.
    ///
    /// By default it is refreshed only when some agent is trust-aware.
    #[must_use]
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Returns true if the ledger is refreshed at the start of each round.
    #[must_use]
    pub fn refreshes(&self) -> bool {
        self.refresh
    }

    /// The shared ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<TrustLedger> {
        &self.ledger
    }

    /// Agents in play order.
    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Number of rounds.
    #[must_use]
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Rounds played so far.
    #[must_use]
    pub fn rounds_played(&self) -> usize {
        self.reports.first().map_or(0, |r| r.cumulative_regret.len())
    }

    /// Plays one round.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the ledger refresh or by an agent.
    pub fn run_round(&mut self) -> BanditResult<()> {
        if self.refresh {
            self.ledger.refresh_divergence()?;
        }

        for (agent, report) in self.agents.iter_mut().zip(self.reports.iter_mut()) {
            agent.communicate(&self.peers)?;
            let trial = agent.act()?;
            record(agent, report, &trial)?;
        }

        let round = self.rounds_played();
        if round % 100 == 0 {
            debug!(round, agents = self.agents.len(), "world progress");
        }
        Ok(())
    }

    /// Plays every remaining round and returns the report.
    ///
    /// # Errors
    ///
    /// Returns the first error of any round.
    pub fn run(mut self) -> BanditResult<WorldReport> {
        while self.rounds_played() < self.horizon {
            self.run_round()?;
        }
        Ok(self.report())
    }

    /// Results recorded so far.
    #[must_use]
    pub fn report(&self) -> WorldReport {
        WorldReport {
            horizon: self.horizon,
            agents: self.reports.clone(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record(agent: &Agent, report: &mut AgentReport, trial: &Trial) -> BanditResult<()> {
    let env = agent.environment();
    let reward_variable = env.reward_variable();
    let received = trial
        .observation
        .get(reward_variable)
        .ok_or_else(|| ExecutionError::UnknownVariable {
            variable: reward_variable.to_string(),
        })?;

    let context = trial
        .context
        .restrict(env.feature_domains().variables());
    let optimal = env.optimal_reward(&context)?;
    let previous = report.cumulative_regret.last().copied().unwrap_or(0.0);
    report
        .cumulative_regret
        .push(previous + (optimal - received as f64));

    let hit = env.optimal_actions(&context)?.contains(&trial.action);
    report.optimal_action.push(u8::from(hit));
    Ok(())
}
