//! Experiment configuration.
//!
//! Loaded from TOML, then overridden by `TRANSBANDIT_*` environment
//! variables, then validated. Rule and variant names are parsed eagerly so
//! that a typo fails at load time instead of halfway through a run.
//!
//! ```toml
//! horizon = 500
//! repetitions = 10
//! workers = 4
//! seed = 42
//!
//! [[agents]]
//! name = "sensitive-ts"
//! variant = "divergence-aware"
//! rule = "ts"
//! environment = "chain"
//!
//! [[agents]]
//! name = "shifted"
//! variant = "isolated"
//! rule = "eg"
//! epsilon = 0.1
//! reversed = ["S"]
//! ```

use std::path::Path;
use std::sync::Arc;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, Variant, VisibilityPolicy, DEFAULT_DIVERGENCE_TOLERANCE};
use crate::environment::Environment;
use crate::error::{BanditResult, ValidationError};
use crate::ledger::TrustLedger;
use crate::montecarlo::RunnerConfig;
use crate::scm::{presets, CausalEnvironment, StructuralCausalModel};
use crate::selection::{RuleKind, SelectionRule};
use crate::world::World;

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig { reason: reason.into() }
}

/// Configuration of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Unique agent name.
    pub name: String,
    /// Variant name (`isolated`, `community`, `divergence-aware`, `causally-adjusted`).
    pub variant: String,
    /// Rule name (`eg`, `ef`, `ed`, `ts`).
    pub rule: String,
    /// Preset environment (`chain` or `confounded`).
    pub environment: String,
    /// Nodes whose mechanism is reversed in this agent's environment.
    pub reversed: Vec<String>,
    /// EG exploration probability.
    pub epsilon: f64,
    /// EF forced random trials per context.
    pub rand_trials: u64,
    /// ED starting probability.
    pub initial_epsilon: f64,
    /// ED multiplicative decay.
    pub cooling_rate: f64,
    /// Divergence tolerance for trust decisions.
    pub divergence_tolerance: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            variant: "isolated".to_string(),
            rule: "ts".to_string(),
            environment: "chain".to_string(),
            reversed: Vec::new(),
            epsilon: 0.1,
            rand_trials: 10,
            initial_epsilon: 1.0,
            cooling_rate: 0.99,
            divergence_tolerance: DEFAULT_DIVERGENCE_TOLERANCE,
        }
    }
}

impl AgentConfig {
    /// Parsed variant.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownVariant` for an unknown name.
    pub fn variant(&self) -> Result<Variant, ValidationError> {
        self.variant.parse()
    }

    /// Parsed selection rule with its parameters.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownSelectionRule` for an unknown name
    /// and `ValidationError::ParameterOutOfRange` for invalid parameters.
    pub fn selection_rule(&self) -> Result<SelectionRule, ValidationError> {
        let rule = match self.rule.parse::<RuleKind>()? {
            RuleKind::EpsilonGreedy => SelectionRule::EpsilonGreedy { epsilon: self.epsilon },
            RuleKind::EpsilonFirst => SelectionRule::EpsilonFirst {
                rand_trials: self.rand_trials,
            },
            RuleKind::EpsilonDecreasing => SelectionRule::EpsilonDecreasing {
                initial_epsilon: self.initial_epsilon,
                cooling_rate: self.cooling_rate,
            },
            RuleKind::Thompson => SelectionRule::Thompson,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Builds this agent's environment.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for an unknown preset and
    /// `ValidationError::InvalidCausalModel` if a reversed node cannot be
    /// reversed.
    pub fn build_environment(&self) -> Result<CausalEnvironment, ValidationError> {
        let mut model: StructuralCausalModel = match self.environment.trim().to_ascii_lowercase().as_str() {
            "chain" => presets::chain()?,
            "confounded" => presets::confounded()?,
            other => return Err(invalid(format!("unknown environment preset '{other}'"))),
        };
        for node in &self.reversed {
            model = presets::reversed(&model, node)?;
        }
        presets::environment(model)
    }
}

/// Top-level experiment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Rounds per world.
    pub horizon: usize,
    /// Worlds per worker.
    pub repetitions: usize,
    /// Worker threads.
    pub workers: usize,
    /// Master seed.
    pub seed: u64,
    /// Refresh divergence every round even without trust-aware agents.
    pub refresh_every_round: bool,
    /// Community members, in play order.
    pub agents: Vec<AgentConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let runner = RunnerConfig::default();
        Self {
            horizon: 250,
            repetitions: runner.repetitions,
            workers: runner.workers,
            seed: runner.seed,
            refresh_every_round: false,
            agents: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Parses a TOML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for malformed TOML or any
    /// validation failure.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ValidationError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| invalid(format!("<string>: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the file cannot be read
    /// or parsed, or any validation error.
    pub fn from_path(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("{}: {e}", path.display())))?;
        let mut config: Self =
            toml::from_str(&content).map_err(|e| invalid(format!("{}: {e}", path.display())))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `TRANSBANDIT_SEED`, `TRANSBANDIT_WORKERS`,
    /// `TRANSBANDIT_REPETITIONS` and `TRANSBANDIT_HORIZON` when set and
    /// parseable.
    pub fn apply_env_overrides(&mut self) {
        let read = |key: &str| std::env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(seed) = read("TRANSBANDIT_SEED") {
            self.seed = seed;
        }
        if let Some(workers) = read("TRANSBANDIT_WORKERS").and_then(|v| usize::try_from(v).ok()) {
            self.workers = workers;
        }
        if let Some(reps) = read("TRANSBANDIT_REPETITIONS").and_then(|v| usize::try_from(v).ok()) {
            self.repetitions = reps;
        }
        if let Some(horizon) = read("TRANSBANDIT_HORIZON").and_then(|v| usize::try_from(v).ok()) {
            self.horizon = horizon;
        }
    }

    /// Checks every value, including rule and variant names.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.horizon == 0 {
            return Err(invalid("horizon must be at least 1"));
        }
        if self.workers == 0 || self.repetitions == 0 {
            return Err(invalid("workers and repetitions must be at least 1"));
        }
        if self.agents.is_empty() {
            return Err(invalid("at least one agent is required"));
        }

        let mut names = std::collections::HashSet::new();
        let mut domains = None;
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "agents.name".to_string(),
                });
            }
            if !names.insert(agent.name.as_str()) {
                return Err(invalid(format!("duplicate agent name '{}'", agent.name)));
            }
            let variant = agent.variant()?;
            agent.selection_rule()?;
            if !agent.divergence_tolerance.is_finite() || agent.divergence_tolerance < 0.0 {
                return Err(ValidationError::out_of_range(
                    "divergence_tolerance",
                    agent.divergence_tolerance,
                ));
            }

            let env = agent.build_environment()?;
            variant.policy().validate(&env)?;
            match &domains {
                None => domains = Some(env.domains().clone()),
                Some(d) if d != env.domains() => {
                    return Err(invalid(format!(
                        "agent '{}' has different variables from the rest of the community",
                        agent.name
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Monte-Carlo settings.
    #[must_use]
    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            workers: self.workers,
            repetitions: self.repetitions,
            seed: self.seed,
        }
    }

    /// Builds a fresh world; agent `i` is seeded from a stream seeded with `seed`.
    ///
    /// # Errors
    ///
    /// Any validation error of the agents or the world.
    pub fn build_world(&self, seed: u64) -> BanditResult<World> {
        let mut seeds = ChaCha8Rng::seed_from_u64(seed);
        let mut environments = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let env: Arc<dyn Environment> = Arc::new(agent.build_environment()?);
            environments.push(env);
        }
        let first = environments
            .first()
            .ok_or_else(|| invalid("at least one agent is required"))?;
        let ledger = Arc::new(TrustLedger::for_environment(first.as_ref())?);

        let mut agents = Vec::with_capacity(self.agents.len());
        for (cfg, env) in self.agents.iter().zip(environments) {
            let agent = Agent::builder(cfg.name.as_str())
                .environment(env)
                .ledger(Arc::clone(&ledger))
                .variant(cfg.variant()?)
                .rule(cfg.selection_rule()?)
                .tolerance(cfg.divergence_tolerance)
                .seed(seeds.next_u64())
                .build()?;
            agents.push(agent);
        }

        let world = World::new(ledger, agents, self.horizon)?;
        let refresh = world.refreshes() || self.refresh_every_round;
        Ok(world.with_refresh(refresh))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = r#"
horizon = 20
repetitions = 2
workers = 1
seed = 9

[[agents]]
name = "a"
variant = "sensitive"
rule = "TS"

[[agents]]
name = "b"
variant = "solo"
rule = "epsilon-greedy"
epsilon = 0.3
reversed = ["S"]
"#;

    #[test]
    fn parses_and_fills_defaults() {
        let cfg = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.horizon, 20);
        assert_eq!(cfg.agents.len(), 2);
        assert_eq!(cfg.agents[0].environment, "chain");
        assert_eq!(cfg.agents[0].variant().unwrap(), Variant::DivergenceAware);
        assert_eq!(
            cfg.agents[1].selection_rule().unwrap(),
            SelectionRule::EpsilonGreedy { epsilon: 0.3 }
        );
    }

    #[test]
    fn unknown_rule_is_fatal() {
        let toml_str = SAMPLE.replace("\"TS\"", "\"softmax\"");
        let err = SimulationConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownSelectionRule { .. }));
    }

    #[test]
    fn unknown_variant_is_fatal() {
        let toml_str = SAMPLE.replace("\"solo\"", "\"greedy\"");
        let err = SimulationConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownVariant { .. }));
    }

    #[test]
    fn rejects_duplicate_names_and_empty_communities() {
        let dup = SAMPLE.replace("name = \"b\"", "name = \"a\"");
        assert!(SimulationConfig::from_toml_str(&dup).is_err());
        assert!(SimulationConfig::from_toml_str("horizon = 5").is_err());
    }

    #[test]
    fn rejects_mixed_variable_sets() {
        let mixed = SAMPLE.replace("reversed = [\"S\"]", "environment = \"confounded\"");
        assert!(SimulationConfig::from_toml_str(&mixed).is_err());
    }

    #[test]
    fn adjusted_agent_needs_its_chain() {
        let toml_str = r#"
[[agents]]
name = "adjust"
variant = "causally-adjusted"
environment = "confounded"
"#;
        let err = SimulationConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidConfig { .. }));
        assert!(err.to_string().contains("'S'"));

        let ok = toml_str.replace("\"confounded\"", "\"chain\"");
        assert!(SimulationConfig::from_toml_str(&ok).is_ok());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = SimulationConfig::from_path(file.path()).unwrap();
        assert_eq!(cfg.agents[1].reversed, vec!["S".to_string()]);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = SimulationConfig::from_path(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn builds_a_world() {
        let cfg = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        let world = cfg.build_world(1).unwrap();
        assert_eq!(world.agents().len(), 2);
        assert!(world.refreshes());
        let report = world.run().unwrap();
        assert_eq!(report.agents[0].cumulative_regret.len(), 20);
    }
}
