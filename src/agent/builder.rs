//! Agent builder.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::agent::policy::{Variant, VisibilityPolicy};
use crate::agent::Agent;
use crate::environment::Environment;
use crate::error::{BanditResult, ValidationError};
use crate::id::AgentId;
use crate::ledger::TrustLedger;
use crate::query::{CausalOracle, EmpiricalOracle};
use crate::selection::{ExplorationStrategy, SelectionRule};

/// Tolerance used when none is configured.
pub const DEFAULT_DIVERGENCE_TOLERANCE: f64 = 0.2;

/// Builder for [`Agent`].
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use transbandit::{presets, Agent, SelectionRule, TrustLedger, Variant};
///
/// let env = Arc::new(presets::environment(presets::chain()?)?);
/// let ledger = Arc::new(TrustLedger::for_environment(env.as_ref())?);
/// let agent = Agent::builder("a0")
///     .environment(env)
///     .ledger(ledger)
///     .variant(Variant::DivergenceAware)
///     .rule(SelectionRule::Thompson)
///     .seed(7)
///     .build()?;
/// assert_eq!(agent.variant(), Variant::DivergenceAware);
/// # Ok::<(), transbandit::BanditError>(())
/// ```
pub struct AgentBuilder {
    id: AgentId,
    environment: Option<Arc<dyn Environment>>,
    ledger: Option<Arc<TrustLedger>>,
    rule: Option<SelectionRule>,
    variant: Option<Variant>,
    policy: Option<Box<dyn VisibilityPolicy>>,
    oracle: Option<Arc<dyn CausalOracle>>,
    tolerance: f64,
    seed: u64,
}

impl AgentBuilder {
    /// Creates a builder for an agent named `id`.
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            environment: None,
            ledger: None,
            rule: None,
            variant: None,
            policy: None,
            oracle: None,
            tolerance: DEFAULT_DIVERGENCE_TOLERANCE,
            seed: 0,
        }
    }

    /// Set the agent's environment (required).
    #[must_use]
    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Set the shared ledger (required).
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<TrustLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Set the selection rule (required).
    #[must_use]
    pub fn rule(mut self, rule: SelectionRule) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Set the variant (required unless a policy is given).
    #[must_use]
    pub fn variant(mut self, variant: Variant) -> Self {
        self.variant = Some(variant);
        self
    }

    /// Use a custom policy instead of the variant's default.
    #[must_use]
    pub fn policy(mut self, policy: Box<dyn VisibilityPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the oracle (default: [`EmpiricalOracle`]).
    #[must_use]
    pub fn oracle(mut self, oracle: Arc<dyn CausalOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Set the divergence tolerance (default: [`DEFAULT_DIVERGENCE_TOLERANCE`]).
    #[must_use]
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Seed of the agent's private random stream (default: 0).
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builds the agent and registers it with the ledger.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingField` if a required field is not
    /// set, `ValidationError::ParameterOutOfRange` for invalid rule
    /// parameters or tolerance, and `ValidationError::InvalidConfig` if the
    /// name is already registered or the policy does not fit the
    /// environment.
    pub fn build(self) -> BanditResult<Agent> {
        let environment = self.environment.ok_or_else(|| ValidationError::MissingField {
            field: "environment".to_string(),
        })?;

        let ledger = self.ledger.ok_or_else(|| ValidationError::MissingField {
            field: "ledger".to_string(),
        })?;

        let rule = self.rule.ok_or_else(|| ValidationError::MissingField {
            field: "rule".to_string(),
        })?;

        let policy = match (self.policy, self.variant) {
            (Some(policy), _) => policy,
            (None, Some(variant)) => variant.policy(),
            (None, None) => {
                return Err(ValidationError::MissingField {
                    field: "variant".to_string(),
                }
                .into())
            }
        };

        policy.validate(environment.as_ref())?;
        let strategy = ExplorationStrategy::new(rule, environment.feature_domains())?;
        let oracle = self
            .oracle
            .unwrap_or_else(|| Arc::new(EmpiricalOracle::default()));

        if !ledger.register_agent(self.id.clone(), Arc::clone(&environment), self.tolerance)? {
            return Err(ValidationError::InvalidConfig {
                reason: format!("duplicate agent name '{}'", self.id),
            }
            .into());
        }

        Ok(Agent {
            id: self.id,
            environment,
            ledger,
            oracle,
            strategy,
            policy,
            tolerance: self.tolerance,
            rng: ChaCha8Rng::seed_from_u64(self.seed),
        })
    }
}
