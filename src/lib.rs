//! # transbandit - Decentralized bandits with divergence-based data trust
//!
//! A community of bandit agents acts in structurally different causal
//! environments. Each agent decides, per trial, which action to take and
//! whose observations it may pool without importing bias from a differing
//! causal structure.
//!
//! ## Core Concepts
//!
//! - **ObservationLog**: append-only, filterable record of completed trials
//! - **TrustLedger**: every member's log plus a directional divergence matrix
//! - **SelectionRule**: epsilon-greedy, epsilon-first, epsilon-decreasing or Thompson sampling
//! - **Variant**: which data backs a decision (isolated, community, divergence-aware, causally-adjusted)
//! - **World**: one community played for a fixed horizon, with regret bookkeeping
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use transbandit::{presets, Agent, SelectionRule, TrustLedger, Variant, World};
//!
//! let env = Arc::new(presets::environment(presets::chain()?)?);
//! let ledger = Arc::new(TrustLedger::for_environment(env.as_ref())?);
//! let agent = Agent::builder("a0")
//!     .environment(env)
//!     .ledger(Arc::clone(&ledger))
//!     .variant(Variant::Isolated)
//!     .rule(SelectionRule::EpsilonGreedy { epsilon: 0.1 })
//!     .build()?;
//!
//! let report = World::new(ledger, vec![agent], 50)?.run()?;
//! assert_eq!(report.agents[0].cumulative_regret.len(), 50);
//! # Ok::<(), transbandit::BanditError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod assignment;
pub mod error;
pub mod id;
pub mod observation;

// Queries, divergence and the shared ledger
pub mod divergence;
pub mod ledger;
pub mod query;

// Environments
pub mod environment;
pub mod scm;

// Decision making
pub mod agent;
pub mod selection;

// Simulation
pub mod config;
pub mod montecarlo;
pub mod world;

// Re-export primary types at crate root for convenience
pub use agent::{
    Agent, AgentBuilder, CausalChain, CausallyAdjusted, Communication, Community, DivergenceAware,
    Isolated, Trial, Variant, VisibilityPolicy,
};
pub use assignment::{Assignment, Domains};
pub use config::{AgentConfig, SimulationConfig};
pub use divergence::{conditional_kl, Divergence};
pub use environment::Environment;
pub use error::{BanditError, BanditResult, ExecutionError, ValidationError};
pub use id::AgentId;
pub use ledger::TrustLedger;
pub use montecarlo::{CurveSummary, ExperimentSummary, MonteCarloRunner, RunnerConfig};
pub use observation::{Observation, ObservationLog};
pub use query::{CausalOracle, ConditionalQuery, EmpiricalOracle, Query};
pub use scm::{presets, CausalEnvironment, NodeModel, StructuralCausalModel};
pub use selection::{Decision, ExplorationStrategy, RuleKind, SelectionRule};
pub use world::{AgentReport, World, WorldReport};
