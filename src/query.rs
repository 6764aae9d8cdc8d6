//! Conditional-probability queries and the causal oracle seam.
//!
//! A `Query` asks for `P(outcome | givens)` over some dataset. The oracle that
//! answers it is pluggable; the crate ships an empirical (frequency-count)
//! oracle. Any oracle may answer "unknown" (`None`) when the dataset cannot
//! support an estimate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assignment::{Assignment, Domains};
use crate::error::ExecutionError;
use crate::observation::ObservationLog;

/// `P(outcome | givens)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    /// Event whose probability is requested.
    pub outcome: Assignment,
    /// Conditioning event.
    pub givens: Assignment,
}

impl Query {
    /// Creates `P(outcome | givens)`.
    #[must_use]
    pub fn new(outcome: Assignment, givens: Assignment) -> Self {
        Self { outcome, givens }
    }

    /// Creates the unconditional `P(outcome)`.
    #[must_use]
    pub fn marginal(outcome: Assignment) -> Self {
        Self::new(outcome, Assignment::new())
    }

    /// The first outcome variable, which names the CPT this query reads.
    #[must_use]
    pub fn variable(&self) -> Option<&str> {
        self.outcome.variables().next()
    }

    /// Relative frequency of `outcome` among observations matching `givens`.
    ///
    /// Returns `None` when no observation matches `givens`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn solve(&self, data: &ObservationLog) -> Option<f64> {
        let conditioned = data.query(&self.givens);
        if conditioned.is_empty() {
            return None;
        }
        Some(conditioned.count(&self.outcome) as f64 / conditioned.len() as f64)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.givens.is_empty() {
            write!(f, "P({})", self.outcome)
        } else {
            write!(f, "P({} | {})", self.outcome, self.givens)
        }
    }
}

/// Shape of a local conditional distribution `P(variable | parents)`.
///
/// Environments hand these out per variable; divergence refresh expands them
/// into concrete `Query` instances over the variable domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalQuery {
    /// The distributed variable.
    pub variable: String,
    /// Its causal parents (conditioning set).
    pub parents: Vec<String>,
}

impl ConditionalQuery {
    /// Creates `P(variable | parents)`.
    #[must_use]
    pub fn new(variable: impl Into<String>, parents: Vec<String>) -> Self {
        Self {
            variable: variable.into(),
            parents,
        }
    }

    /// Domains of the parents, looked up in `domains`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::UnknownVariable` for a parent without a domain.
    pub fn parent_domains(&self, domains: &Domains) -> Result<Domains, ExecutionError> {
        for parent in &self.parents {
            if !domains.contains(parent) {
                return Err(ExecutionError::UnknownVariable {
                    variable: parent.clone(),
                });
            }
        }
        Ok(domains.restrict(self.parents.iter().map(String::as_str)))
    }

    /// Domain of the distributed variable.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::UnknownVariable` if the variable has no domain.
    pub fn variable_domain<'a>(&self, domains: &'a Domains) -> Result<&'a [i64], ExecutionError> {
        domains
            .get(&self.variable)
            .ok_or_else(|| ExecutionError::UnknownVariable {
                variable: self.variable.clone(),
            })
    }
}

/// Conditional-probability answering service.
pub trait CausalOracle: Send + Sync {
    /// Name of the oracle (for logs).
    fn name(&self) -> &str;

    /// Answers `query` against `data`; `None` means "unknown".
    fn solve(&self, query: &Query, data: &ObservationLog) -> Option<f64>;
}

/// Oracle that answers with relative frequencies.
///
/// Requires at least `min_support` observations matching the conditioning
/// event before it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmpiricalOracle {
    min_support: usize,
}

impl EmpiricalOracle {
    /// Creates an oracle that answers once `min_support` matching observations exist.
    #[must_use]
    pub const fn with_min_support(min_support: usize) -> Self {
        Self {
            min_support: if min_support == 0 { 1 } else { min_support },
        }
    }

    /// Minimum number of conditioning matches needed for an answer.
    #[must_use]
    pub const fn min_support(&self) -> usize {
        self.min_support
    }
}

impl Default for EmpiricalOracle {
    fn default() -> Self {
        Self::with_min_support(1)
    }
}

impl CausalOracle for EmpiricalOracle {
    fn name(&self) -> &str {
        "empirical"
    }

    fn solve(&self, query: &Query, data: &ObservationLog) -> Option<f64> {
        if data.count(&query.givens) < self.min_support {
            return None;
        }
        query.solve(data)
    }
}
