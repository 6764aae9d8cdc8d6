//! Directional divergence between two agents' empirical distributions.
//!
//! The score for a variable `v` with parents `pa(v)` is the expected
//! conditional KL divergence
//!
//! ```text
//! D(P || Q) = Σ_g P(g) Σ_x P(x | g) · ln( P(x | g) / Q(x | g) )
//! ```
//!
//! where `g` ranges over parent assignments and `x` over the domain of `v`.
//! It measures how badly `Q`'s data would mislead `P` if merged, so it is
//! asymmetric and must be computed for each direction separately.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assignment::{Assignment, Domains};
use crate::error::ExecutionError;
use crate::observation::ObservationLog;
use crate::query::ConditionalQuery;

/// Divergence score for one (agent, agent, variable) cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Divergence {
    /// A computed divergence.
    Measured(f64),

    /// Not enough support to estimate. Treated as the worst case.
    Undefined,
}

impl Divergence {
    /// Divergence of an agent from itself.
    pub const NONE: Self = Self::Measured(0.0);

    /// Score given to a freshly registered peer before the first refresh.
    pub const UNTRUSTED: Self = Self::Measured(1.0);

    /// The measured value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<f64> {
        match self {
            Self::Measured(v) => Some(*v),
            Self::Undefined => None,
        }
    }

    /// Returns true if the score could not be computed.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns true if this score makes the variable divergent under
    /// `tolerance`. Undefined scores always exceed.
    #[must_use]
    pub fn exceeds(&self, tolerance: f64) -> bool {
        match self {
            Self::Measured(v) => v.abs() > tolerance,
            Self::Undefined => true,
        }
    }
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measured(v) => write!(f, "{v:.4}"),
            Self::Undefined => write!(f, "undefined"),
        }
    }
}

impl From<Option<f64>> for Divergence {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Undefined, Self::Measured)
    }
}

/// Expected conditional KL divergence of `q_data` from `p_data` for the
/// local distribution `local`.
///
/// Undefined when either side has no observation for some parent assignment,
/// or when `Q(x | g) = 0` while `P(x | g) > 0`.
///
/// # Errors
///
/// Returns `ExecutionError::UnknownVariable` if `local` names a variable that
/// has no domain in `domains`.
#[allow(clippy::cast_precision_loss)]
pub fn conditional_kl(
    domains: &Domains,
    p_data: &ObservationLog,
    q_data: &ObservationLog,
    local: &ConditionalQuery,
) -> Result<Divergence, ExecutionError> {
    let parent_domains = local.parent_domains(domains)?;
    let values = local.variable_domain(domains)?;

    let p_total = p_data.len();
    if p_total == 0 || q_data.is_empty() {
        return Ok(Divergence::Undefined);
    }

    let mut total = 0.0f64;
    for parents in parent_domains.assignments() {
        let p_cond = p_data.query(&parents);
        let q_cond = q_data.query(&parents);
        if p_cond.is_empty() || q_cond.is_empty() {
            return Ok(Divergence::Undefined);
        }

        let weight = p_cond.len() as f64 / p_total as f64;
        for &x in values {
            let event = Assignment::new().with(local.variable.clone(), x);
            let p = p_cond.count(&event) as f64 / p_cond.len() as f64;
            if p == 0.0 {
                continue;
            }
            let q = q_cond.count(&event) as f64 / q_cond.len() as f64;
            if q == 0.0 {
                return Ok(Divergence::Undefined);
            }
            total += weight * p * (p / q).ln();
        }
    }

    Ok(Divergence::Measured(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doms() -> Domains {
        Domains::new().with("X", [0, 1]).with("W", [0, 1])
    }

    fn log(rows: &[(i64, i64, usize)]) -> ObservationLog {
        let mut out = ObservationLog::new();
        for &(x, w, n) in rows {
            for _ in 0..n {
                out.push(Assignment::from([("X", x), ("W", w)]));
            }
        }
        out
    }

    fn w_given_x() -> ConditionalQuery {
        ConditionalQuery::new("W", vec!["X".to_string()])
    }

    #[test]
    fn identical_distributions_have_zero_divergence() {
        let p = log(&[(0, 0, 3), (0, 1, 1), (1, 0, 1), (1, 1, 3)]);
        let d = conditional_kl(&doms(), &p, &p.clone(), &w_given_x()).unwrap();
        assert!(d.value().unwrap().abs() < 1e-12);
        assert!(!d.exceeds(0.0));
    }

    #[test]
    fn reversed_mechanism_diverges() {
        let p = log(&[(0, 0, 3), (0, 1, 1), (1, 0, 1), (1, 1, 3)]);
        let q = log(&[(0, 0, 1), (0, 1, 3), (1, 0, 3), (1, 1, 1)]);
        let d = conditional_kl(&doms(), &p, &q, &w_given_x()).unwrap();
        // 0.5 ln 3 per parent value.
        assert!((d.value().unwrap() - 0.5 * 3f64.ln()).abs() < 1e-9);
        assert!(d.exceeds(0.2));
    }

    #[test]
    fn divergence_is_directional() {
        let p = log(&[(0, 0, 9), (0, 1, 1), (1, 0, 1), (1, 1, 1)]);
        let q = log(&[(0, 0, 1), (0, 1, 1), (1, 0, 1), (1, 1, 1)]);
        let pq = conditional_kl(&doms(), &p, &q, &w_given_x()).unwrap();
        let qp = conditional_kl(&doms(), &q, &p, &w_given_x()).unwrap();
        assert!((pq.value().unwrap() - qp.value().unwrap()).abs() > 1e-6);
    }

    #[test]
    fn missing_parent_support_is_undefined() {
        let p = log(&[(0, 0, 2), (0, 1, 2)]);
        let q = log(&[(0, 0, 2), (0, 1, 2), (1, 1, 2)]);
        let d = conditional_kl(&doms(), &p, &q, &w_given_x()).unwrap();
        assert!(d.is_undefined());
        assert!(d.exceeds(f64::MAX));
    }

    #[test]
    fn zero_reference_mass_is_undefined() {
        let p = log(&[(0, 0, 1), (0, 1, 1), (1, 0, 1), (1, 1, 1)]);
        let q = log(&[(0, 0, 2), (1, 0, 1), (1, 1, 1)]);
        let d = conditional_kl(&doms(), &p, &q, &w_given_x()).unwrap();
        assert!(d.is_undefined());
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let p = log(&[(0, 0, 1)]);
        let cq = ConditionalQuery::new("Y", vec!["X".to_string()]);
        assert!(conditional_kl(&doms(), &p, &p, &cq).is_err());
    }
}
