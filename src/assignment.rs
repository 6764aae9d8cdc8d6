//! Variable assignments and discrete domains.
//!
//! Every causal variable takes integer values from a finite domain. An
//! `Assignment` maps variable names to values and is used for contexts,
//! actions, query filters and whole observations alike.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A partial or total mapping from variable name to a discrete value.
///
/// Keys are kept sorted, so two assignments with the same pairs compare and
/// hash equal regardless of insertion order. This makes an assignment usable
/// as a canonical key for per-context state.
///
/// # Examples
///
/// ```
/// use transbandit::Assignment;
///
/// let obs = Assignment::from([("X", 0), ("Y", 1)]);
/// assert!(obs.matches(&Assignment::from([("X", 0)])));
/// assert!(!obs.matches(&Assignment::from([("X", 1)])));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment(BTreeMap<String, i64>);

impl Assignment {
    /// Creates an empty assignment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `variable` set to `value`.
    #[must_use]
    pub fn with(mut self, variable: impl Into<String>, value: i64) -> Self {
        self.0.insert(variable.into(), value);
        self
    }

    /// Sets `variable` to `value`, returning the previous value.
    pub fn insert(&mut self, variable: impl Into<String>, value: i64) -> Option<i64> {
        self.0.insert(variable.into(), value)
    }

    /// Value of `variable`, if assigned.
    #[must_use]
    pub fn get(&self, variable: &str) -> Option<i64> {
        self.0.get(variable).copied()
    }

    /// Returns true if `variable` is assigned.
    #[must_use]
    pub fn contains(&self, variable: &str) -> bool {
        self.0.contains_key(variable)
    }

    /// Number of assigned variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(variable, value)` pairs in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Iterates assigned variable names.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns true if, for every key of `filter`, this assignment holds the
    /// same value. Keys absent from `filter` are ignored; a filter key that is
    /// absent here is a mismatch.
    #[must_use]
    pub fn matches(&self, filter: &Assignment) -> bool {
        filter
            .0
            .iter()
            .all(|(k, v)| self.0.get(k).is_some_and(|own| own == v))
    }

    /// Union of both assignments; values in `other` win on overlap.
    #[must_use]
    pub fn merged(&self, other: &Assignment) -> Assignment {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            out.0.insert(k.clone(), *v);
        }
        out
    }

    /// Keeps only the listed variables.
    #[must_use]
    pub fn restrict<'a>(&self, variables: impl IntoIterator<Item = &'a str>) -> Assignment {
        let mut out = Assignment::new();
        for var in variables {
            if let Some(v) = self.0.get(var) {
                out.0.insert(var.to_string(), *v);
            }
        }
        out
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (K, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<const N: usize> From<[(&str, i64); N]> for Assignment {
    fn from(pairs: [(&str, i64); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Finite domains for a set of variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domains(BTreeMap<String, Vec<i64>>);

impl Domains {
    /// Creates an empty domain set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with the domain of `variable` set.
    #[must_use]
    pub fn with(mut self, variable: impl Into<String>, values: impl Into<Vec<i64>>) -> Self {
        self.0.insert(variable.into(), values.into());
        self
    }

    /// Sets the domain of `variable`.
    pub fn insert(&mut self, variable: impl Into<String>, values: impl Into<Vec<i64>>) {
        self.0.insert(variable.into(), values.into());
    }

    /// Domain of `variable`, if known.
    #[must_use]
    pub fn get(&self, variable: &str) -> Option<&[i64]> {
        self.0.get(variable).map(Vec::as_slice)
    }

    /// Returns true if `variable` has a domain.
    #[must_use]
    pub fn contains(&self, variable: &str) -> bool {
        self.0.contains_key(variable)
    }

    /// Iterates the variable names.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterates `(variable, domain)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[i64])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no variables are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps only the listed variables.
    #[must_use]
    pub fn restrict<'a>(&self, variables: impl IntoIterator<Item = &'a str>) -> Domains {
        let mut out = Domains::new();
        for var in variables {
            if let Some(values) = self.0.get(var) {
                out.0.insert(var.to_string(), values.clone());
            }
        }
        out
    }

    /// Rejects variables with an empty domain.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (var, values) in &self.0 {
            if values.is_empty() {
                return Err(ValidationError::EmptyDomain {
                    variable: var.clone(),
                });
            }
        }
        Ok(())
    }

    /// Enumerates the Cartesian product of all domains.
    ///
    /// The product of zero domains is a single empty assignment. Ordering is
    /// deterministic (variables sorted, values in declared order).
    #[must_use]
    pub fn assignments(&self) -> Vec<Assignment> {
        let mut out = vec![Assignment::new()];
        for (var, values) in &self.0 {
            let mut next = Vec::with_capacity(out.len() * values.len());
            for partial in &out {
                for v in values {
                    next.push(partial.clone().with(var.clone(), *v));
                }
            }
            out = next;
        }
        out
    }
}
