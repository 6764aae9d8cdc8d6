//! Discrete structural causal models.
//!
//! A `StructuralCausalModel` is a DAG of discrete nodes. Each node is either
//! an exogenous random draw, the action (set by the agent), or a conditional
//! probability table over its parents. `CausalEnvironment` wraps a model and a
//! reward variable into an [`Environment`].
//!
//! Node values are `0..k` for a node with `k` weights; the action node
//! declares its own domain.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::distributions::{Distribution, WeightedIndex};
use rand::RngCore;

use crate::assignment::{Assignment, Domains};
use crate::environment::Environment;
use crate::error::{BanditResult, ExecutionError, ValidationError};
use crate::query::ConditionalQuery;

/// Mechanism of one node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeModel {
    /// Exogenous draw from fixed weights.
    Random {
        /// Relative weight of each value `0..weights.len()`.
        weights: Vec<f64>,
    },

    /// Value chosen by the agent.
    Action {
        /// Variables the agent may observe before choosing.
        parents: Vec<String>,
        /// Admissible action values.
        domain: Vec<i64>,
    },

    /// Conditional probability table keyed by the parents' values.
    Discrete {
        /// Parent variables, in key order.
        parents: Vec<String>,
        /// Parent values (in `parents` order) to value weights.
        table: BTreeMap<Vec<i64>, Vec<f64>>,
    },
}

impl NodeModel {
    /// Exogenous node.
    #[must_use]
    pub fn random(weights: impl Into<Vec<f64>>) -> Self {
        Self::Random {
            weights: weights.into(),
        }
    }

    /// Action node.
    #[must_use]
    pub fn action(parents: &[&str], domain: impl Into<Vec<i64>>) -> Self {
        Self::Action {
            parents: parents.iter().map(|p| (*p).to_string()).collect(),
            domain: domain.into(),
        }
    }

    /// Table node from `(parent values, weights)` rows.
    #[must_use]
    pub fn discrete(parents: &[&str], rows: impl IntoIterator<Item = (Vec<i64>, Vec<f64>)>) -> Self {
        Self::Discrete {
            parents: parents.iter().map(|p| (*p).to_string()).collect(),
            table: rows.into_iter().collect(),
        }
    }

    /// Parent variables.
    #[must_use]
    pub fn parents(&self) -> &[String] {
        match self {
            Self::Random { .. } => &[],
            Self::Action { parents, .. } | Self::Discrete { parents, .. } => parents,
        }
    }

    /// Value domain.
    #[must_use]
    pub fn domain(&self) -> Vec<i64> {
        match self {
            Self::Random { weights } => value_range(weights.len()),
            Self::Action { domain, .. } => domain.clone(),
            Self::Discrete { table, .. } => {
                value_range(table.values().next().map_or(0, Vec::len))
            }
        }
    }

    fn weights_for(&self, assignment: &Assignment) -> Option<&[f64]> {
        match self {
            Self::Random { weights } => Some(weights),
            Self::Action { .. } => None,
            Self::Discrete { parents, table } => {
                let key: Option<Vec<i64>> = parents.iter().map(|p| assignment.get(p)).collect();
                table.get(&key?).map(Vec::as_slice)
            }
        }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn value_range(len: usize) -> Vec<i64> {
    (0..len as i64).collect()
}

fn validate_weights(node: &str, weights: &[f64]) -> Result<(), ValidationError> {
    if weights.is_empty() {
        return Err(ValidationError::EmptyDomain {
            variable: node.to_string(),
        });
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
        return Err(ValidationError::InvalidCausalModel {
            reason: format!("node '{node}' has invalid weights {weights:?}"),
        });
    }
    Ok(())
}

/// A validated discrete SCM.
#[derive(Debug, Clone)]
pub struct StructuralCausalModel {
    nodes: BTreeMap<String, NodeModel>,
    order: Vec<String>,
    children: BTreeMap<String, Vec<String>>,
    action: String,
    domains: Domains,
}

impl StructuralCausalModel {
    /// Builds and validates a model.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCausalModel` for unknown parents,
    /// cycles, a missing or repeated action node, or incomplete tables.
    pub fn new<I, S>(nodes: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (S, NodeModel)>,
        S: Into<String>,
    {
        let nodes: BTreeMap<String, NodeModel> =
            nodes.into_iter().map(|(k, v)| (k.into(), v)).collect();

        let mut children: BTreeMap<String, Vec<String>> =
            nodes.keys().map(|k| (k.clone(), Vec::new())).collect();
        for (name, model) in &nodes {
            for parent in model.parents() {
                let Some(list) = children.get_mut(parent) else {
                    return Err(ValidationError::InvalidCausalModel {
                        reason: format!("node '{name}' has unknown parent '{parent}'"),
                    });
                };
                list.push(name.clone());
            }
        }

        let actions: Vec<&String> = nodes
            .iter()
            .filter(|(_, m)| matches!(m, NodeModel::Action { .. }))
            .map(|(k, _)| k)
            .collect();
        let action = match actions.as_slice() {
            [single] => (*single).clone(),
            _ => {
                return Err(ValidationError::InvalidCausalModel {
                    reason: format!("expected exactly one action node, found {}", actions.len()),
                })
            }
        };

        let order = topological_order(&nodes, &children)?;

        let mut domains = Domains::new();
        for (name, model) in &nodes {
            let domain = model.domain();
            if domain.is_empty() {
                return Err(ValidationError::EmptyDomain {
                    variable: name.clone(),
                });
            }
            domains.insert(name.clone(), domain);
        }

        for (name, model) in &nodes {
            match model {
                NodeModel::Random { weights } => validate_weights(name, weights)?,
                NodeModel::Action { .. } => {}
                NodeModel::Discrete { parents, table } => {
                    let width = domains.get(name).map_or(0, <[i64]>::len);
                    let parent_domains = domains.restrict(parents.iter().map(String::as_str));
                    for combo in parent_domains.assignments() {
                        let key: Vec<i64> = parents.iter().filter_map(|p| combo.get(p)).collect();
                        let Some(weights) = table.get(&key) else {
                            return Err(ValidationError::InvalidCausalModel {
                                reason: format!("node '{name}' has no row for parents {key:?}"),
                            });
                        };
                        if weights.len() != width {
                            return Err(ValidationError::InvalidCausalModel {
                                reason: format!("node '{name}' has ragged rows"),
                            });
                        }
                        validate_weights(name, weights)?;
                    }
                }
            }
        }

        Ok(Self {
            nodes,
            order,
            children,
            action,
            domains,
        })
    }

    /// Returns a copy with `node` replaced (or added).
    ///
    /// # Errors
    ///
    /// Returns the same validation errors as [`StructuralCausalModel::new`].
    pub fn with_node(&self, node: impl Into<String>, model: NodeModel) -> Result<Self, ValidationError> {
        let mut nodes = self.nodes.clone();
        nodes.insert(node.into(), model);
        Self::new(nodes)
    }

    /// Name of the action node.
    #[must_use]
    pub fn action_variable(&self) -> &str {
        &self.action
    }

    /// Domains of every node.
    #[must_use]
    pub fn domains(&self) -> &Domains {
        &self.domains
    }

    /// Nodes in topological order.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Mechanism of `node`.
    #[must_use]
    pub fn node(&self, node: &str) -> Option<&NodeModel> {
        self.nodes.get(node)
    }

    /// Every node reachable from `node` by a directed path (excluding `node`).
    #[must_use]
    pub fn descendants(&self, node: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            for child in self.children.get(current).into_iter().flatten() {
                if seen.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }
        seen
    }

    /// Nodes, excluding `from`, on any directed path from `from` to `to`.
    #[must_use]
    pub fn causal_path(&self, from: &str, to: &str) -> BTreeSet<String> {
        self.descendants(from)
            .into_iter()
            .filter(|n| n == to || self.descendants(n).contains(to))
            .collect()
    }

    /// Probability that `node` takes `value` given its parents in `assignment`.
    fn probability(&self, node: &str, value: i64, assignment: &Assignment) -> Option<f64> {
        let weights = self.nodes.get(node)?.weights_for(assignment)?;
        let idx = usize::try_from(value).ok()?;
        let total: f64 = weights.iter().sum();
        weights.get(idx).map(|w| w / total)
    }

    fn sample_node(&self, rng: &mut dyn RngCore, node: &str, assignment: &Assignment) -> BanditResult<i64> {
        let weights = self
            .nodes
            .get(node)
            .and_then(|m| m.weights_for(assignment))
            .ok_or_else(|| ExecutionError::Sampling {
                reason: format!("node '{node}' cannot be sampled from {assignment}"),
            })?;
        let dist = WeightedIndex::new(weights).map_err(|e| ExecutionError::Sampling {
            reason: format!("node '{node}': {e}"),
        })?;
        let idx = dist.sample(rng);
        i64::try_from(idx).map_err(|_| {
            ExecutionError::Sampling {
                reason: format!("node '{node}' value {idx} overflows"),
            }
            .into()
        })
    }
}

fn topological_order(
    nodes: &BTreeMap<String, NodeModel>,
    children: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>, ValidationError> {
    let mut indegree: BTreeMap<&str, usize> = nodes
        .iter()
        .map(|(k, m)| (k.as_str(), m.parents().len()))
        .collect();
    let mut ready: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(k, _)| *k)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node) = ready.pop_front() {
        order.push(node.to_string());
        for child in children.get(node).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(child.as_str()) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(child);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        return Err(ValidationError::InvalidCausalModel {
            reason: "graph contains a cycle".to_string(),
        });
    }
    Ok(order)
}

/// An [`Environment`] backed by a structural causal model.
#[derive(Debug, Clone)]
pub struct CausalEnvironment {
    scm: StructuralCausalModel,
    reward: String,
    action_domain: Domains,
    feature_domains: Domains,
    features: Vec<String>,
}

impl CausalEnvironment {
    /// Wraps `scm` with `reward` as the reward variable.
    ///
    /// Context variables are every node that is neither the action, the
    /// reward, nor a descendant of the action.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCausalModel` if `reward` is not a
    /// node or is the action node.
    pub fn new(scm: StructuralCausalModel, reward: impl Into<String>) -> Result<Self, ValidationError> {
        let reward = reward.into();
        if !scm.domains().contains(&reward) || reward == scm.action_variable() {
            return Err(ValidationError::InvalidCausalModel {
                reason: format!("'{reward}' cannot be the reward variable"),
            });
        }

        let action = scm.action_variable().to_string();
        let downstream = scm.descendants(&action);
        let features: Vec<String> = scm
            .order()
            .iter()
            .filter(|n| **n != action && **n != reward && !downstream.contains(*n))
            .cloned()
            .collect();

        let action_domain = scm.domains().restrict([action.as_str()]);
        let feature_domains = scm.domains().restrict(features.iter().map(String::as_str));

        Ok(Self {
            scm,
            reward,
            action_domain,
            feature_domains,
            features,
        })
    }

    /// The underlying model.
    #[must_use]
    pub fn model(&self) -> &StructuralCausalModel {
        &self.scm
    }

    /// Exact expected reward of `action` in `context`, by enumerating every
    /// unassigned node.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Sampling` if a table lookup fails.
    pub fn expected_reward(&self, context: &Assignment, action: &Assignment) -> BanditResult<f64> {
        let start = context.merged(action);
        let pending: Vec<&str> = self
            .scm
            .order()
            .iter()
            .map(String::as_str)
            .filter(|n| !start.contains(n))
            .collect();
        self.expectation(&pending, start, 1.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn expectation(&self, pending: &[&str], assignment: Assignment, mass: f64) -> BanditResult<f64> {
        let Some((node, rest)) = pending.split_first() else {
            let reward = assignment.get(&self.reward).ok_or_else(|| ExecutionError::UnknownVariable {
                variable: self.reward.clone(),
            })?;
            return Ok(mass * reward as f64);
        };

        let mut total = 0.0;
        for value in self.scm.domains().get(node).unwrap_or(&[]) {
            let Some(p) = self.scm.probability(node, *value, &assignment) else {
                return Err(ExecutionError::Sampling {
                    reason: format!("no distribution for '{node}' given {assignment}"),
                }
                .into());
            };
            if p == 0.0 {
                continue;
            }
            total += self.expectation(rest, assignment.clone().with(*node, *value), mass * p)?;
        }
        Ok(total)
    }

    fn action_values(&self, context: &Assignment) -> BanditResult<Vec<(Assignment, f64)>> {
        self.action_domain
            .assignments()
            .into_iter()
            .map(|a| {
                let r = self.expected_reward(context, &a)?;
                Ok((a, r))
            })
            .collect()
    }
}

impl Environment for CausalEnvironment {
    fn sample_context(&self, rng: &mut dyn RngCore) -> BanditResult<Assignment> {
        let mut out = Assignment::new();
        for node in &self.features {
            let value = self.scm.sample_node(&mut *rng, node, &out)?;
            out.insert(node.clone(), value);
        }
        Ok(out)
    }

    fn sample_outcome(&self, rng: &mut dyn RngCore, assignment: &Assignment) -> BanditResult<Assignment> {
        let mut out = assignment.clone();
        for node in self.scm.order() {
            if out.contains(node) {
                continue;
            }
            if node == self.scm.action_variable() {
                return Err(ValidationError::MissingField {
                    field: node.clone(),
                }
                .into());
            }
            let value = self.scm.sample_node(&mut *rng, node, &out)?;
            out.insert(node.clone(), value);
        }
        Ok(out)
    }

    fn action_variable(&self) -> &str {
        self.scm.action_variable()
    }

    fn action_domain(&self) -> &Domains {
        &self.action_domain
    }

    fn reward_variable(&self) -> &str {
        &self.reward
    }

    fn reward_domain(&self) -> &[i64] {
        self.scm.domains().get(&self.reward).unwrap_or(&[])
    }

    fn feature_domains(&self) -> &Domains {
        &self.feature_domains
    }

    fn domains(&self) -> &Domains {
        self.scm.domains()
    }

    fn causal_path_between(&self, from: &str, to: &str) -> BTreeSet<String> {
        self.scm.causal_path(from, to)
    }

    fn local_conditional_query(&self, variable: &str) -> Option<ConditionalQuery> {
        let model = self.scm.node(variable)?;
        Some(ConditionalQuery::new(variable, model.parents().to_vec()))
    }

    fn optimal_reward(&self, context: &Assignment) -> BanditResult<f64> {
        Ok(self
            .action_values(context)?
            .into_iter()
            .map(|(_, r)| r)
            .fold(f64::NEG_INFINITY, f64::max))
    }

    fn optimal_actions(&self, context: &Assignment) -> BanditResult<Vec<Assignment>> {
        let values = self.action_values(context)?;
        let best = values.iter().map(|(_, r)| *r).fold(f64::NEG_INFINITY, f64::max);
        Ok(values
            .into_iter()
            .filter(|(_, r)| (best - r).abs() < 1e-12)
            .map(|(a, _)| a)
            .collect())
    }
}

/// Ready-made models used by the CLI, tests and benchmarks.
pub mod presets {
    use super::{CausalEnvironment, NodeModel, StructuralCausalModel};
    use crate::error::ValidationError;

    /// `Z -> X`, `X -> W`, `{Z, W} -> Y`, with `X` the action and `Y` the reward.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in tables; the `Result` mirrors the constructor.
    pub fn confounded() -> Result<StructuralCausalModel, ValidationError> {
        StructuralCausalModel::new([
            ("Z", NodeModel::random([0.5, 0.5])),
            ("X", NodeModel::action(&["Z"], [0, 1])),
            ("W", mediator(&["X"], false)),
            (
                "Y",
                NodeModel::discrete(
                    &["Z", "W"],
                    [
                        (vec![0, 0], vec![0.8, 0.2]),
                        (vec![0, 1], vec![0.5, 0.5]),
                        (vec![1, 0], vec![0.5, 0.5]),
                        (vec![1, 1], vec![0.2, 0.8]),
                    ],
                ),
            ),
        ])
    }

    /// Chain `X -> S -> R -> Y`, with `X` the action and `Y` the reward.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in tables; the `Result` mirrors the constructor.
    pub fn chain() -> Result<StructuralCausalModel, ValidationError> {
        StructuralCausalModel::new([
            ("X", NodeModel::action(&[], [0, 1])),
            ("S", mediator(&["X"], false)),
            ("R", mediator(&["S"], false)),
            ("Y", mediator(&["R"], false)),
        ])
    }

    /// Binary mechanism that copies its parent with probability 0.75, or
    /// flips it with probability 0.75 when `reversed`.
    #[must_use]
    pub fn mediator(parents: &[&str], reversed: bool) -> NodeModel {
        let (keep, flip) = if reversed { (0.25, 0.75) } else { (0.75, 0.25) };
        NodeModel::discrete(parents, [(vec![0], vec![keep, flip]), (vec![1], vec![flip, keep])])
    }

    /// `model` with the mechanism of `node` reversed.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCausalModel` if `node` has more than
    /// one parent or does not exist.
    pub fn reversed(model: &StructuralCausalModel, node: &str) -> Result<StructuralCausalModel, ValidationError> {
        let parents: Vec<&str> = model
            .node(node)
            .map(|m| m.parents().iter().map(String::as_str).collect())
            .unwrap_or_default();
        if parents.len() != 1 {
            return Err(ValidationError::InvalidCausalModel {
                reason: format!("cannot reverse '{node}'"),
            });
        }
        model.with_node(node, mediator(&parents, true))
    }

    /// Wraps a preset with `Y` as reward.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCausalModel` if the model has no `Y` node.
    pub fn environment(model: StructuralCausalModel) -> Result<CausalEnvironment, ValidationError> {
        CausalEnvironment::new(model, "Y")
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::presets;
    use super::*;

    #[test]
    fn rejects_cycles() {
        let err = StructuralCausalModel::new([
            ("X", NodeModel::action(&[], [0, 1])),
            ("A", presets::mediator(&["B"], false)),
            ("B", presets::mediator(&["A"], false)),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn rejects_missing_action() {
        let err = StructuralCausalModel::new([("Z", NodeModel::random([1.0]))]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCausalModel { .. }));
    }

    #[test]
    fn rejects_incomplete_table() {
        let err = StructuralCausalModel::new([
            ("X", NodeModel::action(&[], [0, 1])),
            ("Y", NodeModel::discrete(&["X"], [(vec![0], vec![0.5, 0.5])])),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("no row"));
    }

    #[test]
    fn chain_structure() {
        let env = presets::environment(presets::chain().unwrap()).unwrap();
        assert_eq!(env.action_variable(), "X");
        assert!(env.feature_domains().is_empty());
        let path = env.causal_path_between("X", "Y");
        let expected: BTreeSet<String> = ["S", "R", "Y"].iter().map(|s| (*s).to_string()).collect();
        assert_eq!(path, expected);
        let q = env.local_conditional_query("R").unwrap();
        assert_eq!(q.parents, vec!["S".to_string()]);
    }

    #[test]
    fn confounded_features_and_optimum() {
        let env = presets::environment(presets::confounded().unwrap()).unwrap();
        let features: Vec<&str> = env.feature_domains().variables().collect();
        assert_eq!(features, vec!["Z"]);

        // Z=1: X=1 gives W=1 w.p. 0.75, Y=1 w.p. 0.75*0.8 + 0.25*0.5 = 0.725.
        let ctx = Assignment::from([("Z", 1)]);
        let best = env.optimal_reward(&ctx).unwrap();
        assert!((best - 0.725).abs() < 1e-9);
        assert_eq!(env.optimal_actions(&ctx).unwrap(), vec![Assignment::from([("X", 1)])]);

        // Z=0: X=1 gives W=1 w.p. 0.75, Y=1 w.p. 0.75*0.5 + 0.25*0.2 = 0.425.
        let ctx = Assignment::from([("Z", 0)]);
        assert!((env.optimal_reward(&ctx).unwrap() - 0.425).abs() < 1e-9);
        assert_eq!(env.optimal_actions(&ctx).unwrap(), vec![Assignment::from([("X", 1)])]);
    }

    #[test]
    fn sampling_completes_the_assignment() {
        let env = presets::environment(presets::confounded().unwrap()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let ctx = env.sample_context(&mut rng).unwrap();
        assert!(ctx.contains("Z"));
        let full = env.sample_outcome(&mut rng, &ctx.clone().with("X", 1)).unwrap();
        for var in ["Z", "X", "W", "Y"] {
            assert!(full.contains(var));
        }
    }

    #[test]
    fn sampling_without_action_fails() {
        let env = presets::environment(presets::chain().unwrap()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(env.sample_outcome(&mut rng, &Assignment::new()).is_err());
    }

    #[test]
    fn reversed_changes_optimum() {
        let base = presets::chain().unwrap();
        let rev = presets::reversed(&base, "S").unwrap();
        let env = presets::environment(rev).unwrap();
        assert_eq!(
            env.optimal_actions(&Assignment::new()).unwrap(),
            vec![Assignment::from([("X", 0)])]
        );
    }
}
