//! Shared trust ledger.
//!
//! The ledger owns every community member's observation log and the
//! directional divergence matrix `agent → agent → variable`. Agents only read
//! through the pooled views (`community_pool`, `trusted_pool`,
//! `transportable`); each agent appends to its own log only.
//!
//! Divergence cells start at zero for an agent against itself and at one
//! (fully untrusted) between distinct agents until the first refresh.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::assignment::{Assignment, Domains};
use crate::divergence::{conditional_kl, Divergence};
use crate::environment::Environment;
use crate::error::{BanditError, BanditResult, ExecutionError, ValidationError};
use crate::id::AgentId;
use crate::observation::{Observation, ObservationLog};

fn lock_err(context: &'static str) -> BanditError {
    BanditError::internal(format!("poisoned lock: {context}"))
}

fn not_registered(agent: &AgentId) -> BanditError {
    ExecutionError::AgentNotRegistered {
        agent: agent.clone(),
    }
    .into()
}

type DivergenceRow = HashMap<AgentId, BTreeMap<String, Divergence>>;

struct Member {
    log: ObservationLog,
    environment: Arc<dyn Environment>,
    tolerance: f64,
}

#[derive(Default)]
struct LedgerState {
    order: Vec<AgentId>,
    members: HashMap<AgentId, Member>,
    divergence: HashMap<AgentId, DivergenceRow>,
}

impl LedgerState {
    fn member(&self, agent: &AgentId) -> BanditResult<&Member> {
        self.members.get(agent).ok_or_else(|| not_registered(agent))
    }

    fn cell(&self, p: &AgentId, q: &AgentId, variable: &str) -> Option<Divergence> {
        self.divergence.get(p)?.get(q)?.get(variable).copied()
    }

    fn divergent_variables(&self, p: &AgentId, q: &AgentId) -> BanditResult<BTreeSet<String>> {
        let tolerance = self.member(p)?.tolerance;
        self.member(q)?;
        if p == q {
            return Ok(BTreeSet::new());
        }
        let Some(cells) = self.divergence.get(p).and_then(|row| row.get(q)) else {
            return Ok(BTreeSet::new());
        };
        Ok(cells
            .iter()
            .filter(|(_, d)| d.exceeds(tolerance))
            .map(|(v, _)| v.clone())
            .collect())
    }

    fn pool_where(&self, mut include: impl FnMut(&AgentId) -> BanditResult<bool>) -> BanditResult<ObservationLog> {
        let mut pooled = ObservationLog::new();
        for id in &self.order {
            if include(id)? {
                pooled.extend_from(&self.member(id)?.log);
            }
        }
        Ok(pooled)
    }
}

/// Per-community store of observation logs and pairwise divergence scores.
///
/// Shared by `Arc` among every agent of one world. Interior mutability is an
/// `RwLock`; within a world all access is single-threaded, so the lock is
/// never contended.
pub struct TrustLedger {
    domains: Domains,
    action_variable: String,
    tracked: Vec<String>,
    state: RwLock<LedgerState>,
}

impl std::fmt::Debug for TrustLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustLedger")
            .field("action_variable", &self.action_variable)
            .field("tracked", &self.tracked)
            .finish_non_exhaustive()
    }
}

impl TrustLedger {
    /// Creates an empty ledger over `domains`.
    ///
    /// Every variable except `action_variable` is tracked in the divergence
    /// matrix.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyDomain` if any domain is empty.
    pub fn new(domains: Domains, action_variable: impl Into<String>) -> Result<Self, ValidationError> {
        domains.validate()?;
        let action_variable = action_variable.into();
        let tracked = domains
            .variables()
            .filter(|v| *v != action_variable)
            .map(str::to_string)
            .collect();
        Ok(Self {
            domains,
            action_variable,
            tracked,
            state: RwLock::new(LedgerState::default()),
        })
    }

    /// Creates a ledger matching `environment`'s variables.
    ///
    /// # Errors
    ///
    /// See [`TrustLedger::new`].
    pub fn for_environment(environment: &dyn Environment) -> Result<Self, ValidationError> {
        Self::new(environment.domains().clone(), environment.action_variable())
    }

    /// Domains of every variable known to the ledger.
    #[must_use]
    pub fn domains(&self) -> &Domains {
        &self.domains
    }

    /// The action variable (never tracked).
    #[must_use]
    pub fn action_variable(&self) -> &str {
        &self.action_variable
    }

    /// Variables tracked in the divergence matrix.
    #[must_use]
    pub fn tracked_variables(&self) -> &[String] {
        &self.tracked
    }

    /// Registers `agent` with an empty log.
    ///
    /// Returns `false` (and changes nothing) if the agent is already
    /// registered. Otherwise the agent's cells are initialized to
    /// [`Divergence::NONE`] against itself and [`Divergence::UNTRUSTED`] in
    /// both directions against every prior member.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ParameterOutOfRange` for a negative or
    /// non-finite tolerance.
    pub fn register_agent(
        &self,
        agent: AgentId,
        environment: Arc<dyn Environment>,
        tolerance: f64,
    ) -> BanditResult<bool> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ValidationError::out_of_range("divergence_tolerance", tolerance).into());
        }

        let mut state = self.state.write().map_err(|_| lock_err("ledger.register"))?;
        if state.members.contains_key(&agent) {
            return Ok(false);
        }

        let fill = |value: Divergence| -> BTreeMap<String, Divergence> {
            self.tracked.iter().map(|v| (v.clone(), value)).collect()
        };

        let prior = state.order.clone();
        let mut own_row = DivergenceRow::new();
        own_row.insert(agent.clone(), fill(Divergence::NONE));
        for other in &prior {
            own_row.insert(other.clone(), fill(Divergence::UNTRUSTED));
            state
                .divergence
                .entry(other.clone())
                .or_default()
                .insert(agent.clone(), fill(Divergence::UNTRUSTED));
        }
        state.divergence.insert(agent.clone(), own_row);

        state.members.insert(
            agent.clone(),
            Member {
                log: ObservationLog::new(),
                environment,
                tolerance,
            },
        );
        state.order.push(agent.clone());

        debug!(agent = %agent, members = state.order.len(), "registered agent");
        Ok(true)
    }

    /// Appends `observation` to `agent`'s own log.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AgentNotRegistered` for an unknown agent.
    pub fn append(&self, agent: &AgentId, observation: impl Into<Observation>) -> BanditResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("ledger.append"))?;
        let member = state
            .members
            .get_mut(agent)
            .ok_or_else(|| not_registered(agent))?;
        member.log.push(observation);
        Ok(())
    }

    /// Recomputes every off-diagonal divergence cell.
    ///
    /// For each ordered pair `(P, Q)` with `P != Q` and each tracked variable
    /// `v`, the cell is the conditional KL divergence of `Q`'s data from
    /// `P`'s, under the local query `P`'s environment assigns to `v`. A
    /// variable without a local query in `P`'s environment is undefined.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::UnknownVariable` if an environment's local
    /// query names a variable the ledger has no domain for.
    pub fn refresh_divergence(&self) -> BanditResult<()> {
        let updates = {
            let state = self.state.read().map_err(|_| lock_err("ledger.refresh"))?;
            let mut updates = Vec::new();
            for p in &state.order {
                let p_member = state.member(p)?;
                for q in &state.order {
                    if p == q {
                        continue;
                    }
                    let q_member = state.member(q)?;
                    let mut cells = BTreeMap::new();
                    for variable in &self.tracked {
                        let score = match p_member.environment.local_conditional_query(variable) {
                            Some(local) => conditional_kl(&self.domains, &p_member.log, &q_member.log, &local)?,
                            None => Divergence::Undefined,
                        };
                        cells.insert(variable.clone(), score);
                    }
                    updates.push((p.clone(), q.clone(), cells));
                }
            }
            updates
        };

        let undefined = updates
            .iter()
            .flat_map(|(_, _, cells)| cells.values())
            .filter(|d| d.is_undefined())
            .count();

        let mut state = self.state.write().map_err(|_| lock_err("ledger.refresh"))?;
        let pairs = updates.len();
        for (p, q, cells) in updates {
            state.divergence.entry(p).or_default().insert(q, cells);
        }
        debug!(pairs, undefined, "refreshed divergence");
        Ok(())
    }

    /// The divergence cell `P → Q` for `variable`, if tracked.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AgentNotRegistered` for an unknown agent, or `BanditError::Internal` if the ledger lock is poisoned.
    pub fn divergence(&self, p: &AgentId, q: &AgentId, variable: &str) -> BanditResult<Option<Divergence>> {
        let state = self.state.read().map_err(|_| lock_err("ledger.divergence"))?;
        state.member(p)?;
        state.member(q)?;
        Ok(state.cell(p, q, variable))
    }

    /// Variables whose divergence of `q` from `p` exceeds `p`'s tolerance or
    /// is undefined. Empty when `p == q`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AgentNotRegistered` for an unknown agent, or `BanditError::Internal` if the ledger lock is poisoned.
    pub fn divergent_variables(&self, p: &AgentId, q: &AgentId) -> BanditResult<BTreeSet<String>> {
        let state = self.state.read().map_err(|_| lock_err("ledger.divergent_variables"))?;
        state.divergent_variables(p, q)
    }

    /// Union of the logs of every member with no divergent variable from
    /// `p`'s point of view (including `p` itself).
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AgentNotRegistered` for an unknown agent, or `BanditError::Internal` if the ledger lock is poisoned.
    pub fn trusted_pool(&self, p: &AgentId) -> BanditResult<ObservationLog> {
        let state = self.state.read().map_err(|_| lock_err("ledger.trusted_pool"))?;
        state.member(p)?;
        state.pool_where(|q| Ok(state.divergent_variables(p, q)?.is_empty()))
    }

    /// Union of every member's log.
    ///
    /// # Errors
    ///
    /// Returns `BanditError::Internal` if the ledger lock is poisoned.
    pub fn community_pool(&self) -> BanditResult<ObservationLog> {
        let state = self.state.read().map_err(|_| lock_err("ledger.community_pool"))?;
        state.pool_where(|_| Ok(true))
    }

    /// Union of the logs of every member for which `variable` is not
    /// divergent from `p`'s point of view (including `p` itself).
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AgentNotRegistered` for an unknown agent, or `BanditError::Internal` if the ledger lock is poisoned.
    pub fn transportable(&self, p: &AgentId, variable: &str) -> BanditResult<ObservationLog> {
        let state = self.state.read().map_err(|_| lock_err("ledger.transportable"))?;
        state.member(p)?;
        state.pool_where(|q| Ok(!state.divergent_variables(p, q)?.contains(variable)))
    }

    /// A copy of `agent`'s own log.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AgentNotRegistered` for an unknown agent, or `BanditError::Internal` if the ledger lock is poisoned.
    pub fn log(&self, agent: &AgentId) -> BanditResult<ObservationLog> {
        let state = self.state.read().map_err(|_| lock_err("ledger.log"))?;
        Ok(state.member(agent)?.log.clone())
    }

    /// Number of observations in `agent`'s log matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AgentNotRegistered` for an unknown agent, or `BanditError::Internal` if the ledger lock is poisoned.
    pub fn count(&self, agent: &AgentId, filter: &Assignment) -> BanditResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("ledger.count"))?;
        Ok(state.member(agent)?.log.count(filter))
    }

    /// The most recent observation of `agent`, if any.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::AgentNotRegistered` for an unknown agent, or `BanditError::Internal` if the ledger lock is poisoned.
    pub fn most_recent(&self, agent: &AgentId) -> BanditResult<Option<Observation>> {
        let state = self.state.read().map_err(|_| lock_err("ledger.most_recent"))?;
        Ok(state.member(agent)?.log.most_recent().cloned())
    }

    /// Registered members in registration order.
    ///
    /// # Errors
    ///
    /// Returns `BanditError::Internal` if the ledger lock is poisoned.
    pub fn members(&self) -> BanditResult<Vec<AgentId>> {
        let state = self.state.read().map_err(|_| lock_err("ledger.members"))?;
        Ok(state.order.clone())
    }

    /// Returns true if `agent` is registered.
    ///
    /// # Errors
    ///
    /// Returns `BanditError::Internal` if the ledger lock is poisoned.
    pub fn contains(&self, agent: &AgentId) -> BanditResult<bool> {
        let state = self.state.read().map_err(|_| lock_err("ledger.contains"))?;
        Ok(state.members.contains_key(agent))
    }
}
