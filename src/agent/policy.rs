//! Data-visibility policies.
//!
//! A policy decides which observations back an agent's exploit and Thompson
//! decisions, and what its per-round communication step does. Policies hold
//! no data of their own: everything is read from the shared ledger through an
//! [`AgentView`].

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::agent::adjust::CausalChain;
use crate::agent::sampling::thompson_from_log;
use crate::assignment::Assignment;
use crate::environment::Environment;
use crate::error::{BanditResult, ValidationError};
use crate::id::AgentId;
use crate::ledger::TrustLedger;
use crate::observation::ObservationLog;
use crate::query::CausalOracle;

/// Read-only handles a policy needs to make one decision.
#[derive(Clone, Copy)]
pub struct AgentView<'a> {
    /// The deciding agent.
    pub id: &'a AgentId,
    /// Its environment.
    pub environment: &'a dyn Environment,
    /// The shared ledger.
    pub ledger: &'a TrustLedger,
    /// Oracle used for causally-adjusted estimates.
    pub oracle: &'a dyn CausalOracle,
}

/// Agent variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Own log only.
    Isolated,
    /// Every member's log, unfiltered.
    Community,
    /// Logs of members with no divergent variable.
    DivergenceAware,
    /// Per-variable transportable data composed along a causal chain.
    CausallyAdjusted,
}

impl Variant {
    /// Every variant, in increasing order of trust awareness.
    pub const ALL: [Variant; 4] = [
        Variant::Isolated,
        Variant::Community,
        Variant::DivergenceAware,
        Variant::CausallyAdjusted,
    ];

    /// Stable identifier.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Community => "community",
            Self::DivergenceAware => "divergence-aware",
            Self::CausallyAdjusted => "causally-adjusted",
        }
    }

    /// Returns true if the variant reads divergence scores, which requires
    /// the world to refresh the ledger every round.
    #[must_use]
    pub const fn is_trust_aware(&self) -> bool {
        matches!(self, Self::DivergenceAware | Self::CausallyAdjusted)
    }

    /// Instantiates the policy for this variant.
    #[must_use]
    pub fn policy(&self) -> Box<dyn VisibilityPolicy> {
        match self {
            Self::Isolated => Box::new(Isolated),
            Self::Community => Box::new(Community),
            Self::DivergenceAware => Box::new(DivergenceAware),
            Self::CausallyAdjusted => Box::new(CausallyAdjusted::default()),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "isolated" | "solo" => Ok(Self::Isolated),
            "community" | "naive" => Ok(Self::Community),
            "divergence-aware" | "sensitive" => Ok(Self::DivergenceAware),
            "causally-adjusted" | "adjust" => Ok(Self::CausallyAdjusted),
            _ => Err(ValidationError::UnknownVariant { name: s.to_string() }),
        }
    }
}

/// What an agent's communication step found out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Communication {
    /// The variant does not communicate.
    Silent,
    /// Number of peers' most recent observations heard this round.
    Gossip {
        /// Peers that had something to share.
        heard: usize,
    },
    /// A peer with at least one divergent variable was found.
    TrustBroken {
        /// The first divergent peer.
        peer: AgentId,
    },
    /// No peer diverges.
    AllTrusted,
}

/// Which data an agent consults, and how.
pub trait VisibilityPolicy: Send + Sync + fmt::Debug {
    /// The variant tag of this policy.
    fn variant(&self) -> Variant;

    /// Observations backing this agent's decisions.
    fn visible_data(&self, view: AgentView<'_>) -> BanditResult<ObservationLog>;

    /// Empirically optimal action, or `None` for "no preference".
    fn optimal_action(
        &self,
        view: AgentView<'_>,
        rng: &mut dyn RngCore,
        context: &Assignment,
    ) -> BanditResult<Option<Assignment>> {
        let env = view.environment;
        Ok(self
            .visible_data(view)?
            .optimal_choice(rng, env.action_domain(), env.reward_variable(), context))
    }

    /// Thompson-sampled action.
    fn thompson_sample(
        &self,
        view: AgentView<'_>,
        rng: &mut dyn RngCore,
        context: &Assignment,
    ) -> BanditResult<Option<Assignment>> {
        let data = self.visible_data(view)?;
        thompson_from_log(&data, view.environment, rng, context)
    }

    /// Per-round communication with `peers`.
    ///
    /// # Errors
    ///
    /// Returns ledger errors for unregistered peers.
    fn communicate(&self, _view: AgentView<'_>, _peers: &[AgentId]) -> BanditResult<Communication> {
        Ok(Communication::Silent)
    }

    /// Checks that `environment` has every variable this policy reads.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` when a variable is missing.
    fn validate(&self, _environment: &dyn Environment) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Uses only the agent's own log.
#[derive(Debug, Clone, Copy, Default)]
pub struct Isolated;

impl VisibilityPolicy for Isolated {
    fn variant(&self) -> Variant {
        Variant::Isolated
    }

    fn visible_data(&self, view: AgentView<'_>) -> BanditResult<ObservationLog> {
        view.ledger.log(view.id)
    }
}

/// Pools every member's log without trust filtering.
#[derive(Debug, Clone, Copy, Default)]
pub struct Community;

impl VisibilityPolicy for Community {
    fn variant(&self) -> Variant {
        Variant::Community
    }

    fn visible_data(&self, view: AgentView<'_>) -> BanditResult<ObservationLog> {
        view.ledger.community_pool()
    }

    fn communicate(&self, view: AgentView<'_>, peers: &[AgentId]) -> BanditResult<Communication> {
        let mut heard = 0;
        for peer in peers.iter().filter(|p| *p != view.id) {
            if view.ledger.most_recent(peer)?.is_some() {
                heard += 1;
            }
        }
        Ok(Communication::Gossip { heard })
    }
}

/// Stops at the first peer with a divergent variable.
fn first_divergent_peer(view: AgentView<'_>, peers: &[AgentId]) -> BanditResult<Communication> {
    for peer in peers.iter().filter(|p| *p != view.id) {
        if !view.ledger.divergent_variables(view.id, peer)?.is_empty() {
            return Ok(Communication::TrustBroken { peer: peer.clone() });
        }
    }
    Ok(Communication::AllTrusted)
}

/// Pools only members with no divergent variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DivergenceAware;

impl VisibilityPolicy for DivergenceAware {
    fn variant(&self) -> Variant {
        Variant::DivergenceAware
    }

    fn visible_data(&self, view: AgentView<'_>) -> BanditResult<ObservationLog> {
        view.ledger.trusted_pool(view.id)
    }

    fn communicate(&self, view: AgentView<'_>, peers: &[AgentId]) -> BanditResult<Communication> {
        first_divergent_peer(view, peers)
    }
}

/// Composes oracle estimates over per-variable transportable data.
#[derive(Debug, Clone, Default)]
pub struct CausallyAdjusted {
    chain: CausalChain,
}

impl CausallyAdjusted {
    /// Adjusts along `chain` instead of the default `S -> R` chain.
    #[must_use]
    pub fn with_chain(chain: CausalChain) -> Self {
        Self { chain }
    }

    /// The chain used for adjustment.
    #[must_use]
    pub fn chain(&self) -> &CausalChain {
        &self.chain
    }
}

impl VisibilityPolicy for CausallyAdjusted {
    fn variant(&self) -> Variant {
        Variant::CausallyAdjusted
    }

    fn visible_data(&self, view: AgentView<'_>) -> BanditResult<ObservationLog> {
        view.ledger.trusted_pool(view.id)
    }

    fn optimal_action(
        &self,
        view: AgentView<'_>,
        rng: &mut dyn RngCore,
        context: &Assignment,
    ) -> BanditResult<Option<Assignment>> {
        self.chain.optimal_action(view, rng, context)
    }

    fn thompson_sample(
        &self,
        view: AgentView<'_>,
        rng: &mut dyn RngCore,
        context: &Assignment,
    ) -> BanditResult<Option<Assignment>> {
        self.chain.thompson_sample(view, rng, context)
    }

    fn communicate(&self, view: AgentView<'_>, peers: &[AgentId]) -> BanditResult<Communication> {
        first_divergent_peer(view, peers)
    }

    fn validate(&self, environment: &dyn Environment) -> Result<(), ValidationError> {
        self.chain.validate(environment.domains())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_variant_aliases() {
        assert_eq!("solo".parse::<Variant>().unwrap(), Variant::Isolated);
        assert_eq!("Naive".parse::<Variant>().unwrap(), Variant::Community);
        assert_eq!("divergence_aware".parse::<Variant>().unwrap(), Variant::DivergenceAware);
        assert_eq!("adjust".parse::<Variant>().unwrap(), Variant::CausallyAdjusted);
        assert!(matches!(
            "greedy".parse::<Variant>(),
            Err(ValidationError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn trust_awareness() {
        assert!(!Variant::Isolated.is_trust_aware());
        assert!(!Variant::Community.is_trust_aware());
        assert!(Variant::DivergenceAware.is_trust_aware());
        assert!(Variant::CausallyAdjusted.is_trust_aware());
    }

    #[test]
    fn only_adjusted_policy_checks_chain_variables() {
        use crate::scm::presets;

        let chain = presets::environment(presets::chain().unwrap()).unwrap();
        let confounded = presets::environment(presets::confounded().unwrap()).unwrap();
        for v in Variant::ALL {
            assert!(v.policy().validate(&chain).is_ok());
        }
        assert!(Variant::Isolated.policy().validate(&confounded).is_ok());
        assert!(matches!(
            Variant::CausallyAdjusted.policy().validate(&confounded),
            Err(ValidationError::InvalidConfig { .. })
        ));
        let custom = CausallyAdjusted::with_chain(CausalChain::new("W", "W"));
        assert!(custom.validate(&confounded).is_ok());
    }

    #[test]
    fn policy_matches_variant() {
        for v in Variant::ALL {
            assert_eq!(v.policy().variant(), v);
            assert_eq!(v.name().parse::<Variant>().unwrap(), v);
        }
    }
}
