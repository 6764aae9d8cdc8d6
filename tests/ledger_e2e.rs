use std::sync::Arc;

use transbandit::{
    presets, Agent, AgentId, Assignment, Divergence, Environment, SelectionRule, TrustLedger,
    Variant, World,
};

fn chain_env(reversed: &[&str]) -> Arc<dyn Environment> {
    let mut model = presets::chain().unwrap();
    for node in reversed {
        model = presets::reversed(&model, node).unwrap();
    }
    Arc::new(presets::environment(model).unwrap())
}

/// Two always-exploring agents; the second may live in a modified chain.
fn explored_pair(peer_reversed: &[&str], rounds: usize) -> Arc<TrustLedger> {
    let envs = [chain_env(&[]), chain_env(peer_reversed)];
    let ledger = Arc::new(TrustLedger::for_environment(envs[0].as_ref()).unwrap());
    let agents = envs
        .iter()
        .enumerate()
        .map(|(i, env)| {
            Agent::builder(format!("p{i}"))
                .environment(Arc::clone(env))
                .ledger(Arc::clone(&ledger))
                .variant(Variant::Isolated)
                .rule(SelectionRule::EpsilonGreedy { epsilon: 1.0 })
                .tolerance(0.2)
                .seed(100 + i as u64)
                .build()
                .unwrap()
        })
        .collect();
    World::new(Arc::clone(&ledger), agents, rounds)
        .unwrap()
        .run()
        .unwrap();
    ledger.refresh_divergence().unwrap();
    ledger
}

#[test]
fn new_member_is_untrusted_both_ways() {
    let env = chain_env(&[]);
    let ledger = TrustLedger::for_environment(env.as_ref()).unwrap();
    let a = AgentId::new("a");
    let b = AgentId::new("b");
    ledger.register_agent(a.clone(), Arc::clone(&env), 0.2).unwrap();
    ledger.register_agent(b.clone(), env, 0.2).unwrap();

    for v in ledger.tracked_variables() {
        assert_eq!(ledger.divergence(&a, &b, v).unwrap(), Some(Divergence::UNTRUSTED));
        assert_eq!(ledger.divergence(&b, &a, v).unwrap(), Some(Divergence::UNTRUSTED));
        assert_eq!(ledger.divergence(&a, &a, v).unwrap(), Some(Divergence::NONE));
    }
    assert!(ledger.divergent_variables(&b, &b).unwrap().is_empty());
}

#[test]
fn identical_environments_become_trusted() {
    let ledger = explored_pair(&[], 600);
    let p0 = AgentId::new("p0");
    let p1 = AgentId::new("p1");

    assert!(ledger.divergent_variables(&p0, &p1).unwrap().is_empty());
    assert!(ledger.divergent_variables(&p1, &p0).unwrap().is_empty());
    assert_eq!(ledger.trusted_pool(&p0).unwrap().len(), 1200);
}

#[test]
fn reversed_mechanism_is_isolated_to_its_variable() {
    let ledger = explored_pair(&["S"], 600);
    let p0 = AgentId::new("p0");
    let p1 = AgentId::new("p1");

    let divergent = ledger.divergent_variables(&p0, &p1).unwrap();
    assert_eq!(divergent.into_iter().collect::<Vec<_>>(), vec!["S".to_string()]);

    assert_eq!(ledger.trusted_pool(&p0).unwrap().len(), 600);
    assert_eq!(ledger.community_pool().unwrap().len(), 1200);
    assert_eq!(ledger.transportable(&p0, "S").unwrap().len(), 600);
    assert_eq!(ledger.transportable(&p0, "R").unwrap().len(), 1200);
}

#[test]
fn divergence_is_refreshed_in_both_directions() {
    let ledger = explored_pair(&["S"], 300);
    let p0 = AgentId::new("p0");
    let p1 = AgentId::new("p1");
    let forward = ledger.divergence(&p0, &p1, "S").unwrap().unwrap();
    let backward = ledger.divergence(&p1, &p0, "S").unwrap().unwrap();
    assert!(forward.exceeds(0.2));
    assert!(backward.exceeds(0.2));
    assert_ne!(forward, Divergence::UNTRUSTED);
}

#[test]
fn observations_land_in_own_log_only() {
    let env = chain_env(&[]);
    let ledger = TrustLedger::for_environment(env.as_ref()).unwrap();
    let a = AgentId::new("a");
    let b = AgentId::new("b");
    ledger.register_agent(a.clone(), Arc::clone(&env), 0.2).unwrap();
    ledger.register_agent(b.clone(), env, 0.2).unwrap();
    ledger
        .append(&a, Assignment::from([("X", 1), ("S", 1), ("R", 1), ("Y", 1)]))
        .unwrap();
    assert_eq!(ledger.log(&a).unwrap().len(), 1);
    assert!(ledger.log(&b).unwrap().is_empty());
    assert!(ledger.most_recent(&b).unwrap().is_none());
}
