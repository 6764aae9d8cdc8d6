use std::sync::Arc;

use transbandit::{
    presets, Agent, Assignment, Decision, Environment, SelectionRule, TrustLedger, Variant,
};

fn agent(variant: Variant, rule: SelectionRule, seed: u64) -> Agent {
    let env: Arc<dyn Environment> = Arc::new(presets::environment(presets::chain().unwrap()).unwrap());
    let ledger = Arc::new(TrustLedger::for_environment(env.as_ref()).unwrap());
    Agent::builder("subject")
        .environment(env)
        .ledger(ledger)
        .variant(variant)
        .rule(rule)
        .seed(seed)
        .build()
        .unwrap()
}

fn seed_outcomes(agent: &Agent, action: i64, reward: i64, times: usize) {
    for _ in 0..times {
        agent
            .observe(Assignment::from([("X", action), ("S", action), ("R", action), ("Y", reward)]))
            .unwrap();
    }
}

#[test]
fn epsilon_first_explores_exactly_k_times() {
    let mut a = agent(Variant::Isolated, SelectionRule::EpsilonFirst { rand_trials: 5 }, 3);
    seed_outcomes(&a, 1, 1, 100);
    seed_outcomes(&a, 0, 0, 100);

    for _ in 0..5 {
        assert_eq!(a.act().unwrap().decision, Decision::Explore);
    }
    for _ in 0..20 {
        let trial = a.act().unwrap();
        assert_eq!(trial.decision, Decision::Exploit);
        assert_eq!(trial.action, Assignment::from([("X", 1)]));
    }
}

#[test]
fn forced_random_draws_are_reproducible() {
    let run = |seed| {
        let mut a = agent(Variant::Isolated, SelectionRule::EpsilonFirst { rand_trials: 30 }, seed);
        (0..30)
            .map(|_| a.choose(&Assignment::new()).unwrap())
            .collect::<Vec<_>>()
    };
    let first = run(21);
    assert_eq!(first, run(21));
    assert!(first.iter().any(|a| a.get("X") == Some(0)));
    assert!(first.iter().any(|a| a.get("X") == Some(1)));
}

#[test]
fn greedy_without_exploration_is_pure_exploitation() {
    let mut a = agent(Variant::Community, SelectionRule::EpsilonGreedy { epsilon: 0.0 }, 9);
    seed_outcomes(&a, 0, 1, 3);
    seed_outcomes(&a, 1, 0, 3);
    for _ in 0..50 {
        assert_eq!(a.choose(&Assignment::new()).unwrap(), Assignment::from([("X", 0)]));
    }
}

#[test]
fn thompson_picks_the_successful_arm() {
    for variant in [Variant::Isolated, Variant::Community, Variant::DivergenceAware] {
        let mut a = agent(variant, SelectionRule::Thompson, 1234);
        seed_outcomes(&a, 0, 1, 100);
        seed_outcomes(&a, 1, 0, 100);

        let wins = (0..1000)
            .filter(|_| a.choose(&Assignment::new()).unwrap() == Assignment::from([("X", 0)]))
            .count();
        assert!(wins > 900, "{variant}: {wins}");
    }
}

#[test]
fn epsilon_decreasing_converges_to_exploitation() {
    let mut a = agent(
        Variant::Isolated,
        SelectionRule::EpsilonDecreasing {
            initial_epsilon: 1.0,
            cooling_rate: 0.5,
        },
        77,
    );
    seed_outcomes(&a, 1, 1, 10);
    seed_outcomes(&a, 0, 0, 10);

    let _ = a.choose(&Assignment::new()).unwrap();
    let eps = a.strategy().current_epsilon(&Assignment::new()).unwrap();
    assert!((eps - 0.5).abs() < 1e-12);

    for _ in 0..60 {
        let _ = a.choose(&Assignment::new()).unwrap();
    }
    for _ in 0..20 {
        assert_eq!(a.choose(&Assignment::new()).unwrap(), Assignment::from([("X", 1)]));
    }
}
