use std::sync::Arc;

use graphmc::{
    DistributionRegistry, Expr, GraphBuilder, McmcConfig, McmcEngine, ModelGraph,
    RandomWalkOptions, SamplerKind, Shape,
};

fn beta_binomial() -> (Arc<ModelGraph>, Arc<DistributionRegistry>) {
    let registry = Arc::new(DistributionRegistry::builtin());
    let mut builder = GraphBuilder::new();
    builder.stochastic(
        "p",
        "beta",
        vec![("alpha", Expr::constant(2.0)), ("beta", Expr::constant(2.0))],
        Shape::Scalar,
    );
    builder.data(
        "r",
        "binomial",
        vec![("prob", Expr::var("p")), ("size", Expr::constant(10.0))],
        7.0,
    );
    (Arc::new(builder.build(&registry).unwrap()), registry)
}

// Closed-form posterior: Beta(2 + 7, 2 + 3), mean 9/14.
#[test]
fn conjugate_posterior_mean_matches_closed_form() {
    let (graph, registry) = beta_binomial();
    let config = McmcConfig::configure(graph, registry).unwrap();
    assert!(matches!(config.assignments()[0].kind, SamplerKind::Conjugate));

    for seed in [1u64, 2, 3] {
        let mut engine = McmcEngine::new(config.clone(), seed).unwrap();
        engine.run(1000).unwrap();
        let mean = engine.trace().mean("p", 0).unwrap();
        let expected = 9.0 / 14.0;
        assert!(
            (mean - expected).abs() < 0.03,
            "seed {seed}: posterior mean {mean}, expected {expected}"
        );
    }
}

#[test]
fn random_walk_fallback_reaches_the_same_posterior() {
    let (graph, registry) = beta_binomial();
    let mut config = McmcConfig::configure(graph, registry).unwrap();
    config.remove_samplers(&["p"]).unwrap();
    config
        .add_sampler(&["p"], SamplerKind::RandomWalk(RandomWalkOptions::default()))
        .unwrap();

    let mut engine = McmcEngine::new(config, 8).unwrap();
    engine.run(8000).unwrap();
    let mean = engine.trace().mean("p", 1000).unwrap();
    let expected = 9.0 / 14.0;
    assert!(
        (mean - expected).abs() < 0.03,
        "posterior mean {mean}, expected {expected} (within correlated-chain error)"
    );
}

#[test]
fn fixed_seed_reproduces_the_trace_bit_for_bit() {
    let (graph, registry) = beta_binomial();
    let config = McmcConfig::configure(graph, registry).unwrap();
    let mut first = McmcEngine::new(config.clone(), 99).unwrap();
    let mut second = McmcEngine::new(config, 99).unwrap();
    first.run(1000).unwrap();
    second.run(1000).unwrap();
    assert_eq!(first.trace().as_matrix(), second.trace().as_matrix());
}
