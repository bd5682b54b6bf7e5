use std::sync::Arc;

use proptest::prelude::*;

use graphmc::{
    DependentFilter, DistributionRegistry, Expr, GraphBuilder, ModelGraph, NodeId, Shape,
};

/// Build a random layered model: node 0 is a stochastic root, every later
/// node is either deterministic over earlier nodes or stochastic with an
/// earlier node as its mean. `choices[i]` picks the parent of node `i + 1`.
fn build(choices: &[(usize, bool)]) -> Arc<ModelGraph> {
    let registry = DistributionRegistry::builtin();
    let mut builder = GraphBuilder::new();
    builder.stochastic(
        "n0",
        "normal",
        vec![("mean", Expr::constant(0.0)), ("sd", Expr::constant(1.0))],
        Shape::Scalar,
    );
    for (i, &(parent, stochastic)) in choices.iter().enumerate() {
        let name = format!("n{}", i + 1);
        let parent = format!("n{}", parent % (i + 1));
        if stochastic {
            builder.stochastic(
                name,
                "normal",
                vec![("mean", Expr::var(parent)), ("sd", Expr::constant(1.0))],
                Shape::Scalar,
            );
        } else {
            builder.deterministic(name, Expr::var(parent) * 2.0 + 1.0);
        }
    }
    Arc::new(builder.build(&registry).unwrap())
}

proptest! {
    #[test]
    fn dependency_closure_is_idempotent(
        choices in proptest::collection::vec((0usize..16, any::<bool>()), 0..16),
        seed_mask in proptest::collection::vec(any::<bool>(), 1..17),
    ) {
        let graph = build(&choices);
        let seeds: Vec<NodeId> = (0..graph.len())
            .filter(|&i| seed_mask.get(i).copied().unwrap_or(false))
            .map(NodeId)
            .collect();

        let closure = graph.dependent_closure(&seeds);
        let again = graph.dependent_closure(&closure);
        prop_assert_eq!(&closure, &again);

        // Dependents are the closure minus the seeds themselves.
        let deps = graph.dependents(&seeds, DependentFilter::default());
        for id in &deps {
            prop_assert!(closure.contains(id));
            prop_assert!(!seeds.contains(id));
        }
        for id in &closure {
            prop_assert!(seeds.contains(id) || deps.contains(id));
        }
    }

    #[test]
    fn closure_ordering_is_topological(
        choices in proptest::collection::vec((0usize..16, any::<bool>()), 1..16),
    ) {
        let graph = build(&choices);
        let root = graph.id_of("n0").unwrap();
        let closure = graph.dependent_closure(&[root]);
        for pair in closure.windows(2) {
            prop_assert!(graph.topo_index(pair[0]) < graph.topo_index(pair[1]));
        }
    }
}
