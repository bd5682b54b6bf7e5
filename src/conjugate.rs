//! Conjugate (Gibbs) sampling: exact draws from a node's closed-form
//! posterior conditional.
//!
//! A relation applies only when every stochastic dependent of the target
//! references it *directly* through a parameter slot listed in the
//! conjugacy table, and no other parameter of a dependent is influenced by
//! the target. Anything more entangled falls back to random-walk.

use std::sync::Arc;

use anyhow::Result;
use rand::RngCore;

use crate::dist::{Distribution, Value};
use crate::graph::{DependentFilter, ModelGraph, NodeDef, NodeId, Shape};
use crate::registry::{ConjugacyKind, DepObs, DistributionRegistry};
use crate::sampler::{Sampler, SamplerInfo};
use crate::state::ModelState;

/// A detected conjugate relation, reusable by the Gibbs sampler and the
/// cross-level sampler.
pub struct ConjugateUpdater {
    pub target: NodeId,
    pub kind: ConjugacyKind,
    /// Stochastic dependents entering the posterior update, topo order.
    pub deps: Vec<NodeId>,
    posterior: Arc<dyn Distribution>,
}

impl ConjugateUpdater {
    /// Detect a conjugate relation for `target`, or `None` if its
    /// dependent structure does not match the table.
    pub fn detect(
        graph: &ModelGraph,
        registry: &DistributionRegistry,
        target: NodeId,
    ) -> Option<ConjugateUpdater> {
        let node = graph.node(target);
        if !node.is_stochastic() || node.shape != Shape::Scalar {
            return None;
        }
        let NodeDef::Stochastic { dist: prior, .. } = &node.def else {
            return None;
        };

        // Every stochastic dependent must be a *direct* child: a
        // dependent-of-a-dependent has no closed-form contribution.
        let closure = graph.dependents(&[target], DependentFilter { stoch_only: true, ..Default::default() });
        let children = graph.stochastic_children(&[target]);
        if closure.len() != children.len() || closure.is_empty() {
            return None;
        }

        let downstream = graph.dependents(&[target], DependentFilter::default());
        let mut kind: Option<ConjugacyKind> = None;
        for &dep in &children {
            let dep_node = graph.node(dep);
            if dep_node.shape != Shape::Scalar {
                return None;
            }
            let NodeDef::Stochastic { dist: likelihood, params, supplied } = &dep_node.def
            else {
                return None;
            };
            let link = supplied.iter().find(|s| s.direct == Some(target))?;
            let relation = registry.conjugacy(prior, likelihood, &link.name)?;
            if *kind.get_or_insert(relation) != relation {
                return None;
            }
            // The other parameters must not see the target at all.
            for (slot, &pnode) in params.iter().enumerate() {
                if slot == link.slot {
                    continue;
                }
                if pnode == target || downstream.contains(&pnode) {
                    return None;
                }
            }
        }
        let kind = kind?;
        let posterior = registry
            .get(kind.posterior_family())
            .expect("posterior families are built-in")
            .clone();
        Some(ConjugateUpdater {
            target,
            kind,
            deps: children,
            posterior,
        })
    }

    /// Canonical parameters of the posterior conditional at the current
    /// state.
    pub fn posterior_params(&self, state: &ModelState) -> Vec<Value> {
        let prior_params = state.params_of(self.target);
        let deps: Vec<DepObs> = self
            .deps
            .iter()
            .map(|&d| DepObs {
                value: state
                    .value(d)
                    .as_scalar()
                    .expect("conjugate dependents are scalar"),
                params: state.params_of(d),
            })
            .collect();
        self.kind.posterior_params(&prior_params, &deps)
    }

    pub fn draw(&self, rng: &mut dyn RngCore, posterior_params: &[Value]) -> Value {
        self.posterior.draw(rng, posterior_params)
    }

    /// Log density of `value` under the posterior conditional; this is the
    /// proposal-density term of the cross-level acceptance ratio.
    pub fn log_density(&self, value: &Value, posterior_params: &[Value]) -> f64 {
        self.posterior.log_density(value, posterior_params)
    }
}

/// Gibbs sampler for one conjugate node. Draws are exact, so every step is
/// an acceptance.
pub struct ConjugateSampler {
    updater: ConjugateUpdater,
    /// Target plus downstream closure, the `calculate` set.
    affected: Vec<NodeId>,
    target_name: String,
    steps: u64,
}

impl ConjugateSampler {
    pub fn new(graph: &ModelGraph, updater: ConjugateUpdater) -> Self {
        let affected = graph.dependent_closure(&[updater.target]);
        let target_name = graph.node(updater.target).name.clone();
        Self {
            updater,
            affected,
            target_name,
            steps: 0,
        }
    }
}

impl Sampler for ConjugateSampler {
    fn step(&mut self, state: &mut ModelState, rng: &mut dyn RngCore) -> Result<()> {
        let post = self.updater.posterior_params(state);
        let value = self.updater.draw(rng, &post);
        state.set_value(self.updater.target, value)?;
        state.calculate(&self.affected);
        self.steps += 1;
        Ok(())
    }

    fn info(&self) -> SamplerInfo {
        SamplerInfo {
            targets: vec![self.target_name.clone()],
            kind: "conjugate",
            proposals: self.steps,
            accepts: self.steps,
            scale: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::graph::GraphBuilder;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn registry() -> Arc<DistributionRegistry> {
        Arc::new(DistributionRegistry::builtin())
    }

    fn beta_binomial() -> (Arc<ModelGraph>, Arc<DistributionRegistry>) {
        let registry = registry();
        let mut b = GraphBuilder::new();
        b.stochastic(
            "p",
            "beta",
            vec![("alpha", Expr::constant(2.0)), ("beta", Expr::constant(2.0))],
            Shape::Scalar,
        );
        b.data(
            "r",
            "binomial",
            vec![("prob", Expr::var("p")), ("size", Expr::constant(10.0))],
            7.0,
        );
        (Arc::new(b.build(&registry).unwrap()), registry)
    }

    #[test]
    fn beta_binomial_is_detected() {
        let (graph, registry) = beta_binomial();
        let p = graph.id_of("p").unwrap();
        let u = ConjugateUpdater::detect(&graph, &registry, p).unwrap();
        assert_eq!(u.kind, ConjugacyKind::BetaBinomial);
        assert_eq!(u.deps.len(), 1);
    }

    #[test]
    fn posterior_params_match_closed_form() {
        let (graph, registry) = beta_binomial();
        let p = graph.id_of("p").unwrap();
        let mut state = ModelState::new(graph.clone(), registry.clone());
        state.calculate_all();
        let u = ConjugateUpdater::detect(&graph, &registry, p).unwrap();
        let post = u.posterior_params(&state);
        assert_eq!(post[0].as_scalar().unwrap(), 9.0);
        assert_eq!(post[1].as_scalar().unwrap(), 5.0);
    }

    #[test]
    fn precision_link_through_lifted_node_is_detected() {
        let registry = registry();
        let mut b = GraphBuilder::new();
        b.stochastic(
            "tau",
            "gamma",
            vec![("shape", Expr::constant(1.0)), ("rate", Expr::constant(1.0))],
            Shape::Scalar,
        );
        b.data(
            "x",
            "normal",
            vec![("mean", Expr::constant(0.0)), ("tau", Expr::var("tau"))],
            1.3,
        );
        let graph = Arc::new(b.build(&registry).unwrap());
        let tau = graph.id_of("tau").unwrap();
        let u = ConjugateUpdater::detect(&graph, &registry, tau).unwrap();
        assert_eq!(u.kind, ConjugacyKind::GammaNormalPrecision);
    }

    #[test]
    fn indirect_links_are_not_conjugate() {
        // The dependent sees 2 * p, not p itself; no closed form.
        let registry = registry();
        let mut b = GraphBuilder::new();
        b.stochastic(
            "p",
            "beta",
            vec![("alpha", Expr::constant(2.0)), ("beta", Expr::constant(2.0))],
            Shape::Scalar,
        );
        b.data(
            "r",
            "binomial",
            vec![
                ("prob", Expr::var("p") * 0.5),
                ("size", Expr::constant(10.0)),
            ],
            3.0,
        );
        let graph = Arc::new(b.build(&registry).unwrap());
        let p = graph.id_of("p").unwrap();
        assert!(ConjugateUpdater::detect(&graph, &registry, p).is_none());
    }

    #[test]
    fn conjugate_steps_always_accept() {
        let (graph, registry) = beta_binomial();
        let p = graph.id_of("p").unwrap();
        let mut state = ModelState::new(graph.clone(), registry.clone());
        state.calculate_all();
        let u = ConjugateUpdater::detect(&graph, &registry, p).unwrap();
        let mut sampler = ConjugateSampler::new(&graph, u);
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..50 {
            sampler.step(&mut state, &mut rng).unwrap();
        }
        let info = sampler.info();
        assert_eq!(info.proposals, 50);
        assert_eq!(info.accepts, 50);
        assert_eq!(info.acceptance_rate(), 1.0);
    }
}
