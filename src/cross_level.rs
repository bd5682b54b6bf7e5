//! Cross-level sampler: a joint proposal of hyperparameters together with
//! fresh conjugate draws of the latent nodes directly beneath them.
//!
//! Redrawing the dependents from their full conditionals on every proposal
//! makes their contribution to the acceptance ratio collapse to the
//! proposal-density correction, approximating a marginalized update of the
//! hyperparameters without a closed-form marginal.

use anyhow::Result;
use rand::RngCore;

use crate::block_rw::{read_flat, write_flat, BlockOptions, BlockProposal};
use crate::conjugate::ConjugateUpdater;
use crate::graph::{ModelGraph, NodeId};
use crate::sampler::{metropolis_accept, Sampler, SamplerInfo};
use crate::state::ModelState;

pub struct CrossLevelSampler {
    /// Hyperparameter nodes the block proposal moves.
    top: Vec<NodeId>,
    top_names: Vec<String>,
    /// One conjugate updater per directly dependent latent node.
    updaters: Vec<ConjugateUpdater>,
    /// Closure of top nodes and dependents; snapshot and calculate set.
    affected: Vec<NodeId>,
    proposal: BlockProposal,
    proposals: u64,
    accepts: u64,
}

impl CrossLevelSampler {
    pub fn new(
        graph: &ModelGraph,
        top: Vec<NodeId>,
        updaters: Vec<ConjugateUpdater>,
        options: BlockOptions,
    ) -> Self {
        let dim: usize = top.iter().map(|&t| graph.node(t).shape.len()).sum();
        let mut seeds = top.clone();
        seeds.extend(updaters.iter().map(|u| u.target));
        let top_names = top.iter().map(|&t| graph.node(t).name.clone()).collect();
        Self {
            affected: graph.dependent_closure(&seeds),
            top,
            top_names,
            updaters,
            proposal: BlockProposal::new(dim, &options),
            proposals: 0,
            accepts: 0,
        }
    }
}

impl Sampler for CrossLevelSampler {
    fn step(&mut self, state: &mut ModelState, rng: &mut dyn RngCore) -> Result<()> {
        let logp_old = state.log_prob(&self.affected)?;

        // Proposal density of the *current* dependent values under the
        // current hyperparameters; the reverse-move correction.
        let mut log_q_old = 0.0;
        for u in &self.updaters {
            let post = u.posterior_params(state);
            log_q_old += u.log_density(state.value(u.target), &post);
        }

        let current = read_flat(state, &self.top);
        let snapshot = state.snapshot(&self.affected);

        let proposed = self.proposal.propose(&current, rng);
        write_flat(state, &self.top, &proposed)?;
        // Refresh deterministic descendants so the dependents' full
        // conditionals see the proposed hyperparameters.
        state.calculate(&self.affected);

        let mut log_q_new = 0.0;
        for u in &self.updaters {
            let post = u.posterior_params(state);
            let value = u.draw(rng, &post);
            log_q_new += u.log_density(&value, &post);
            state.set_value(u.target, value)?;
        }
        let logp_new = state.calculate(&self.affected);

        let log_ratio = (logp_new + log_q_old) - (logp_old + log_q_new);
        let accepted = metropolis_accept(rng, log_ratio);
        if !accepted {
            state.restore(&snapshot);
        }

        self.proposals += 1;
        if accepted {
            self.accepts += 1;
        }
        let position = if accepted { &proposed } else { &current };
        self.proposal.record(accepted, position);
        Ok(())
    }

    fn info(&self) -> SamplerInfo {
        SamplerInfo {
            targets: self.top_names.clone(),
            kind: "cross_level",
            proposals: self.proposals,
            accepts: self.accepts,
            scale: Some(self.proposal.scale()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::graph::{GraphBuilder, Shape};
    use crate::registry::DistributionRegistry;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    /// mu ~ N(0, 10); theta_i ~ N(mu, 1); y_i ~ N(theta_i, 1) observed.
    fn hierarchical() -> (Arc<ModelGraph>, Arc<DistributionRegistry>) {
        let registry = Arc::new(DistributionRegistry::builtin());
        let mut b = GraphBuilder::new();
        b.stochastic(
            "mu",
            "normal",
            vec![("mean", Expr::constant(0.0)), ("sd", Expr::constant(10.0))],
            Shape::Scalar,
        );
        for (i, y) in [1.2, 0.8, 1.9].iter().enumerate() {
            b.stochastic(
                format!("theta[{}]", i + 1),
                "normal",
                vec![("mean", Expr::var("mu")), ("sd", Expr::constant(1.0))],
                Shape::Scalar,
            );
            b.data(
                format!("y[{}]", i + 1),
                "normal",
                vec![
                    ("mean", Expr::var(format!("theta[{}]", i + 1))),
                    ("sd", Expr::constant(1.0)),
                ],
                *y,
            );
        }
        (Arc::new(b.build(&registry).unwrap()), registry)
    }

    fn build_sampler(
        graph: &Arc<ModelGraph>,
        registry: &Arc<DistributionRegistry>,
    ) -> CrossLevelSampler {
        let mu = graph.id_of("mu").unwrap();
        let updaters: Vec<ConjugateUpdater> = (1..=3)
            .map(|i| {
                let theta = graph.id_of(&format!("theta[{i}]")).unwrap();
                ConjugateUpdater::detect(graph, registry, theta).expect("theta is conjugate")
            })
            .collect();
        CrossLevelSampler::new(graph, vec![mu], updaters, BlockOptions::default())
    }

    #[test]
    fn joint_proposal_keeps_state_consistent() {
        let (graph, registry) = hierarchical();
        let mut state = ModelState::new(graph.clone(), registry.clone());
        let mut rng = SmallRng::seed_from_u64(4);
        let all: Vec<_> = graph.topo_order().to_vec();
        state.simulate(&mut rng, &all, false);
        state.calculate_all();

        let mut sampler = build_sampler(&graph, &registry);
        for _ in 0..300 {
            sampler.step(&mut state, &mut rng).unwrap();
            state
                .log_prob(&all)
                .expect("state consistent after cross-level step");
        }
        let info = sampler.info();
        assert!(info.accepts > 0, "cross-level chain never moved");
        assert!(info.accepts < info.proposals);
    }

    #[test]
    fn posterior_mean_matches_closed_form() {
        // Integrating theta out: y_i ~ N(mu, sqrt(2)), prior N(0, 10).
        // Posterior mean of mu = ybar * n/2 / (n/2 + 1/100) with the usual
        // precision weighting.
        let (graph, registry) = hierarchical();
        let mu = graph.id_of("mu").unwrap();
        let mut state = ModelState::new(graph.clone(), registry.clone());
        let mut rng = SmallRng::seed_from_u64(19);
        let all: Vec<_> = graph.topo_order().to_vec();
        state.simulate(&mut rng, &all, false);
        state.calculate_all();

        let mut sampler = build_sampler(&graph, &registry);
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..12000 {
            sampler.step(&mut state, &mut rng).unwrap();
            if i >= 2000 {
                sum += state.value(mu).as_scalar().unwrap();
                count += 1;
            }
        }
        let got = sum / count as f64;

        let ybar = (1.2 + 0.8 + 1.9) / 3.0;
        let prec_data = 3.0 / 2.0; // n / (tau_theta^-1 + tau_y^-1)
        let prec_prior = 1.0 / 100.0;
        let expected = ybar * prec_data / (prec_data + prec_prior);
        assert!(
            (got - expected).abs() < 0.1,
            "posterior mean {got}, closed form {expected}"
        );
    }
}
