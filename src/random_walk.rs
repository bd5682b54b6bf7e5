//! Scalar random-walk Metropolis with self-adapting proposal scale.

use std::sync::Arc;

use anyhow::Result;
use rand::RngCore;
use rand_distr::{Distribution as RandDistribution, StandardNormal};

use crate::adapt::{ScaleAdapter, DEFAULT_ADAPT_INTERVAL, SCALAR_TARGET_RATE};
use crate::dist::{Distribution, Value};
use crate::graph::{ModelGraph, NodeDef, NodeId};
use crate::sampler::{metropolis_accept, Sampler, SamplerInfo};
use crate::state::ModelState;

#[derive(Debug, Clone, Copy)]
pub struct RandomWalkOptions {
    /// Initial proposal standard deviation.
    pub scale: f64,
    pub adapt: bool,
    pub adapt_interval: u64,
}

impl Default for RandomWalkOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            adapt: true,
            adapt_interval: DEFAULT_ADAPT_INTERVAL,
        }
    }
}

pub struct RandomWalkSampler {
    target: NodeId,
    target_name: String,
    /// Target plus downstream closure; both the snapshot set and the
    /// `calculate` set.
    affected: Vec<NodeId>,
    dist: Arc<dyn Distribution>,
    scale: f64,
    adapter: Option<ScaleAdapter>,
    proposals: u64,
    accepts: u64,
}

impl RandomWalkSampler {
    pub fn new(
        graph: &ModelGraph,
        registry: &crate::registry::DistributionRegistry,
        target: NodeId,
        options: RandomWalkOptions,
    ) -> Self {
        let node = graph.node(target);
        let NodeDef::Stochastic { dist, .. } = &node.def else {
            panic!("random-walk target '{}' is not stochastic", node.name);
        };
        let dist = registry
            .get(dist)
            .expect("distribution resolved at graph build")
            .clone();
        Self {
            target,
            target_name: node.name.clone(),
            affected: graph.dependent_closure(&[target]),
            dist,
            scale: options.scale,
            adapter: options
                .adapt
                .then(|| ScaleAdapter::new(options.adapt_interval, SCALAR_TARGET_RATE)),
            proposals: 0,
            accepts: 0,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl Sampler for RandomWalkSampler {
    fn step(&mut self, state: &mut ModelState, rng: &mut dyn RngCore) -> Result<()> {
        let current = state
            .value(self.target)
            .as_scalar()
            .expect("scalar granularity checked at configuration");
        let logp_old = state.log_prob(&self.affected)?;

        let z: f64 = StandardNormal.sample(&mut *rng);
        let proposed = current + self.scale * z;

        // Out-of-support proposals reject without touching the state.
        let support = self.dist.support(&state.params_of(self.target));
        let mut accepted = false;
        if support.contains_scalar(proposed) {
            let snapshot = state.snapshot(&self.affected);
            state.set_value(self.target, Value::Scalar(proposed))?;
            let logp_new = state.calculate(&self.affected);
            accepted = metropolis_accept(rng, logp_new - logp_old);
            if !accepted {
                state.restore(&snapshot);
            }
        }

        self.proposals += 1;
        if accepted {
            self.accepts += 1;
        }
        if let Some(adapter) = &mut self.adapter {
            if let Some(factor) = adapter.record(accepted) {
                self.scale *= factor;
            }
        }
        Ok(())
    }

    fn info(&self) -> SamplerInfo {
        SamplerInfo {
            targets: vec![self.target_name.clone()],
            kind: "random_walk",
            proposals: self.proposals,
            accepts: self.accepts,
            scale: Some(self.scale),
        }
    }
}
