//! The MCMC engine: drives the configured sampler list against one model
//! state, one sweep per iteration, recording monitored values into a
//! [`Trace`].
//!
//! A sweep is strictly sequential; each sampler sees the state left by the
//! previous one. Multiple chains are independent engines sharing the graph
//! and registry read-only, parallelized with rayon. Per-chain rngs come
//! from one seeded `ChaCha8Rng` with the chain index as stream, so a fixed
//! seed reproduces every chain bit for bit.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::block_rw::BlockRandomWalkSampler;
use crate::config::{McmcConfig, SamplerKind};
use crate::conjugate::{ConjugateSampler, ConjugateUpdater};
use crate::cross_level::CrossLevelSampler;
use crate::dist::Value;
use crate::error::{ConfigError, StateError};
use crate::graph::NodeKind;
use crate::random_walk::RandomWalkSampler;
use crate::sampler::{Sampler, SamplerInfo};
use crate::state::ModelState;
use crate::trace::Trace;

pub struct McmcEngine {
    config: McmcConfig,
    state: ModelState,
    samplers: Vec<Box<dyn Sampler>>,
    trace: Trace,
    rng: SmallRng,
}

impl McmcEngine {
    pub fn new(config: McmcConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::with_rng(config, SmallRng::seed_from_u64(seed))
    }

    /// Build an engine around a caller-provided rng; the multi-chain driver
    /// uses this to hand each chain its own stream.
    pub fn with_rng(config: McmcConfig, mut rng: SmallRng) -> Result<Self, ConfigError> {
        config.validate()?;
        let samplers = instantiate(&config)?;
        let mut state = ModelState::new(config.graph().clone(), config.registry().clone());

        // Initialize latent nodes with a prior draw; deterministic given
        // the engine seed.
        let all: Vec<_> = config.graph().topo_order().to_vec();
        state.simulate(&mut rng, &all, false);
        state.calculate_all();

        let trace = Trace::new(config.graph(), config.monitors());
        Ok(Self {
            config,
            state,
            samplers,
            trace,
            rng,
        })
    }

    /// Override initial values by node name, then restore cache
    /// consistency.
    pub fn set_initial_values<S: AsRef<str>>(
        &mut self,
        values: &[(S, Value)],
    ) -> Result<(), StateError> {
        for (name, value) in values {
            let id = self
                .config
                .graph()
                .id_of(name.as_ref())
                .ok_or_else(|| StateError::UnknownNode(name.as_ref().to_string()))?;
            self.state.set_value(id, value.clone())?;
        }
        self.state.calculate_all();
        Ok(())
    }

    /// Run `iterations` sweeps, appending one trace row per completed
    /// sweep. Continues from the live state, so repeated calls extend the
    /// same chain.
    pub fn run(&mut self, iterations: usize) -> Result<usize> {
        static NEVER: AtomicBool = AtomicBool::new(false);
        self.run_cancellable(iterations, &NEVER)
    }

    /// Like [`run`](Self::run), but checks `cancel` at every sweep
    /// boundary and stops early when it is set. Returns the number of
    /// completed sweeps; the trace never holds a partial sweep.
    pub fn run_cancellable(&mut self, iterations: usize, cancel: &AtomicBool) -> Result<usize> {
        for done in 0..iterations {
            if cancel.load(Ordering::Relaxed) {
                return Ok(done);
            }
            for sampler in &mut self.samplers {
                sampler.step(&mut self.state, &mut self.rng)?;
            }
            self.trace.record(&self.state);
        }
        Ok(iterations)
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }

    /// Acceptance statistics per configured sampler, in sweep order.
    pub fn sampler_info(&self) -> Vec<SamplerInfo> {
        self.samplers.iter().map(|s| s.info()).collect()
    }
}

fn instantiate(config: &McmcConfig) -> Result<Vec<Box<dyn Sampler>>, ConfigError> {
    let graph = config.graph();
    let registry = config.registry();
    let mut samplers: Vec<Box<dyn Sampler>> = Vec::new();
    for assignment in config.assignments() {
        match &assignment.kind {
            SamplerKind::Conjugate => {
                for &target in &assignment.targets {
                    let updater = ConjugateUpdater::detect(graph, registry, target)
                        .ok_or_else(|| {
                            ConfigError::NoConjugateRelation(graph.node(target).name.clone())
                        })?;
                    samplers.push(Box::new(ConjugateSampler::new(graph, updater)));
                }
            }
            SamplerKind::RandomWalk(options) => {
                for &target in &assignment.targets {
                    samplers.push(Box::new(RandomWalkSampler::new(
                        graph, registry, target, *options,
                    )));
                }
            }
            SamplerKind::BlockRandomWalk(options) => {
                samplers.push(Box::new(BlockRandomWalkSampler::new(
                    graph,
                    assignment.targets.clone(),
                    options.clone(),
                )));
            }
            SamplerKind::CrossLevel(options) => {
                let mut updaters = Vec::new();
                for child in graph.stochastic_children(&assignment.targets) {
                    if graph.node(child).kind != NodeKind::Stochastic {
                        continue;
                    }
                    let updater =
                        ConjugateUpdater::detect(graph, registry, child).ok_or_else(|| {
                            ConfigError::NonConjugateDependent(graph.node(child).name.clone())
                        })?;
                    updaters.push(updater);
                }
                samplers.push(Box::new(CrossLevelSampler::new(
                    graph,
                    assignment.targets.clone(),
                    updaters,
                    options.clone(),
                )));
            }
        }
    }
    Ok(samplers)
}

/// Run several independent chains of the same configuration in parallel.
///
/// Chain `i` draws from stream `i` of a ChaCha rng seeded with `seed`, so
/// results are reproducible regardless of thread scheduling.
pub fn sample_chains(
    config: &McmcConfig,
    chains: usize,
    iterations: usize,
    seed: u64,
) -> Result<Vec<Trace>> {
    (0..chains)
        .into_par_iter()
        .map(|chain| {
            let mut seeder = ChaCha8Rng::seed_from_u64(seed);
            seeder.set_stream(chain as u64);
            let rng = SmallRng::from_rng(&mut seeder);
            let mut engine = McmcEngine::with_rng(config.clone(), rng)?;
            engine.run(iterations)?;
            Ok(engine.into_trace())
        })
        .collect()
}
