//! MCMC over directed graphical models.
//!
//! A hierarchical Bayesian model is declared node by node against a
//! [`GraphBuilder`] and frozen into an immutable [`ModelGraph`]. Sampling
//! runs against a [`ModelState`] holding every node's current value and
//! cached log-density, driven by an [`McmcEngine`] built from an
//! [`McmcConfig`] that assigns each latent node a sampler: exact conjugate
//! draws where a closed form exists, adaptive random-walk Metropolis
//! otherwise, with block and cross-level variants for correlated and
//! hierarchical structure.
//!
//! ```
//! use graphmc::{Expr, GraphBuilder, McmcConfig, McmcEngine, Shape};
//! use graphmc::DistributionRegistry;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(DistributionRegistry::builtin());
//! let mut builder = GraphBuilder::new();
//! builder.stochastic(
//!     "p",
//!     "beta",
//!     vec![("alpha", Expr::constant(2.0)), ("beta", Expr::constant(2.0))],
//!     Shape::Scalar,
//! );
//! builder.data(
//!     "r",
//!     "binomial",
//!     vec![("prob", Expr::var("p")), ("size", Expr::constant(10.0))],
//!     7.0,
//! );
//! let graph = Arc::new(builder.build(&registry)?);
//!
//! let config = McmcConfig::configure(graph, registry)?;
//! let mut engine = McmcEngine::new(config, 42)?;
//! engine.run(1000)?;
//! // Closed form: Beta(2 + 7, 2 + 3), mean 9/14.
//! let posterior_mean = engine.trace().mean("p", 100).unwrap();
//! assert!((posterior_mean - 9.0 / 14.0).abs() < 0.05);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub(crate) mod adapt;
pub(crate) mod math;

pub mod block_rw;
pub mod config;
pub mod conjugate;
pub mod cross_level;
pub mod dist;
pub mod engine;
pub mod error;
pub mod expr;
pub mod graph;
pub mod random_walk;
pub mod registry;
pub mod sampler;
pub mod state;
pub mod trace;

pub use block_rw::{BlockOptions, BlockRandomWalkSampler};
pub use config::{McmcConfig, SamplerAssignment, SamplerKind};
pub use conjugate::{ConjugateSampler, ConjugateUpdater};
pub use cross_level::CrossLevelSampler;
pub use dist::{AltParam, Distribution, ParamSpec, Support, Value};
pub use engine::{sample_chains, McmcEngine};
pub use error::{ConfigError, GraphError, RegistryError, StateError};
pub use expr::Expr;
pub use graph::{
    DependentFilter, GraphBuilder, ModelGraph, Node, NodeFilter, NodeId, NodeKind, Shape,
};
pub use random_walk::{RandomWalkOptions, RandomWalkSampler};
pub use registry::{ConjugacyKind, DistributionRegistry};
pub use sampler::{Sampler, SamplerInfo};
pub use state::{ModelState, StateSnapshot};
pub use trace::Trace;
