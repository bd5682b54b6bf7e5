use thiserror::Error;

/// Errors raised while building a model graph.
///
/// All of these are construction-time failures: the builder reports them
/// before any graph is produced, so a caller never observes a partially
/// built graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("model graph contains a cycle through node '{0}'")]
    CyclicModel(String),

    #[error("node '{referrer}' references undefined node '{name}'")]
    UndefinedReference { referrer: String, name: String },

    #[error("a node named '{0}' is already defined")]
    DuplicateNode(String),

    #[error("node '{node}': {message}")]
    ShapeMismatch { node: String, message: String },

    #[error("unknown distribution '{dist}' for node '{node}'")]
    UnknownDistribution { node: String, dist: String },

    #[error("node '{node}': distribution '{dist}' has no parameter named '{param}'")]
    UnknownParameter {
        node: String,
        dist: String,
        param: String,
    },
}

/// Errors raised by the distribution registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("a distribution named '{0}' is already registered")]
    DuplicateDistribution(String),

    #[error("no distribution named '{0}' is registered")]
    UnknownDistribution(String),

    #[error("distribution '{name}': argument '{arg}' has rank {rank}, only ranks 0..=2 are supported")]
    UnsupportedRank {
        name: String,
        arg: String,
        rank: usize,
    },
}

/// Errors raised while assembling or validating a sampler configuration.
///
/// A failing call leaves the configuration in its last valid state.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' is not a latent stochastic node")]
    NotStochastic(String),

    #[error("node '{0}' is already covered by another sampler assignment")]
    OverlappingAssignment(String),

    #[error("stochastic node '{0}' is not covered by any sampler assignment")]
    UncoveredNode(String),

    #[error("sampler '{sampler}' operates on scalar nodes but '{node}' is {shape}")]
    GranularityMismatch {
        sampler: &'static str,
        node: String,
        shape: String,
    },

    #[error(
        "sampler '{sampler}' cannot target node '{node}': dense random-walk proposals \
         leave its support with probability one"
    )]
    DegenerateSupport { sampler: &'static str, node: String },

    #[error(
        "proposal covariance for sampler '{sampler}' has {got} entries but the target \
         block flattens to dimension {dim} (expected {dim} x {dim})"
    )]
    ProposalCovarianceShape {
        sampler: &'static str,
        dim: usize,
        got: usize,
    },

    #[error("no conjugate relation for node '{0}' given its dependents")]
    NoConjugateRelation(String),

    #[error("cross-level dependent '{0}' has no conjugate relation with the target set")]
    NonConjugateDependent(String),
}

/// Errors raised by `ModelState` accessors.
#[derive(Error, Debug)]
pub enum StateError {
    #[error(
        "stale log-density requested: node '{0}' was mutated (or depends on a mutated node) \
         without an intervening calculate()"
    )]
    StaleState(String),

    #[error("value for node '{node}' has wrong shape: {message}")]
    ShapeMismatch { node: String, message: String },

    #[error("unknown node '{0}'")]
    UnknownNode(String),
}
