//! Runtime-extensible mapping from distribution names to their
//! density/sampler/support capabilities, plus the closed-form conjugacy
//! table used by the Gibbs and cross-level samplers.
//!
//! One registry is built at startup (`DistributionRegistry::builtin`) and
//! shared read-only across models and chains behind an `Arc`; user
//! registration happens before sampling starts, never concurrently with it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dist::{
    Bernoulli, Beta, Binomial, Dirichlet, Distribution, Exponential, Gamma, MvNormal, Normal,
    Poisson, Uniform, Value,
};
use crate::error::RegistryError;

#[derive(Default)]
pub struct DistributionRegistry {
    dists: HashMap<String, Arc<dyn Distribution>>,
}

impl DistributionRegistry {
    /// An empty registry with no distributions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in distributions.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        // Names are fixed; collisions cannot occur here.
        reg.register("normal", Normal).expect("fresh registry");
        reg.register("uniform", Uniform).expect("fresh registry");
        reg.register("beta", Beta).expect("fresh registry");
        reg.register("gamma", Gamma).expect("fresh registry");
        reg.register("exponential", Exponential).expect("fresh registry");
        reg.register("bernoulli", Bernoulli).expect("fresh registry");
        reg.register("binomial", Binomial).expect("fresh registry");
        reg.register("poisson", Poisson).expect("fresh registry");
        reg.register("dirichlet", Dirichlet).expect("fresh registry");
        reg.register("mvnormal", MvNormal).expect("fresh registry");
        reg
    }

    /// Register a distribution under `name`.
    ///
    /// Fails on name collision and on declared ranks above 2; the registry
    /// is left unmodified in either case.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        dist: impl Distribution + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.dists.contains_key(&name) {
            return Err(RegistryError::DuplicateDistribution(name));
        }
        Self::check_ranks(&name, &dist)?;
        self.dists.insert(name, Arc::new(dist));
        Ok(())
    }

    /// Register, replacing any existing distribution of the same name.
    pub fn register_or_replace(
        &mut self,
        name: impl Into<String>,
        dist: impl Distribution + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        Self::check_ranks(&name, &dist)?;
        self.dists.insert(name, Arc::new(dist));
        Ok(())
    }

    fn check_ranks(name: &str, dist: &dyn Distribution) -> Result<(), RegistryError> {
        if dist.value_rank() > 2 {
            return Err(RegistryError::UnsupportedRank {
                name: name.to_string(),
                arg: "<value>".to_string(),
                rank: dist.value_rank(),
            });
        }
        for p in dist.params() {
            if p.rank > 2 {
                return Err(RegistryError::UnsupportedRank {
                    name: name.to_string(),
                    arg: p.name.to_string(),
                    rank: p.rank,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn Distribution>, RegistryError> {
        self.dists
            .get(name)
            .ok_or_else(|| RegistryError::UnknownDistribution(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dists.contains_key(name)
    }

    /// Closed-form conjugate relation for a prior family, a dependent's
    /// likelihood family and the dependent parameter slot the prior enters
    /// through (the *supplied* name, so `tau` matches the precision
    /// parameterization of `normal`).
    pub fn conjugacy(&self, prior: &str, likelihood: &str, param: &str) -> Option<ConjugacyKind> {
        use ConjugacyKind::*;
        match (prior, likelihood, param) {
            ("beta", "bernoulli", "prob") => Some(BetaBernoulli),
            ("beta", "binomial", "prob") => Some(BetaBinomial),
            ("gamma", "poisson", "rate") => Some(GammaPoisson),
            ("gamma", "exponential", "rate") => Some(GammaExponential),
            ("normal", "normal", "mean") => Some(NormalNormalMean),
            ("gamma", "normal", "tau") => Some(GammaNormalPrecision),
            _ => None,
        }
    }
}

/// One observation entering a conjugate update: the dependent's current
/// value and its current canonical parameter values.
#[derive(Debug, Clone)]
pub struct DepObs {
    pub value: f64,
    pub params: Vec<Value>,
}

/// The closed set of built-in conjugate prior/likelihood pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConjugacyKind {
    BetaBernoulli,
    BetaBinomial,
    GammaPoisson,
    GammaExponential,
    /// Normal prior on the mean of normal dependents with fixed sd.
    NormalNormalMean,
    /// Gamma prior on the precision of normal dependents.
    GammaNormalPrecision,
}

impl ConjugacyKind {
    /// Name of the posterior distribution family.
    pub fn posterior_family(&self) -> &'static str {
        match self {
            ConjugacyKind::BetaBernoulli | ConjugacyKind::BetaBinomial => "beta",
            ConjugacyKind::GammaPoisson
            | ConjugacyKind::GammaExponential
            | ConjugacyKind::GammaNormalPrecision => "gamma",
            ConjugacyKind::NormalNormalMean => "normal",
        }
    }

    /// Canonical parameters of the posterior conditional, given the prior's
    /// canonical parameters and the dependents' observations.
    pub fn posterior_params(&self, prior_params: &[Value], deps: &[DepObs]) -> Vec<Value> {
        let p = |v: &Value| v.as_scalar().expect("conjugate priors are scalar");
        match self {
            ConjugacyKind::BetaBernoulli => {
                let successes: f64 = deps.iter().map(|d| d.value).sum();
                let failures = deps.len() as f64 - successes;
                vec![
                    (p(&prior_params[0]) + successes).into(),
                    (p(&prior_params[1]) + failures).into(),
                ]
            }
            ConjugacyKind::BetaBinomial => {
                let successes: f64 = deps.iter().map(|d| d.value).sum();
                let failures: f64 = deps
                    .iter()
                    .map(|d| p(&d.params[1]) - d.value)
                    .sum();
                vec![
                    (p(&prior_params[0]) + successes).into(),
                    (p(&prior_params[1]) + failures).into(),
                ]
            }
            ConjugacyKind::GammaPoisson => {
                let total: f64 = deps.iter().map(|d| d.value).sum();
                vec![
                    (p(&prior_params[0]) + total).into(),
                    (p(&prior_params[1]) + deps.len() as f64).into(),
                ]
            }
            ConjugacyKind::GammaExponential => {
                let total: f64 = deps.iter().map(|d| d.value).sum();
                vec![
                    (p(&prior_params[0]) + deps.len() as f64).into(),
                    (p(&prior_params[1]) + total).into(),
                ]
            }
            ConjugacyKind::NormalNormalMean => {
                let m0 = p(&prior_params[0]);
                let sd0 = p(&prior_params[1]);
                let tau0 = sd0.powi(-2);
                let mut tau = tau0;
                let mut weighted = tau0 * m0;
                for d in deps {
                    let sd = p(&d.params[1]);
                    let t = sd.powi(-2);
                    tau += t;
                    weighted += t * d.value;
                }
                vec![(weighted / tau).into(), tau.sqrt().recip().into()]
            }
            ConjugacyKind::GammaNormalPrecision => {
                let shape = p(&prior_params[0]) + deps.len() as f64 / 2.0;
                let mut rate = p(&prior_params[1]);
                for d in deps {
                    let mean = p(&d.params[0]);
                    rate += (d.value - mean).powi(2) / 2.0;
                }
                vec![shape.into(), rate.into()]
            }
        }
    }
}
