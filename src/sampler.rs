//! The sampler seam: every variant (conjugate, scalar and block
//! random-walk, cross-level) implements [`Sampler`] and is driven once per
//! sweep by the engine.
//!
//! A step must leave the state consistent (caches matching values) on
//! every exit path. Rejections restore the exact previous values and
//! caches via `ModelState::snapshot`/`restore`.

use anyhow::Result;
use rand::{Rng, RngCore};

use crate::state::ModelState;

pub trait Sampler: Send {
    /// One sampler step within a sweep.
    fn step(&mut self, state: &mut ModelState, rng: &mut dyn RngCore) -> Result<()>;

    /// Acceptance statistics and tuning state, for inspection after a run.
    fn info(&self) -> SamplerInfo;
}

/// Per-sampler acceptance statistics.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SamplerInfo {
    pub targets: Vec<String>,
    pub kind: &'static str,
    pub proposals: u64,
    pub accepts: u64,
    /// Current proposal scale for random-walk variants.
    pub scale: Option<f64>,
}

impl SamplerInfo {
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposals == 0 {
            return f64::NAN;
        }
        self.accepts as f64 / self.proposals as f64
    }
}

/// Metropolis accept decision for a log acceptance ratio.
///
/// Non-finite ratios (out-of-support proposals, NaN densities) reject;
/// that is normal operation, not an error.
pub fn metropolis_accept(rng: &mut dyn RngCore, log_ratio: f64) -> bool {
    if log_ratio >= 0.0 {
        return true;
    }
    if log_ratio == f64::NEG_INFINITY || log_ratio.is_nan() {
        return false;
    }
    let u: f64 = rng.random();
    u.ln() < log_ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn non_finite_ratios_reject() {
        let mut rng = SmallRng::seed_from_u64(0);
        assert!(!metropolis_accept(&mut rng, f64::NEG_INFINITY));
        assert!(!metropolis_accept(&mut rng, f64::NAN));
        assert!(metropolis_accept(&mut rng, 0.0));
        assert!(metropolis_accept(&mut rng, 2.5));
    }

    #[test]
    fn acceptance_follows_the_ratio() {
        let mut rng = SmallRng::seed_from_u64(42);
        let log_ratio = (0.3f64).ln();
        let n = 20_000;
        let accepted = (0..n)
            .filter(|_| metropolis_accept(&mut rng, log_ratio))
            .count();
        let rate = accepted as f64 / n as f64;
        assert!((rate - 0.3).abs() < 0.02, "rate {rate}");
    }
}
