//! Proposal-scale adaptation for the random-walk samplers.
//!
//! Scales are adjusted once per `interval` proposals toward a target
//! acceptance rate, with vanishing step sizes so the chain's asymptotic
//! behavior is unaffected.

/// Empirical acceptance rate targets for random-walk Metropolis.
pub const SCALAR_TARGET_RATE: f64 = 0.44;
pub const BLOCK_TARGET_RATE: f64 = 0.234;

pub const DEFAULT_ADAPT_INTERVAL: u64 = 200;

#[derive(Debug, Clone)]
pub struct ScaleAdapter {
    interval: u64,
    target: f64,
    window_proposals: u64,
    window_accepts: u64,
    times_adapted: u64,
}

impl ScaleAdapter {
    pub fn new(interval: u64, target: f64) -> Self {
        Self {
            interval: interval.max(1),
            target,
            window_proposals: 0,
            window_accepts: 0,
            times_adapted: 0,
        }
    }

    /// Record one proposal. Returns a multiplicative scale correction when
    /// the adaptation window closes, `None` otherwise.
    pub fn record(&mut self, accepted: bool) -> Option<f64> {
        self.window_proposals += 1;
        if accepted {
            self.window_accepts += 1;
        }
        if self.window_proposals < self.interval {
            return None;
        }
        let rate = self.window_accepts as f64 / self.window_proposals as f64;
        self.window_proposals = 0;
        self.window_accepts = 0;
        self.times_adapted += 1;
        // Vanishing adaptation: corrections shrink as 1/sqrt(t).
        let gamma = (self.times_adapted as f64).sqrt().recip();
        Some((gamma * (rate - self.target)).exp())
    }
}
