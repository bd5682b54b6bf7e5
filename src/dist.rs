//! Distribution interface and the built-in distribution set.
//!
//! A distribution is a pure triple of log-density, single-draw sampler and
//! declared support. Densities return `f64::NEG_INFINITY` outside the
//! support instead of erroring; out-of-support proposals are an expected,
//! frequent event during sampling and are handled as silent rejections.

use rand::{Rng, RngCore};
use rand_distr::{Distribution as RandDistribution, StandardNormal};
use statrs::function::gamma::ln_gamma;

use crate::expr::Expr;
use crate::math::{cholesky_lower, forward_solve, logdet_from_cholesky, lower_tri_mul};

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// A node value: scalar, vector or (row-major) matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    },
}

impl Value {
    pub fn rank(&self) -> usize {
        match self {
            Value::Scalar(_) => 0,
            Value::Vector(_) => 1,
            Value::Matrix { .. } => 2,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Number of scalar components.
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.len(),
            Value::Matrix { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat view of the scalar components.
    pub fn components(&self) -> &[f64] {
        match self {
            Value::Scalar(x) => std::slice::from_ref(x),
            Value::Vector(v) => v,
            Value::Matrix { data, .. } => data,
        }
    }

    pub fn components_mut(&mut self) -> &mut [f64] {
        match self {
            Value::Scalar(x) => std::slice::from_mut(x),
            Value::Vector(v) => v,
            Value::Matrix { data, .. } => data,
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(x)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(v)
    }
}

/// Declared support of a distribution, possibly parameter-dependent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Support {
    Real,
    Positive,
    UnitInterval,
    Interval(f64, f64),
    NonNegativeInt,
    /// Integers in `0..=max`.
    BoundedInt(u64),
    Simplex,
    RealVector,
}

impl Support {
    /// Whether a scalar component lies inside the support.
    pub fn contains_scalar(&self, x: f64) -> bool {
        if !x.is_finite() {
            return false;
        }
        match self {
            Support::Real | Support::RealVector => true,
            Support::Positive => x > 0.0,
            Support::UnitInterval => (0.0..=1.0).contains(&x),
            Support::Interval(lo, hi) => x >= *lo && x <= *hi,
            Support::NonNegativeInt => x >= 0.0 && x.fract() == 0.0,
            Support::BoundedInt(max) => x >= 0.0 && x.fract() == 0.0 && x <= *max as f64,
            Support::Simplex => (0.0..=1.0).contains(&x),
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        value.components().iter().all(|&x| self.contains_scalar(x))
    }
}

/// Declared parameter of a distribution: name plus array rank.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub rank: usize,
}

/// An alternate parameterization: supplying `name` instead of the canonical
/// parameter `replaces` wraps the supplied expression via `convert`.
///
/// The rewritten expression is no longer a bare reference, so the graph
/// builder hoists it into a lifted node; dependency queries stay exact.
#[derive(Debug, Clone, Copy)]
pub struct AltParam {
    pub name: &'static str,
    pub replaces: &'static str,
    pub convert: fn(Expr<String>) -> Expr<String>,
}

/// Capability interface every registered distribution implements.
///
/// Implementations must be pure functions of their declared arguments so
/// that any sampler variant (and any chain thread) can invoke them.
pub trait Distribution: Send + Sync {
    /// Rank of the sampled value: 0 scalar, 1 vector, 2 matrix.
    fn value_rank(&self) -> usize {
        0
    }

    /// Canonical parameters, in order.
    fn params(&self) -> &'static [ParamSpec];

    /// Alternate parameterizations accepted at model-build time.
    fn alternates(&self) -> &'static [AltParam] {
        &[]
    }

    fn support(&self, params: &[Value]) -> Support;

    /// Whether a dense random-walk step from an in-support point can land
    /// in the support again. False for measure-zero supports like the
    /// simplex, where such a proposal is rejected with probability one.
    fn proposable(&self) -> bool {
        true
    }

    /// Log density of `value` given canonical `params`; `NEG_INFINITY`
    /// outside the support.
    fn log_density(&self, value: &Value, params: &[Value]) -> f64;

    /// One draw given canonical `params`. Invalid parameters yield NaN
    /// components, which downstream densities treat as out-of-support.
    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value;
}

fn scalar(params: &[Value], idx: usize) -> f64 {
    params[idx]
        .as_scalar()
        .expect("parameter rank checked at model build")
}

// ---------------------------------------------------------------------------
// Scalar distributions
// ---------------------------------------------------------------------------

pub struct Normal;

impl Distribution for Normal {
    fn params(&self) -> &'static [ParamSpec] {
        &[
            ParamSpec { name: "mean", rank: 0 },
            ParamSpec { name: "sd", rank: 0 },
        ]
    }

    fn alternates(&self) -> &'static [AltParam] {
        &[
            AltParam {
                name: "var",
                replaces: "sd",
                convert: |e| e.sqrt(),
            },
            AltParam {
                name: "tau",
                replaces: "sd",
                convert: |e| e.sqrt().recip(),
            },
        ]
    }

    fn support(&self, _params: &[Value]) -> Support {
        Support::Real
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), mean, sd) = (value.as_scalar(), scalar(params, 0), scalar(params, 1)) else {
            return f64::NEG_INFINITY;
        };
        if !(sd > 0.0) || !x.is_finite() {
            return f64::NEG_INFINITY;
        }
        let z = (x - mean) / sd;
        -0.5 * z * z - sd.ln() - LN_SQRT_2PI
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        let (mean, sd) = (scalar(params, 0), scalar(params, 1));
        let z: f64 = StandardNormal.sample(&mut *rng);
        Value::Scalar(mean + sd * z)
    }
}

pub struct Uniform;

impl Distribution for Uniform {
    fn params(&self) -> &'static [ParamSpec] {
        &[
            ParamSpec { name: "lower", rank: 0 },
            ParamSpec { name: "upper", rank: 0 },
        ]
    }

    fn support(&self, params: &[Value]) -> Support {
        Support::Interval(scalar(params, 0), scalar(params, 1))
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), lo, hi) = (value.as_scalar(), scalar(params, 0), scalar(params, 1)) else {
            return f64::NEG_INFINITY;
        };
        if !(hi > lo) || x < lo || x > hi {
            return f64::NEG_INFINITY;
        }
        -(hi - lo).ln()
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        let (lo, hi) = (scalar(params, 0), scalar(params, 1));
        if !(hi > lo) {
            return Value::Scalar(f64::NAN);
        }
        Value::Scalar(rng.random_range(lo..hi))
    }
}

pub struct Beta;

impl Distribution for Beta {
    fn params(&self) -> &'static [ParamSpec] {
        &[
            ParamSpec { name: "alpha", rank: 0 },
            ParamSpec { name: "beta", rank: 0 },
        ]
    }

    fn support(&self, _params: &[Value]) -> Support {
        Support::UnitInterval
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), a, b) = (value.as_scalar(), scalar(params, 0), scalar(params, 1)) else {
            return f64::NEG_INFINITY;
        };
        if !(a > 0.0) || !(b > 0.0) || !(0.0..=1.0).contains(&x) {
            return f64::NEG_INFINITY;
        }
        let ln_norm = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b);
        if x == 0.0 || x == 1.0 {
            // Density is finite at the boundary only for the uniform edges.
            if (x == 0.0 && a < 1.0) || (x == 1.0 && b < 1.0) {
                return f64::INFINITY;
            }
            if (x == 0.0 && a > 1.0) || (x == 1.0 && b > 1.0) {
                return f64::NEG_INFINITY;
            }
            return ln_norm;
        }
        ln_norm + (a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln()
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        let (a, b) = (scalar(params, 0), scalar(params, 1));
        match rand_distr::Beta::new(a, b) {
            Ok(d) => Value::Scalar(d.sample(&mut *rng)),
            Err(_) => Value::Scalar(f64::NAN),
        }
    }
}

pub struct Gamma;

impl Distribution for Gamma {
    fn params(&self) -> &'static [ParamSpec] {
        &[
            ParamSpec { name: "shape", rank: 0 },
            ParamSpec { name: "rate", rank: 0 },
        ]
    }

    fn alternates(&self) -> &'static [AltParam] {
        &[AltParam {
            name: "scale",
            replaces: "rate",
            convert: |e| e.recip(),
        }]
    }

    fn support(&self, _params: &[Value]) -> Support {
        Support::Positive
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), shape, rate) = (value.as_scalar(), scalar(params, 0), scalar(params, 1))
        else {
            return f64::NEG_INFINITY;
        };
        if !(shape > 0.0) || !(rate > 0.0) || !(x > 0.0) || !x.is_finite() {
            return f64::NEG_INFINITY;
        }
        shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        let (shape, rate) = (scalar(params, 0), scalar(params, 1));
        match rand_distr::Gamma::new(shape, rate.recip()) {
            Ok(d) => Value::Scalar(d.sample(&mut *rng)),
            Err(_) => Value::Scalar(f64::NAN),
        }
    }
}

pub struct Exponential;

impl Distribution for Exponential {
    fn params(&self) -> &'static [ParamSpec] {
        &[ParamSpec { name: "rate", rank: 0 }]
    }

    fn support(&self, _params: &[Value]) -> Support {
        Support::Positive
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), rate) = (value.as_scalar(), scalar(params, 0)) else {
            return f64::NEG_INFINITY;
        };
        if !(rate > 0.0) || !(x >= 0.0) || !x.is_finite() {
            return f64::NEG_INFINITY;
        }
        rate.ln() - rate * x
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        match rand_distr::Exp::new(scalar(params, 0)) {
            Ok(d) => Value::Scalar(d.sample(&mut *rng)),
            Err(_) => Value::Scalar(f64::NAN),
        }
    }
}

pub struct Bernoulli;

impl Distribution for Bernoulli {
    fn params(&self) -> &'static [ParamSpec] {
        &[ParamSpec { name: "prob", rank: 0 }]
    }

    fn support(&self, _params: &[Value]) -> Support {
        Support::BoundedInt(1)
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), p) = (value.as_scalar(), scalar(params, 0)) else {
            return f64::NEG_INFINITY;
        };
        if !(0.0..=1.0).contains(&p) {
            return f64::NEG_INFINITY;
        }
        if x == 1.0 {
            p.ln()
        } else if x == 0.0 {
            (1.0 - p).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        let p = scalar(params, 0);
        let u: f64 = rng.random();
        Value::Scalar(if u < p { 1.0 } else { 0.0 })
    }
}

pub struct Binomial;

impl Distribution for Binomial {
    fn params(&self) -> &'static [ParamSpec] {
        &[
            ParamSpec { name: "prob", rank: 0 },
            ParamSpec { name: "size", rank: 0 },
        ]
    }

    fn support(&self, params: &[Value]) -> Support {
        Support::BoundedInt(scalar(params, 1) as u64)
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), p, n) = (value.as_scalar(), scalar(params, 0), scalar(params, 1)) else {
            return f64::NEG_INFINITY;
        };
        if !(0.0..=1.0).contains(&p) || x < 0.0 || x > n || x.fract() != 0.0 {
            return f64::NEG_INFINITY;
        }
        let ln_choose = ln_gamma(n + 1.0) - ln_gamma(x + 1.0) - ln_gamma(n - x + 1.0);
        let ln_p = if x == 0.0 { 0.0 } else { x * p.ln() };
        let ln_q = if x == n { 0.0 } else { (n - x) * (1.0 - p).ln() };
        ln_choose + ln_p + ln_q
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        let (p, n) = (scalar(params, 0), scalar(params, 1));
        match rand_distr::Binomial::new(n as u64, p) {
            Ok(d) => Value::Scalar(d.sample(&mut *rng) as f64),
            Err(_) => Value::Scalar(f64::NAN),
        }
    }
}

pub struct Poisson;

impl Distribution for Poisson {
    fn params(&self) -> &'static [ParamSpec] {
        &[ParamSpec { name: "rate", rank: 0 }]
    }

    fn support(&self, _params: &[Value]) -> Support {
        Support::NonNegativeInt
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), rate) = (value.as_scalar(), scalar(params, 0)) else {
            return f64::NEG_INFINITY;
        };
        if !(rate > 0.0) || x < 0.0 || x.fract() != 0.0 {
            return f64::NEG_INFINITY;
        }
        x * rate.ln() - rate - ln_gamma(x + 1.0)
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        match rand_distr::Poisson::new(scalar(params, 0)) {
            Ok(d) => {
                let x: f64 = d.sample(&mut *rng);
                Value::Scalar(x)
            }
            Err(_) => Value::Scalar(f64::NAN),
        }
    }
}

// ---------------------------------------------------------------------------
// Multivariate distributions
// ---------------------------------------------------------------------------

pub struct Dirichlet;

impl Distribution for Dirichlet {
    fn value_rank(&self) -> usize {
        1
    }

    fn params(&self) -> &'static [ParamSpec] {
        &[ParamSpec { name: "alpha", rank: 1 }]
    }

    fn support(&self, _params: &[Value]) -> Support {
        Support::Simplex
    }

    fn proposable(&self) -> bool {
        false
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), Some(alpha)) = (value.as_vector(), params[0].as_vector()) else {
            return f64::NEG_INFINITY;
        };
        if x.len() != alpha.len() || alpha.iter().any(|&a| !(a > 0.0)) {
            return f64::NEG_INFINITY;
        }
        let total: f64 = x.iter().sum();
        if x.iter().any(|&xi| !(xi > 0.0)) || (total - 1.0).abs() > 1e-8 {
            return f64::NEG_INFINITY;
        }
        let alpha_sum: f64 = alpha.iter().sum();
        let mut logp = ln_gamma(alpha_sum);
        for (&xi, &ai) in x.iter().zip(alpha) {
            logp += (ai - 1.0) * xi.ln() - ln_gamma(ai);
        }
        logp
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        let Some(alpha) = params[0].as_vector() else {
            return Value::Scalar(f64::NAN);
        };
        // Normalized independent Gamma(alpha_i, 1) draws.
        let mut out = Vec::with_capacity(alpha.len());
        for &a in alpha {
            match rand_distr::Gamma::new(a, 1.0) {
                Ok(d) => out.push(d.sample(&mut *rng)),
                Err(_) => return Value::Vector(vec![f64::NAN; alpha.len()]),
            }
        }
        let total: f64 = out.iter().sum();
        for v in &mut out {
            *v /= total;
        }
        Value::Vector(out)
    }
}

pub struct MvNormal;

impl Distribution for MvNormal {
    fn value_rank(&self) -> usize {
        1
    }

    fn params(&self) -> &'static [ParamSpec] {
        &[
            ParamSpec { name: "mean", rank: 1 },
            ParamSpec { name: "cov", rank: 2 },
        ]
    }

    fn support(&self, _params: &[Value]) -> Support {
        Support::RealVector
    }

    fn log_density(&self, value: &Value, params: &[Value]) -> f64 {
        let (Some(x), Some(mean)) = (value.as_vector(), params[0].as_vector()) else {
            return f64::NEG_INFINITY;
        };
        let Value::Matrix { rows, cols, data } = &params[1] else {
            return f64::NEG_INFINITY;
        };
        let n = x.len();
        if mean.len() != n || *rows != n || *cols != n {
            return f64::NEG_INFINITY;
        }
        let Some(l) = cholesky_lower(data, n) else {
            return f64::NEG_INFINITY;
        };
        let diff: Vec<f64> = x.iter().zip(mean).map(|(x, m)| x - m).collect();
        let mut y = vec![0.0; n];
        forward_solve(&l, &diff, &mut y);
        let quad: f64 = y.iter().map(|v| v * v).sum();
        -0.5 * (quad + logdet_from_cholesky(&l, n)) - n as f64 * LN_SQRT_2PI
    }

    fn draw(&self, rng: &mut dyn RngCore, params: &[Value]) -> Value {
        let Some(mean) = params[0].as_vector() else {
            return Value::Scalar(f64::NAN);
        };
        let n = mean.len();
        let Value::Matrix { data, .. } = &params[1] else {
            return Value::Vector(vec![f64::NAN; n]);
        };
        let Some(l) = cholesky_lower(data, n) else {
            return Value::Vector(vec![f64::NAN; n]);
        };
        let z: Vec<f64> = (0..n).map(|_| StandardNormal.sample(&mut *rng)).collect();
        let mut out = vec![0.0; n];
        lower_tri_mul(&l, &z, &mut out);
        for (o, m) in out.iter_mut().zip(mean) {
            *o += m;
        }
        Value::Vector(out)
    }
}
