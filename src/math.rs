//! Small dense linear-algebra helpers for the block samplers and the
//! multivariate normal density.
//!
//! Matrices are row-major `Vec<f64>` of dimension `n * n`. The sampler
//! blocks this crate deals with are small (a handful of correlated
//! parameters), so a direct Cholesky is all that is needed.

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix.
///
/// Returns `None` if the matrix is not positive definite.
pub fn cholesky_lower(a: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Some(l)
}

/// `out = L * z` for a lower-triangular `L`.
pub fn lower_tri_mul(l: &[f64], z: &[f64], out: &mut [f64]) {
    let n = z.len();
    debug_assert_eq!(l.len(), n * n);
    for i in 0..n {
        let mut acc = 0.0;
        for j in 0..=i {
            acc += l[i * n + j] * z[j];
        }
        out[i] = acc;
    }
}

/// Solve `L y = b` by forward substitution.
pub fn forward_solve(l: &[f64], b: &[f64], y: &mut [f64]) {
    let n = b.len();
    for i in 0..n {
        let mut acc = b[i];
        for j in 0..i {
            acc -= l[i * n + j] * y[j];
        }
        y[i] = acc / l[i * n + i];
    }
}

/// `log |A|` from the Cholesky factor of `A`.
pub fn logdet_from_cholesky(l: &[f64], n: usize) -> f64 {
    (0..n).map(|i| 2.0 * l[i * n + i].ln()).sum()
}

/// Running empirical mean and covariance of a vector-valued sample stream.
///
/// Used by the adaptive block random-walk to estimate its proposal
/// covariance from the chain history.
#[derive(Debug, Clone)]
pub struct RunningCovariance {
    dim: usize,
    count: u64,
    mean: Vec<f64>,
    /// Sum of outer products of deviations, row-major.
    m2: Vec<f64>,
}

impl RunningCovariance {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim * dim],
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn update(&mut self, x: &[f64]) {
        debug_assert_eq!(x.len(), self.dim);
        self.count += 1;
        let w = 1.0 / self.count as f64;
        let delta: Vec<f64> = x.iter().zip(&self.mean).map(|(x, m)| x - m).collect();
        for (m, d) in self.mean.iter_mut().zip(&delta) {
            *m += d * w;
        }
        for i in 0..self.dim {
            for j in 0..self.dim {
                // delta holds deviations from the pre-update mean; pairing
                // with deviations from the post-update mean gives the
                // standard online covariance update.
                self.m2[i * self.dim + j] += delta[i] * (x[j] - self.mean[j]);
            }
        }
    }

    /// Current covariance estimate, with `jitter` added to the diagonal so
    /// the result stays positive definite for degenerate histories.
    pub fn covariance(&self, jitter: f64) -> Option<Vec<f64>> {
        if self.count < 2 {
            return None;
        }
        let denom = (self.count - 1) as f64;
        let mut cov: Vec<f64> = self.m2.iter().map(|v| v / denom).collect();
        for i in 0..self.dim {
            cov[i * self.dim + i] += jitter;
        }
        Some(cov)
    }
}
