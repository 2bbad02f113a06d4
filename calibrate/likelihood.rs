//! # Heteroscedastic Gaussian Likelihood
//!
//! Models each raw score as `prs_i ~ Normal(mu_i, sigma_i)` with
//!
//! ```text
//! mu_i    = alpha_0 + z_i · alpha_{1..k}
//! sigma_i = exp(beta_0 + z_i · beta_{1..k})
//! ```
//!
//! where `z_i` is the standardized covariate row. The exponential keeps the
//! scale positive without constraining the optimizer. The objective is the
//! negative log-likelihood up to its additive constant:
//!
//! ```text
//! sum_i [ log(sigma_i) + 0.5 * ((prs_i - mu_i) / sigma_i)^2 ]
//! ```

use crate::optimizer::Objective;
use ndarray::{Array1, ArrayView1, ArrayView2, s};
use thiserror::Error;

/// Smallest predicted scale admitted before division and logarithm.
pub const SCALE_FLOOR: f64 = 1e-8;

/// Bound on the log-scale linear predictor, keeping `exp` finite.
pub const LOG_SCALE_CLAMP: f64 = 700.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LikelihoodError {
    #[error("Score vector has {scores} entries but the covariate matrix has {rows} rows.")]
    LengthMismatch { scores: usize, rows: usize },
    #[error("Cannot build a likelihood over zero individuals.")]
    Empty,
}

/// Number of free parameters for `k` covariates: an intercept and `k` slopes
/// for the location, and the same for the log-scale.
pub fn num_parameters(num_covariates: usize) -> usize {
    2 * (num_covariates + 1)
}

/// Linear predictor `coef_0 + Z · coef_{1..k}`.
fn linear_predictor(covariates: ArrayView2<'_, f64>, coef: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut eta = covariates.dot(&coef.slice(s![1..]));
    eta += coef[0];
    eta
}

/// Scale for a log-scale predictor, with the clamp and floor applied.
/// The boolean is false where the clamp or floor is active.
#[inline]
fn scale_from_log(eta: f64) -> (f64, bool) {
    let clamped = eta.clamp(-LOG_SCALE_CLAMP, LOG_SCALE_CLAMP);
    let raw = clamped.exp();
    if raw < SCALE_FLOOR {
        (SCALE_FLOOR, false)
    } else {
        (raw, clamped == eta)
    }
}

/// Predicted location `mu` and floored scale `sigma` for standardized covariates.
pub fn location_scale(
    covariates: ArrayView2<'_, f64>,
    alpha: ArrayView1<'_, f64>,
    beta: ArrayView1<'_, f64>,
) -> (Array1<f64>, Array1<f64>) {
    let mu = linear_predictor(covariates, alpha);
    let sigma = linear_predictor(covariates, beta).mapv(|eta| scale_from_log(eta).0);
    (mu, sigma)
}

/// Negative log-likelihood bound to one set of scores and standardized covariates.
#[derive(Debug, Clone, Copy)]
pub struct HeteroscedasticLikelihood<'p, 'c> {
    prs: ArrayView1<'p, f64>,
    covariates: ArrayView2<'c, f64>,
}

impl<'p, 'c> HeteroscedasticLikelihood<'p, 'c> {
    pub fn new(
        prs: ArrayView1<'p, f64>,
        covariates: ArrayView2<'c, f64>,
    ) -> Result<Self, LikelihoodError> {
        if prs.len() != covariates.nrows() {
            return Err(LikelihoodError::LengthMismatch {
                scores: prs.len(),
                rows: covariates.nrows(),
            });
        }
        if prs.is_empty() {
            return Err(LikelihoodError::Empty);
        }
        Ok(Self { prs, covariates })
    }

    pub fn num_covariates(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn num_individuals(&self) -> usize {
        self.prs.len()
    }

    fn split<'a>(&self, params: ArrayView1<'a, f64>) -> (ArrayView1<'a, f64>, ArrayView1<'a, f64>) {
        let width = self.num_covariates() + 1;
        (params.slice_move(s![..width]), params.slice_move(s![width..]))
    }

    /// Summed negative log-likelihood at `params = [alpha, beta]`.
    pub fn negative_log_likelihood(&self, params: ArrayView1<'_, f64>) -> f64 {
        let (alpha, beta) = self.split(params);
        let (mu, sigma) = location_scale(self.covariates, alpha, beta);
        self.prs
            .iter()
            .zip(mu.iter())
            .zip(sigma.iter())
            .map(|((&y, &m), &sd)| {
                let r = (y - m) / sd;
                sd.ln() + 0.5 * r * r
            })
            .sum()
    }

    /// Closed-form gradient of [`Self::negative_log_likelihood`].
    ///
    /// For the location block the derivative is `-r_i / sigma_i * x_ij`; for the
    /// log-scale block it is `(1 - r_i^2) * x_ij`, zero wherever the scale is
    /// floored or clamped. `x_i0 = 1` carries the intercepts.
    pub fn gradient_of_sum(&self, params: ArrayView1<'_, f64>) -> Array1<f64> {
        let k = self.num_covariates();
        let (alpha, beta) = self.split(params);
        let mu = linear_predictor(self.covariates, alpha);
        let eta = linear_predictor(self.covariates, beta);

        let n = self.prs.len();
        let mut location_weight = Array1::zeros(n);
        let mut scale_weight = Array1::zeros(n);
        for i in 0..n {
            let (sd, active) = scale_from_log(eta[i]);
            let r = (self.prs[i] - mu[i]) / sd;
            location_weight[i] = -r / sd;
            if active {
                scale_weight[i] = 1.0 - r * r;
            }
        }

        let mut grad = Array1::zeros(num_parameters(k));
        grad[0] = location_weight.sum();
        grad.slice_mut(s![1..k + 1])
            .assign(&self.covariates.t().dot(&location_weight));
        grad[k + 1] = scale_weight.sum();
        grad.slice_mut(s![k + 2..])
            .assign(&self.covariates.t().dot(&scale_weight));
        grad
    }
}

/// The optimizer sees the per-individual mean; the minimizer is unchanged and
/// the gradient tolerance no longer depends on cohort size.
impl Objective for HeteroscedasticLikelihood<'_, '_> {
    fn dimension(&self) -> usize {
        num_parameters(self.num_covariates())
    }

    fn value(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.negative_log_likelihood(x) / self.num_individuals() as f64
    }

    fn gradient(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        self.gradient_of_sum(x) / self.num_individuals() as f64
    }
}
