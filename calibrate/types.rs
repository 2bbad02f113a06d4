use ndarray::{Array1, ArrayView1, s};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Intercept followed by one slope per covariate, in covariate order.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coefficients(Vec<f64>);

impl Coefficients {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// `None` for an empty coefficient vector.
    pub fn intercept(&self) -> Option<f64> {
        self.0.first().copied()
    }

    pub fn slopes(&self) -> &[f64] {
        self.0.get(1..).unwrap_or(&[])
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.0.as_slice())
    }
}

impl Deref for Coefficients {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Array1<f64>> for Coefficients {
    fn from(values: Array1<f64>) -> Self {
        Self(values.to_vec())
    }
}

/// Fitted location (`alpha`) and log-scale (`beta`) coefficients.
///
/// The flat optimizer vector is `[alpha_0, .., alpha_k, beta_0, .., beta_k]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    pub alpha: Coefficients,
    pub beta: Coefficients,
}

impl CalibrationParameters {
    /// Splits a flat parameter vector for `num_covariates` covariates.
    /// Returns `None` if the length is not `2 * (num_covariates + 1)`.
    pub fn from_flat(flat: ArrayView1<'_, f64>, num_covariates: usize) -> Option<Self> {
        let width = num_covariates + 1;
        if flat.len() != 2 * width {
            return None;
        }
        Some(Self {
            alpha: Coefficients::new(flat.slice(s![..width]).to_vec()),
            beta: Coefficients::new(flat.slice(s![width..]).to_vec()),
        })
    }

    pub fn to_flat(&self) -> Array1<f64> {
        self.alpha.iter().chain(self.beta.iter()).copied().collect()
    }

    /// Maps coefficients fitted to `(prs - center) / spread` back to raw PRS
    /// units: the location block scales by `spread` and its intercept shifts
    /// by `center`; the log-scale intercept shifts by `ln(spread)`.
    pub fn to_response_units(&self, center: f64, spread: f64) -> Self {
        let alpha = self
            .alpha
            .iter()
            .enumerate()
            .map(|(j, &a)| if j == 0 { center + spread * a } else { spread * a })
            .collect();
        let beta = self
            .beta
            .iter()
            .enumerate()
            .map(|(j, &b)| if j == 0 { b + spread.ln() } else { b })
            .collect();
        Self {
            alpha: Coefficients::new(alpha),
            beta: Coefficients::new(beta),
        }
    }

    pub fn num_covariates(&self) -> usize {
        self.alpha.len().saturating_sub(1)
    }

    /// True when both blocks have `num_covariates + 1` finite entries.
    pub fn is_consistent(&self, num_covariates: usize) -> bool {
        self.alpha.len() == num_covariates + 1
            && self.beta.len() == num_covariates + 1
            && self.alpha.iter().chain(self.beta.iter()).all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn flat_vector_splits_intercept_first() {
        let flat = array![1.0, 2.0, 3.0, -1.0, -2.0, -3.0];
        let params = CalibrationParameters::from_flat(flat.view(), 2).unwrap();
        assert_eq!(params.alpha.intercept(), Some(1.0));
        assert_eq!(params.alpha.slopes(), &[2.0, 3.0]);
        assert_eq!(params.beta.intercept(), Some(-1.0));
        assert_eq!(params.beta.slopes(), &[-2.0, -3.0]);
        assert_eq!(params.to_flat(), flat);
        assert_eq!(params.num_covariates(), 2);
    }

    #[test]
    fn empty_coefficients_have_no_intercept_or_slopes() {
        let empty = Coefficients::new(Vec::new());
        assert_eq!(empty.intercept(), None);
        assert!(empty.slopes().is_empty());
        let only_intercept = Coefficients::new(vec![2.5]);
        assert_eq!(only_intercept.intercept(), Some(2.5));
        assert!(only_intercept.slopes().is_empty());
    }

    #[test]
    fn response_units_undo_centering_and_scaling() {
        let working = CalibrationParameters {
            alpha: Coefficients::new(vec![0.1, 0.5]),
            beta: Coefficients::new(vec![-0.2, 0.3]),
        };
        let raw = working.to_response_units(1000.0, 50.0);
        assert_abs_diff_eq!(raw.alpha[0], 1005.0, epsilon = 1e-9);
        assert_abs_diff_eq!(raw.alpha[1], 25.0, epsilon = 1e-9);
        assert_abs_diff_eq!(raw.beta[0], -0.2 + 50.0_f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(raw.beta[1], 0.3, epsilon = 1e-12);

        // A working z of 1 at a covariate row of 2 is the same raw score.
        let mu_w = 0.1 + 0.5 * 2.0;
        let sigma_w = (-0.2_f64 + 0.3 * 2.0).exp();
        let y = 1000.0 + 50.0 * (mu_w + sigma_w);
        let mu = raw.alpha[0] + raw.alpha[1] * 2.0;
        let sigma = (raw.beta[0] + raw.beta[1] * 2.0).exp();
        assert_abs_diff_eq!((y - mu) / sigma, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(CalibrationParameters::from_flat(array![1.0, 2.0, 3.0].view(), 1).is_none());
    }

    #[test]
    fn consistency_checks_shape_and_finiteness() {
        let params = CalibrationParameters {
            alpha: Coefficients::new(vec![0.0, 1.0]),
            beta: Coefficients::new(vec![0.0, f64::NAN]),
        };
        assert!(!params.is_consistent(1));
        let params = CalibrationParameters {
            alpha: Coefficients::new(vec![0.0, 1.0]),
            beta: Coefficients::new(vec![0.0, 0.5]),
        };
        assert!(params.is_consistent(1));
        assert!(!params.is_consistent(2));
    }
}
