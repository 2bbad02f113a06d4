//! # Covariate Standardization
//!
//! Centers and scales each ancestry covariate column using statistics learned
//! once from the fit population. The learned `StandardizationState` is the
//! only way to transform covariates, so scoring data can never be
//! standardized against its own statistics.

use crate::probability::mean_and_std;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relative threshold below which a column is treated as having zero variance.
pub const DEGENERATE_SCALE_TOLERANCE: f64 = 1e-12;

/// Scale substituted for a zero-variance column. Centering still applies, so
/// the column contributes exactly zero at fit time.
pub const DEGENERATE_SCALE_FALLBACK: f64 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StandardizeError {
    #[error("Cannot learn standardization statistics from a matrix with no rows.")]
    EmptyMatrix,
    #[error("Covariate matrix has {found} columns, but the standardization was fit on {expected}.")]
    MismatchedColumnCount { found: usize, expected: usize },
    #[error("Non-finite covariate value at row {row}, column {column}.")]
    NonFinite { row: usize, column: usize },
}

/// Per-column (mean, scale) pairs learned at fit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizationState {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardizationState {
    /// Learns per-column statistics from `pcs` and returns the state together
    /// with the standardized matrix.
    pub fn fit_transform(pcs: ArrayView2<'_, f64>) -> Result<(Self, Array2<f64>), StandardizeError> {
        if pcs.nrows() == 0 {
            return Err(StandardizeError::EmptyMatrix);
        }
        check_finite(pcs)?;

        let mut mean = Vec::with_capacity(pcs.ncols());
        let mut scale = Vec::with_capacity(pcs.ncols());
        for (j, column) in pcs.axis_iter(Axis(1)).enumerate() {
            let (m, s) = mean_and_std(column);
            let s_use = if s <= DEGENERATE_SCALE_TOLERANCE * m.abs().max(1.0) {
                log::warn!(
                    "Covariate column {} has zero variance (mean {:.6}); using scale {} so it only contributes a constant offset.",
                    j + 1,
                    m,
                    DEGENERATE_SCALE_FALLBACK
                );
                DEGENERATE_SCALE_FALLBACK
            } else {
                s
            };
            mean.push(m);
            scale.push(s_use);
        }

        let state = Self { mean, scale };
        let standardized = state.apply(pcs);
        Ok((state, standardized))
    }

    /// Rebuilds a state from stored statistics, e.g. a loaded model artifact.
    /// Returns `None` if the lengths differ or any scale is not a positive finite value.
    pub fn from_parts(mean: Vec<f64>, scale: Vec<f64>) -> Option<Self> {
        if mean.len() != scale.len()
            || mean.iter().any(|m| !m.is_finite())
            || scale.iter().any(|s| !(s.is_finite() && *s > 0.0))
        {
            return None;
        }
        Some(Self { mean, scale })
    }

    /// Standardizes `pcs` with the stored statistics. Nothing is recomputed.
    pub fn transform(&self, pcs: ArrayView2<'_, f64>) -> Result<Array2<f64>, StandardizeError> {
        if pcs.ncols() != self.mean.len() {
            return Err(StandardizeError::MismatchedColumnCount {
                found: pcs.ncols(),
                expected: self.mean.len(),
            });
        }
        check_finite(pcs)?;
        Ok(self.apply(pcs))
    }

    pub fn num_columns(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    fn apply(&self, pcs: ArrayView2<'_, f64>) -> Array2<f64> {
        let mean = Array1::from_vec(self.mean.clone());
        let scale = Array1::from_vec(self.scale.clone());
        let mut out = pcs.to_owned();
        out -= &mean;
        out /= &scale;
        out
    }
}

fn check_finite(pcs: ArrayView2<'_, f64>) -> Result<(), StandardizeError> {
    for ((row, column), value) in pcs.indexed_iter() {
        if !value.is_finite() {
            return Err(StandardizeError::NonFinite { row, column });
        }
    }
    Ok(())
}
