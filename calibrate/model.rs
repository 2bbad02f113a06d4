use crate::likelihood::{self, HeteroscedasticLikelihood, LikelihoodError};
use crate::optimizer::{
    NumericGradient, OptimizationOutcome, OptimizerError, OptimizerOptions, minimize,
};
use crate::probability::{first_non_finite, mean_and_std};
use crate::standardize::{
    DEGENERATE_SCALE_FALLBACK, DEGENERATE_SCALE_TOLERANCE, StandardizationState, StandardizeError,
};
use crate::types::{CalibrationParameters, Coefficients};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// How the optimizer obtains gradients of the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientMode {
    /// Closed-form gradient of the Gaussian negative log-likelihood.
    #[default]
    Analytic,
    /// Central finite differences of the objective value.
    FiniteDifference,
}

/// Settings for one calibration fit. This is the unfit half of the
/// calibrator; [`CalibratorConfig::fit`] produces the immutable
/// [`FittedCalibrator`].
#[derive(Debug, Clone)]
pub struct CalibratorConfig {
    pub num_pcs: usize,
    /// Covariate names, in the column order of the PC matrix.
    pub pc_names: Vec<String>,
    pub optimizer: OptimizerOptions,
    pub gradient: GradientMode,
}

impl CalibratorConfig {
    /// Default configuration with covariates named `PC1..PCk`.
    pub fn new(num_pcs: usize) -> Self {
        Self {
            num_pcs,
            pc_names: (1..=num_pcs).map(|i| format!("PC{i}")).collect(),
            optimizer: OptimizerOptions::default(),
            gradient: GradientMode::default(),
        }
    }

    pub fn with_pc_names(mut self, pc_names: Vec<String>) -> Self {
        self.num_pcs = pc_names.len();
        self.pc_names = pc_names;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerOptions) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_gradient(mut self, gradient: GradientMode) -> Self {
        self.gradient = gradient;
        self
    }
}

/// Errors raised while fitting or scoring a calibration model.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Invalid calibration input: {0}")]
    InvalidInput(String),
    #[error("Scoring data has {found} PC columns, but the model was fit on {expected}.")]
    MismatchedPcCount { found: usize, expected: usize },
    #[error("Covariate standardization failed: {0}")]
    Standardize(#[from] StandardizeError),
    #[error("Numerically degenerate calibration: {0}")]
    NumericDegeneracy(String),
    #[error("Likelihood optimization failed: {0}")]
    Optimization(String),
}

impl From<LikelihoodError> for CalibrationError {
    fn from(err: LikelihoodError) -> Self {
        CalibrationError::InvalidInput(err.to_string())
    }
}

impl From<OptimizerError> for CalibrationError {
    fn from(err: OptimizerError) -> Self {
        match err {
            OptimizerError::NonFiniteStart(_) => CalibrationError::NumericDegeneracy(err.to_string()),
            other => CalibrationError::Optimization(other.to_string()),
        }
    }
}

/// Custom error type for model loading and saving.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Model file is not a valid calibration artifact: {0}")]
    InvalidArtifact(String),
}

/// Optimizer diagnostics kept alongside the fitted parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub converged: bool,
    pub iterations: usize,
    /// Negative log-likelihood per individual at the returned parameters.
    pub mean_negative_log_likelihood: f64,
    /// Gradient norm of the objective on the centered and scaled PRS.
    pub gradient_norm: f64,
}

impl From<&OptimizationOutcome> for ConvergenceReport {
    fn from(outcome: &OptimizationOutcome) -> Self {
        Self {
            converged: outcome.converged,
            iterations: outcome.iterations,
            mean_negative_log_likelihood: outcome.value,
            gradient_norm: outcome.gradient_norm,
        }
    }
}

/// One independent batch of individuals to score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreBatch<'a> {
    pub prs: ArrayView1<'a, f64>,
    pub pcs: ArrayView2<'a, f64>,
}

/// The self-contained, fitted calibration model. Immutable once built; safe
/// to share across threads for scoring. This is the structure that gets saved
/// to and loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedCalibrator {
    num_pcs: usize,
    pc_names: Vec<String>,
    standardization: StandardizationState,
    parameters: CalibrationParameters,
    convergence: ConvergenceReport,
}

impl CalibratorConfig {
    /// Standardizes `pcs`, maximizes the heteroscedastic likelihood from an
    /// all-zero start, and returns the fitted model.
    ///
    /// The optimizer works on the PRS centered and scaled by its cohort mean
    /// and standard deviation, so the zero start sits near the optimum
    /// whatever the units of the raw score. The fitted coefficients are mapped
    /// back to raw PRS units before they are stored.
    pub fn fit(
        &self,
        prs: ArrayView1<'_, f64>,
        pcs: ArrayView2<'_, f64>,
    ) -> Result<FittedCalibrator, CalibrationError> {
        self.validate_fit_inputs(prs, pcs)?;
        log::info!(
            "Fitting ancestry calibration on {} individuals with {} PCs.",
            prs.len(),
            self.num_pcs
        );

        let (standardization, standardized) = StandardizationState::fit_transform(pcs)?;
        let (center, spread) = response_scale(prs);
        log::debug!("Fitting on PRS centered at {center:.6} and scaled by {spread:.6}.");
        let working_prs = prs.mapv(|y| (y - center) / spread);
        let objective = HeteroscedasticLikelihood::new(working_prs.view(), standardized.view())?;
        let initial = Array1::zeros(likelihood::num_parameters(self.num_pcs));

        let outcome = match self.gradient {
            GradientMode::Analytic => minimize(&objective, initial, &self.optimizer)?,
            GradientMode::FiniteDifference => {
                minimize(&NumericGradient(&objective), initial, &self.optimizer)?
            }
        };

        let parameters = CalibrationParameters::from_flat(outcome.point.view(), self.num_pcs)
            .map(|working| working.to_response_units(center, spread))
            .filter(|p| p.is_consistent(self.num_pcs))
            .ok_or_else(|| {
                CalibrationError::NumericDegeneracy(format!(
                    "optimizer returned non-finite parameters {:?}",
                    outcome.point.to_vec()
                ))
            })?;

        let mut convergence = ConvergenceReport::from(&outcome);
        convergence.mean_negative_log_likelihood += spread.ln();
        if convergence.converged {
            log::info!(
                "Calibration converged in {} iterations (mean NLL {:.6}, gradient norm {:.3e}).",
                convergence.iterations,
                convergence.mean_negative_log_likelihood,
                convergence.gradient_norm
            );
        } else {
            log::warn!(
                "Calibration did not converge after {} iterations (gradient norm {:.3e}); using the best iterate found.",
                convergence.iterations,
                convergence.gradient_norm
            );
        }

        Ok(FittedCalibrator {
            num_pcs: self.num_pcs,
            pc_names: self.pc_names.clone(),
            standardization,
            parameters,
            convergence,
        })
    }

    fn validate_fit_inputs(
        &self,
        prs: ArrayView1<'_, f64>,
        pcs: ArrayView2<'_, f64>,
    ) -> Result<(), CalibrationError> {
        if self.pc_names.len() != self.num_pcs {
            return Err(CalibrationError::InvalidInput(format!(
                "{} PC names given for {} PCs",
                self.pc_names.len(),
                self.num_pcs
            )));
        }
        if prs.is_empty() {
            return Err(CalibrationError::InvalidInput(
                "no individuals to fit on".to_string(),
            ));
        }
        if prs.len() != pcs.nrows() {
            return Err(CalibrationError::InvalidInput(format!(
                "{} PRS values but {} PC rows",
                prs.len(),
                pcs.nrows()
            )));
        }
        if pcs.ncols() != self.num_pcs {
            return Err(CalibrationError::InvalidInput(format!(
                "PC matrix has {} columns, expected {}",
                pcs.ncols(),
                self.num_pcs
            )));
        }
        if let Some(i) = first_non_finite(prs) {
            return Err(CalibrationError::InvalidInput(format!(
                "PRS value at position {i} is not finite"
            )));
        }
        Ok(())
    }
}

/// Cohort mean and standard deviation of the PRS. A constant score keeps
/// unit spread so the working transform stays finite.
fn response_scale(prs: ArrayView1<'_, f64>) -> (f64, f64) {
    let (center, spread) = mean_and_std(prs);
    if spread <= DEGENERATE_SCALE_TOLERANCE * center.abs().max(1.0) {
        log::warn!("All PRS values are equal ({center:.6}); the fitted scale will collapse.");
        (center, DEGENERATE_SCALE_FALLBACK)
    } else {
        (center, spread)
    }
}

impl FittedCalibrator {
    /// Ancestry-adjusted z-scores `(prs - mu) / sigma`, one per individual.
    /// Covariates are standardized with the statistics stored at fit time.
    pub fn score(
        &self,
        prs: ArrayView1<'_, f64>,
        pcs: ArrayView2<'_, f64>,
    ) -> Result<Array1<f64>, CalibrationError> {
        if prs.len() != pcs.nrows() {
            return Err(CalibrationError::InvalidInput(format!(
                "{} PRS values but {} PC rows",
                prs.len(),
                pcs.nrows()
            )));
        }
        if let Some(i) = first_non_finite(prs) {
            return Err(CalibrationError::InvalidInput(format!(
                "PRS value at position {i} is not finite"
            )));
        }
        let (mu, sigma) = self.predict_location_scale(pcs)?;
        let floored = sigma
            .iter()
            .filter(|&&sd| sd <= likelihood::SCALE_FLOOR)
            .count();
        if floored > 0 {
            log::warn!(
                "Predicted scale hit the floor of {:e} for {floored} individual(s); their z-scores are extreme.",
                likelihood::SCALE_FLOOR
            );
        }
        Ok((&prs - &mu) / &sigma)
    }

    /// Expected PRS and its spread for each covariate row.
    pub fn predict_location_scale(
        &self,
        pcs: ArrayView2<'_, f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), CalibrationError> {
        if pcs.ncols() != self.num_pcs {
            return Err(CalibrationError::MismatchedPcCount {
                found: pcs.ncols(),
                expected: self.num_pcs,
            });
        }
        let standardized = self.standardization.transform(pcs)?;
        Ok(likelihood::location_scale(
            standardized.view(),
            self.parameters.alpha.as_view(),
            self.parameters.beta.as_view(),
        ))
    }

    /// Scores independent batches in parallel. Output order matches input order.
    pub fn score_batches(
        &self,
        batches: &[ScoreBatch<'_>],
    ) -> Result<Vec<Array1<f64>>, CalibrationError> {
        batches
            .par_iter()
            .map(|batch| self.score(batch.prs, batch.pcs))
            .collect()
    }

    pub fn num_pcs(&self) -> usize {
        self.num_pcs
    }

    pub fn pc_names(&self) -> &[String] {
        &self.pc_names
    }

    pub fn alpha(&self) -> &Coefficients {
        &self.parameters.alpha
    }

    pub fn beta(&self) -> &Coefficients {
        &self.parameters.beta
    }

    pub fn parameters(&self) -> &CalibrationParameters {
        &self.parameters
    }

    pub fn standardization(&self) -> &StandardizationState {
        &self.standardization
    }

    pub fn convergence(&self) -> &ConvergenceReport {
        &self.convergence
    }

    /// Saves the fitted model to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a fitted model from a TOML file and checks its shape contract.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let k = self.num_pcs;
        if self.pc_names.len() != k {
            return Err(ModelError::InvalidArtifact(format!(
                "{} PC names for num_pcs = {k}",
                self.pc_names.len()
            )));
        }
        let stored = &self.standardization;
        if StandardizationState::from_parts(stored.mean().to_vec(), stored.scale().to_vec())
            .is_none()
            || stored.num_columns() != k
        {
            return Err(ModelError::InvalidArtifact(format!(
                "standardization must hold {k} finite means and {k} positive scales"
            )));
        }
        if !self.parameters.is_consistent(k) {
            return Err(ModelError::InvalidArtifact(format!(
                "alpha and beta must each hold {} finite coefficients",
                k + 1
            )));
        }
        Ok(())
    }
}
