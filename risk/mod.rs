//! # Risk Classification
//!
//! Turns calibrated z-scores into labels. Two policies are supported:
//!
//! - a single top-percentile threshold, where an individual is high risk
//!   when their z-score lies strictly above the cutoff, and
//! - a three-tier split into `Low`, `Typical` and `High`, where a z-score
//!   equal to a cutoff belongs to the lower tier.
//!
//! Cutoffs are standard normal quantiles, so they are only meaningful on
//! scores that have already been calibrated.

use crate::probability::standard_normal_quantile;
use ndarray::ArrayView1;
use polars::prelude::PolarsError;
use std::fmt;
use thiserror::Error;

pub mod table;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Invalid percentile range: {0}")]
    InvalidRange(String),
    #[error("The z-score column '{0}' was not found in the input table.")]
    MissingField(String),
    #[error("The z-score column '{column}' is not numeric (found type: {found_type}).")]
    NonNumericField { column: String, found_type: String },
    #[error("The z-score column '{0}' contains missing or NaN values.")]
    MissingValues(String),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
}

/// Outcome of the single-threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskFlag {
    NotHighRisk,
    HighRisk,
}

impl RiskFlag {
    pub fn is_high_risk(self) -> bool {
        matches!(self, RiskFlag::HighRisk)
    }
}

/// Outcome of the three-tier policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RiskTier {
    Low,
    Typical,
    High,
}

impl RiskTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::Low => "Low",
            RiskTier::Typical => "Typical",
            RiskTier::High => "High",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_percentile(name: &str, value: f64) -> Result<(), RiskError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(RiskError::InvalidRange(format!(
            "{name} percentile {value} is outside [0, 100]"
        )));
    }
    Ok(())
}

/// z-score cutoff for the top `top_percent` percent of a standard normal.
///
/// Computed as the `1 - top_percent / 100` quantile, so `top_percent = 0`
/// maps to `+inf` (nobody is flagged) and `top_percent = 100` to `-inf`.
pub fn high_risk_cutoff(top_percent: f64) -> Result<f64, RiskError> {
    check_percentile("Top", top_percent)?;
    standard_normal_quantile(1.0 - top_percent / 100.0)
        .ok_or_else(|| RiskError::InvalidRange(format!("Top percentile {top_percent} has no quantile")))
}

/// Top-percentile policy with its cutoff precomputed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighRiskThreshold {
    top_percent: f64,
    z_cutoff: f64,
}

impl HighRiskThreshold {
    pub fn new(top_percent: f64) -> Result<Self, RiskError> {
        Ok(Self {
            top_percent,
            z_cutoff: high_risk_cutoff(top_percent)?,
        })
    }

    pub fn top_percent(&self) -> f64 {
        self.top_percent
    }

    pub fn z_cutoff(&self) -> f64 {
        self.z_cutoff
    }

    /// Strictly above the cutoff is high risk. NaN never is.
    pub fn flag(&self, z: f64) -> RiskFlag {
        if z > self.z_cutoff {
            RiskFlag::HighRisk
        } else {
            RiskFlag::NotHighRisk
        }
    }

    pub fn classify(&self, z_scores: ArrayView1<'_, f64>) -> Vec<RiskFlag> {
        z_scores.iter().map(|&z| self.flag(z)).collect()
    }
}

/// Three-tier policy with both cutoffs precomputed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierCutoffs {
    low_percentile: f64,
    high_percentile: f64,
    low_cutoff: f64,
    high_cutoff: f64,
}

impl TierCutoffs {
    /// `low_percentile` and `high_percentile` are percentiles of the standard
    /// normal. Both must lie in `[0, 100]` with `low < high`.
    pub fn new(low_percentile: f64, high_percentile: f64) -> Result<Self, RiskError> {
        check_percentile("Low", low_percentile)?;
        check_percentile("High", high_percentile)?;
        if low_percentile >= high_percentile {
            return Err(RiskError::InvalidRange(format!(
                "low percentile ({low_percentile}) must be below high percentile ({high_percentile})"
            )));
        }
        let quantile = |p: f64| {
            standard_normal_quantile(p / 100.0)
                .ok_or_else(|| RiskError::InvalidRange(format!("Percentile {p} has no quantile")))
        };
        Ok(Self {
            low_percentile,
            high_percentile,
            low_cutoff: quantile(low_percentile)?,
            high_cutoff: quantile(high_percentile)?,
        })
    }

    pub fn low_percentile(&self) -> f64 {
        self.low_percentile
    }

    pub fn high_percentile(&self) -> f64 {
        self.high_percentile
    }

    pub fn cutoffs(&self) -> (f64, f64) {
        (self.low_cutoff, self.high_cutoff)
    }

    /// Callers must screen out NaN; it would land in `High`.
    pub fn tier(&self, z: f64) -> RiskTier {
        if z <= self.low_cutoff {
            RiskTier::Low
        } else if z <= self.high_cutoff {
            RiskTier::Typical
        } else {
            RiskTier::High
        }
    }

    pub fn classify(&self, z_scores: ArrayView1<'_, f64>) -> Vec<RiskTier> {
        z_scores.iter().map(|&z| self.tier(z)).collect()
    }
}

/// Either classification policy, as selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskPolicy {
    TopPercent(HighRiskThreshold),
    ThreeTier(TierCutoffs),
}

fn reject_nan(z_scores: ArrayView1<'_, f64>) -> Result<(), RiskError> {
    match z_scores.iter().position(|z| z.is_nan()) {
        Some(i) => Err(RiskError::MissingValues(format!("z-score at index {i}"))),
        None => Ok(()),
    }
}

/// Flags each z-score against the top `top_percent` cutoff. NaN is rejected.
pub fn classify_high_risk(
    z_scores: ArrayView1<'_, f64>,
    top_percent: f64,
) -> Result<Vec<RiskFlag>, RiskError> {
    reject_nan(z_scores)?;
    Ok(HighRiskThreshold::new(top_percent)?.classify(z_scores))
}

/// Assigns each z-score to a tier. NaN is rejected.
pub fn classify_three_tier(
    z_scores: ArrayView1<'_, f64>,
    low_percentile: f64,
    high_percentile: f64,
) -> Result<Vec<RiskTier>, RiskError> {
    reject_nan(z_scores)?;
    Ok(TierCutoffs::new(low_percentile, high_percentile)?.classify(z_scores))
}
