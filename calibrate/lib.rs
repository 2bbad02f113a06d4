#![deny(dead_code)]
#![deny(unused_imports)]

pub mod data;
pub mod likelihood;
pub mod model;
pub mod optimizer;
pub mod probability;
pub mod standardize;
pub mod types;

#[path = "../risk/mod.rs"]
pub mod risk;

pub use model::{
    CalibrationError, CalibratorConfig, ConvergenceReport, FittedCalibrator, GradientMode,
    ModelError, ScoreBatch,
};
pub use risk::{RiskError, RiskFlag, RiskPolicy, RiskTier};
