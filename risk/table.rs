//! Classification over a loaded z-score table. The input frame keeps all of
//! its columns; one label column is appended.

use super::{RiskError, RiskPolicy};
use ndarray::Array1;
use polars::prelude::*;

pub const HIGH_RISK_COLUMN: &str = "high_risk";
pub const RISK_TIER_COLUMN: &str = "risk_tier";

/// Reads `z_column` as finite-or-infinite floats. Nulls and NaN are rejected.
pub fn z_scores_from_frame(df: &DataFrame, z_column: &str) -> Result<Array1<f64>, RiskError> {
    let column = df
        .column(z_column)
        .map_err(|_| RiskError::MissingField(z_column.to_string()))?;
    if !column.dtype().is_primitive_numeric() {
        return Err(RiskError::NonNumericField {
            column: z_column.to_string(),
            found_type: format!("{:?}", column.dtype()),
        });
    }
    if column.null_count() > 0 {
        return Err(RiskError::MissingValues(z_column.to_string()));
    }
    let casted = column.cast(&DataType::Float64)?;
    let values: Array1<f64> = casted.f64()?.into_no_null_iter().collect();
    if values.iter().any(|z| z.is_nan()) {
        return Err(RiskError::MissingValues(z_column.to_string()));
    }
    Ok(values)
}

/// Appends the policy's label column to `df` and returns its name.
pub fn classify_frame(
    df: &mut DataFrame,
    z_column: &str,
    policy: &RiskPolicy,
) -> Result<&'static str, RiskError> {
    let z = z_scores_from_frame(df, z_column)?;
    let (name, labels) = match policy {
        RiskPolicy::TopPercent(threshold) => {
            let flags: Vec<bool> = threshold
                .classify(z.view())
                .into_iter()
                .map(|f| f.is_high_risk())
                .collect();
            (HIGH_RISK_COLUMN, Column::new(HIGH_RISK_COLUMN.into(), flags))
        }
        RiskPolicy::ThreeTier(cutoffs) => {
            let tiers: Vec<&str> = cutoffs
                .classify(z.view())
                .into_iter()
                .map(|t| t.as_str())
                .collect();
            (RISK_TIER_COLUMN, Column::new(RISK_TIER_COLUMN.into(), tiers))
        }
    };
    df.with_column(labels)?;
    log::info!("Classified {} individuals into column '{}'.", z.len(), name);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{HighRiskThreshold, TierCutoffs};

    fn frame(z: Vec<f64>) -> DataFrame {
        let ids: Vec<String> = (0..z.len()).map(|i| format!("s{i}")).collect();
        DataFrame::new(vec![
            Column::new("sample_id".into(), ids),
            Column::new("z_score".into(), z),
        ])
        .unwrap()
    }

    #[test]
    fn appends_high_risk_column() {
        let mut df = frame(vec![-2.0, -1.0, 0.0, 1.0, 2.0, 3.0]);
        let policy = RiskPolicy::TopPercent(HighRiskThreshold::new(10.0).unwrap());
        let name = classify_frame(&mut df, "z_score", &policy).unwrap();
        assert_eq!(name, HIGH_RISK_COLUMN);
        assert_eq!(df.width(), 3);
        let flags: Vec<bool> = df
            .column(HIGH_RISK_COLUMN)
            .unwrap()
            .bool()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(flags, vec![false, false, false, false, true, true]);
    }

    #[test]
    fn appends_tier_column() {
        let mut df = frame(vec![-3.0, -1.0, 0.0, 1.0, 3.0]);
        let policy = RiskPolicy::ThreeTier(TierCutoffs::new(20.0, 90.0).unwrap());
        classify_frame(&mut df, "z_score", &policy).unwrap();
        let tiers: Vec<String> = df
            .column(RISK_TIER_COLUMN)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(tiers, vec!["Low", "Low", "Typical", "Typical", "High"]);
    }

    #[test]
    fn missing_column_is_a_missing_field() {
        let mut df = frame(vec![0.0]);
        let policy = RiskPolicy::TopPercent(HighRiskThreshold::new(9.0).unwrap());
        let err = classify_frame(&mut df, "calibrated", &policy).unwrap_err();
        assert!(matches!(err, RiskError::MissingField(c) if c == "calibrated"));
        assert_eq!(df.width(), 2);
    }

    #[test]
    fn text_column_is_rejected() {
        let df = frame(vec![0.0]);
        let err = z_scores_from_frame(&df, "sample_id").unwrap_err();
        assert!(matches!(err, RiskError::NonNumericField { .. }));
    }

    #[test]
    fn nan_scores_are_rejected() {
        let df = frame(vec![0.0, f64::NAN]);
        assert!(matches!(
            z_scores_from_frame(&df, "z_score"),
            Err(RiskError::MissingValues(_))
        ));
    }

    #[test]
    fn integer_scores_are_accepted() {
        let df = DataFrame::new(vec![Column::new("z".into(), vec![1i64, -2])]).unwrap();
        let z = z_scores_from_frame(&df, "z").unwrap();
        assert_eq!(z.to_vec(), vec![1.0, -2.0]);
    }
}
