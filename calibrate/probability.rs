//! Shared numeric helpers: the standard-normal quantile used to turn
//! percentiles into z-score cutoffs, and column summaries used by the
//! covariate standardizer.

use ndarray::ArrayView1;
use statrs::distribution::{ContinuousCDF, Normal};

/// Standard normal quantile Φ⁻¹(p).
///
/// Returns `None` when `p` is not a finite value in `[0, 1]`. The endpoints
/// map to `-inf` and `+inf`, which lets a 0% or 100% cutoff classify nobody
/// (or everybody) without a special case at the call site.
pub fn standard_normal_quantile(p: f64) -> Option<f64> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    if p == 0.0 {
        return Some(f64::NEG_INFINITY);
    }
    if p == 1.0 {
        return Some(f64::INFINITY);
    }
    let normal = Normal::new(0.0, 1.0).ok()?;
    Some(normal.inverse_cdf(p))
}

/// Population mean and standard deviation (divisor `n`) of a column.
///
/// An empty column yields `(0.0, 0.0)`.
pub fn mean_and_std(values: ArrayView1<'_, f64>) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.sum() / n as f64;
    let variance = values.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    (mean, variance.max(0.0).sqrt())
}

/// Euclidean norm of a vector.
pub fn l2_norm(values: ArrayView1<'_, f64>) -> f64 {
    values.dot(&values).sqrt()
}

/// Position of the first non-finite entry, if any.
pub fn first_non_finite(values: ArrayView1<'_, f64>) -> Option<usize> {
    values.iter().position(|v| !v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn quantile_matches_reference_values() {
        assert_abs_diff_eq!(standard_normal_quantile(0.5).unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            standard_normal_quantile(0.9).unwrap(),
            1.281_551_565_544_6,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            standard_normal_quantile(0.2).unwrap(),
            -0.841_621_233_572_9,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            standard_normal_quantile(0.91).unwrap(),
            1.340_755_033_690_2,
            epsilon = 1e-9
        );
    }

    #[test]
    fn quantile_endpoints_are_infinite() {
        assert_eq!(standard_normal_quantile(0.0), Some(f64::NEG_INFINITY));
        assert_eq!(standard_normal_quantile(1.0), Some(f64::INFINITY));
    }

    #[test]
    fn quantile_rejects_out_of_range() {
        assert!(standard_normal_quantile(-0.01).is_none());
        assert!(standard_normal_quantile(1.01).is_none());
        assert!(standard_normal_quantile(f64::NAN).is_none());
    }

    #[test]
    fn cdf_inverts_quantile() {
        let normal = Normal::new(0.0, 1.0).unwrap();
        for &p in &[0.01, 0.2, 0.5, 0.9, 0.999] {
            let z = standard_normal_quantile(p).unwrap();
            assert_abs_diff_eq!(normal.cdf(z), p, epsilon = 1e-10);
        }
    }

    #[test]
    fn population_std_uses_n_divisor() {
        let (mean, std) = mean_and_std(array![1.0, 2.0, 3.0, 4.0].view());
        assert_abs_diff_eq!(mean, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(std, 1.25_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn first_non_finite_reports_position() {
        assert_eq!(first_non_finite(array![0.0, 1.0].view()), None);
        assert_eq!(first_non_finite(array![0.0, f64::NAN, 1.0].view()), Some(1));
    }
}
