//! # Unconstrained Minimization
//!
//! A thin facade over the `wolfe_bfgs` quasi-Newton solver. Objectives expose
//! a scalar value and, optionally, a closed-form gradient; anything without one
//! falls back to central finite differences.
//!
//! Failure to converge is not fatal. The best iterate the solver reached is
//! returned with `converged = false` so callers can log it and move on.

use crate::probability::l2_norm;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsError};

/// Value handed to the line search in place of a non-finite objective.
const NON_FINITE_PENALTY: f64 = 1e300;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Objective is not finite at the initial point (value = {0}). Cannot start BFGS.")]
    NonFiniteStart(f64),
    #[error("Initial point has length {found}, but the objective has dimension {expected}.")]
    DimensionMismatch { found: usize, expected: usize },
    #[error("BFGS failed without producing a usable iterate: {0}")]
    Failed(String),
}

/// A scalar function of a real vector.
pub trait Objective {
    fn dimension(&self) -> usize;

    fn value(&self, x: ArrayView1<'_, f64>) -> f64;

    /// Gradient of [`Objective::value`]. Central differences unless overridden.
    fn gradient(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        finite_difference_gradient(|p| self.value(p), x)
    }
}

/// Wraps an objective and hides its closed-form gradient, forcing the
/// finite-difference path.
pub struct NumericGradient<'a, O: Objective>(pub &'a O);

impl<O: Objective> Objective for NumericGradient<'_, O> {
    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    fn value(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.0.value(x)
    }
}

/// Central-difference gradient with a step scaled to each coordinate.
pub fn finite_difference_gradient<F>(f: F, x: ArrayView1<'_, f64>) -> Array1<f64>
where
    F: Fn(ArrayView1<'_, f64>) -> f64,
{
    let base_step = f64::EPSILON.cbrt();
    let mut shifted = x.to_owned();
    let mut grad = Array1::zeros(x.len());
    for i in 0..x.len() {
        let xi = x[i];
        let h = base_step * xi.abs().max(1.0);
        shifted[i] = xi + h;
        let forward = f(shifted.view());
        let upper = shifted[i];
        shifted[i] = xi - h;
        let backward = f(shifted.view());
        let lower = shifted[i];
        shifted[i] = xi;
        grad[i] = (forward - backward) / (upper - lower);
    }
    grad
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerOptions {
    pub max_iterations: usize,
    /// Gradient-norm threshold for convergence.
    pub tolerance: f64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub point: Array1<f64>,
    pub value: f64,
    pub iterations: usize,
    pub gradient_norm: f64,
    pub converged: bool,
}

/// Minimizes `objective` from `initial` with BFGS and a Wolfe line search.
pub fn minimize<O: Objective>(
    objective: &O,
    initial: Array1<f64>,
    options: &OptimizerOptions,
) -> Result<OptimizationOutcome, OptimizerError> {
    if initial.len() != objective.dimension() {
        return Err(OptimizerError::DimensionMismatch {
            found: initial.len(),
            expected: objective.dimension(),
        });
    }

    let initial_value = objective.value(initial.view());
    if !initial_value.is_finite() {
        return Err(OptimizerError::NonFiniteStart(initial_value));
    }
    log::debug!(
        "Starting BFGS with {} parameters, initial objective {:.6}",
        initial.len(),
        initial_value
    );

    let cost_and_grad = |x: &Array1<f64>| -> (f64, Array1<f64>) {
        let value = objective.value(x.view());
        if !value.is_finite() {
            log::debug!("Non-finite objective ({value}) at trial point; returning penalty");
            return (NON_FINITE_PENALTY, Array1::zeros(x.len()));
        }
        let mut grad = objective.gradient(x.view());
        grad.mapv_inplace(|g| if g.is_finite() { g } else { 0.0 });
        (value, grad)
    };

    let solution = match Bfgs::new(initial, cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations)
        .run()
    {
        Ok(solution) => solution,
        Err(BfgsError::MaxIterationsReached { last_solution, .. }) => {
            log::warn!(
                "BFGS hit the iteration cap ({}); using best-so-far parameters.",
                options.max_iterations
            );
            *last_solution
        }
        Err(BfgsError::LineSearchFailed { last_solution, .. }) => {
            log::debug!("Line search stopped early; using best-so-far parameters.");
            *last_solution
        }
        Err(e) => return Err(OptimizerError::Failed(format!("{e:?}"))),
    };

    let point = solution.final_point;
    let value = objective.value(point.view());
    let gradient_norm = l2_norm(objective.gradient(point.view()).view());
    // The solver may stop on a stalled step; only the gradient decides.
    let converged = gradient_norm <= options.tolerance;

    log::debug!(
        "BFGS finished after {} iterations: objective {:.6}, gradient norm {:.3e}",
        solution.iterations,
        value,
        gradient_norm
    );

    Ok(OptimizationOutcome {
        point,
        value,
        iterations: solution.iterations,
        gradient_norm,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// f(x) = Σ c_i (x_i - t_i)², gradient left to finite differences.
    struct ShiftedQuadratic {
        target: Array1<f64>,
        curvature: Array1<f64>,
    }

    impl Objective for ShiftedQuadratic {
        fn dimension(&self) -> usize {
            self.target.len()
        }

        fn value(&self, x: ArrayView1<'_, f64>) -> f64 {
            x.iter()
                .zip(self.target.iter())
                .zip(self.curvature.iter())
                .map(|((&xi, &ti), &ci)| ci * (xi - ti).powi(2))
                .sum()
        }
    }

    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn dimension(&self) -> usize {
            2
        }

        fn value(&self, x: ArrayView1<'_, f64>) -> f64 {
            (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)
        }

        fn gradient(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
            array![
                -2.0 * (1.0 - x[0]) - 400.0 * x[0] * (x[1] - x[0] * x[0]),
                200.0 * (x[1] - x[0] * x[0])
            ]
        }
    }

    #[test]
    fn finite_difference_gradient_matches_closed_form() {
        let x = array![-0.7, 1.3];
        let numeric = finite_difference_gradient(|p| Rosenbrock.value(p), x.view());
        let exact = Rosenbrock.gradient(x.view());
        for (n, e) in numeric.iter().zip(exact.iter()) {
            assert_abs_diff_eq!(*n, *e, epsilon = 1e-5 * e.abs().max(1.0));
        }
    }

    #[test]
    fn minimizes_quadratic_from_zero_with_numeric_gradient() {
        let objective = ShiftedQuadratic {
            target: array![1.5, -2.0, 0.25],
            curvature: array![1.0, 4.0, 0.5],
        };
        let outcome = minimize(&objective, Array1::zeros(3), &OptimizerOptions::default()).unwrap();
        assert!(outcome.converged);
        for (p, t) in outcome.point.iter().zip(objective.target.iter()) {
            assert_abs_diff_eq!(*p, *t, epsilon = 1e-4);
        }
        assert!(outcome.value < 1e-8);
    }

    #[test]
    fn minimizes_rosenbrock_with_closed_form_gradient() {
        let options = OptimizerOptions {
            max_iterations: 2000,
            tolerance: 1e-8,
        };
        let outcome = minimize(&Rosenbrock, array![-1.2, 1.0], &options).unwrap();
        assert_abs_diff_eq!(outcome.point[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(outcome.point[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn numeric_gradient_wrapper_hides_closed_form() {
        let wrapped = NumericGradient(&Rosenbrock);
        let x = array![0.3, 0.4];
        assert_eq!(wrapped.dimension(), 2);
        assert_eq!(wrapped.value(x.view()), Rosenbrock.value(x.view()));
        let numeric = wrapped.gradient(x.view());
        let exact = Rosenbrock.gradient(x.view());
        assert_abs_diff_eq!(numeric[0], exact[0], epsilon = 1e-5);
        assert_abs_diff_eq!(numeric[1], exact[1], epsilon = 1e-5);
    }

    #[test]
    fn iteration_cap_returns_best_iterate_unconverged() {
        let options = OptimizerOptions {
            max_iterations: 2,
            tolerance: 1e-12,
        };
        let outcome = minimize(&Rosenbrock, array![-1.2, 1.0], &options).unwrap();
        assert!(!outcome.converged);
        assert!(outcome.point.iter().all(|v| v.is_finite()));
        assert!(outcome.value <= Rosenbrock.value(array![-1.2, 1.0].view()));
    }

    #[test]
    fn rejects_mismatched_initial_point() {
        let err = minimize(&Rosenbrock, Array1::zeros(3), &OptimizerOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::DimensionMismatch {
                found: 3,
                expected: 2
            }
        ));
    }
}
