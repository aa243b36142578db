//! Box-constrained Levenberg-Marquardt with Nielsen damping updates.
//!
//! Each trial step solves `(JᵀJ + λ diag(JᵀJ)) δ = Jᵀr` and is projected onto
//! the parameter bounds before its cost is evaluated.

use nalgebra::{DMatrix, DVector};

use super::CurveProblem;
use super::cancel::CancelToken;
use crate::error::FitError;
use crate::fitter::fit_settings::OptimizerSettings;
use crate::fitter::report::FitStage;

const MIN_DIAGONAL: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e16;

#[derive(Debug, Clone, PartialEq)]
pub struct LmSolution {
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub fn minimize(
    problem: &CurveProblem<'_>,
    start: &[f64],
    settings: &OptimizerSettings,
    stage: FitStage,
    cancel: Option<&CancelToken>,
) -> Result<LmSolution, FitError> {
    let n = problem.n_params();
    let mut params = start.to_vec();
    problem.project(&mut params);

    let mut residuals = problem.residuals(&params)?;
    let mut cost = residuals.norm_squared();
    if !cost.is_finite() {
        return Err(FitError::optimization(stage, "cost is not finite at the starting point"));
    }

    let mut lambda = settings.lm_initial_lambda;
    let mut nu = 2.0;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < settings.lm_max_iterations {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(FitError::Cancelled);
        }
        iterations += 1;

        if cost <= f64::MIN_POSITIVE {
            converged = true;
            break;
        }

        let jacobian = problem.jacobian(&params)?;
        let jtj = jacobian.transpose() * &jacobian;
        let gradient = jacobian.transpose() * &residuals;

        let mut damped = jtj.clone();
        for i in 0..n {
            damped[(i, i)] += lambda * jtj[(i, i)].max(MIN_DIAGONAL);
        }

        let Some(step) = damped.cholesky().map(|c| c.solve(&gradient)) else {
            lambda *= nu;
            nu *= 2.0;
            if lambda > MAX_LAMBDA {
                break;
            }
            continue;
        };

        let mut trial: Vec<f64> = params.iter().zip(step.iter()).map(|(p, d)| p + d).collect();
        problem.project(&mut trial);
        let delta = DVector::from_iterator(
            n,
            trial.iter().zip(&params).map(|(t, p)| t - p),
        );

        let trial_residuals = problem.residuals(&trial)?;
        let trial_cost = trial_residuals.norm_squared();

        // reduction predicted by the linearised model for the projected step
        let predicted = 2.0 * delta.dot(&gradient) - (delta.transpose() * &jtj * &delta)[(0, 0)];
        let actual = cost - trial_cost;

        if trial_cost.is_finite() && predicted > 0.0 && actual > 0.0 {
            let rho = actual / predicted;
            let small_step = delta.norm() <= settings.lm_xtol * (norm(&params) + settings.lm_xtol);
            let small_gain = actual <= settings.lm_ftol * cost;

            params = trial;
            residuals = trial_residuals;
            cost = trial_cost;
            lambda *= (1.0_f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
            nu = 2.0;

            if small_step || small_gain {
                converged = true;
                break;
            }
        } else {
            if delta.norm() <= settings.lm_xtol * (norm(&params) + settings.lm_xtol) {
                // the bounds leave nowhere to go
                converged = true;
                break;
            }
            lambda *= nu;
            nu *= 2.0;
            if lambda > MAX_LAMBDA {
                // no downhill step at any damping: a minimum within precision
                converged = true;
                break;
            }
        }
    }

    if !cost.is_finite() || params.iter().any(|p| !p.is_finite()) {
        return Err(FitError::optimization(stage, "solution is not finite"));
    }

    Ok(LmSolution {
        params,
        cost,
        iterations,
        converged,
    })
}

/// Parameter covariance `(JᵀWJ)⁻¹ · χ²/(n - p)` at `params`.
///
/// Falls back to the pseudo-inverse when `JᵀWJ` is singular.
pub fn covariance(problem: &CurveProblem<'_>, params: &[f64]) -> Result<DMatrix<f64>, FitError> {
    let (n, p) = (problem.n_points(), problem.n_params());
    if n <= p {
        return Err(FitError::optimization(
            FitStage::Local,
            format!("{n} points cannot constrain {p} parameters"),
        ));
    }

    let jacobian = problem.jacobian(params)?;
    let jtj = jacobian.transpose() * &jacobian;

    let inverse = match jtj.clone().try_inverse() {
        Some(inverse) => inverse,
        None => {
            log::warn!("JᵀWJ is singular, using the pseudo-inverse for the covariance");
            jtj.pseudo_inverse(MIN_DIAGONAL)
                .map_err(|e| FitError::optimization(FitStage::Local, e))?
        }
    };

    let reduced_chi2 = problem.cost(params)? / (n - p) as f64;
    let covariance = inverse * reduced_chi2;

    if covariance.iter().any(|v| !v.is_finite()) {
        return Err(FitError::optimization(
            FitStage::Local,
            "covariance matrix is not finite",
        ));
    }
    Ok(covariance)
}

fn norm(params: &[f64]) -> f64 {
    params.iter().map(|p| p * p).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::composite::CompositeModel;
    use approx::assert_relative_eq;

    fn line_data() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..20).map(f64::from).collect();
        let y = x.iter().map(|xi| 2.0 * xi + 5.0).collect();
        (x, y)
    }

    #[test]
    fn test_recovers_line() {
        let composite = CompositeModel::build(1, 0, &[]).unwrap();
        let (x, y) = line_data();
        let problem = CurveProblem::unweighted(&composite, &x, &y);

        let solution = minimize(
            &problem,
            &[0.0, 0.0],
            &OptimizerSettings::default(),
            FitStage::Local,
            None,
        )
        .unwrap();
        assert!(solution.converged);
        assert_relative_eq!(solution.params[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(solution.params[1], 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_recovers_gaussian_on_background() {
        let mut truth = CompositeModel::build(1, 1, &[500.0]).unwrap();
        truth.set_params(&[0.0, 20.0, 300.0, 500.0, 2.0]).unwrap();
        let x: Vec<f64> = (0..41).map(|i| 490.0 + 0.5 * f64::from(i)).collect();
        let y: Vec<f64> = x.iter().map(|&xi| truth.evaluate(xi)).collect();

        let composite = CompositeModel::build(1, 1, &[500.5]).unwrap();
        let problem = CurveProblem::poisson_weighted(&composite, &x, &y);
        let solution = minimize(
            &problem,
            &[0.0, 15.0, 250.0, 500.5, 2.5],
            &OptimizerSettings::default(),
            FitStage::Local,
            None,
        )
        .unwrap();

        assert_relative_eq!(solution.params[2], 300.0, max_relative = 1e-4);
        assert_relative_eq!(solution.params[3], 500.0, epsilon = 1e-4);
        assert_relative_eq!(solution.params[4], 2.0, max_relative = 1e-4);
    }

    #[test]
    fn test_respects_bounds() {
        // data that would prefer a negative amplitude
        let composite = CompositeModel::build(1, 1, &[10.0]).unwrap();
        let x: Vec<f64> = (0..21).map(f64::from).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| 50.0 - 10.0 * (-(xi - 10.0).powi(2) / 8.0).exp())
            .collect();
        let problem = CurveProblem::unweighted(&composite, &x, &y);
        let solution = minimize(
            &problem,
            &[0.0, 50.0, 5.0, 10.0, 2.0],
            &OptimizerSettings::default(),
            FitStage::Local,
            None,
        )
        .unwrap();
        assert!(solution.params[2] >= 0.0);
        assert!(solution.params[4] <= 15.0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let composite = CompositeModel::build(1, 0, &[]).unwrap();
        let (x, y) = line_data();
        let problem = CurveProblem::unweighted(&composite, &x, &y);
        let token = CancelToken::new();
        token.cancel();
        let result = minimize(
            &problem,
            &[0.0, 0.0],
            &OptimizerSettings::default(),
            FitStage::Local,
            Some(&token),
        );
        assert!(matches!(result, Err(FitError::Cancelled)));
    }

    #[test]
    fn test_covariance_of_noisy_line() {
        let composite = CompositeModel::build(1, 0, &[]).unwrap();
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, xi)| 3.0 * xi + 1.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let problem = CurveProblem::unweighted(&composite, &x, &y);
        let solution = minimize(
            &problem,
            &[1.0, 0.0],
            &OptimizerSettings::default(),
            FitStage::Local,
            None,
        )
        .unwrap();

        let cov = covariance(&problem, &solution.params).unwrap();
        assert_eq!(cov.shape(), (2, 2));
        assert!(cov[(0, 0)] > 0.0);
        assert!(cov[(1, 1)] > 0.0);
        assert_relative_eq!(cov[(0, 1)], cov[(1, 0)], max_relative = 1e-9);

        // ordinary least squares: var(slope) = s² / Sxx
        let s2 = solution.cost / 8.0;
        let sxx: f64 = x.iter().map(|xi| (xi - 4.5).powi(2)).sum();
        assert_relative_eq!(cov[(0, 0)], s2 / sxx, max_relative = 1e-6);
    }

    #[test]
    fn test_covariance_needs_more_points_than_params() {
        let composite = CompositeModel::build(1, 1, &[1.0]).unwrap();
        let x = [0.0, 1.0, 2.0];
        let y = [1.0, 2.0, 1.0];
        let problem = CurveProblem::unweighted(&composite, &x, &y);
        assert!(matches!(
            covariance(&problem, composite.params()),
            Err(FitError::OptimizationFailure { .. })
        ));
    }
}
