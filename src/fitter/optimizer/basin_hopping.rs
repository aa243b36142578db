//! Basin hopping: random restarts around the current minimum, each polished
//! by the bounded local solver, with Metropolis acceptance between them.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::CurveProblem;
use super::cancel::CancelToken;
use super::levenberg_marquardt::{self, LmSolution};
use crate::error::FitError;
use crate::fitter::fit_settings::OptimizerSettings;
use crate::fitter::report::FitStage;

const TARGET_ACCEPT_RATE: f64 = 0.5;
const STEP_FACTOR: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct HoppingResult {
    pub params: Vec<f64>,
    pub cost: f64,
    pub hops: usize,
    pub accepted: usize,
    pub budget_exhausted: bool,
}

/// Minimizes the sum of squared residuals of `problem` starting at `start`.
///
/// Returns the lowest minimum visited. A failed local solve from a perturbed
/// start just rejects that hop; only a failure from `start` itself is an error.
pub fn minimize(
    problem: &CurveProblem<'_>,
    start: &[f64],
    settings: &OptimizerSettings,
    cancel: Option<&CancelToken>,
) -> Result<HoppingResult, FitError> {
    let stage = FitStage::Global;
    let mut rng = StdRng::seed_from_u64(settings.seed);
    // a budget too large to represent means no deadline
    let deadline = settings
        .time_budget_secs
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .and_then(|budget| Instant::now().checked_add(budget));

    let LmSolution {
        params: mut current,
        cost: mut current_cost,
        ..
    } = levenberg_marquardt::minimize(problem, start, settings, stage, cancel)?;
    let mut best = current.clone();
    let mut best_cost = current_cost;

    let mut step = settings.step_size.abs();
    let mut accepted = 0;
    let mut accepted_since_adapt = 0;
    let mut hops = 0;
    let mut budget_exhausted = false;

    while hops < settings.max_iterations {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(FitError::Cancelled);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("Basin hopping stopped after {hops} hops: time budget exhausted");
            budget_exhausted = true;
            break;
        }
        hops += 1;

        let mut trial: Vec<f64> = current
            .iter()
            .map(|p| p + rng.gen_range(-step..=step))
            .collect();
        problem.project(&mut trial);

        let outcome = match levenberg_marquardt::minimize(problem, &trial, settings, stage, cancel) {
            Ok(outcome) => outcome,
            Err(FitError::Cancelled) => return Err(FitError::Cancelled),
            Err(e) => {
                log::debug!("hop {hops} rejected: {e}");
                continue;
            }
        };

        if metropolis(outcome.cost, current_cost, settings.temperature, &mut rng) {
            accepted += 1;
            accepted_since_adapt += 1;
            current = outcome.params;
            current_cost = outcome.cost;

            if current_cost < best_cost {
                best.clone_from(&current);
                best_cost = current_cost;
            }
        }

        if settings.adapt_interval > 0 && hops % settings.adapt_interval == 0 {
            let rate = accepted_since_adapt as f64 / settings.adapt_interval as f64;
            step = if rate > TARGET_ACCEPT_RATE {
                step / STEP_FACTOR
            } else {
                step * STEP_FACTOR
            };
            accepted_since_adapt = 0;
            log::debug!("acceptance rate {rate:.2}, step size now {step:.4}");
        }
    }

    log::debug!("Basin hopping: {accepted}/{hops} hops accepted, best cost {best_cost:.6e}");

    Ok(HoppingResult {
        params: best,
        cost: best_cost,
        hops,
        accepted,
        budget_exhausted,
    })
}

/// Always accepts downhill moves; uphill ones with probability exp(-Δ/T).
fn metropolis(new_cost: f64, old_cost: f64, temperature: f64, rng: &mut StdRng) -> bool {
    if new_cost < old_cost {
        return true;
    }
    if !(temperature > 0.0) || !new_cost.is_finite() {
        return false;
    }
    let probability = (-(new_cost - old_cost) / temperature).exp();
    rng.gen_range(0.0..1.0) < probability
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::composite::CompositeModel;
    use approx::assert_relative_eq;

    fn peak_data() -> (Vec<f64>, Vec<f64>) {
        let mut truth = CompositeModel::build(1, 1, &[1000.0]).unwrap();
        truth.set_params(&[0.0, 100.0, 500.0, 1000.0, 3.0]).unwrap();
        let x: Vec<f64> = (0..49).map(|i| 988.0 + 0.5 * f64::from(i)).collect();
        let y = x.iter().map(|&xi| truth.evaluate(xi)).collect();
        (x, y)
    }

    fn quick_settings() -> OptimizerSettings {
        OptimizerSettings {
            max_iterations: 10,
            ..OptimizerSettings::default()
        }
    }

    #[test]
    fn test_finds_peak_from_default_seed() {
        let (x, y) = peak_data();
        let composite = CompositeModel::build(1, 1, &[1000.0]).unwrap();
        let problem = CurveProblem::unweighted(&composite, &x, &y);

        let result = minimize(&problem, &[0.0, 1.0, 100.0, 1000.0, 1.0], &quick_settings(), None)
            .unwrap();
        assert_eq!(result.hops, 10);
        assert_relative_eq!(result.params[2], 500.0, max_relative = 1e-3);
        assert_relative_eq!(result.params[4], 3.0, max_relative = 1e-3);
    }

    #[test]
    fn test_same_seed_same_result() {
        let (x, y) = peak_data();
        let composite = CompositeModel::build(1, 1, &[1000.0]).unwrap();
        let problem = CurveProblem::unweighted(&composite, &x, &y);
        let start = [0.0, 50.0, 200.0, 999.0, 2.0];

        let first = minimize(&problem, &start, &quick_settings(), None).unwrap();
        let second = minimize(&problem, &start, &quick_settings(), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_time_budget_returns_local_minimum() {
        let (x, y) = peak_data();
        let composite = CompositeModel::build(1, 1, &[1000.0]).unwrap();
        let problem = CurveProblem::unweighted(&composite, &x, &y);
        let settings = OptimizerSettings {
            time_budget_secs: Some(0.0),
            ..OptimizerSettings::default()
        };

        let result = minimize(&problem, &[0.0, 100.0, 450.0, 1000.5, 2.5], &settings, None).unwrap();
        assert_eq!(result.hops, 0);
        assert!(result.budget_exhausted);
        assert!(result.cost.is_finite());
    }

    #[test]
    fn test_huge_time_budget_is_unbounded() {
        let (x, y) = peak_data();
        let composite = CompositeModel::build(1, 1, &[1000.0]).unwrap();
        let problem = CurveProblem::unweighted(&composite, &x, &y);
        let start = [0.0, 100.0, 450.0, 1000.5, 2.5];

        for budget in [1e18, 1e30, f64::INFINITY, f64::NAN, -1.0] {
            let settings = OptimizerSettings {
                time_budget_secs: Some(budget),
                ..quick_settings()
            };
            let result = minimize(&problem, &start, &settings, None).unwrap();
            assert_eq!(result.hops, 10, "budget {budget}");
            assert!(!result.budget_exhausted, "budget {budget}");
        }
    }

    #[test]
    fn test_metropolis() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(metropolis(1.0, 2.0, 1.0, &mut rng));
        assert!(!metropolis(2.0, 1.0, 0.0, &mut rng));
        assert!(!metropolis(1e6, 0.0, 1.0, &mut rng));
    }
}
