use nalgebra::{DMatrix, DVector};

use super::composite::{CompositeModel, SubModelKind, peak_window};
use super::numdiff;
use crate::error::FitError;

/// Scaling factor reported when the composite has no background sub-model.
pub const DEFAULT_SCALING_FACTOR: f64 = 1.5;

/// Variances (not standard deviations) of the net peak area.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NetAreaVariance {
    pub total_variance: f64,
    pub peak_variances: Vec<f64>,
    pub scaling_factor: f64,
}

/// Delta-method propagation of a fit covariance into peak-area variances.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UncertaintyPropagator {
    /// Relative step for the background integral jacobian.
    pub integral_step: f64,
    /// Relative step for the peak area jacobians.
    pub area_step: f64,
}

impl Default for UncertaintyPropagator {
    fn default() -> Self {
        UncertaintyPropagator {
            integral_step: numdiff::INTEGRAL_STEP,
            area_step: numdiff::AREA_STEP,
        }
    }
}

impl UncertaintyPropagator {
    /// Union of every peak's centroid ± 2 sigma span.
    pub fn background_window(composite: &CompositeModel) -> Option<(f64, f64)> {
        composite
            .peaks()
            .map(|peak| peak_window(peak, 2.0))
            .reduce(|(lo, hi), (a, b)| (lo.min(a), hi.max(b)))
    }

    /// `1 + (b - a) / ((ubound - lbound) - (b - a))`
    pub fn scaling_factor(window: (f64, f64), roi: (f64, f64)) -> Result<f64, FitError> {
        let (a, b) = window;
        let (lbound, ubound) = roi;
        let peak_width = b - a;
        let background_width = (ubound - lbound) - peak_width;

        if !(peak_width > 0.0) || !(background_width > 0.0) {
            return Err(FitError::DegenerateBackgroundWindow { a, b });
        }
        Ok(1.0 + peak_width / background_width)
    }

    /// J C Jᵀ for a row vector `J`.
    pub fn delta_method(jacobian: &DVector<f64>, covariance: &DMatrix<f64>) -> f64 {
        (jacobian.transpose() * covariance * jacobian)[(0, 0)]
    }

    pub fn propagate(
        &self,
        composite: &CompositeModel,
        roi: (f64, f64),
        covariance: &DMatrix<f64>,
    ) -> Result<NetAreaVariance, FitError> {
        let n = composite.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(FitError::CovarianceShape {
                expected: n,
                rows: covariance.nrows(),
                cols: covariance.ncols(),
            });
        }

        let mut jacobian = DVector::zeros(n);
        let mut scaling_factor = DEFAULT_SCALING_FACTOR;

        for sub in composite.sub_models() {
            let params = sub.model.params();
            let block = match sub.kind {
                SubModelKind::Peak => sub
                    .model
                    .shape()
                    .area_jacobian(params, self.area_step)
                    .unwrap_or_else(|| vec![0.0; params.len()]),
                SubModelKind::Background => {
                    let Some((a, b)) = Self::background_window(composite) else {
                        // nothing to subtract the background from
                        continue;
                    };
                    scaling_factor = Self::scaling_factor((a, b), roi)?;
                    log::debug!(
                        "background window [{a:.3}, {b:.3}], peak/bg ratio {:.4}",
                        scaling_factor - 1.0
                    );
                    sub.model
                        .shape()
                        .jacobian_of_integral(a, b, params, self.integral_step)
                }
            };
            jacobian
                .rows_mut(sub.range.start, sub.range.len())
                .copy_from_slice(&block);
        }

        let total_variance = Self::delta_method(&jacobian, covariance);
        let (_, areas) = composite.net_area();
        let peak_variances = apportion(total_variance, &areas);

        Ok(NetAreaVariance {
            total_variance,
            peak_variances,
            scaling_factor,
        })
    }

    /// One standard deviation of a net area, including the counting terms.
    pub fn reported_sigma(
        variance: f64,
        net_area: f64,
        scaling_factor: f64,
        background_area: f64,
    ) -> f64 {
        (variance + net_area + scaling_factor * background_area)
            .max(0.0)
            .sqrt()
    }
}

/// Splits `total` between peaks in proportion to their share of the net area.
/// Falls back to an even split when the areas do not sum to a positive value.
fn apportion(total: f64, areas: &[f64]) -> Vec<f64> {
    let sum: f64 = areas.iter().sum();
    if sum > 0.0 {
        areas.iter().map(|area| total * area / sum).collect()
    } else {
        let share = total / areas.len().max(1) as f64;
        vec![share; areas.len()]
    }
}
