pub mod basin_hopping;
pub mod cancel;
pub mod levenberg_marquardt;

use nalgebra::{DMatrix, DVector};

use crate::error::FitError;
use crate::fitter::composite::CompositeModel;

/// Least-squares problem of a composite model against windowed counts.
///
/// Residuals are `w_i * (y_i - f(x_i))`. Unweighted problems use `w_i = 1`.
#[derive(Debug)]
pub struct CurveProblem<'a> {
    pub composite: &'a CompositeModel,
    pub x: &'a [f64],
    pub y: &'a [f64],
    weights: Vec<f64>,
}

impl<'a> CurveProblem<'a> {
    pub fn unweighted(composite: &'a CompositeModel, x: &'a [f64], y: &'a [f64]) -> Self {
        CurveProblem {
            composite,
            x,
            y,
            weights: vec![1.0; y.len()],
        }
    }

    /// Poisson-like weighting, `1 / sqrt(count)`. Empty bins count as one.
    pub fn poisson_weighted(composite: &'a CompositeModel, x: &'a [f64], y: &'a [f64]) -> Self {
        let weights = y.iter().map(|&count| 1.0 / count.max(1.0).sqrt()).collect();
        CurveProblem {
            composite,
            x,
            y,
            weights,
        }
    }

    pub fn n_points(&self) -> usize {
        self.y.len()
    }

    pub fn n_params(&self) -> usize {
        self.composite.len()
    }

    pub fn lower_bounds(&self) -> &[f64] {
        self.composite.lower_bounds()
    }

    pub fn upper_bounds(&self) -> &[f64] {
        self.composite.upper_bounds()
    }

    pub fn residuals(&self, params: &[f64]) -> Result<DVector<f64>, FitError> {
        let model = self.composite.evaluate_many(self.x, params)?;
        Ok(DVector::from_iterator(
            self.y.len(),
            self.y
                .iter()
                .zip(&model)
                .zip(&self.weights)
                .map(|((y, f), w)| w * (y - f)),
        ))
    }

    /// Weighted jacobian of the model (not of the residuals).
    pub fn jacobian(&self, params: &[f64]) -> Result<DMatrix<f64>, FitError> {
        let mut jacobian = self.composite.jacobian_at(self.x, params)?;
        for (i, &w) in self.weights.iter().enumerate() {
            jacobian.row_mut(i).scale_mut(w);
        }
        Ok(jacobian)
    }

    /// Sum of squared (weighted) residuals.
    pub fn cost(&self, params: &[f64]) -> Result<f64, FitError> {
        Ok(self.residuals(params)?.norm_squared())
    }

    /// Moves every parameter inside its bounds.
    pub fn project(&self, params: &mut [f64]) {
        for ((p, &lo), &hi) in params
            .iter_mut()
            .zip(self.lower_bounds())
            .zip(self.upper_bounds())
        {
            *p = p.max(lo).min(hi);
        }
    }
}
