pub mod double_gaussian;
pub mod gaussian;
pub mod linear;

use crate::error::FitError;
use crate::fitter::numdiff;

/// The parametric form of a sub-model. Every per-variant operation takes the
/// parameter slice explicitly so a composite model can evaluate any slice of
/// its flat vector without copying it into the sub-model first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum ModelShape {
    LinearBackground,
    Gaussian,
    DoubleGaussian,
}

impl ModelShape {
    pub fn n_params(self) -> usize {
        match self {
            ModelShape::LinearBackground => linear::N_PARAMS,
            ModelShape::Gaussian => gaussian::N_PARAMS,
            ModelShape::DoubleGaussian => double_gaussian::N_PARAMS,
        }
    }

    pub fn is_peak(self) -> bool {
        !matches!(self, ModelShape::LinearBackground)
    }

    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            ModelShape::LinearBackground => &linear::PARAMETER_NAMES,
            ModelShape::Gaussian => &gaussian::PARAMETER_NAMES,
            ModelShape::DoubleGaussian => &double_gaussian::PARAMETER_NAMES,
        }
    }

    pub fn default_bounds(self) -> (Vec<f64>, Vec<f64>) {
        match self {
            ModelShape::LinearBackground => linear::default_bounds(),
            ModelShape::Gaussian => gaussian::default_bounds(),
            ModelShape::DoubleGaussian => double_gaussian::default_bounds(),
        }
    }

    pub fn evaluate(self, params: &[f64], x: f64) -> f64 {
        match self {
            ModelShape::LinearBackground => linear::evaluate(params, x),
            ModelShape::Gaussian => gaussian::evaluate(params, x),
            ModelShape::DoubleGaussian => double_gaussian::evaluate(params, x),
        }
    }

    /// Writes d(evaluate)/d(params) at `x` into `out`, which must hold `n_params` values.
    pub fn gradient(self, params: &[f64], x: f64, out: &mut [f64]) {
        match self {
            ModelShape::LinearBackground => linear::gradient(params, x, out),
            ModelShape::Gaussian => gaussian::gradient(params, x, out),
            ModelShape::DoubleGaussian => double_gaussian::gradient(params, x, out),
        }
    }

    pub fn integral(self, a: f64, b: f64, params: &[f64]) -> f64 {
        match self {
            ModelShape::LinearBackground => linear::integral(a, b, params),
            ModelShape::Gaussian => gaussian::integral(a, b, params),
            ModelShape::DoubleGaussian => double_gaussian::integral(a, b, params),
        }
    }

    pub fn jacobian_of_integral(self, a: f64, b: f64, params: &[f64], step: f64) -> Vec<f64> {
        numdiff::central_gradient(|p| self.integral(a, b, p), params, step)
    }

    /// Area over the whole real line. `None` for the background.
    pub fn area(self, params: &[f64]) -> Option<f64> {
        match self {
            ModelShape::LinearBackground => None,
            ModelShape::Gaussian => Some(gaussian::area(params)),
            ModelShape::DoubleGaussian => Some(double_gaussian::area(params)),
        }
    }

    pub fn area_jacobian(self, params: &[f64], step: f64) -> Option<Vec<f64>> {
        if !self.is_peak() {
            return None;
        }
        Some(numdiff::central_gradient(
            |p| self.area(p).unwrap_or_default(),
            params,
            step,
        ))
    }

    /// One entry per Gaussian component.
    pub fn fwhms(self, params: &[f64]) -> Vec<f64> {
        match self {
            ModelShape::LinearBackground => Vec::new(),
            ModelShape::Gaussian => vec![gaussian::fwhm(params)],
            ModelShape::DoubleGaussian => double_gaussian::fwhms(params),
        }
    }

    pub fn centroids(self, params: &[f64]) -> Vec<f64> {
        self.component_values(params, 1)
    }

    /// Component widths, always non-negative.
    pub fn sigmas(self, params: &[f64]) -> Vec<f64> {
        self.component_values(params, 2)
            .into_iter()
            .map(f64::abs)
            .collect()
    }

    pub fn amplitudes(self, params: &[f64]) -> Vec<f64> {
        self.component_values(params, 0)
    }

    fn component_values(self, params: &[f64], offset: usize) -> Vec<f64> {
        if !self.is_peak() {
            return Vec::new();
        }
        params
            .chunks_exact(gaussian::N_PARAMS)
            .map(|p| p[offset])
            .collect()
    }
}

/// A named sub-model: shape, current parameters, and optimizer bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    shape: ModelShape,
    params: Vec<f64>,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
}

impl Model {
    pub fn new(shape: ModelShape, name: &str, params: Vec<f64>) -> Result<Self, FitError> {
        check_len(shape.n_params(), params.len())?;
        let (lower_bounds, upper_bounds) = shape.default_bounds();
        Ok(Model {
            name: name.to_owned(),
            shape,
            params,
            lower_bounds,
            upper_bounds,
        })
    }

    pub fn linear(name: &str, slope: f64, intercept: f64) -> Self {
        let (lower_bounds, upper_bounds) = linear::default_bounds();
        Model {
            name: name.to_owned(),
            shape: ModelShape::LinearBackground,
            params: vec![slope, intercept],
            lower_bounds,
            upper_bounds,
        }
    }

    pub fn gaussian(name: &str, amplitude: f64, centroid: f64, sigma: f64) -> Self {
        let (lower_bounds, upper_bounds) = gaussian::default_bounds();
        Model {
            name: name.to_owned(),
            shape: ModelShape::Gaussian,
            params: vec![amplitude, centroid, sigma],
            lower_bounds,
            upper_bounds,
        }
    }

    pub fn double_gaussian(name: &str, params: [f64; double_gaussian::N_PARAMS]) -> Self {
        let (lower_bounds, upper_bounds) = double_gaussian::default_bounds();
        Model {
            name: name.to_owned(),
            shape: ModelShape::DoubleGaussian,
            params: params.to_vec(),
            lower_bounds,
            upper_bounds,
        }
    }

    pub fn shape(&self) -> ModelShape {
        self.shape
    }

    pub fn n_params(&self) -> usize {
        self.shape.n_params()
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    pub fn set_params(&mut self, params: &[f64]) -> Result<(), FitError> {
        check_len(self.n_params(), params.len())?;
        self.params.copy_from_slice(params);
        Ok(())
    }

    pub fn set_bounds(&mut self, lower: &[f64], upper: &[f64]) -> Result<(), FitError> {
        check_len(self.n_params(), lower.len())?;
        check_len(self.n_params(), upper.len())?;
        self.lower_bounds = lower.to_vec();
        self.upper_bounds = upper.to_vec();
        Ok(())
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.shape.evaluate(&self.params, x)
    }

    pub fn evaluate_many(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&xi| self.evaluate(xi)).collect()
    }

    pub fn integral(&self, a: f64, b: f64) -> f64 {
        self.shape.integral(a, b, &self.params)
    }

    pub fn jacobian_of_integral(&self, a: f64, b: f64, step: f64) -> Vec<f64> {
        self.shape.jacobian_of_integral(a, b, &self.params, step)
    }

    pub fn area(&self) -> Option<f64> {
        self.shape.area(&self.params)
    }

    pub fn area_jacobian(&self, step: f64) -> Option<Vec<f64>> {
        self.shape.area_jacobian(&self.params, step)
    }

    pub fn fwhms(&self) -> Vec<f64> {
        self.shape.fwhms(&self.params)
    }

    pub fn centroids(&self) -> Vec<f64> {
        self.shape.centroids(&self.params)
    }

    pub fn sigmas(&self) -> Vec<f64> {
        self.shape.sigmas(&self.params)
    }
}

pub(crate) fn check_len(expected: usize, found: usize) -> Result<(), FitError> {
    if expected == found {
        Ok(())
    } else {
        Err(FitError::InvalidParameterCount { expected, found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_set_params_rejects_wrong_length() {
        let mut model = Model::gaussian("gauss_0", 100.0, 1000.0, 1.0);
        let err = model.set_params(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            FitError::InvalidParameterCount {
                expected: 3,
                found: 2
            }
        ));
        // untouched on failure
        assert_eq!(model.params(), &[100.0, 1000.0, 1.0]);
    }

    #[test]
    fn test_new_checks_length() {
        assert!(Model::new(ModelShape::LinearBackground, "bg", vec![1.0]).is_err());
        assert!(Model::new(ModelShape::DoubleGaussian, "d", vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_background_has_no_area() {
        let bg = Model::linear("bg", 0.5, 10.0);
        assert!(bg.area().is_none());
        assert!(bg.area_jacobian(numdiff::AREA_STEP).is_none());
        assert!(bg.fwhms().is_empty());
        assert!(bg.centroids().is_empty());
    }

    #[test]
    fn test_integral_jacobian_of_linear() {
        let bg = Model::linear("bg", 0.3, 50.0);
        let (a, b) = (990.0, 1010.0);
        let jac = bg.jacobian_of_integral(a, b, numdiff::INTEGRAL_STEP);
        assert_relative_eq!(jac[0], (b * b - a * a) / 2.0, max_relative = 1e-6);
        assert_relative_eq!(jac[1], b - a, max_relative = 1e-6);
    }

    #[test]
    fn test_area_jacobian_of_gaussian() {
        let peak = Model::gaussian("gauss_0", 500.0, 1000.0, 3.0);
        let jac = peak.area_jacobian(numdiff::AREA_STEP).unwrap();
        let root_two_pi = (2.0 * std::f64::consts::PI).sqrt();
        assert_relative_eq!(jac[0], 3.0 * root_two_pi, max_relative = 1e-5);
        assert_relative_eq!(jac[1], 0.0, epsilon = 1e-3);
        assert_relative_eq!(jac[2], 500.0 * root_two_pi, max_relative = 1e-5);
    }

    #[test]
    fn test_sigmas_are_absolute() {
        let peak = Model::double_gaussian("d", [1.0, 10.0, -2.0, 1.0, 20.0, 3.0]);
        assert_eq!(peak.sigmas(), vec![2.0, 3.0]);
        assert_eq!(peak.centroids(), vec![10.0, 20.0]);
        assert_eq!(peak.fwhms().len(), 2);
    }
}
