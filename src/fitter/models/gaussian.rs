// Gaussian peak: y = amplitude * exp(-(x - centroid)^2 / (2 sigma^2))
// params = [amplitude, centroid, sigma]

use std::f64::consts::{PI, SQRT_2};

pub const N_PARAMS: usize = 3;
pub const PARAMETER_NAMES: [&str; N_PARAMS] = ["amplitude", "centroid", "sigma"];

/// FWHM = 2 sqrt(2 ln 2) sigma, rounded the way spectroscopists quote it.
pub const FWHM_FACTOR: f64 = 2.3548;

/// Highest centroid energy (keV) the optimizer may move a peak to.
pub const MAX_CENTROID: f64 = 20_000.0;
pub const MAX_SIGMA: f64 = 15.0;

pub fn default_bounds() -> (Vec<f64>, Vec<f64>) {
    (
        vec![0.0, 0.0, 0.0],
        vec![f64::INFINITY, MAX_CENTROID, MAX_SIGMA],
    )
}

fn is_collapsed(sigma: f64) -> bool {
    sigma.abs() < f64::MIN_POSITIVE
}

pub fn evaluate(params: &[f64], x: f64) -> f64 {
    let (amplitude, centroid, sigma) = (params[0], params[1], params[2]);
    if is_collapsed(sigma) {
        return 0.0;
    }
    amplitude * (-(x - centroid).powi(2) / (2.0 * sigma * sigma)).exp()
}

pub fn integral(a: f64, b: f64, params: &[f64]) -> f64 {
    let (amplitude, centroid, sigma) = (params[0], params[1], params[2].abs());
    if is_collapsed(sigma) {
        return 0.0;
    }
    let scale = SQRT_2 * sigma;
    let upper = libm::erf((b - centroid) / scale);
    let lower = libm::erf((a - centroid) / scale);
    amplitude * sigma * (PI / 2.0).sqrt() * (upper - lower)
}

pub fn area(params: &[f64]) -> f64 {
    evaluate(params, params[1]) * params[2].abs() * (2.0 * PI).sqrt()
}

pub fn fwhm(params: &[f64]) -> f64 {
    FWHM_FACTOR * params[2]
}

/// Partial derivatives of `evaluate` with respect to amplitude, centroid and sigma.
pub fn gradient(params: &[f64], x: f64, out: &mut [f64]) {
    let (amplitude, centroid, sigma) = (params[0], params[1], params[2]);
    if is_collapsed(sigma) {
        out[..N_PARAMS].fill(0.0);
        return;
    }

    let dx = x - centroid;
    let sigma2 = sigma * sigma;
    let e = (-dx * dx / (2.0 * sigma2)).exp();

    out[0] = e;
    out[1] = amplitude * e * dx / sigma2;
    out[2] = amplitude * e * dx * dx / (sigma2 * sigma);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_area_matches_wide_integral() {
        let cases = [
            [500.0, 1000.0, 3.0],
            [1.0, 0.0, 0.2],
            [12_345.0, 661.7, 14.5],
            [0.5, 2614.5, 1.1],
        ];

        for params in cases {
            let (centroid, sigma) = (params[1], params[2]);
            let wide = integral(centroid - 50.0 * sigma, centroid + 50.0 * sigma, &params);
            assert_relative_eq!(area(&params), wide, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_fwhm_is_exact_multiple_of_sigma() {
        for sigma in [0.0, 1.0, 2.5, -3.0, 14.999] {
            assert_eq!(fwhm(&[100.0, 500.0, sigma]), 2.3548 * sigma);
        }
    }

    #[test]
    fn test_half_integral_is_half_area() {
        let params = [250.0, 1332.5, 2.0];
        let half = integral(f64::NEG_INFINITY, 1332.5, &params);
        assert_relative_eq!(half, area(&params) / 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_gradient_matches_numeric() {
        let params = [200.0, 1000.0, 2.5];
        let x = 1003.0;
        let mut analytic = [0.0; N_PARAMS];
        gradient(&params, x, &mut analytic);

        let numeric = crate::fitter::numdiff::central_gradient(
            |p: &[f64]| evaluate(p, x),
            &params,
            1e-6,
        );
        for (a, n) in analytic.iter().zip(numeric) {
            assert_relative_eq!(*a, n, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_collapsed_sigma_is_flat() {
        let params = [100.0, 10.0, 0.0];
        assert_eq!(evaluate(&params, 10.0), 0.0);
        assert_eq!(integral(0.0, 20.0, &params), 0.0);
        assert_eq!(area(&params), 0.0);
    }
}
