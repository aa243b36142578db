// Two overlapping Gaussian components sharing one sub-model.
// params = [amplitude_0, centroid_0, sigma_0, amplitude_1, centroid_1, sigma_1]

use super::gaussian;

pub const N_PARAMS: usize = 2 * gaussian::N_PARAMS;
pub const PARAMETER_NAMES: [&str; N_PARAMS] = [
    "amplitude_0",
    "centroid_0",
    "sigma_0",
    "amplitude_1",
    "centroid_1",
    "sigma_1",
];

pub fn default_bounds() -> (Vec<f64>, Vec<f64>) {
    let (mut lower, mut upper) = gaussian::default_bounds();
    lower.extend_from_within(..);
    upper.extend_from_within(..);
    (lower, upper)
}

fn components(params: &[f64]) -> impl Iterator<Item = &[f64]> {
    params.chunks_exact(gaussian::N_PARAMS)
}

pub fn evaluate(params: &[f64], x: f64) -> f64 {
    components(params).map(|p| gaussian::evaluate(p, x)).sum()
}

pub fn integral(a: f64, b: f64, params: &[f64]) -> f64 {
    components(params)
        .map(|p| gaussian::integral(a, b, p))
        .sum()
}

pub fn area(params: &[f64]) -> f64 {
    components(params).map(gaussian::area).sum()
}

pub fn fwhms(params: &[f64]) -> Vec<f64> {
    components(params).map(gaussian::fwhm).collect()
}

pub fn gradient(params: &[f64], x: f64, out: &mut [f64]) {
    for (p, o) in components(params).zip(out.chunks_exact_mut(gaussian::N_PARAMS)) {
        gaussian::gradient(p, x, o);
    }
}
