// Linear background: y = slope * x + intercept
// params = [slope, intercept]

pub const N_PARAMS: usize = 2;
pub const PARAMETER_NAMES: [&str; N_PARAMS] = ["slope", "intercept"];

pub fn default_bounds() -> (Vec<f64>, Vec<f64>) {
    (
        vec![f64::NEG_INFINITY, f64::NEG_INFINITY],
        vec![f64::INFINITY, f64::INFINITY],
    )
}

pub fn evaluate(params: &[f64], x: f64) -> f64 {
    params[0] * x + params[1]
}

pub fn integral(a: f64, b: f64, params: &[f64]) -> f64 {
    let (slope, intercept) = (params[0], params[1]);
    slope * (b * b - a * a) / 2.0 + intercept * (b - a)
}

pub fn gradient(_params: &[f64], x: f64, out: &mut [f64]) {
    out[0] = x;
    out[1] = 1.0;
}
