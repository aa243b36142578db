/// Relative step used when differentiating definite integrals.
pub const INTEGRAL_STEP: f64 = 1e-5;

/// Relative step used when differentiating peak areas. Area is close to
/// bilinear in amplitude and sigma, so a finer step keeps the estimate tight.
pub const AREA_STEP: f64 = 1e-7;

/// Central-difference gradient of a scalar function of a parameter vector.
///
/// Each component is perturbed by `rel_step * max(|p_i|, 1)` in both
/// directions, so parameters near zero still get a usable absolute step.
pub fn central_gradient<F>(f: F, params: &[f64], rel_step: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut work = params.to_vec();
    let mut gradient = Vec::with_capacity(params.len());

    for (i, &p) in params.iter().enumerate() {
        let h = rel_step * p.abs().max(1.0);

        work[i] = p + h;
        let forward = f(&work);
        work[i] = p - h;
        let backward = f(&work);
        work[i] = p;

        gradient.push((forward - backward) / (2.0 * h));
    }

    gradient
}
