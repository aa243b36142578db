use std::fmt;

#[derive(PartialEq, Default, Debug, Clone, Copy, serde::Deserialize, serde::Serialize)]
pub struct Value {
    pub value: f64,
    pub uncertainty: f64,
}

impl Value {
    pub fn new(value: f64, uncertainty: f64) -> Self {
        Self { value, uncertainty }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = f.precision().unwrap_or(3);
        write!(
            f,
            "{:.*} ± {:.*}",
            precision, self.value, precision, self.uncertainty
        )
    }
}

/// Quadratic channel-to-energy calibration, `E = a ch² + b ch + c`.
#[derive(PartialEq, Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Calibration {
    pub a: Value,
    pub b: Value,
    pub c: Value,
    pub cov: Option<[[f64; 3]; 3]>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            a: Value::new(0.0, 0.0),
            b: Value::new(1.0, 0.0),
            c: Value::new(0.0, 0.0),
            cov: None,
        }
    }
}

impl Calibration {
    pub fn from_coefficients(a: f64, b: f64, c: f64) -> Self {
        Self {
            a: Value::new(a, 0.0),
            b: Value::new(b, 0.0),
            c: Value::new(c, 0.0),
            cov: None,
        }
    }

    pub fn calibrate(&self, x: f64) -> f64 {
        self.a.value * x * x + self.b.value * x + self.c.value
    }

    /// A calibration maps channels to energies usefully only if it is
    /// strictly increasing over `[0, max_channel]`.
    pub fn is_increasing_over(&self, max_channel: f64) -> bool {
        let slope = |x: f64| 2.0 * self.a.value * x + self.b.value;
        slope(0.0) > 0.0 && slope(max_channel) > 0.0
    }
}
