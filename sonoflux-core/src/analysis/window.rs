//! FFT window functions.
//!
//! Coefficients are generated once at stage construction by applying the
//! selected window to a unit vector, so the per-frame cost is a single
//! multiply per sample.

use std::f64::consts::PI;

use crate::error::{EngineError, Result};

/// Known window kinds. `Hanning` parses as an alias of `Hann`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    BartlettHann,
    Blackman,
    BlackmanNuttall,
    Hann,
    Hamming,
    Lanczos,
    Nuttall,
}

impl Default for WindowKind {
    fn default() -> Self {
        WindowKind::Hann
    }
}

impl WindowKind {
    /// Case-insensitive name lookup. Unknown names are an error; callers
    /// that want the conventional fallback use
    /// `parse(..).unwrap_or_default()` and log the substitution.
    pub fn parse(name: &str) -> Result<WindowKind> {
        match name.to_ascii_lowercase().as_str() {
            "bartletthann" => Ok(WindowKind::BartlettHann),
            "blackman" => Ok(WindowKind::Blackman),
            "blackmannuttall" => Ok(WindowKind::BlackmanNuttall),
            "hann" | "hanning" => Ok(WindowKind::Hann),
            "hamming" => Ok(WindowKind::Hamming),
            "lanczos" => Ok(WindowKind::Lanczos),
            "nuttall" => Ok(WindowKind::Nuttall),
            _ => Err(EngineError::Config(format!(
                "unknown window function name: '{name}'"
            ))),
        }
    }
}

/// Overwrite `coeffs` with the window's coefficients (the window applied
/// to a unit vector). An empty slice is left untouched.
pub fn fill(coeffs: &mut [f64], kind: WindowKind) {
    let n = coeffs.len();
    if n == 0 {
        return;
    }
    if n == 1 {
        coeffs[0] = 1.0;
        return;
    }

    let denom = (n - 1) as f64;
    for (k, c) in coeffs.iter_mut().enumerate() {
        let x = k as f64 / denom;
        let phi = 2.0 * PI * x;
        *c = match kind {
            WindowKind::BartlettHann => 0.62 - 0.48 * (x - 0.5).abs() - 0.38 * phi.cos(),
            WindowKind::Blackman => 0.42 - 0.5 * phi.cos() + 0.08 * (2.0 * phi).cos(),
            WindowKind::BlackmanNuttall => {
                0.363_581_9 - 0.489_177_5 * phi.cos() + 0.136_599_5 * (2.0 * phi).cos()
                    - 0.010_641_1 * (3.0 * phi).cos()
            }
            WindowKind::Hann => 0.5 * (1.0 - phi.cos()),
            WindowKind::Hamming => 0.54 - 0.46 * phi.cos(),
            WindowKind::Lanczos => sinc(2.0 * x - 1.0),
            WindowKind::Nuttall => {
                0.355_768 - 0.487_396 * phi.cos() + 0.144_232 * (2.0 * phi).cos()
                    - 0.012_604 * (3.0 * phi).cos()
            }
        };
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}
