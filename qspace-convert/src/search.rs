//! Bounded golden-section search for extremal points of non-analytic
//! transforms.

use qspace_core::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const INV_PHI: f64 = 0.618_033_988_749_894_8;

/// Constants of the golden-section search.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExtremumSearch {
    /// Maximum number of interval reductions.
    pub iterations: usize,
    /// Stop once the bracket is narrower than this fraction of the input range.
    pub tolerance: f64,
}

impl Default for ExtremumSearch {
    fn default() -> Self {
        Self {
            iterations: 64,
            tolerance: 1e-9,
        }
    }
}

impl ExtremumSearch {
    /// Checks the search constants.
    ///
    /// # Errors
    /// Returns a configuration error for zero iterations or a non-positive
    /// tolerance.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::config("extremum search needs at least one iteration"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::config(format!(
                "extremum search tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    /// Position of the minimum of a unimodal `f` on `[lo, hi]`.
    ///
    /// NaN values count as +∞, so undefined regions are never picked.
    pub fn minimize<F: FnMut(f64) -> f64>(&self, lo: f64, hi: f64, mut f: F) -> f64 {
        let mut eval = |x: f64| {
            let v = f(x);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };
        let (mut a, mut b) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let stop = (b - a).abs() * self.tolerance;
        let mut c = b - INV_PHI * (b - a);
        let mut d = a + INV_PHI * (b - a);
        let mut fc = eval(c);
        let mut fd = eval(d);
        for _ in 0..self.iterations {
            if (b - a).abs() <= stop {
                break;
            }
            if fc < fd {
                b = d;
                d = c;
                fd = fc;
                c = b - INV_PHI * (b - a);
                fc = eval(c);
            } else {
                a = c;
                c = d;
                fc = fd;
                d = a + INV_PHI * (b - a);
                fd = eval(d);
            }
        }
        0.5 * (a + b)
    }

    /// Position of the maximum of a unimodal `f` on `[lo, hi]`.
    pub fn maximize<F: FnMut(f64) -> f64>(&self, lo: f64, hi: f64, mut f: F) -> f64 {
        self.minimize(lo, hi, |x| -f(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_finds_parabola_minimum() {
        let search = ExtremumSearch::default();
        let x = search.minimize(-3.0, 5.0, |x| (x - 1.25).powi(2));
        assert_abs_diff_eq!(x, 1.25, epsilon = 1e-6);
    }

    #[test]
    fn test_finds_maximum_and_handles_reversed_range() {
        let search = ExtremumSearch::default();
        let x = search.maximize(std::f64::consts::PI, 0.0, f64::sin);
        assert_abs_diff_eq!(x, std::f64::consts::FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn test_monotonic_function_goes_to_edge() {
        let search = ExtremumSearch::default();
        let x = search.minimize(0.0, 1.0, |x| x);
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_nan_region_is_avoided() {
        let search = ExtremumSearch::default();
        let x = search.minimize(-1.0, 1.0, |x| if x < 0.0 { f64::NAN } else { x + 1.0 });
        assert!(x >= -1e-6);
    }

    #[test]
    fn test_validate() {
        assert!(ExtremumSearch::default().validate().is_ok());
        let bad = ExtremumSearch {
            iterations: 0,
            tolerance: 1e-9,
        };
        assert!(bad.validate().is_err());
    }
}
