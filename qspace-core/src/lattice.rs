//! Unit cell and reciprocal-lattice matrix.

use crate::{Error, Result};
use nalgebra::Matrix3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Direct-space unit cell: lengths in Å, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Lattice {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Lattice {
    /// Creates a unit cell.
    ///
    /// # Errors
    /// Returns a configuration error if a length is not positive or the
    /// angles do not describe a cell with positive volume.
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Result<Self> {
        let lattice = Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        };
        if !(a > 0.0 && b > 0.0 && c > 0.0) {
            return Err(Error::config(format!(
                "lattice lengths must be positive, got ({a}, {b}, {c})"
            )));
        }
        let det = lattice.metric_tensor().determinant();
        if !det.is_finite() || det <= 0.0 {
            return Err(Error::config(format!(
                "lattice angles ({alpha}, {beta}, {gamma}) do not form a valid cell"
            )));
        }
        Ok(lattice)
    }

    /// Cubic cell with edge `a`.
    ///
    /// # Errors
    /// Returns a configuration error if `a` is not positive.
    pub fn cubic(a: f64) -> Result<Self> {
        Self::new(a, a, a, 90.0, 90.0, 90.0)
    }

    /// Direct-space metric tensor G.
    #[must_use]
    pub fn metric_tensor(&self) -> Matrix3<f64> {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        let (a, b, c) = (self.a, self.b, self.c);
        Matrix3::new(
            a * a,
            a * b * cg,
            a * c * cb,
            a * b * cg,
            b * b,
            b * c * ca,
            a * c * cb,
            b * c * ca,
            c * c,
        )
    }

    /// Busing-Levy B matrix (reciprocal lengths without the 2π factor).
    ///
    /// Columns are the reciprocal basis vectors in the crystal Cartesian
    /// frame; `B * hkl` gives the scattering vector over 2π.
    #[must_use]
    pub fn b_matrix(&self) -> Matrix3<f64> {
        let g = self.metric_tensor();
        // metric tensor of a valid cell is always invertible
        let gs = g.try_inverse().unwrap_or_else(Matrix3::identity);
        let astar = gs[(0, 0)].sqrt();
        let bstar = gs[(1, 1)].sqrt();
        let cstar = gs[(2, 2)].sqrt();
        let cos_beta_star = gs[(0, 2)] / (astar * cstar);
        let cos_gamma_star = gs[(0, 1)] / (astar * bstar);
        let sin_beta_star = (1.0 - cos_beta_star * cos_beta_star).max(0.0).sqrt();
        let sin_gamma_star = (1.0 - cos_gamma_star * cos_gamma_star).max(0.0).sqrt();
        let cos_alpha = self.alpha.to_radians().cos();
        Matrix3::new(
            astar,
            bstar * cos_gamma_star,
            cstar * cos_beta_star,
            0.0,
            bstar * sin_gamma_star,
            -cstar * sin_beta_star * cos_alpha,
            0.0,
            0.0,
            1.0 / self.c,
        )
    }

    /// Lengths of the reciprocal basis vectors `|a*|, |b*|, |c*|` (no 2π).
    #[must_use]
    pub fn reciprocal_lengths(&self) -> [f64; 3] {
        let b = self.b_matrix();
        [
            b.column(0).norm(),
            b.column(1).norm(),
            b.column(2).norm(),
        ]
    }

    /// True if all three angles are 90°.
    #[must_use]
    pub fn is_orthogonal(&self) -> bool {
        [self.alpha, self.beta, self.gamma]
            .iter()
            .all(|angle| (angle - 90.0).abs() < 1e-9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cubic_b_matrix_is_diagonal() {
        let lattice = Lattice::cubic(4.0).unwrap();
        let b = lattice.b_matrix();
        assert_relative_eq!(b, Matrix3::from_diagonal_element(0.25), epsilon = 1e-12);
        assert!(lattice.is_orthogonal());
    }

    #[test]
    fn test_hexagonal_reciprocal_lengths() {
        let lattice = Lattice::new(3.0, 3.0, 5.0, 90.0, 90.0, 120.0).unwrap();
        let [astar, bstar, cstar] = lattice.reciprocal_lengths();
        // |a*| = 2 / (sqrt(3) a) for a hexagonal cell
        assert_relative_eq!(astar, 2.0 / (3.0_f64.sqrt() * 3.0), epsilon = 1e-12);
        assert_relative_eq!(bstar, astar, epsilon = 1e-12);
        assert_relative_eq!(cstar, 0.2, epsilon = 1e-12);
        assert!(!lattice.is_orthogonal());
    }

    #[test]
    fn test_b_matrix_inverts_metric() {
        // B^T B equals the reciprocal metric tensor G^-1.
        let lattice = Lattice::new(3.0, 4.0, 5.0, 80.0, 95.0, 105.0).unwrap();
        let b = lattice.b_matrix();
        let gs = lattice.metric_tensor().try_inverse().unwrap();
        assert_relative_eq!(b.transpose() * b, gs, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_cells() {
        assert!(Lattice::cubic(0.0).is_err());
        assert!(Lattice::new(1.0, 1.0, 1.0, 0.0, 0.0, 0.0).is_err());
    }
}
