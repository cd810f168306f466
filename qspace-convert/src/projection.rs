//! Projection of lab-frame momentum onto a user-chosen basis.
//!
//! Basis vectors `u`, `v`, `w` are given in reciprocal-lattice units. They
//! are mapped to Cartesian space with the lattice B matrix, checked for
//! coplanarity, orthonormalised by Gram-Schmidt, and combined with the
//! sample orientation U and the selected scaling:
//!
//! | mode                   | matrix                                   |
//! |------------------------|------------------------------------------|
//! | `NoScaling`            | `R · Uᵀ` (Å⁻¹)                           |
//! | `SingleScale`          | `R · Uᵀ / (2π · min |b*ᵢ|)`              |
//! | `OrthogonalFractional` | row `i` of `R · Uᵀ` over `2π · |B·uᵢ|`   |
//! | `GeneralFractional`    | `(B · [u v w])⁻¹ · Uᵀ / 2π`              |
#![allow(clippy::doc_markdown, clippy::many_single_char_names)]

use qspace_core::{Error, Lattice, Result};
use nalgebra::{Matrix3, Vector3};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default relative tolerance below which a basis counts as coplanar.
pub const DEGENERACY_TOLERANCE: f64 = 1e-10;

/// How projected coordinates are scaled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScalingMode {
    /// Inverse ångström along the orthonormalised axes.
    #[default]
    NoScaling,
    /// Every axis divided by the shortest reciprocal basis length.
    SingleScale,
    /// Each axis divided by its own reciprocal length; exact for
    /// orthogonal lattices.
    OrthogonalFractional,
    /// Fractional coordinates along `u`, `v`, `w` for any lattice.
    GeneralFractional,
}

impl ScalingMode {
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::NoScaling => "Q in A^-1",
            Self::SingleScale => "Q in lattice units",
            Self::OrthogonalFractional => "Orthogonal HKL",
            Self::GeneralFractional => "HKL",
        }
    }
}

impl fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ScalingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Q in A^-1" | "NoScaling" | "none" => Ok(Self::NoScaling),
            "Q in lattice units" | "SingleScale" | "single" => Ok(Self::SingleScale),
            "Orthogonal HKL" | "OrthogonalFractional" | "orthogonal" => {
                Ok(Self::OrthogonalFractional)
            }
            "HKL" | "GeneralFractional" | "hkl" => Ok(Self::GeneralFractional),
            other => Err(Error::config(format!("unknown scaling mode '{other}'"))),
        }
    }
}

/// A built projection: the 3×3 matrix applied to lab-frame momentum plus
/// the names and units of the three output axes.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    matrix: Matrix3<f64>,
    axis_names: [String; 3],
    units: String,
}

impl Projection {
    /// Identity projection: coordinates stay in the lab frame.
    #[must_use]
    pub fn lab_frame() -> Self {
        Self {
            matrix: Matrix3::identity(),
            axis_names: ["Q_lab_x".into(), "Q_lab_y".into(), "Q_lab_z".into()],
            units: "Å^-1".into(),
        }
    }

    #[must_use]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    #[must_use]
    pub fn axis_names(&self) -> &[String; 3] {
        &self.axis_names
    }

    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// Projects a lab-frame momentum vector.
    #[inline]
    #[must_use]
    pub fn apply(&self, q_lab: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * q_lab
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::lab_frame()
    }
}

/// Builds a [`Projection`] from basis vectors, lattice and orientation.
#[derive(Clone, Debug)]
pub struct ProjectionBuilder {
    u: Vector3<f64>,
    v: Vector3<f64>,
    w: Option<Vector3<f64>>,
    scaling: ScalingMode,
    lattice: Option<Lattice>,
    orientation: Matrix3<f64>,
    tolerance: f64,
}

impl Default for ProjectionBuilder {
    fn default() -> Self {
        Self {
            u: Vector3::x(),
            v: Vector3::y(),
            w: None,
            scaling: ScalingMode::NoScaling,
            lattice: None,
            orientation: Matrix3::identity(),
            tolerance: DEGENERACY_TOLERANCE,
        }
    }
}

impl ProjectionBuilder {
    /// Standard basis, no scaling, no lattice.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `u`, `v` and optionally `w` (defaults to `u × v`, taken in
    /// reciprocal-lattice units).
    #[must_use]
    pub fn with_basis(mut self, u: [f64; 3], v: [f64; 3], w: Option<[f64; 3]>) -> Self {
        self.u = Vector3::from(u);
        self.v = Vector3::from(v);
        self.w = w.map(Vector3::from);
        self
    }

    /// Sets up to three basis vectors from loosely typed input; missing
    /// vectors keep their defaults.
    ///
    /// # Errors
    /// Returns a configuration error for more than three vectors or a vector
    /// without exactly three components.
    pub fn try_with_vectors(mut self, vectors: &[Vec<f64>]) -> Result<Self> {
        if vectors.len() > 3 {
            return Err(Error::config(format!(
                "at most 3 basis vectors may be given, got {}",
                vectors.len()
            )));
        }
        for (i, vector) in vectors.iter().enumerate() {
            let parsed: [f64; 3] = vector.as_slice().try_into().map_err(|_| {
                Error::config(format!(
                    "basis vector {} has {} components, expected 3",
                    ["u", "v", "w"][i],
                    vector.len()
                ))
            })?;
            match i {
                0 => self.u = Vector3::from(parsed),
                1 => self.v = Vector3::from(parsed),
                _ => self.w = Some(Vector3::from(parsed)),
            }
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_scaling(mut self, scaling: ScalingMode) -> Self {
        self.scaling = scaling;
        self
    }

    #[must_use]
    pub fn with_lattice(mut self, lattice: Lattice) -> Self {
        self.lattice = Some(lattice);
        self
    }

    /// Sets the sample orientation matrix U.
    #[must_use]
    pub fn with_orientation(mut self, orientation: Matrix3<f64>) -> Self {
        self.orientation = orientation;
        self
    }

    /// Sets the relative coplanarity tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Builds the projection.
    ///
    /// # Errors
    /// Returns [`Error::DegenerateBasis`] for coplanar basis vectors, and a
    /// configuration error for a scaling mode that needs a lattice when none
    /// is set or for a non-invertible orientation.
    pub fn build(&self) -> Result<Projection> {
        if self.scaling != ScalingMode::NoScaling && self.lattice.is_none() {
            return Err(Error::config(format!(
                "scaling mode '{}' requires lattice parameters",
                self.scaling
            )));
        }
        if self.orientation.determinant().abs() < self.tolerance {
            return Err(Error::config("sample orientation matrix is singular"));
        }
        if self.scaling == ScalingMode::OrthogonalFractional
            && self.lattice.as_ref().is_some_and(|l| !l.is_orthogonal())
        {
            log::warn!(
                "scaling mode '{}' is exact only for orthogonal lattices; use '{}' for fractional coordinates",
                ScalingMode::OrthogonalFractional,
                ScalingMode::GeneralFractional
            );
        }
        let b = self.lattice.as_ref().map_or_else(Matrix3::identity, Lattice::b_matrix);
        let w_hkl = self.w.unwrap_or_else(|| self.u.cross(&self.v));
        let bu = b * self.u;
        let bv = b * self.v;
        let bw = b * w_hkl;

        let scale = bu.norm() * bv.norm() * bw.norm();
        let basis = Matrix3::from_columns(&[bu, bv, bw]);
        let determinant = basis.determinant();
        if !(scale > 0.0 && determinant.abs() > self.tolerance * scale) {
            return Err(Error::DegenerateBasis { determinant });
        }

        let e1 = bu.normalize();
        let e2 = (bv - e1 * e1.dot(&bv)).normalize();
        let e3 = (bw - e1 * e1.dot(&bw) - e2 * e2.dot(&bw)).normalize();
        let rotation = Matrix3::from_rows(&[e1.transpose(), e2.transpose(), e3.transpose()]);
        let to_crystal = self.orientation.transpose();

        let matrix = match self.scaling {
            ScalingMode::NoScaling => rotation * to_crystal,
            ScalingMode::SingleScale => {
                let shortest = self
                    .lattice
                    .as_ref()
                    .map_or(1.0, |l| l.reciprocal_lengths().into_iter().fold(f64::INFINITY, f64::min));
                rotation * to_crystal / (TAU * shortest)
            }
            ScalingMode::OrthogonalFractional => {
                let factors = Vector3::new(bu.norm(), bv.norm(), bw.norm()).map(|n| 1.0 / (TAU * n));
                Matrix3::from_diagonal(&factors) * rotation * to_crystal
            }
            ScalingMode::GeneralFractional => {
                let inverse = basis
                    .try_inverse()
                    .ok_or(Error::DegenerateBasis { determinant })?;
                inverse * to_crystal / TAU
            }
        };

        let (axis_names, units) = if self.lattice.is_some() {
            let units = if self.scaling == ScalingMode::NoScaling {
                "Å^-1"
            } else {
                "r.l.u."
            };
            (
                [
                    axis_name(&self.u, 'H'),
                    axis_name(&self.v, 'K'),
                    axis_name(&w_hkl, 'L'),
                ],
                units,
            )
        } else {
            (["Q_x".into(), "Q_y".into(), "Q_z".into()], "Å^-1")
        };

        Ok(Projection {
            matrix,
            axis_names,
            units: units.into(),
        })
    }
}

/// Axis label such as `[H,0,0]` or `[H,-H,0.5H]`.
fn axis_name(vector: &Vector3<f64>, letter: char) -> String {
    let parts: Vec<String> = vector
        .iter()
        .map(|&c| {
            if c.abs() < 1e-6 {
                "0".to_string()
            } else if (c - 1.0).abs() < 1e-6 {
                letter.to_string()
            } else if (c + 1.0).abs() < 1e-6 {
                format!("-{letter}")
            } else {
                format!("{}{letter}", trim_number(c))
            }
        })
        .collect();
    format!("[{}]", parts.join(","))
}

fn trim_number(value: f64) -> String {
    let text = format!("{value:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
