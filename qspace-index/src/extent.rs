//! Axis-aligned N-dimensional boxes.

use qspace_core::{Dimension, Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Half-open box `[min, max)` in every dimension.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Extent {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl Extent {
    /// Creates an extent from per-dimension lower and upper bounds.
    ///
    /// # Errors
    /// Returns a configuration error if the lengths differ, the extent has
    /// no dimensions, or any `min >= max`.
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Result<Self> {
        if min.len() != max.len() {
            return Err(Error::config(format!(
                "extent has {} lower and {} upper bounds",
                min.len(),
                max.len()
            )));
        }
        if min.is_empty() {
            return Err(Error::config("extent needs at least one dimension"));
        }
        for (d, (lo, hi)) in min.iter().zip(&max).enumerate() {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(Error::config(format!(
                    "extent dimension {d} has invalid bounds [{lo}, {hi})"
                )));
            }
        }
        Ok(Self { min, max })
    }

    /// Extent spanned by a list of dimension descriptors.
    ///
    /// # Errors
    /// Returns a configuration error naming the first invalid dimension.
    pub fn from_dimensions(dims: &[Dimension]) -> Result<Self> {
        qspace_core::validate_dimensions(dims)?;
        Self::new(
            dims.iter().map(|d| d.min).collect(),
            dims.iter().map(|d| d.max).collect(),
        )
    }

    #[must_use]
    pub fn n_dims(&self) -> usize {
        self.min.len()
    }

    #[must_use]
    pub fn min(&self) -> &[f64] {
        &self.min
    }

    #[must_use]
    pub fn max(&self) -> &[f64] {
        &self.max
    }

    /// Width along dimension `d`.
    #[must_use]
    pub fn width(&self, d: usize) -> f64 {
        self.max[d] - self.min[d]
    }

    /// Product of all widths.
    #[must_use]
    pub fn volume(&self) -> f64 {
        (0..self.n_dims()).map(|d| self.width(d)).product()
    }

    /// Centre point.
    #[must_use]
    pub fn center(&self) -> Vec<f64> {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| 0.5 * (lo + hi))
            .collect()
    }

    /// True if `coords` lies inside the half-open box.
    #[must_use]
    pub fn contains(&self, coords: &[f64]) -> bool {
        coords.len() == self.n_dims()
            && coords
                .iter()
                .zip(self.min.iter().zip(&self.max))
                .all(|(c, (lo, hi))| *c >= *lo && *c < *hi)
    }

    /// True if `other` lies completely inside this extent.
    #[must_use]
    pub fn contains_extent(&self, other: &Extent) -> bool {
        (0..self.n_dims()).all(|d| self.min[d] <= other.min[d] && other.max[d] <= self.max[d])
    }

    /// True if the two extents share any volume.
    #[must_use]
    pub fn overlaps(&self, other: &Extent) -> bool {
        (0..self.n_dims()).all(|d| self.min[d] < other.max[d] && other.min[d] < self.max[d])
    }

    /// Linear index of the child containing `coords` when the box is split
    /// into `split_into` slices per dimension.
    ///
    /// Per-dimension indices are clamped into range so coordinates on or
    /// just past a boundary land in the nearest child. Dimension 0 varies
    /// fastest.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn child_index(&self, coords: &[f64], split_into: usize) -> usize {
        let last = split_into - 1;
        let mut index = 0;
        let mut stride = 1;
        for d in 0..self.n_dims() {
            let child_width = self.width(d) / split_into as f64;
            let slot = ((coords[d] - self.min[d]) / child_width).floor();
            let slot = if slot.is_nan() || slot < 0.0 {
                0
            } else {
                (slot as usize).min(last)
            };
            index += slot * stride;
            stride *= split_into;
        }
        index
    }

    /// Extent of child `index` (see [`Self::child_index`] for the layout).
    ///
    /// Neighbouring children share their boundary value exactly, and the
    /// outermost children reuse the parent's bounds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn child(&self, index: usize, split_into: usize) -> Extent {
        let mut min = Vec::with_capacity(self.n_dims());
        let mut max = Vec::with_capacity(self.n_dims());
        let mut rest = index;
        for d in 0..self.n_dims() {
            let slot = rest % split_into;
            rest /= split_into;
            let step = self.width(d) / split_into as f64;
            let lo = if slot == 0 {
                self.min[d]
            } else {
                self.min[d] + slot as f64 * step
            };
            let hi = if slot + 1 == split_into {
                self.max[d]
            } else {
                self.min[d] + (slot + 1) as f64 * step
            };
            min.push(lo);
            max.push(hi);
        }
        Extent { min, max }
    }
}
