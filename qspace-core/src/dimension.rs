//! Output dimension descriptors.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default half-width used when a dimension has no caller-supplied bounds.
///
/// Large enough to be effectively unbounded while still leaving room for
/// box arithmetic without overflow.
pub const UNBOUNDED_LIMIT: f64 = f32::MAX as f64 / 10.0;

/// Closed-open range `[min, max)` along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    /// Creates bounds from a min/max pair.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Effectively unbounded range.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(-UNBOUNDED_LIMIT, UNBOUNDED_LIMIT)
    }

    /// Inverted range that any fold operation will replace.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(f64::INFINITY, f64::NEG_INFINITY)
    }

    /// True if nothing has been folded into this range yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// True for a usable allocation range (`min < max`, both finite).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min < self.max
    }

    /// True if `value` lies in `[min, max)`.
    #[inline]
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }

    /// Widens the range to include `value`.
    #[inline]
    pub fn include(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Smallest range containing both inputs.
    #[must_use]
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Width of the range.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Range widened on both sides by `fraction` of its width, or by
    /// `fraction` itself for a zero-width range.
    ///
    /// Turns an estimated closed `[min, max]` into a half-open allocation
    /// range that still contains `max`.
    #[must_use]
    pub fn padded(&self, fraction: f64) -> Bounds {
        let pad = if self.width() > 0.0 {
            self.width() * fraction
        } else {
            fraction * self.min.abs().max(1.0)
        };
        Bounds::new(self.min - pad, self.max + pad)
    }
}

/// Descriptor of one output axis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dimension {
    /// Human-readable axis name, e.g. `|Q|` or `[H,0,0]`.
    pub name: String,
    /// Units label, e.g. `Å^-1` or `meV`.
    pub units: String,
    /// Lower bound (inclusive).
    pub min: f64,
    /// Upper bound (exclusive).
    pub max: f64,
}

impl Dimension {
    /// Creates a new dimension descriptor.
    pub fn new(name: impl Into<String>, units: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            min,
            max,
        }
    }

    /// Bounds of this dimension.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.min, self.max)
    }

    /// Replaces the bounds of this dimension.
    #[must_use]
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.min = bounds.min;
        self.max = bounds.max;
        self
    }

    /// Checks `min < max` with finite values.
    ///
    /// # Errors
    /// Returns a configuration error naming the offending dimension.
    pub fn validate(&self) -> Result<()> {
        if self.bounds().is_valid() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "dimension '{}' has invalid bounds [{}, {})",
                self.name, self.min, self.max
            )))
        }
    }
}

/// Validates every descriptor in `dims`.
///
/// # Errors
/// Returns the first configuration error found.
pub fn validate_dimensions(dims: &[Dimension]) -> Result<()> {
    if dims.is_empty() {
        return Err(Error::config("at least one dimension is required"));
    }
    dims.iter().try_for_each(Dimension::validate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_contains_is_half_open() {
        let b = Bounds::new(0.0, 1.0);
        assert!(b.contains(0.0));
        assert!(b.contains(0.999));
        assert!(!b.contains(1.0));
        assert!(!b.contains(-0.1));
    }

    #[test]
    fn test_bounds_fold() {
        let mut b = Bounds::empty();
        assert!(b.is_empty());
        b.include(3.0);
        b.include(-1.0);
        assert_eq!(b, Bounds::new(-1.0, 3.0));
        assert_eq!(b.union(&Bounds::new(0.0, 5.0)), Bounds::new(-1.0, 5.0));
    }

    #[test]
    fn test_padded_contains_max() {
        let b = Bounds::new(1.0, 3.0).padded(0.01);
        assert!(b.contains(3.0));
        assert!((b.min - 0.98).abs() < 1e-12);
        let point = Bounds::new(2.0, 2.0).padded(0.01);
        assert!(point.is_valid());
        assert!(point.contains(2.0));
    }

    #[test]
    fn test_dimension_validation() {
        assert!(Dimension::new("|Q|", "Å^-1", 0.0, 10.0).validate().is_ok());
        let err = Dimension::new("DeltaE", "meV", 5.0, 5.0).validate().unwrap_err();
        assert!(err.to_string().contains("DeltaE"));
        assert!(validate_dimensions(&[]).is_err());
    }
}
