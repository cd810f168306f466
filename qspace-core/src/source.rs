//! Interfaces to the external collaborators a conversion reads from.
//!
//! - [`SourceDataset`]: per-spectrum bin boundaries, signal and errors.
//! - [`GeometryResolver`]: per-spectrum detector id, position and flags.
//! - [`RunLogs`]: named run-level values, lattice and sample orientation.
//!
//! In-memory implementations live in [`crate::memory`].

use crate::error::SpectrumError;
use crate::lattice::Lattice;
use crate::units::{Unit, UnitConversion};
use crate::{Error, Result};
use nalgebra::Matrix3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Borrowed view of one spectrum.
///
/// `x` holds either bin boundaries (`y.len() + 1` values, histogram data)
/// or bin centres (`y.len()` values, point data).
#[derive(Debug, Clone, Copy)]
pub struct Spectrum<'a> {
    pub x: &'a [f64],
    pub y: &'a [f64],
    pub e: &'a [f64],
}

impl<'a> Spectrum<'a> {
    /// Creates a spectrum view.
    #[must_use]
    pub fn new(x: &'a [f64], y: &'a [f64], e: &'a [f64]) -> Self {
        Self { x, y, e }
    }

    /// Checks array lengths against each other.
    ///
    /// # Errors
    /// Returns [`SpectrumError::MalformedAxis`] if the lengths disagree.
    pub fn validate(&self, spectrum: usize) -> std::result::Result<(), SpectrumError> {
        let n = self.y.len();
        let axis_ok = self.x.len() == n + 1 || (self.x.len() == n && n > 0);
        if axis_ok && self.e.len() == n {
            Ok(())
        } else {
            Err(SpectrumError::MalformedAxis {
                spectrum,
                edges: self.x.len(),
                signal: n,
                errors: self.e.len(),
            })
        }
    }

    /// Number of bins.
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.y.len()
    }

    /// True if `x` holds bin boundaries.
    #[must_use]
    pub fn is_histogram(&self) -> bool {
        self.x.len() == self.y.len() + 1
    }

    /// Centre of bin `index`.
    #[inline]
    #[must_use]
    pub fn bin_center(&self, index: usize) -> f64 {
        if self.is_histogram() {
            0.5 * (self.x[index] + self.x[index + 1])
        } else {
            self.x[index]
        }
    }

    /// Ordered `(min, max)` of the axis, or `None` if it is empty.
    #[must_use]
    pub fn x_range(&self) -> Option<(f64, f64)> {
        let first = *self.x.first()?;
        let last = *self.x.last()?;
        Some((first.min(last), first.max(last)))
    }

    /// Ordered `(min, max)` over the strictly positive axis values and bin
    /// centres, or `None` if there are none. An axis starting at zero
    /// yields its first positive edge or centre as the lower end.
    #[must_use]
    pub fn positive_x_range(&self) -> Option<(f64, f64)> {
        let centres = (0..self.n_bins()).map(|i| self.bin_center(i));
        self.x
            .iter()
            .copied()
            .chain(centres)
            .filter(|v| *v > 0.0 && v.is_finite())
            .fold(None, |range, v| match range {
                None => Some((v, v)),
                Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
            })
    }
}

/// Numeric vertical axis of a dataset (one value per spectrum).
#[derive(Debug, Clone, Copy)]
pub struct SpectrumAxis<'a> {
    pub name: &'a str,
    pub unit: &'a Unit,
    pub values: &'a [f64],
}

/// Read access to the binned source data.
pub trait SourceDataset: Sync {
    /// Number of spectra.
    fn spectrum_count(&self) -> usize;

    /// Unit of the x axis shared by all spectra.
    fn x_unit(&self) -> &Unit;

    /// Spectrum at `index`, or `None` if out of range.
    fn spectrum(&self, index: usize) -> Option<Spectrum<'_>>;

    /// Numeric vertical axis, if the dataset has one.
    fn spectrum_axis(&self) -> Option<SpectrumAxis<'_>> {
        None
    }

    /// Run index stamped on every event converted from this dataset.
    fn run_index(&self) -> u16 {
        0
    }

    /// Portion of the spectrum's axis that `conversion` can map, in the
    /// target unit. `None` if the spectrum is missing or nothing converts.
    fn convertible_range(&self, index: usize, conversion: &UnitConversion) -> Option<(f64, f64)> {
        let spectrum = self.spectrum(index)?;
        if conversion.is_identity() {
            return spectrum.x_range();
        }
        let (lo, hi) = spectrum.positive_x_range()?;
        conversion.valid_range(lo, hi)
    }
}

/// Position and flags of the detector behind one spectrum, as resolved
/// from the instrument description.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorInfo {
    pub detector_id: u32,
    /// Position relative to the sample (m); the beam travels along +z.
    pub position: [f64; 3],
    pub is_monitor: bool,
    pub is_masked: bool,
    /// Per-detector fixed final energy (meV) for indirect geometry.
    pub efixed: Option<f64>,
}

/// Instrument geometry lookup.
pub trait GeometryResolver: Sync {
    /// Identity of the instrument; the detector cache is keyed by it.
    fn instrument_id(&self) -> &str;

    /// Number of spectra the instrument maps.
    fn spectrum_count(&self) -> usize;

    /// Source-to-sample distance (m).
    fn l1(&self) -> f64;

    /// Detector behind `spectrum`, or `None` if it has none.
    fn detector(&self, spectrum: usize) -> Option<DetectorInfo>;
}

/// Value of a run log.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogValue {
    Single(f64),
    /// Time series; usable as a dimension only if it holds one distinct value.
    Series(Vec<f64>),
}

impl LogValue {
    /// Resolves the log to one scalar.
    ///
    /// # Errors
    /// Returns a configuration error for empty or multi-valued series.
    pub fn single_value(&self, name: &str) -> Result<f64> {
        match self {
            Self::Single(value) => Ok(*value),
            Self::Series(values) => {
                let first = values
                    .first()
                    .ok_or_else(|| Error::config(format!("log '{name}' is an empty series")))?;
                if values.iter().all(|v| v == first) {
                    Ok(*first)
                } else {
                    Err(Error::config(format!(
                        "log '{name}' is a series with {} distinct values; a single value is required",
                        count_distinct(values)
                    )))
                }
            }
        }
    }
}

fn count_distinct(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

/// Run-level metadata.
pub trait RunLogs: Sync {
    /// Named log value.
    fn value(&self, name: &str) -> Option<&LogValue>;

    /// Sample unit cell, if known.
    fn lattice(&self) -> Option<Lattice>;

    /// Sample orientation matrix U, if known.
    fn orientation(&self) -> Option<Matrix3<f64>> {
        None
    }

    /// Resolves `name` to a single scalar.
    ///
    /// # Errors
    /// Returns a configuration error if the log is missing or not
    /// single-valued.
    fn single_value(&self, name: &str) -> Result<f64> {
        self.value(name)
            .ok_or_else(|| Error::config(format!("run log '{name}' not found")))?
            .single_value(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_layouts() {
        let x = [0.0, 1.0, 2.0];
        let y = [5.0, 6.0];
        let e = [1.0, 1.0];
        let hist = Spectrum::new(&x, &y, &e);
        assert!(hist.validate(0).is_ok());
        assert!(hist.is_histogram());
        assert!((hist.bin_center(1) - 1.5).abs() < 1e-12);

        let points = Spectrum::new(&x[..2], &y, &e);
        assert!(points.validate(0).is_ok());
        assert!((points.bin_center(1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_positive_range_skips_zero_edge() {
        let x = [0.0, 1000.0, 2000.0, 3000.0];
        let y = [1.0, 1.0, 1.0];
        let spectrum = Spectrum::new(&x, &y, &y);
        assert_eq!(spectrum.x_range(), Some((0.0, 3000.0)));
        // The first bin's centre lies below the first positive edge.
        assert_eq!(spectrum.positive_x_range(), Some((500.0, 3000.0)));

        let x = [-2.0, -1.0, 0.0];
        let y = [1.0, 1.0];
        assert_eq!(Spectrum::new(&x, &y, &y).positive_x_range(), None);
    }

    #[test]
    fn test_malformed_spectrum() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [1.0, 2.0];
        let e = [1.0, 2.0];
        let err = Spectrum::new(&x, &y, &e).validate(4).unwrap_err();
        assert_eq!(err.spectrum(), 4);
    }

    #[test]
    fn test_log_single_value() {
        assert_eq!(LogValue::Single(3.0).single_value("T").unwrap(), 3.0);
        assert_eq!(
            LogValue::Series(vec![2.0, 2.0]).single_value("T").unwrap(),
            2.0
        );
        let err = LogValue::Series(vec![1.0, 2.0, 2.0])
            .single_value("T")
            .unwrap_err();
        assert!(err.to_string().contains("2 distinct"));
        assert!(LogValue::Series(vec![]).single_value("T").is_err());
    }
}
