//! Estimation of the output-space bounding box of a dataset.
//!
//! Each spectrum contributes the coordinates of its extremal points only;
//! per-thread accumulators are merged by a single rayon reduction.

use crate::context::ConversionContext;
use crate::transform::CoordinateTransform;
use qspace_core::{Bounds, Error, GeometryResolver, Result, SourceDataset, UnitConversion};
use rayon::prelude::*;

/// Scans a dataset for the extent of its converted coordinates.
#[derive(Clone, Debug, Default)]
pub struct RangeEstimator {
    seed: Option<Vec<Bounds>>,
    padding: f64,
}

struct Accumulator<T> {
    transform: T,
    conversion: UnitConversion,
    bounds: Vec<Bounds>,
    coords: Vec<f64>,
    detector_coords: Vec<f64>,
}

impl<T: CoordinateTransform> Accumulator<T> {
    fn new(transform: T, conversion: UnitConversion, n_dims: usize, n_transform: usize) -> Self {
        Self {
            transform,
            conversion,
            bounds: vec![Bounds::empty(); n_transform],
            coords: vec![f64::NAN; n_dims],
            detector_coords: vec![f64::NAN; n_dims],
        }
    }

    fn fold_spectrum<S: SourceDataset + ?Sized>(
        mut self,
        source: &S,
        context: &ConversionContext<'_>,
        index: usize,
    ) -> Self {
        let Some(detector) = context.cache().get(index) else {
            return self;
        };
        if !self.transform.accepts_detector(detector) {
            return self;
        }
        if self.conversion.needs_flight_path() {
            self.conversion.set_flight_path(detector.flight_path());
        }
        let Some((lo, hi)) = source.convertible_range(index, &self.conversion) else {
            return self;
        };
        let domain = self.transform.input_domain(detector);
        let (lo, hi) = (lo.max(domain.min), hi.min(domain.max));
        if lo.is_nan() || hi.is_nan() || lo >= hi {
            return self;
        }

        self.detector_coords.fill(f64::NAN);
        self.transform
            .per_detector_coordinates(&mut self.detector_coords, detector);
        for x in self.transform.extremal_bin_values(lo, hi, detector) {
            self.coords.copy_from_slice(&self.detector_coords);
            self.transform.per_bin_coordinate(x, &mut self.coords);
            for (bounds, &value) in self.bounds.iter_mut().zip(&self.coords) {
                if value.is_finite() {
                    bounds.include(value);
                }
            }
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        for (a, b) in self.bounds.iter_mut().zip(&other.bounds) {
            *a = a.union(b);
        }
        self
    }
}

impl RangeEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the estimate is widened to include.
    #[must_use]
    pub fn with_seed(mut self, seed: Vec<Bounds>) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Widens each estimated range by this fraction of its width on both
    /// sides, so that events at the estimated maximum fall inside the
    /// half-open allocation range.
    #[must_use]
    pub fn with_padding(mut self, fraction: f64) -> Self {
        self.padding = fraction;
        self
    }

    /// Estimates the bounds of every output dimension.
    ///
    /// Transform dimensions get the extent of the converted extremal
    /// points; log dimensions keep the context's bounds. A dimension no
    /// spectrum contributed to also keeps the context's bounds.
    ///
    /// # Errors
    /// Returns a configuration error if the detector cache was not built
    /// for `resolver` or the seed has the wrong length, and
    /// [`Error::NoValidDetectors`] if no spectrum has a detector.
    pub fn estimate<S, R>(
        &self,
        source: &S,
        resolver: &R,
        context: &ConversionContext<'_>,
    ) -> Result<Vec<Bounds>>
    where
        S: SourceDataset + ?Sized,
        R: GeometryResolver + ?Sized,
    {
        let cache = context.cache();
        if !cache.is_valid_for(resolver) {
            return Err(Error::config(format!(
                "detector cache does not match instrument '{}'",
                resolver.instrument_id()
            )));
        }
        if cache.valid_count() == 0 {
            return Err(Error::NoValidDetectors);
        }
        let n_dims = context.n_dims();
        let n_transform = context.n_transform_dims();
        if let Some(seed) = &self.seed {
            if seed.len() != n_dims {
                return Err(Error::config(format!(
                    "range seed has {} bounds for {n_dims} dimensions",
                    seed.len()
                )));
            }
        }

        let transform = context.transform();
        let conversion = context.unit_conversion();
        let n_spectra = source.spectrum_count().min(cache.len());
        let accumulated = (0..n_spectra)
            .into_par_iter()
            .fold(
                || Accumulator::new(transform.clone(), conversion.clone(), n_dims, n_transform),
                |acc, index| acc.fold_spectrum(source, context, index),
            )
            .reduce_with(Accumulator::merge);

        let mut bounds = context.bounds();
        if let Some(acc) = accumulated {
            for (target, found) in bounds.iter_mut().zip(&acc.bounds) {
                if !found.is_empty() {
                    *target = found.padded(self.padding);
                }
            }
        }
        if let Some(seed) = &self.seed {
            for (target, seed) in bounds.iter_mut().zip(seed) {
                *target = target.union(seed);
            }
        }
        log::debug!(
            "estimated range over {n_spectra} spectra: {}",
            bounds
                .iter()
                .map(|b| format!("[{:.4}, {:.4}]", b.min, b.max))
                .collect::<Vec<_>>()
                .join(" x ")
        );
        Ok(bounds)
    }
}

/// Estimates output bounds with the default estimator.
///
/// # Errors
/// See [`RangeEstimator::estimate`].
pub fn estimate_range<S, R>(
    source: &S,
    resolver: &R,
    context: &ConversionContext<'_>,
) -> Result<Vec<Bounds>>
where
    S: SourceDataset + ?Sized,
    R: GeometryResolver + ?Sized,
{
    RangeEstimator::new().estimate(source, resolver, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConversionContextBuilder;
    use crate::settings::{DetectorFilter, TransformKind, TransformSettings};
    use approx::assert_relative_eq;
    use qspace_core::{
        DetectorGeometryCache, HistogramData, InstrumentTable, SpectrumData, TableDetector, Unit,
    };
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_elastic_magnitude_range() {
        let instrument = InstrumentTable::new("test", 10.0)
            .with_detector(TableDetector::spherical(1, 2.0, FRAC_PI_2, 0.0))
            .with_detector(TableDetector::spherical(2, 2.0, 0.2, 0.0).monitor());
        let data = HistogramData::new(Unit::Momentum)
            .with_spectrum(SpectrumData::counts(vec![1.0, 2.0, 3.0], vec![1.0, 1.0]))
            .with_spectrum(SpectrumData::counts(vec![1.0, 2.0, 3.0], vec![1.0, 1.0]));
        let cache = DetectorGeometryCache::build(&instrument);

        let context = ConversionContextBuilder::new(TransformKind::Magnitude)
            .build(&data, &cache)
            .unwrap();
        let bounds = estimate_range(&data, &instrument, &context).unwrap();
        assert_relative_eq!(bounds[0].min, 2.0 * 0.1_f64.sin(), epsilon = 1e-12);
        assert_relative_eq!(bounds[0].max, 3.0 * std::f64::consts::SQRT_2, epsilon = 1e-12);

        // Rejecting the monitor drops its small-angle contribution.
        let settings = TransformSettings::new()
            .with_detector_filter(DetectorFilter::accept_all().with_reject_monitors(true));
        let context = ConversionContextBuilder::new(TransformKind::Magnitude)
            .with_settings(settings)
            .build(&data, &cache)
            .unwrap();
        let bounds = estimate_range(&data, &instrument, &context).unwrap();
        assert_relative_eq!(bounds[0].min, std::f64::consts::SQRT_2, epsilon = 1e-12);
    }

    #[test]
    fn test_tof_axis_starting_at_zero() {
        let instrument = InstrumentTable::new("test", 10.0)
            .with_detector(TableDetector::spherical(1, 2.0, FRAC_PI_2, 0.0));
        let data = HistogramData::new(Unit::TimeOfFlight).with_spectrum(SpectrumData::counts(
            vec![0.0, 1000.0, 2000.0, 3000.0],
            vec![1.0, 1.0, 1.0],
        ));
        let cache = DetectorGeometryCache::build(&instrument);
        let context = ConversionContextBuilder::new(TransformKind::Magnitude)
            .build(&data, &cache)
            .unwrap();
        let bounds = estimate_range(&data, &instrument, &context).unwrap();

        let mut conversion = UnitConversion::new(Unit::TimeOfFlight, Unit::Momentum).unwrap();
        conversion.set_flight_path(12.0);
        let k_slowest = conversion.convert(3000.0).unwrap();
        let k_first_centre = conversion.convert(500.0).unwrap();
        let sqrt2 = std::f64::consts::SQRT_2;
        assert_relative_eq!(bounds[0].min, sqrt2 * k_slowest, max_relative = 1e-12);
        assert_relative_eq!(bounds[0].max, sqrt2 * k_first_centre, max_relative = 1e-12);
        assert!(bounds[0].max < 10.0);
    }

    #[test]
    fn test_cache_for_other_instrument_is_rejected() {
        let instrument = InstrumentTable::new("test", 10.0)
            .with_detector(TableDetector::spherical(1, 2.0, 1.0, 0.0));
        let data = HistogramData::new(Unit::Momentum)
            .with_spectrum(SpectrumData::counts(vec![1.0, 2.0], vec![1.0]));
        let cache = DetectorGeometryCache::synthetic(1);
        let context = ConversionContextBuilder::new(TransformKind::Magnitude)
            .build(&data, &cache)
            .unwrap();
        assert!(matches!(
            estimate_range(&data, &instrument, &context),
            Err(Error::Configuration(_))
        ));
    }
}
