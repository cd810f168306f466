//! Coordinate transform strategies.
//!
//! A transform maps one bin of one spectrum to an output coordinate vector
//! in three stages: run-level values ([`CoordinateTransform::per_sample_coordinates`]),
//! detector geometry ([`CoordinateTransform::per_detector_coordinates`]) and
//! the bin's x value ([`CoordinateTransform::per_bin_coordinate`]). Each
//! stage returns false as soon as a coordinate it wrote falls outside the
//! configured bounds, so callers can skip the rest of the spectrum or bin.
//!
//! The engine and range estimator are generic over [`CoordinateTransform`];
//! [`Transform`] is the closed set of variants selectable by
//! [`TransformKind`].

mod copy;
mod magnitude;
mod vector;

pub use copy::CopyTransform;
pub use magnitude::MagnitudeTransform;
pub use vector::VectorTransform;

use crate::projection::Projection;
use crate::settings::{DetectorFilter, EnergyMode, TransformKind, TransformSettings};
use nalgebra::DMatrix;
use qspace_core::{
    Bounds, DetectorRecord, Result, SourceDataset, Unit, UnitConversion, ENERGY_PER_K_SQUARED,
};
use std::sync::Arc;

/// What a transform needs to know about the source dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceDescriptor {
    pub x_unit: Unit,
    pub n_spectra: usize,
    pub spectrum_axis: Option<AxisDescriptor>,
}

/// Owned copy of a numeric spectrum axis.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisDescriptor {
    pub name: String,
    pub unit: Unit,
    pub values: Arc<[f64]>,
}

impl SourceDescriptor {
    /// Describes `source`.
    pub fn from_dataset<S: SourceDataset + ?Sized>(source: &S) -> Self {
        Self {
            x_unit: source.x_unit().clone(),
            n_spectra: source.spectrum_count(),
            spectrum_axis: source.spectrum_axis().map(|axis| AxisDescriptor {
                name: axis.name.to_string(),
                unit: axis.unit.clone(),
                values: Arc::from(axis.values),
            }),
        }
    }
}

/// Everything a transform reads during [`CoordinateTransform::initialize`].
#[derive(Clone, Copy, Debug)]
pub struct TransformSetup<'a> {
    pub settings: &'a TransformSettings,
    pub source: &'a SourceDescriptor,
    /// Bounds of every output dimension, transform dimensions first.
    pub bounds: &'a [Bounds],
    /// D×D matrix applied to the output coordinates; the vector transform
    /// reads its leading 3×3 block.
    pub matrix: &'a DMatrix<f64>,
}

/// State shared by every initialized transform: output bounds, the number
/// of leading dimensions the transform itself fills, the conversion from
/// the source unit and the detector filter.
#[derive(Clone, Debug)]
pub struct OutputFrame {
    pub bounds: Vec<Bounds>,
    pub n_transform_dims: usize,
    pub conversion: UnitConversion,
    pub filter: DetectorFilter,
}

impl Default for OutputFrame {
    fn default() -> Self {
        Self {
            bounds: Vec::new(),
            n_transform_dims: 0,
            conversion: UnitConversion::identity(Unit::Momentum),
            filter: DetectorFilter::default(),
        }
    }
}

impl OutputFrame {
    /// Builds the frame for a transform with `n_transform_dims` leading
    /// dimensions that reads `input_unit`.
    ///
    /// # Errors
    /// Returns a configuration error if the source unit cannot be converted
    /// into `input_unit`.
    pub fn new(setup: &TransformSetup<'_>, n_transform_dims: usize, input_unit: Unit) -> Result<Self> {
        Ok(Self {
            bounds: setup.bounds.to_vec(),
            n_transform_dims,
            conversion: UnitConversion::new(setup.source.x_unit.clone(), input_unit)?,
            filter: setup.settings.detector_filter,
        })
    }

    /// True if `coords[range]` lie inside their bounds.
    #[inline]
    #[must_use]
    pub fn in_bounds(&self, coords: &[f64], mut range: std::ops::Range<usize>) -> bool {
        range.all(|d| self.bounds.get(d).is_some_and(|b| b.contains(coords[d])))
    }
}

/// Contract shared by the transform variants.
pub trait CoordinateTransform: Clone + Send + Sync {
    /// Identifier of the variant.
    fn kind(&self) -> TransformKind;

    /// Unit the x axis must be converted into before `per_bin_coordinate`.
    fn input_unit(&self, mode: &EnergyMode, source: &SourceDescriptor) -> Unit;

    /// Number of leading output dimensions filled by the transform.
    fn output_dimension_count(&self, mode: &EnergyMode, source: &SourceDescriptor) -> usize;

    /// Default `(name, units)` of every transform dimension.
    fn dimension_labels(
        &self,
        mode: &EnergyMode,
        source: &SourceDescriptor,
        projection: &Projection,
    ) -> Vec<(String, String)>;

    /// Prepares the transform for a conversion.
    ///
    /// # Errors
    /// Returns a configuration error if the source axis unit cannot be
    /// converted into [`CoordinateTransform::input_unit`] or the settings
    /// are invalid for this variant.
    fn initialize(&mut self, setup: &TransformSetup<'_>) -> Result<()>;

    /// Frame set up by [`CoordinateTransform::initialize`].
    fn frame(&self) -> &OutputFrame;

    /// True if spectra on `detector` should be converted at all.
    fn accepts_detector(&self, detector: &DetectorRecord) -> bool {
        self.frame().filter.accepts(detector)
    }

    /// Range of input values (in the input unit) the transform is defined
    /// on for `detector`.
    fn input_domain(&self, _detector: &DetectorRecord) -> Bounds {
        Bounds::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Writes the run-level log values into the dimensions after the
    /// transform's own.
    fn per_sample_coordinates(&mut self, coords: &mut [f64], log_values: &[f64]) -> bool {
        let frame = self.frame();
        let start = frame.n_transform_dims;
        let end = (start + log_values.len()).min(coords.len());
        coords[start..end].copy_from_slice(&log_values[..end - start]);
        frame.in_bounds(coords, start..end)
    }

    /// Fills coordinates that depend on the detector only.
    fn per_detector_coordinates(&mut self, coords: &mut [f64], detector: &DetectorRecord) -> bool;

    /// Fills coordinates derived from the bin's x value (already in the
    /// input unit).
    fn per_bin_coordinate(&mut self, x: f64, coords: &mut [f64]) -> bool;

    /// Input values within `[x_min, x_max]` at which the output coordinates
    /// reach their extrema for `detector`.
    fn extremal_bin_values(&self, x_min: f64, x_max: f64, detector: &DetectorRecord) -> Vec<f64>;
}

/// The available transforms.
#[derive(Clone, Debug)]
pub enum Transform {
    Copy(CopyTransform),
    Magnitude(MagnitudeTransform),
    Vector(VectorTransform),
}

impl Transform {
    /// Creates an uninitialized transform of the given kind.
    #[must_use]
    pub fn new(kind: TransformKind) -> Self {
        match kind {
            TransformKind::Copy => Self::Copy(CopyTransform::default()),
            TransformKind::Magnitude => Self::Magnitude(MagnitudeTransform::default()),
            TransformKind::Vector => Self::Vector(VectorTransform::default()),
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Transform::Copy($inner) => $body,
            Transform::Magnitude($inner) => $body,
            Transform::Vector($inner) => $body,
        }
    };
}

impl CoordinateTransform for Transform {
    fn kind(&self) -> TransformKind {
        dispatch!(self, t => t.kind())
    }

    fn input_unit(&self, mode: &EnergyMode, source: &SourceDescriptor) -> Unit {
        dispatch!(self, t => t.input_unit(mode, source))
    }

    fn output_dimension_count(&self, mode: &EnergyMode, source: &SourceDescriptor) -> usize {
        dispatch!(self, t => t.output_dimension_count(mode, source))
    }

    fn dimension_labels(
        &self,
        mode: &EnergyMode,
        source: &SourceDescriptor,
        projection: &Projection,
    ) -> Vec<(String, String)> {
        dispatch!(self, t => t.dimension_labels(mode, source, projection))
    }

    fn initialize(&mut self, setup: &TransformSetup<'_>) -> Result<()> {
        dispatch!(self, t => t.initialize(setup))
    }

    fn frame(&self) -> &OutputFrame {
        dispatch!(self, t => t.frame())
    }

    fn accepts_detector(&self, detector: &DetectorRecord) -> bool {
        dispatch!(self, t => t.accepts_detector(detector))
    }

    fn input_domain(&self, detector: &DetectorRecord) -> Bounds {
        dispatch!(self, t => t.input_domain(detector))
    }

    fn per_sample_coordinates(&mut self, coords: &mut [f64], log_values: &[f64]) -> bool {
        dispatch!(self, t => t.per_sample_coordinates(coords, log_values))
    }

    fn per_detector_coordinates(&mut self, coords: &mut [f64], detector: &DetectorRecord) -> bool {
        dispatch!(self, t => t.per_detector_coordinates(coords, detector))
    }

    fn per_bin_coordinate(&mut self, x: f64, coords: &mut [f64]) -> bool {
        dispatch!(self, t => t.per_bin_coordinate(x, coords))
    }

    fn extremal_bin_values(&self, x_min: f64, x_max: f64, detector: &DetectorRecord) -> Vec<f64> {
        dispatch!(self, t => t.extremal_bin_values(x_min, x_max, detector))
    }
}

/// Wavevector (Å⁻¹) of a neutron with `energy` meV; NaN for negative energy.
#[inline]
pub(crate) fn wavevector(energy: f64) -> f64 {
    (energy / ENERGY_PER_K_SQUARED).sqrt()
}

/// Incident and final wavevector for one energy transfer, or `None`
/// outside the kinematic limit.
#[inline]
pub(crate) fn inelastic_wavevectors(mode: &EnergyMode, efixed: f64, delta_e: f64) -> Option<(f64, f64)> {
    match mode {
        EnergyMode::Elastic => None,
        EnergyMode::Direct { ei } => {
            (delta_e <= *ei).then(|| (wavevector(*ei), wavevector(ei - delta_e)))
        }
        EnergyMode::Indirect { .. } => {
            (delta_e >= -efixed).then(|| (wavevector(efixed + delta_e), wavevector(efixed)))
        }
    }
}

/// Fixed energy for `detector`: Ei in direct mode, the detector's own
/// efixed (or the global one) in indirect mode.
#[inline]
pub(crate) fn fixed_energy(mode: &EnergyMode, detector: &DetectorRecord) -> f64 {
    match mode {
        EnergyMode::Elastic => 0.0,
        EnergyMode::Direct { ei } => *ei,
        EnergyMode::Indirect { efixed } => detector.efixed.unwrap_or(*efixed),
    }
}

/// Kinematic input domain of energy transfer for `detector`.
pub(crate) fn energy_transfer_domain(mode: &EnergyMode, detector: &DetectorRecord) -> Bounds {
    match mode {
        EnergyMode::Elastic => Bounds::new(0.0, f64::INFINITY),
        EnergyMode::Direct { ei } => Bounds::new(f64::NEG_INFINITY, *ei),
        EnergyMode::Indirect { .. } => Bounds::new(-fixed_energy(mode, detector), f64::INFINITY),
    }
}

/// Ordered, de-duplicated list of candidate x values clipped to `[lo, hi]`.
pub(crate) fn candidates(lo: f64, hi: f64, interior: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let mut values = vec![lo, hi];
    values.extend(interior.into_iter().filter(|x| *x > lo && *x < hi));
    values.sort_by(f64::total_cmp);
    values.dedup();
    values
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn detector(two_theta: f64, phi: f64) -> DetectorRecord {
        DetectorRecord {
            spectrum_index: 0,
            detector_id: 7,
            l1: 10.0,
            l2: 2.0,
            two_theta,
            azimuthal_phi: phi,
            is_monitor: false,
            is_masked: false,
            efixed: None,
        }
    }

    pub fn source(unit: Unit) -> SourceDescriptor {
        SourceDescriptor {
            x_unit: unit,
            n_spectra: 1,
            spectrum_axis: None,
        }
    }

    /// Initializes `transform` with unbounded dimensions.
    pub fn initialized<T: CoordinateTransform>(
        mut transform: T,
        settings: &TransformSettings,
        source: &SourceDescriptor,
    ) -> T {
        let n = transform.output_dimension_count(&settings.energy_mode, source);
        let bounds = vec![Bounds::unbounded(); n];
        let matrix = DMatrix::identity(n, n);
        transform
            .initialize(&TransformSetup {
                settings,
                source,
                bounds: &bounds,
                matrix: &matrix,
            })
            .unwrap();
        transform
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_dispatch_reports_kind() {
        for kind in [TransformKind::Copy, TransformKind::Magnitude, TransformKind::Vector] {
            assert_eq!(Transform::new(kind).kind(), kind);
        }
    }

    #[test]
    fn test_per_sample_checks_log_bounds() {
        let settings = TransformSettings::default();
        let source = source(Unit::Momentum);
        let mut transform = Transform::new(TransformKind::Magnitude);
        let bounds = [Bounds::unbounded(), Bounds::new(0.0, 300.0)];
        let matrix = DMatrix::identity(2, 2);
        transform
            .initialize(&TransformSetup {
                settings: &settings,
                source: &source,
                bounds: &bounds,
                matrix: &matrix,
            })
            .unwrap();

        let mut coords = [0.0; 2];
        assert!(transform.per_sample_coordinates(&mut coords, &[293.0]));
        assert_eq!(coords[1], 293.0);
        assert!(!transform.per_sample_coordinates(&mut coords, &[310.0]));
    }

    #[test]
    fn test_inelastic_wavevectors_respect_kinematic_limit() {
        let direct = EnergyMode::Direct { ei: 50.0 };
        assert!(inelastic_wavevectors(&direct, 50.0, 60.0).is_none());
        let (ki, kf) = inelastic_wavevectors(&direct, 50.0, 0.0).unwrap();
        assert!((ki - kf).abs() < 1e-12);

        let indirect = EnergyMode::Indirect { efixed: 3.5 };
        assert!(inelastic_wavevectors(&indirect, 3.5, -4.0).is_none());
        assert!(inelastic_wavevectors(&indirect, 3.5, 10.0).is_some());
    }

    #[test]
    fn test_candidates_are_clipped_and_sorted() {
        assert_eq!(candidates(0.0, 2.0, [1.0, 3.0, 1.0, -1.0]), vec![0.0, 1.0, 2.0]);
    }
}
