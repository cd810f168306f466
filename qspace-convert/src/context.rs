//! Immutable description of one conversion request.

use crate::projection::Projection;
use crate::settings::{TransformKind, TransformSettings};
use crate::transform::{CoordinateTransform, SourceDescriptor, Transform, TransformSetup};
use nalgebra::DMatrix;
use qspace_core::{
    Bounds, DetectorGeometryCache, Dimension, Error, Result, SourceDataset, UnitConversion,
};

/// Output dimension appended from a named run log.
#[derive(Clone, Debug, PartialEq)]
pub struct LogDimension {
    pub name: String,
    pub units: String,
    pub bounds: Option<Bounds>,
}

impl LogDimension {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: String::new(),
            bounds: None,
        }
    }

    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    #[must_use]
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// Collects the parts of a [`ConversionContext`].
///
/// # Example
/// ```
/// use qspace_convert::{ConversionContextBuilder, TransformKind};
/// use qspace_core::{Bounds, DetectorGeometryCache, HistogramData, SpectrumData, Unit};
///
/// let data = HistogramData::new(Unit::Momentum)
///     .with_spectrum(SpectrumData::counts(vec![1.0, 2.0, 3.0], vec![4.0, 5.0]));
/// let cache = DetectorGeometryCache::synthetic(1);
/// let context = ConversionContextBuilder::new(TransformKind::Magnitude)
///     .with_bounds(vec![Bounds::new(0.0, 10.0)])
///     .build(&data, &cache)
///     .unwrap();
/// assert_eq!(context.dimensions()[0].name, "|Q|");
/// ```
#[derive(Clone, Debug)]
pub struct ConversionContextBuilder {
    kind: TransformKind,
    settings: TransformSettings,
    projection: Projection,
    bounds: Option<Vec<Bounds>>,
    log_dimensions: Vec<LogDimension>,
}

impl ConversionContextBuilder {
    #[must_use]
    pub fn new(kind: TransformKind) -> Self {
        Self {
            kind,
            settings: TransformSettings::default(),
            projection: Projection::lab_frame(),
            bounds: None,
            log_dimensions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: TransformSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the projection used by the vector transform.
    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Sets the bounds of the transform's own dimensions, or of every
    /// dimension including log dimensions.
    #[must_use]
    pub fn with_bounds(mut self, bounds: Vec<Bounds>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Appends an output dimension taken from a run log.
    #[must_use]
    pub fn with_log_dimension(mut self, dimension: LogDimension) -> Self {
        self.log_dimensions.push(dimension);
        self
    }

    /// Initializes the transform against `source` and freezes the context.
    ///
    /// # Errors
    /// Returns a configuration error if the settings are invalid, the
    /// source unit cannot be converted into the transform's input unit, or
    /// the number or validity of the bounds does not match the dimensions.
    pub fn build<'c, S: SourceDataset + ?Sized>(
        self,
        source: &S,
        cache: &'c DetectorGeometryCache,
    ) -> Result<ConversionContext<'c>> {
        let descriptor = SourceDescriptor::from_dataset(source);
        let mut transform = Transform::new(self.kind);
        let mode = self.settings.energy_mode;
        let n_transform = transform.output_dimension_count(&mode, &descriptor);
        let n_dims = n_transform + self.log_dimensions.len();

        let bounds = match self.bounds {
            None => vec![Bounds::unbounded(); n_transform],
            Some(bounds) => bounds,
        };
        let bounds: Vec<Bounds> = if bounds.len() == n_dims {
            bounds
        } else if bounds.len() == n_transform {
            let logs = self
                .log_dimensions
                .iter()
                .map(|log| log.bounds.unwrap_or_else(Bounds::unbounded));
            bounds.into_iter().chain(logs).collect()
        } else {
            return Err(Error::config(format!(
                "{} bounds given for {n_dims} dimensions ({} from '{}' and {} from logs)",
                bounds.len(),
                n_transform,
                self.kind,
                self.log_dimensions.len()
            )));
        };

        let labels = transform
            .dimension_labels(&mode, &descriptor, &self.projection)
            .into_iter()
            .chain(
                self.log_dimensions
                    .iter()
                    .map(|log| (log.name.clone(), log.units.clone())),
            );
        let dimensions: Vec<Dimension> = labels
            .zip(&bounds)
            .map(|((name, units), b)| Dimension::new(name, units, b.min, b.max))
            .collect();
        qspace_core::validate_dimensions(&dimensions)?;

        let mut matrix = DMatrix::identity(n_dims, n_dims);
        if self.kind == TransformKind::Vector {
            matrix
                .view_mut((0, 0), (3, 3))
                .copy_from(self.projection.matrix());
        }
        transform.initialize(&TransformSetup {
            settings: &self.settings,
            source: &descriptor,
            bounds: &bounds,
            matrix: &matrix,
        })?;

        log::debug!(
            "conversion context: transform {}, {} dimensions [{}]",
            self.kind,
            n_dims,
            dimensions
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(ConversionContext {
            kind: self.kind,
            transform,
            settings: self.settings,
            source: descriptor,
            dimensions,
            log_dimensions: self.log_dimensions,
            projection: self.projection,
            matrix,
            cache,
        })
    }
}

/// Everything the range estimator and the engine need, fixed for the
/// lifetime of one conversion.
#[derive(Clone, Debug)]
pub struct ConversionContext<'c> {
    kind: TransformKind,
    transform: Transform,
    settings: TransformSettings,
    source: SourceDescriptor,
    dimensions: Vec<Dimension>,
    log_dimensions: Vec<LogDimension>,
    projection: Projection,
    matrix: DMatrix<f64>,
    cache: &'c DetectorGeometryCache,
}

impl<'c> ConversionContext<'c> {
    #[must_use]
    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    /// The initialized transform; clone it for per-thread state.
    #[must_use]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    #[must_use]
    pub fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    #[must_use]
    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    #[must_use]
    pub fn n_dims(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of leading dimensions filled by the transform.
    #[must_use]
    pub fn n_transform_dims(&self) -> usize {
        self.dimensions.len() - self.log_dimensions.len()
    }

    #[must_use]
    pub fn log_dimensions(&self) -> &[LogDimension] {
        &self.log_dimensions
    }

    #[must_use]
    pub fn bounds(&self) -> Vec<Bounds> {
        self.dimensions.iter().map(Dimension::bounds).collect()
    }

    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Projection embedded in a D×D matrix (identity outside the spatial
    /// block). The transform applies this matrix, not the projection.
    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    #[must_use]
    pub fn cache(&self) -> &'c DetectorGeometryCache {
        self.cache
    }

    /// Conversion from the source axis unit into the transform's input unit.
    #[must_use]
    pub fn unit_conversion(&self) -> &UnitConversion {
        &self.transform.frame().conversion
    }

    /// Same request with new bounds for every dimension, typically the
    /// output of range estimation.
    ///
    /// # Errors
    /// Returns a configuration error if the bounds do not match the
    /// dimensions.
    pub fn with_bounds(&self, bounds: &[Bounds]) -> Result<Self> {
        if bounds.len() != self.n_dims() {
            return Err(Error::config(format!(
                "{} bounds given for {} dimensions",
                bounds.len(),
                self.n_dims()
            )));
        }
        let dimensions: Vec<Dimension> = self
            .dimensions
            .iter()
            .zip(bounds)
            .map(|(d, b)| d.clone().with_bounds(*b))
            .collect();
        qspace_core::validate_dimensions(&dimensions)?;

        let mut transform = Transform::new(self.kind);
        transform.initialize(&TransformSetup {
            settings: &self.settings,
            source: &self.source,
            bounds,
            matrix: &self.matrix,
        })?;
        Ok(Self {
            transform,
            dimensions,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{ProjectionBuilder, ScalingMode};
    use crate::settings::EnergyMode;
    use approx::assert_relative_eq;
    use qspace_core::{HistogramData, Lattice, SpectrumData, Unit};

    fn data(unit: Unit) -> HistogramData {
        HistogramData::new(unit).with_spectrum(SpectrumData::counts(vec![1.0, 2.0], vec![1.0]))
    }

    #[test]
    fn test_default_bounds_are_unbounded() {
        let cache = DetectorGeometryCache::synthetic(1);
        let context = ConversionContextBuilder::new(TransformKind::Magnitude)
            .build(&data(Unit::Wavelength), &cache)
            .unwrap();
        assert_eq!(context.n_dims(), 1);
        assert_eq!(context.bounds(), vec![Bounds::unbounded()]);
        assert!(!context.unit_conversion().is_identity());
    }

    #[test]
    fn test_bounds_count_mismatch() {
        let cache = DetectorGeometryCache::synthetic(1);
        let result = ConversionContextBuilder::new(TransformKind::Vector)
            .with_bounds(vec![Bounds::new(0.0, 1.0); 2])
            .build(&data(Unit::Momentum), &cache);
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result = ConversionContextBuilder::new(TransformKind::Magnitude)
            .with_bounds(vec![Bounds::new(1.0, 1.0)])
            .build(&data(Unit::Momentum), &cache);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_unit_mismatch_is_configuration_error() {
        let cache = DetectorGeometryCache::synthetic(1);
        let settings = TransformSettings::new().with_energy_mode(EnergyMode::Direct { ei: 10.0 });
        let result = ConversionContextBuilder::new(TransformKind::Magnitude)
            .with_settings(settings)
            .build(&data(Unit::Wavelength), &cache);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_log_dimensions_and_embedded_matrix() {
        let cache = DetectorGeometryCache::synthetic(1);
        let projection = ProjectionBuilder::new()
            .with_lattice(Lattice::cubic(4.0).unwrap())
            .build()
            .unwrap();
        let context = ConversionContextBuilder::new(TransformKind::Vector)
            .with_projection(projection.clone())
            .with_bounds(vec![Bounds::new(-5.0, 5.0); 3])
            .with_log_dimension(LogDimension::new("temperature").with_units("K"))
            .build(&data(Unit::Momentum), &cache)
            .unwrap();

        assert_eq!(context.n_dims(), 4);
        assert_eq!(context.n_transform_dims(), 3);
        assert_eq!(context.dimensions()[0].name, "[H,0,0]");
        assert_eq!(context.dimensions()[3].units, "K");
        assert_eq!(context.dimensions()[3].bounds(), Bounds::unbounded());
        assert_eq!(context.matrix()[(3, 3)], 1.0);
        assert_eq!(context.matrix()[(0, 1)], projection.matrix()[(0, 1)]);

        let rebounded = context.with_bounds(&[Bounds::new(0.0, 1.0); 4]).unwrap();
        assert_eq!(rebounded.transform().frame().bounds[3], Bounds::new(0.0, 1.0));
        assert!(context.with_bounds(&[Bounds::new(0.0, 1.0); 3]).is_err());
    }

    #[test]
    fn test_fractional_scaling_with_default_third_axis() {
        let cache = DetectorGeometryCache::synthetic(1);
        let lattice = Lattice::cubic(5.0).unwrap();
        let hkl = nalgebra::Vector3::new(1.0, 2.0, 3.0);
        let q = lattice.b_matrix() * hkl * std::f64::consts::TAU;
        for scaling in [ScalingMode::OrthogonalFractional, ScalingMode::GeneralFractional] {
            let projection = ProjectionBuilder::new()
                .with_lattice(lattice)
                .with_scaling(scaling)
                .build()
                .unwrap();
            let context = ConversionContextBuilder::new(TransformKind::Vector)
                .with_projection(projection)
                .build(&data(Unit::Momentum), &cache)
                .unwrap();

            let names: Vec<&str> = context.dimensions().iter().map(|d| d.name.as_str()).collect();
            assert_eq!(names, ["[H,0,0]", "[0,K,0]", "[0,0,L]"]);
            let block = context.matrix().fixed_view::<3, 3>(0, 0).into_owned();
            assert_relative_eq!(block * q, hkl, epsilon = 1e-12);
        }
    }
}
