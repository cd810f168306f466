//! Momentum transfer vector `Q = ki·ẑ − kf·d̂` projected onto the
//! configured basis, plus energy transfer in inelastic modes.
//!
//! With gravity correction the scattered direction `d̂` points at where the
//! neutron would have landed without falling, which depends on the final
//! wavelength and so on the bin.

use super::{
    candidates, energy_transfer_domain, fixed_energy, inelastic_wavevectors, CoordinateTransform,
    OutputFrame, SourceDescriptor, TransformSetup,
};
use crate::projection::Projection;
use crate::search::ExtremumSearch;
use crate::settings::{EnergyMode, TransformKind};
use nalgebra::{Matrix3, Vector3};
use qspace_core::{Bounds, DetectorRecord, Error, Result, Unit, SPEED_TIMES_WAVELENGTH};
use std::f64::consts::TAU;

const STANDARD_GRAVITY: f64 = 9.806_65;

/// Vertical drop (m) per squared flight path (m²) and squared wavelength (Å²).
pub const GRAVITY_DROP: f64 =
    STANDARD_GRAVITY / (2.0 * SPEED_TIMES_WAVELENGTH * SPEED_TIMES_WAVELENGTH);

#[derive(Clone, Copy, Debug)]
struct DetectorState {
    direction: Vector3<f64>,
    l2: f64,
    efixed: f64,
}

impl Default for DetectorState {
    fn default() -> Self {
        Self {
            direction: Vector3::z(),
            l2: 1.0,
            efixed: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct VectorTransform {
    frame: OutputFrame,
    mode: EnergyMode,
    matrix: Matrix3<f64>,
    gravity_correction: bool,
    search: ExtremumSearch,
    state: DetectorState,
}

impl Default for VectorTransform {
    fn default() -> Self {
        Self {
            frame: OutputFrame::default(),
            mode: EnergyMode::Elastic,
            matrix: Matrix3::identity(),
            gravity_correction: false,
            search: ExtremumSearch::default(),
            state: DetectorState::default(),
        }
    }
}

impl VectorTransform {
    fn state_for(&self, detector: &DetectorRecord) -> DetectorState {
        DetectorState {
            direction: Vector3::from(detector.direction()),
            l2: detector.l2,
            efixed: fixed_energy(&self.mode, detector),
        }
    }

    fn scattered_direction(&self, state: &DetectorState, kf: f64) -> Vector3<f64> {
        if !self.gravity_correction || kf <= 0.0 {
            return state.direction;
        }
        let wavelength = TAU / kf;
        let drop = GRAVITY_DROP * wavelength * wavelength * state.l2 * state.l2;
        (state.direction * state.l2 + Vector3::new(0.0, drop, 0.0)).normalize()
    }

    /// Projected momentum transfer for input value `x`, or `None` where the
    /// transform is undefined.
    fn projected(&self, state: &DetectorState, x: f64) -> Option<Vector3<f64>> {
        let (ki, kf) = match self.mode {
            EnergyMode::Elastic => (x > 0.0).then_some((x, x))?,
            _ => inelastic_wavevectors(&self.mode, state.efixed, x)?,
        };
        let q_lab = Vector3::new(0.0, 0.0, ki) - self.scattered_direction(state, kf) * kf;
        Some(self.matrix * q_lab)
    }
}

impl CoordinateTransform for VectorTransform {
    fn kind(&self) -> TransformKind {
        TransformKind::Vector
    }

    fn input_unit(&self, mode: &EnergyMode, _source: &SourceDescriptor) -> Unit {
        if mode.is_inelastic() {
            Unit::DeltaE
        } else {
            Unit::Momentum
        }
    }

    fn output_dimension_count(&self, mode: &EnergyMode, _source: &SourceDescriptor) -> usize {
        3 + usize::from(mode.is_inelastic())
    }

    fn dimension_labels(
        &self,
        mode: &EnergyMode,
        _source: &SourceDescriptor,
        projection: &Projection,
    ) -> Vec<(String, String)> {
        let mut labels: Vec<(String, String)> = projection
            .axis_names()
            .iter()
            .map(|name| (name.clone(), projection.units().to_string()))
            .collect();
        if mode.is_inelastic() {
            labels.push(("DeltaE".to_string(), "meV".to_string()));
        }
        labels
    }

    fn initialize(&mut self, setup: &TransformSetup<'_>) -> Result<()> {
        let settings = setup.settings;
        settings.validate()?;
        let mode = settings.energy_mode;
        let n_dims = self.output_dimension_count(&mode, setup.source);
        self.frame = OutputFrame::new(setup, n_dims, self.input_unit(&mode, setup.source))?;
        self.mode = mode;
        if setup.matrix.nrows() < 3 || setup.matrix.ncols() < 3 {
            return Err(Error::config(format!(
                "vector transform needs at least a 3×3 matrix, got {}×{}",
                setup.matrix.nrows(),
                setup.matrix.ncols()
            )));
        }
        self.matrix = setup.matrix.fixed_view::<3, 3>(0, 0).into_owned();
        self.gravity_correction = settings.gravity_correction;
        self.search = settings.extremum_search;
        Ok(())
    }

    fn frame(&self) -> &OutputFrame {
        &self.frame
    }

    fn input_domain(&self, detector: &DetectorRecord) -> Bounds {
        energy_transfer_domain(&self.mode, detector)
    }

    fn per_detector_coordinates(&mut self, _coords: &mut [f64], detector: &DetectorRecord) -> bool {
        self.state = self.state_for(detector);
        true
    }

    fn per_bin_coordinate(&mut self, x: f64, coords: &mut [f64]) -> bool {
        let Some(q) = self.projected(&self.state, x) else {
            return false;
        };
        coords[..3].copy_from_slice(q.as_slice());
        if self.mode.is_inelastic() {
            coords[3] = x;
        }
        self.frame.in_bounds(coords, 0..self.frame.n_transform_dims)
    }

    fn extremal_bin_values(&self, x_min: f64, x_max: f64, detector: &DetectorRecord) -> Vec<f64> {
        if !self.gravity_correction {
            // every component is monotonic in the bin value
            return candidates(x_min, x_max, std::iter::empty());
        }
        let state = self.state_for(detector);
        let component = |axis: usize| {
            move |x: f64| self.projected(&state, x).map_or(f64::NAN, |q| q[axis])
        };
        let interior: Vec<f64> = (0..3)
            .flat_map(|axis| {
                [
                    self.search.minimize(x_min, x_max, component(axis)),
                    self.search.maximize(x_min, x_max, component(axis)),
                ]
            })
            .collect();
        candidates(x_min, x_max, interior)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{detector, initialized, source};
    use super::super::MagnitudeTransform;
    use super::*;
    use crate::settings::TransformSettings;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_gravity_constant() {
        assert_relative_eq!(GRAVITY_DROP, 3.1331e-7, max_relative = 1e-3);
    }

    #[test]
    fn test_elastic_lab_frame_vector() {
        let settings = TransformSettings::default();
        let mut transform = initialized(VectorTransform::default(), &settings, &source(Unit::Momentum));
        let mut coords = [0.0; 3];
        assert!(transform.per_detector_coordinates(&mut coords, &detector(FRAC_PI_2, 0.0)));
        assert!(transform.per_bin_coordinate(2.0, &mut coords));
        assert_relative_eq!(coords[0], -2.0, epsilon = 1e-12);
        assert_relative_eq!(coords[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(coords[2], 2.0, epsilon = 1e-12);
        assert!(!transform.per_bin_coordinate(-1.0, &mut coords));
    }

    #[test]
    fn test_applies_leading_block_of_setup_matrix() {
        let settings = TransformSettings::default();
        let src = source(Unit::Momentum);
        let bounds = vec![Bounds::unbounded(); 4];
        // Swaps x and z; the fourth row belongs to a log dimension.
        let mut matrix = nalgebra::DMatrix::identity(4, 4);
        matrix[(0, 0)] = 0.0;
        matrix[(2, 2)] = 0.0;
        matrix[(0, 2)] = 1.0;
        matrix[(2, 0)] = 1.0;
        let mut transform = VectorTransform::default();
        transform
            .initialize(&TransformSetup {
                settings: &settings,
                source: &src,
                bounds: &bounds,
                matrix: &matrix,
            })
            .unwrap();

        let mut coords = [0.0; 4];
        assert!(transform.per_detector_coordinates(&mut coords, &detector(FRAC_PI_2, 0.0)));
        assert!(transform.per_bin_coordinate(2.0, &mut coords));
        assert_relative_eq!(coords[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(coords[2], -2.0, epsilon = 1e-12);

        let small = nalgebra::DMatrix::identity(2, 2);
        let result = VectorTransform::default().initialize(&TransformSetup {
            settings: &settings,
            source: &src,
            bounds: &bounds,
            matrix: &small,
        });
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_inelastic_norm_matches_magnitude() {
        let settings = TransformSettings::default().with_energy_mode(EnergyMode::Direct { ei: 60.0 });
        let src = source(Unit::DeltaE);
        let mut vector = initialized(VectorTransform::default(), &settings, &src);
        let mut magnitude = initialized(MagnitudeTransform::default(), &settings, &src);
        let det = detector(1.1, 0.7);

        let mut v = [0.0; 4];
        let mut m = [0.0; 2];
        vector.per_detector_coordinates(&mut v, &det);
        magnitude.per_detector_coordinates(&mut m, &det);
        for x in [-20.0, 0.0, 15.5, 59.0] {
            assert!(vector.per_bin_coordinate(x, &mut v));
            assert!(magnitude.per_bin_coordinate(x, &mut m));
            let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert_relative_eq!(norm, m[0], max_relative = 1e-10);
            assert_eq!(v[3], x);
        }
    }

    #[test]
    fn test_gravity_tilts_scattered_beam() {
        let plain = TransformSettings::default();
        let corrected = TransformSettings::default().with_gravity_correction(true);
        let src = source(Unit::Momentum);
        let mut without = initialized(VectorTransform::default(), &plain, &src);
        let mut with = initialized(VectorTransform::default(), &corrected, &src);
        let det = detector(FRAC_PI_2, 0.0);

        let mut a = [0.0; 3];
        let mut b = [0.0; 3];
        without.per_detector_coordinates(&mut a, &det);
        with.per_detector_coordinates(&mut b, &det);

        without.per_bin_coordinate(0.5, &mut a);
        with.per_bin_coordinate(0.5, &mut b);
        assert_relative_eq!(a[1], 0.0, epsilon = 1e-12);
        assert!(b[1] < 0.0);
        let slow_drop = b[1] / 0.5;

        with.per_bin_coordinate(5.0, &mut b);
        assert!(b[1] / 5.0 > slow_drop, "longer wavelengths fall further");
    }

    #[test]
    fn test_gravity_extrema_stay_in_range() {
        let settings = TransformSettings::default().with_gravity_correction(true);
        let transform = initialized(VectorTransform::default(), &settings, &source(Unit::Momentum));
        let points = transform.extremal_bin_values(0.5, 8.0, &detector(0.8, 1.2));
        assert_eq!(points.first(), Some(&0.5));
        assert_eq!(points.last(), Some(&8.0));
        assert!(points.iter().all(|x| (0.5..=8.0).contains(x)));
    }
}
