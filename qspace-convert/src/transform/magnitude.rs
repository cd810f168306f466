//! Momentum transfer magnitude `|Q|`, plus energy transfer in inelastic
//! modes.
//!
//! Elastic: `|Q| = 2k·sin(2θ/2)` with `k` the neutron wavevector.
//! Inelastic: `|Q|² = ki² + kf² − 2·ki·kf·cos 2θ` with the energy transfer
//! on the x axis.

use super::{
    candidates, energy_transfer_domain, fixed_energy, inelastic_wavevectors, CoordinateTransform,
    OutputFrame, SourceDescriptor, TransformSetup,
};
use crate::projection::Projection;
use crate::settings::{EnergyMode, TransformKind};
use qspace_core::{Bounds, DetectorRecord, Result, Unit};

#[derive(Clone, Debug, Default)]
pub struct MagnitudeTransform {
    frame: OutputFrame,
    mode: EnergyMode,
    // per-detector state
    sin_theta: f64,
    cos_two_theta: f64,
    efixed: f64,
}

impl MagnitudeTransform {
    fn magnitude(&self, x: f64) -> Option<f64> {
        match self.mode {
            EnergyMode::Elastic => Some(2.0 * x * self.sin_theta),
            _ => {
                let (ki, kf) = inelastic_wavevectors(&self.mode, self.efixed, x)?;
                let q2 = ki * ki + kf * kf - 2.0 * ki * kf * self.cos_two_theta;
                Some(q2.max(0.0).sqrt())
            }
        }
    }
}

impl CoordinateTransform for MagnitudeTransform {
    fn kind(&self) -> TransformKind {
        TransformKind::Magnitude
    }

    fn input_unit(&self, mode: &EnergyMode, _source: &SourceDescriptor) -> Unit {
        if mode.is_inelastic() {
            Unit::DeltaE
        } else {
            Unit::Momentum
        }
    }

    fn output_dimension_count(&self, mode: &EnergyMode, _source: &SourceDescriptor) -> usize {
        1 + usize::from(mode.is_inelastic())
    }

    fn dimension_labels(
        &self,
        mode: &EnergyMode,
        _source: &SourceDescriptor,
        _projection: &Projection,
    ) -> Vec<(String, String)> {
        let mut labels = vec![("|Q|".to_string(), "Å^-1".to_string())];
        if mode.is_inelastic() {
            labels.push(("DeltaE".to_string(), "meV".to_string()));
        }
        labels
    }

    fn initialize(&mut self, setup: &TransformSetup<'_>) -> Result<()> {
        let mode = setup.settings.energy_mode;
        mode.validate()?;
        let n_dims = self.output_dimension_count(&mode, setup.source);
        self.frame = OutputFrame::new(setup, n_dims, self.input_unit(&mode, setup.source))?;
        self.mode = mode;
        Ok(())
    }

    fn frame(&self) -> &OutputFrame {
        &self.frame
    }

    fn input_domain(&self, detector: &DetectorRecord) -> Bounds {
        energy_transfer_domain(&self.mode, detector)
    }

    fn per_detector_coordinates(&mut self, _coords: &mut [f64], detector: &DetectorRecord) -> bool {
        self.sin_theta = (0.5 * detector.two_theta).sin();
        self.cos_two_theta = detector.two_theta.cos();
        self.efixed = fixed_energy(&self.mode, detector);
        true
    }

    fn per_bin_coordinate(&mut self, x: f64, coords: &mut [f64]) -> bool {
        let Some(q) = self.magnitude(x) else {
            return false;
        };
        coords[0] = q;
        if self.mode.is_inelastic() {
            coords[1] = x;
            self.frame.in_bounds(coords, 0..2)
        } else {
            self.frame.in_bounds(coords, 0..1)
        }
    }

    fn extremal_bin_values(&self, x_min: f64, x_max: f64, detector: &DetectorRecord) -> Vec<f64> {
        let cos_two_theta = detector.two_theta.cos();
        let sin2 = detector.two_theta.sin().powi(2);
        let turning_point = match self.mode {
            EnergyMode::Elastic => None,
            _ if cos_two_theta <= 0.0 => None,
            EnergyMode::Direct { ei } => Some(ei * sin2),
            EnergyMode::Indirect { .. } => Some(-fixed_energy(&self.mode, detector) * sin2),
        };
        candidates(x_min, x_max, turning_point)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{detector, initialized, source};
    use super::*;
    use crate::settings::TransformSettings;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_elastic_magnitude() {
        let settings = TransformSettings::default();
        let mut transform =
            initialized(MagnitudeTransform::default(), &settings, &source(Unit::Momentum));
        let mut coords = [0.0];
        assert!(transform.per_detector_coordinates(&mut coords, &detector(FRAC_PI_2, 0.0)));
        assert!(transform.per_bin_coordinate(3.0, &mut coords));
        assert_relative_eq!(coords[0], 3.0 * std::f64::consts::SQRT_2, epsilon = 1e-12);
    }

    #[test]
    fn test_direct_geometry_minimum() {
        let settings = TransformSettings::default().with_energy_mode(EnergyMode::Direct { ei: 40.0 });
        let mut transform =
            initialized(MagnitudeTransform::default(), &settings, &source(Unit::DeltaE));
        assert_eq!(transform.frame().n_transform_dims, 2);

        let det = detector(0.4, 0.0);
        let points = transform.extremal_bin_values(-10.0, 35.0, &det);
        let turning = 40.0 * 0.4_f64.sin().powi(2);
        assert_eq!(points.len(), 3);
        assert_relative_eq!(points[1], turning, epsilon = 1e-12);

        let mut coords = [0.0; 2];
        transform.per_detector_coordinates(&mut coords, &det);
        transform.per_bin_coordinate(turning, &mut coords);
        let q_min = coords[0];
        for x in [turning - 1.0, turning + 1.0, -10.0, 35.0] {
            transform.per_bin_coordinate(x, &mut coords);
            assert!(coords[0] > q_min);
            assert_eq!(coords[1], x);
        }

        // Beyond the incident energy nothing is defined.
        assert!(!transform.per_bin_coordinate(41.0, &mut coords));
        assert_eq!(transform.input_domain(&det).max, 40.0);
    }

    #[test]
    fn test_indirect_uses_detector_efixed() {
        let settings =
            TransformSettings::default().with_energy_mode(EnergyMode::Indirect { efixed: 3.0 });
        let transform = initialized(MagnitudeTransform::default(), &settings, &source(Unit::DeltaE));
        let mut det = detector(0.5, 0.0);
        assert_eq!(transform.input_domain(&det).min, -3.0);
        det.efixed = Some(5.0);
        assert_eq!(transform.input_domain(&det).min, -5.0);

        let points = transform.extremal_bin_values(-4.0, 10.0, &det);
        assert_relative_eq!(points[1], -5.0 * 0.5_f64.sin().powi(2), epsilon = 1e-12);
    }

    #[test]
    fn test_backscattering_has_no_turning_point() {
        let settings = TransformSettings::default().with_energy_mode(EnergyMode::Direct { ei: 40.0 });
        let transform = initialized(MagnitudeTransform::default(), &settings, &source(Unit::DeltaE));
        assert_eq!(transform.extremal_bin_values(-5.0, 5.0, &detector(2.5, 0.0)).len(), 2);
    }

    #[test]
    fn test_rejects_unconvertible_source() {
        let settings = TransformSettings::default().with_energy_mode(EnergyMode::Direct { ei: 40.0 });
        let mut transform = MagnitudeTransform::default();
        let source = source(Unit::TimeOfFlight);
        let bounds = vec![qspace_core::Bounds::unbounded(); 2];
        let matrix = nalgebra::DMatrix::identity(2, 2);
        let result = transform.initialize(&TransformSetup {
            settings: &settings,
            source: &source,
            bounds: &bounds,
            matrix: &matrix,
        });
        assert!(matches!(result, Err(qspace_core::Error::Configuration(_))));
    }
}
