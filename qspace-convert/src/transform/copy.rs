//! Pass-through transform: the source x axis (and numeric spectrum axis,
//! if any) become output dimensions unchanged.

use super::{candidates, CoordinateTransform, OutputFrame, SourceDescriptor, TransformSetup};
use crate::projection::Projection;
use crate::settings::{EnergyMode, TransformKind};
use qspace_core::{DetectorRecord, Error, Result, Unit};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct CopyTransform {
    frame: OutputFrame,
    axis_values: Option<Arc<[f64]>>,
}

impl CoordinateTransform for CopyTransform {
    fn kind(&self) -> TransformKind {
        TransformKind::Copy
    }

    fn input_unit(&self, _mode: &EnergyMode, source: &SourceDescriptor) -> Unit {
        source.x_unit.clone()
    }

    fn output_dimension_count(&self, _mode: &EnergyMode, source: &SourceDescriptor) -> usize {
        1 + usize::from(source.spectrum_axis.is_some())
    }

    fn dimension_labels(
        &self,
        _mode: &EnergyMode,
        source: &SourceDescriptor,
        _projection: &Projection,
    ) -> Vec<(String, String)> {
        let mut labels = vec![(source.x_unit.id().to_string(), source.x_unit.label().to_string())];
        if let Some(axis) = &source.spectrum_axis {
            labels.push((axis.name.clone(), axis.unit.label().to_string()));
        }
        labels
    }

    fn initialize(&mut self, setup: &TransformSetup<'_>) -> Result<()> {
        let mode = &setup.settings.energy_mode;
        let n_dims = self.output_dimension_count(mode, setup.source);
        self.frame = OutputFrame::new(setup, n_dims, self.input_unit(mode, setup.source))?;
        self.axis_values = match &setup.source.spectrum_axis {
            Some(axis) if axis.values.len() != setup.source.n_spectra => {
                return Err(Error::config(format!(
                    "spectrum axis '{}' has {} values for {} spectra",
                    axis.name,
                    axis.values.len(),
                    setup.source.n_spectra
                )));
            }
            Some(axis) => Some(Arc::clone(&axis.values)),
            None => None,
        };
        Ok(())
    }

    fn frame(&self) -> &OutputFrame {
        &self.frame
    }

    fn per_detector_coordinates(&mut self, coords: &mut [f64], detector: &DetectorRecord) -> bool {
        let Some(values) = &self.axis_values else {
            return true;
        };
        let Some(&value) = values.get(detector.spectrum_index) else {
            return false;
        };
        coords[1] = value;
        self.frame.in_bounds(coords, 1..2)
    }

    fn per_bin_coordinate(&mut self, x: f64, coords: &mut [f64]) -> bool {
        coords[0] = x;
        self.frame.in_bounds(coords, 0..1)
    }

    fn extremal_bin_values(&self, x_min: f64, x_max: f64, _detector: &DetectorRecord) -> Vec<f64> {
        candidates(x_min, x_max, std::iter::empty())
    }
}
