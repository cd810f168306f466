//! In-memory implementations of the source interfaces.

use crate::lattice::Lattice;
use crate::source::{
    DetectorInfo, GeometryResolver, LogValue, RunLogs, SourceDataset, Spectrum, SpectrumAxis,
};
use crate::units::Unit;
use nalgebra::Matrix3;
use std::collections::HashMap;

/// Owned arrays of one spectrum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub e: Vec<f64>,
}

impl SpectrumData {
    #[must_use]
    pub fn new(x: Vec<f64>, y: Vec<f64>, e: Vec<f64>) -> Self {
        Self { x, y, e }
    }

    /// Histogram with errors `sqrt(|y|)`.
    #[must_use]
    pub fn counts(x: Vec<f64>, y: Vec<f64>) -> Self {
        let e = y.iter().map(|v| v.abs().sqrt()).collect();
        Self { x, y, e }
    }
}

/// A binned dataset held in memory.
#[derive(Debug, Clone)]
pub struct HistogramData {
    x_unit: Unit,
    spectra: Vec<SpectrumData>,
    axis: Option<(String, Unit, Vec<f64>)>,
    run_index: u16,
}

impl HistogramData {
    /// Creates an empty dataset whose x axis is in `x_unit`.
    #[must_use]
    pub fn new(x_unit: Unit) -> Self {
        Self {
            x_unit,
            spectra: Vec::new(),
            axis: None,
            run_index: 0,
        }
    }

    /// Appends a spectrum.
    pub fn push(&mut self, spectrum: SpectrumData) {
        self.spectra.push(spectrum);
    }

    #[must_use]
    pub fn with_spectrum(mut self, spectrum: SpectrumData) -> Self {
        self.push(spectrum);
        self
    }

    /// Sets the numeric vertical axis (one value per spectrum).
    #[must_use]
    pub fn with_spectrum_axis(mut self, name: impl Into<String>, unit: Unit, values: Vec<f64>) -> Self {
        self.axis = Some((name.into(), unit, values));
        self
    }

    #[must_use]
    pub fn with_run_index(mut self, run_index: u16) -> Self {
        self.run_index = run_index;
        self
    }

    /// Total number of bins over all spectra.
    #[must_use]
    pub fn total_bins(&self) -> usize {
        self.spectra.iter().map(|s| s.y.len()).sum()
    }
}

impl SourceDataset for HistogramData {
    fn spectrum_count(&self) -> usize {
        self.spectra.len()
    }

    fn x_unit(&self) -> &Unit {
        &self.x_unit
    }

    fn spectrum(&self, index: usize) -> Option<Spectrum<'_>> {
        self.spectra
            .get(index)
            .map(|s| Spectrum::new(&s.x, &s.y, &s.e))
    }

    fn spectrum_axis(&self) -> Option<SpectrumAxis<'_>> {
        self.axis.as_ref().map(|(name, unit, values)| SpectrumAxis {
            name,
            unit,
            values,
        })
    }

    fn run_index(&self) -> u16 {
        self.run_index
    }
}

/// One row of an [`InstrumentTable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableDetector(pub DetectorInfo);

impl TableDetector {
    /// Detector at a Cartesian position relative to the sample.
    #[must_use]
    pub fn new(detector_id: u32, position: [f64; 3]) -> Self {
        Self(DetectorInfo {
            detector_id,
            position,
            is_monitor: false,
            is_masked: false,
            efixed: None,
        })
    }

    /// Detector at distance `l2`, scattering angle `two_theta` and azimuth
    /// `phi` (radians).
    #[must_use]
    pub fn spherical(detector_id: u32, l2: f64, two_theta: f64, phi: f64) -> Self {
        let (st, ct) = two_theta.sin_cos();
        let (sp, cp) = phi.sin_cos();
        Self::new(detector_id, [l2 * st * cp, l2 * st * sp, l2 * ct])
    }

    #[must_use]
    pub fn monitor(mut self) -> Self {
        self.0.is_monitor = true;
        self
    }

    #[must_use]
    pub fn masked(mut self) -> Self {
        self.0.is_masked = true;
        self
    }

    #[must_use]
    pub fn with_efixed(mut self, efixed: f64) -> Self {
        self.0.efixed = Some(efixed);
        self
    }
}

/// Instrument geometry given as an explicit table, one row per spectrum.
#[derive(Debug, Clone)]
pub struct InstrumentTable {
    id: String,
    l1: f64,
    rows: Vec<Option<DetectorInfo>>,
}

impl InstrumentTable {
    /// Creates an empty table for instrument `id` with source-to-sample
    /// distance `l1` (m).
    #[must_use]
    pub fn new(id: impl Into<String>, l1: f64) -> Self {
        Self {
            id: id.into(),
            l1,
            rows: Vec::new(),
        }
    }

    /// Appends the detector for the next spectrum.
    #[must_use]
    pub fn with_detector(mut self, detector: TableDetector) -> Self {
        self.rows.push(Some(detector.0));
        self
    }

    /// Appends a spectrum without a detector.
    #[must_use]
    pub fn with_missing(mut self) -> Self {
        self.rows.push(None);
        self
    }

    /// Appends a row.
    pub fn push(&mut self, row: Option<DetectorInfo>) {
        self.rows.push(row);
    }
}

impl GeometryResolver for InstrumentTable {
    fn instrument_id(&self) -> &str {
        &self.id
    }

    fn spectrum_count(&self) -> usize {
        self.rows.len()
    }

    fn l1(&self) -> f64 {
        self.l1
    }

    fn detector(&self, spectrum: usize) -> Option<DetectorInfo> {
        self.rows.get(spectrum).copied().flatten()
    }
}

/// Stand-in geometry for datasets without an instrument: one detector per
/// spectrum, 1 m down the beam, with id equal to the spectrum index.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticInstrument {
    n_spectra: usize,
}

impl SyntheticInstrument {
    /// Instrument identity reported by every synthetic instrument.
    pub const ID: &'static str = "synthetic";

    #[must_use]
    pub fn new(n_spectra: usize) -> Self {
        Self { n_spectra }
    }
}

impl GeometryResolver for SyntheticInstrument {
    fn instrument_id(&self) -> &str {
        Self::ID
    }

    fn spectrum_count(&self) -> usize {
        self.n_spectra
    }

    fn l1(&self) -> f64 {
        1.0
    }

    fn detector(&self, spectrum: usize) -> Option<DetectorInfo> {
        (spectrum < self.n_spectra).then(|| DetectorInfo {
            detector_id: u32::try_from(spectrum).unwrap_or(u32::MAX),
            position: [0.0, 0.0, 1.0],
            is_monitor: false,
            is_masked: false,
            efixed: None,
        })
    }
}

/// Run logs held in memory.
#[derive(Debug, Clone, Default)]
pub struct LogBook {
    values: HashMap<String, LogValue>,
    lattice: Option<Lattice>,
    orientation: Option<Matrix3<f64>>,
}

impl LogBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a single-valued log.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, LogValue::Single(value));
        self
    }

    /// Sets a time-series log.
    #[must_use]
    pub fn with_series(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.insert(name, LogValue::Series(values));
        self
    }

    #[must_use]
    pub fn with_lattice(mut self, lattice: Lattice) -> Self {
        self.lattice = Some(lattice);
        self
    }

    /// Sets the sample orientation matrix U (rows given in order).
    #[must_use]
    pub fn with_orientation(mut self, rows: [[f64; 3]; 3]) -> Self {
        self.orientation = Some(Matrix3::from_fn(|r, c| rows[r][c]));
        self
    }

    /// Inserts or replaces a log.
    pub fn insert(&mut self, name: impl Into<String>, value: LogValue) {
        self.values.insert(name.into(), value);
    }
}

impl RunLogs for LogBook {
    fn value(&self, name: &str) -> Option<&LogValue> {
        self.values.get(name)
    }

    fn lattice(&self) -> Option<Lattice> {
        self.lattice
    }

    fn orientation(&self) -> Option<Matrix3<f64>> {
        self.orientation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_data_access() {
        let data = HistogramData::new(Unit::Momentum)
            .with_spectrum(SpectrumData::counts(vec![1.0, 2.0, 3.0], vec![4.0, 9.0]))
            .with_run_index(3);
        assert_eq!(data.spectrum_count(), 1);
        assert_eq!(data.total_bins(), 2);
        assert_eq!(data.run_index(), 3);
        let spectrum = data.spectrum(0).unwrap();
        assert_eq!(spectrum.e, &[2.0, 3.0]);
        assert!(data.spectrum(1).is_none());
        assert!(data.spectrum_axis().is_none());
    }

    #[test]
    fn test_instrument_table_rows() {
        let table = InstrumentTable::new("demo", 20.0)
            .with_detector(TableDetector::spherical(7, 3.0, 0.5, 0.0).masked())
            .with_missing();
        assert_eq!(table.spectrum_count(), 2);
        let info = table.detector(0).unwrap();
        assert_eq!(info.detector_id, 7);
        assert!(info.is_masked);
        assert!(table.detector(1).is_none());
        assert!(table.detector(2).is_none());
    }

    #[test]
    fn test_log_book_lookup() {
        let logs = LogBook::new()
            .with_value("temperature", 4.2)
            .with_series("field", vec![1.0, 1.5]);
        assert!((logs.single_value("temperature").unwrap() - 4.2).abs() < 1e-12);
        assert!(logs.single_value("field").is_err());
        assert!(logs.single_value("pressure").is_err());
        assert!(logs.lattice().is_none());
    }
}
