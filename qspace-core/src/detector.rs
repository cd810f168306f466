//! Detector records and the reusable detector geometry cache.
//!
//! The cache turns raw detector positions from a [`GeometryResolver`] into
//! the scalar quantities transforms need (L2, 2θ, φ) once per instrument.
//! It is built single-threaded and read-only afterwards. The caller owns it
//! and decides when to rebuild: [`DetectorGeometryCache::refresh`] rebuilds
//! only when the instrument identity changed or the cache was invalidated.

use crate::source::{DetectorInfo, GeometryResolver};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Precomputed geometry of the detector behind one spectrum.
///
/// The beam travels along +z; 2θ is measured from +z and φ is the azimuth
/// in the x-y plane measured from +x.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorRecord {
    /// Spectrum index this record was resolved for.
    pub spectrum_index: usize,
    /// Detector id.
    pub detector_id: u32,
    /// Source-to-sample distance (m).
    pub l1: f64,
    /// Sample-to-detector distance (m).
    pub l2: f64,
    /// Scattering angle 2θ (radians).
    pub two_theta: f64,
    /// Azimuthal angle φ (radians).
    pub azimuthal_phi: f64,
    /// Detector is a beam monitor.
    pub is_monitor: bool,
    /// Detector is masked.
    pub is_masked: bool,
    /// Fixed final energy for indirect geometry (meV), if set per detector.
    pub efixed: Option<f64>,
}

impl DetectorRecord {
    /// Builds a record from a resolved detector position.
    ///
    /// Returns `None` for a detector sitting on the sample position or with
    /// non-finite coordinates.
    #[must_use]
    pub fn from_info(spectrum_index: usize, l1: f64, info: &DetectorInfo) -> Option<Self> {
        let [x, y, z] = info.position;
        let l2 = (x * x + y * y + z * z).sqrt();
        if !l2.is_finite() || l2 <= 0.0 {
            return None;
        }
        Some(Self {
            spectrum_index,
            detector_id: info.detector_id,
            l1,
            l2,
            two_theta: (z / l2).clamp(-1.0, 1.0).acos(),
            azimuthal_phi: y.atan2(x),
            is_monitor: info.is_monitor,
            is_masked: info.is_masked,
            efixed: info.efixed,
        })
    }

    /// Unit vector from the sample towards the detector.
    #[must_use]
    pub fn direction(&self) -> [f64; 3] {
        let (sin_tt, cos_tt) = self.two_theta.sin_cos();
        let (sin_phi, cos_phi) = self.azimuthal_phi.sin_cos();
        [sin_tt * cos_phi, sin_tt * sin_phi, cos_tt]
    }

    /// Detector position relative to the sample (m).
    #[must_use]
    pub fn position(&self) -> [f64; 3] {
        let [x, y, z] = self.direction();
        [x * self.l2, y * self.l2, z * self.l2]
    }

    /// Total flight path L1 + L2 (m).
    #[must_use]
    pub fn flight_path(&self) -> f64 {
        self.l1 + self.l2
    }
}

/// Dense spectrum-index → detector-record map for one instrument.
#[derive(Debug, Clone, Default)]
pub struct DetectorGeometryCache {
    instrument_id: Option<String>,
    l1: f64,
    records: Vec<Option<DetectorRecord>>,
}

impl DetectorGeometryCache {
    /// Creates an empty, invalid cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the cache from a geometry resolver.
    #[must_use]
    pub fn build<R: GeometryResolver + ?Sized>(resolver: &R) -> Self {
        let mut cache = Self::new();
        cache.rebuild(resolver);
        cache
    }

    /// Builds a cache of synthetic detectors, one per spectrum, for datasets
    /// without instrument geometry.
    ///
    /// Every synthetic detector sits 1 m down the beam with id equal to its
    /// spectrum index.
    #[must_use]
    pub fn synthetic(n_spectra: usize) -> Self {
        Self::build(&crate::memory::SyntheticInstrument::new(n_spectra))
    }

    /// Rebuilds the cache if it is invalid or was built for another
    /// instrument. Returns true if a rebuild happened.
    pub fn refresh<R: GeometryResolver + ?Sized>(&mut self, resolver: &R) -> bool {
        if self.is_valid_for(resolver) {
            return false;
        }
        self.rebuild(resolver);
        true
    }

    /// Drops all records; the next [`Self::refresh`] rebuilds.
    pub fn invalidate(&mut self) {
        self.instrument_id = None;
        self.records.clear();
    }

    /// True if the cache was built for the resolver's instrument.
    #[must_use]
    pub fn is_valid_for<R: GeometryResolver + ?Sized>(&self, resolver: &R) -> bool {
        self.instrument_id.as_deref() == Some(resolver.instrument_id())
            && self.records.len() == resolver.spectrum_count()
    }

    /// Identity of the instrument the cache was built for.
    #[must_use]
    pub fn instrument_id(&self) -> Option<&str> {
        self.instrument_id.as_deref()
    }

    /// Source-to-sample distance of the cached instrument.
    #[must_use]
    pub fn l1(&self) -> f64 {
        self.l1
    }

    /// Record for `spectrum`, if it resolved to a valid detector.
    #[must_use]
    pub fn get(&self, spectrum: usize) -> Option<&DetectorRecord> {
        self.records.get(spectrum).and_then(Option::as_ref)
    }

    /// Number of spectra covered by the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the cache holds no spectra.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of spectra with a valid detector.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.records.iter().flatten().count()
    }

    /// Iterates over all valid records.
    pub fn iter(&self) -> impl Iterator<Item = &DetectorRecord> {
        self.records.iter().flatten()
    }

    fn rebuild<R: GeometryResolver + ?Sized>(&mut self, resolver: &R) {
        let l1 = resolver.l1();
        let n = resolver.spectrum_count();
        self.records = (0..n)
            .map(|i| {
                resolver
                    .detector(i)
                    .and_then(|info| DetectorRecord::from_info(i, l1, &info))
            })
            .collect();
        self.l1 = l1;
        self.instrument_id = Some(resolver.instrument_id().to_string());
        log::debug!(
            "built detector cache for '{}': {} of {} spectra resolved",
            resolver.instrument_id(),
            self.valid_count(),
            n
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InstrumentTable, TableDetector};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn table(id: &str) -> InstrumentTable {
        InstrumentTable::new(id, 10.0)
            .with_detector(TableDetector::new(1, [2.0, 0.0, 0.0]))
            .with_detector(TableDetector::new(2, [0.0, 0.0, 0.0]))
            .with_detector(TableDetector::new(3, [0.0, 3.0, 0.0]).monitor())
    }

    #[test]
    fn test_record_geometry() {
        let cache = DetectorGeometryCache::build(&table("inst"));
        let det = cache.get(0).unwrap();
        assert_relative_eq!(det.l2, 2.0);
        assert_relative_eq!(det.two_theta, FRAC_PI_2);
        assert_relative_eq!(det.azimuthal_phi, 0.0);
        assert_relative_eq!(det.flight_path(), 12.0);
        let [x, y, z] = det.position();
        assert_relative_eq!(x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(z, 0.0, epsilon = 1e-12);

        let monitor = cache.get(2).unwrap();
        assert!(monitor.is_monitor);
        assert_relative_eq!(monitor.azimuthal_phi, FRAC_PI_2);
    }

    #[test]
    fn test_detector_at_sample_is_invalid() {
        let cache = DetectorGeometryCache::build(&table("inst"));
        assert_eq!(cache.len(), 3);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.valid_count(), 2);
    }

    #[test]
    fn test_refresh_only_on_identity_change() {
        let mut cache = DetectorGeometryCache::build(&table("inst"));
        assert!(!cache.refresh(&table("inst")));
        assert!(cache.refresh(&table("other")));
        assert_eq!(cache.instrument_id(), Some("other"));

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(!cache.is_valid_for(&table("other")));
        assert!(cache.refresh(&table("other")));
    }

    #[test]
    fn test_synthetic_cache() {
        let cache = DetectorGeometryCache::synthetic(4);
        assert_eq!(cache.valid_count(), 4);
        assert_eq!(cache.get(3).unwrap().detector_id, 3);
    }
}
