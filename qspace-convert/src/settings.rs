//! Transform settings: energy analysis mode, detector filter and the
//! constants of the numerical extremum search.

use crate::search::ExtremumSearch;
use qspace_core::{DetectorRecord, Error, Result};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Energy analysis mode of the measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EnergyMode {
    /// No energy transfer; the x axis carries the neutron wavevector.
    #[default]
    Elastic,
    /// Fixed incident energy `ei` (meV); the x axis carries energy transfer.
    Direct { ei: f64 },
    /// Fixed final energy `efixed` (meV), optionally overridden per detector;
    /// the x axis carries energy transfer.
    Indirect { efixed: f64 },
}

impl EnergyMode {
    /// Short identifier.
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::Elastic => "Elastic",
            Self::Direct { .. } => "Direct",
            Self::Indirect { .. } => "Indirect",
        }
    }

    /// True for direct and indirect geometry.
    #[must_use]
    pub fn is_inelastic(&self) -> bool {
        !matches!(self, Self::Elastic)
    }

    /// Parses a mode name together with its fixed energy.
    ///
    /// # Errors
    /// Returns a configuration error for an unknown name or a missing energy
    /// in an inelastic mode.
    pub fn from_name(name: &str, energy: Option<f64>) -> Result<Self> {
        let need_energy = || {
            energy.ok_or_else(|| Error::config(format!("energy mode '{name}' requires a fixed energy")))
        };
        match name {
            "Elastic" | "elastic" => Ok(Self::Elastic),
            "Direct" | "direct" => Ok(Self::Direct { ei: need_energy()? }),
            "Indirect" | "indirect" => Ok(Self::Indirect {
                efixed: need_energy()?,
            }),
            other => Err(Error::config(format!("unknown energy mode '{other}'"))),
        }
    }

    /// Checks that fixed energies are positive and finite.
    ///
    /// # Errors
    /// Returns a configuration error otherwise.
    pub fn validate(&self) -> Result<()> {
        let energy = match self {
            Self::Elastic => return Ok(()),
            Self::Direct { ei } => *ei,
            Self::Indirect { efixed } => *efixed,
        };
        if energy.is_finite() && energy > 0.0 {
            Ok(())
        } else {
            Err(Error::config(format!(
                "{} mode needs a positive fixed energy, got {energy}",
                self.id()
            )))
        }
    }
}

impl fmt::Display for EnergyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elastic => f.write_str("Elastic"),
            Self::Direct { ei } => write!(f, "Direct (Ei = {ei} meV)"),
            Self::Indirect { efixed } => write!(f, "Indirect (Ef = {efixed} meV)"),
        }
    }
}

/// Which detectors a transform refuses to convert.
///
/// Monitors and masked detectors are converted unless rejected here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DetectorFilter {
    pub reject_monitors: bool,
    pub reject_masked: bool,
}

impl DetectorFilter {
    /// Accepts every detector.
    #[must_use]
    pub fn accept_all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reject_monitors(mut self, reject: bool) -> Self {
        self.reject_monitors = reject;
        self
    }

    #[must_use]
    pub fn with_reject_masked(mut self, reject: bool) -> Self {
        self.reject_masked = reject;
        self
    }

    /// True if `detector` passes the filter.
    #[must_use]
    pub fn accepts(&self, detector: &DetectorRecord) -> bool {
        !((self.reject_monitors && detector.is_monitor) || (self.reject_masked && detector.is_masked))
    }
}

/// Settings shared by every transform variant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformSettings {
    pub energy_mode: EnergyMode,
    pub detector_filter: DetectorFilter,
    /// Correct scattered directions for the gravitational drop of the
    /// neutron between sample and detector (vector transform only).
    pub gravity_correction: bool,
    pub extremum_search: ExtremumSearch,
}

impl TransformSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_energy_mode(mut self, mode: EnergyMode) -> Self {
        self.energy_mode = mode;
        self
    }

    #[must_use]
    pub fn with_detector_filter(mut self, filter: DetectorFilter) -> Self {
        self.detector_filter = filter;
        self
    }

    #[must_use]
    pub fn with_gravity_correction(mut self, enabled: bool) -> Self {
        self.gravity_correction = enabled;
        self
    }

    #[must_use]
    pub fn with_extremum_search(mut self, search: ExtremumSearch) -> Self {
        self.extremum_search = search;
        self
    }

    /// Validates the energy mode and search constants.
    ///
    /// # Errors
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<()> {
        self.energy_mode.validate()?;
        self.extremum_search.validate()
    }
}

/// Transform variants selectable by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransformKind {
    /// Copies the source axis (and numeric spectrum axis) unchanged.
    Copy,
    /// Momentum transfer magnitude `|Q|`.
    Magnitude,
    /// Momentum transfer vector in the projection basis.
    Vector,
}

impl TransformKind {
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::Copy => "CopyToMD",
            Self::Magnitude => "|Q|",
            Self::Vector => "Q3D",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TransformKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CopyToMD" | "copy" => Ok(Self::Copy),
            "|Q|" | "magnitude" | "q" => Ok(Self::Magnitude),
            "Q3D" | "vector" | "q3d" => Ok(Self::Vector),
            other => Err(Error::config(format!(
                "unknown transform '{other}' (expected CopyToMD, |Q| or Q3D)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(is_monitor: bool, is_masked: bool) -> DetectorRecord {
        DetectorRecord {
            spectrum_index: 0,
            detector_id: 1,
            l1: 10.0,
            l2: 1.0,
            two_theta: 0.5,
            azimuthal_phi: 0.0,
            is_monitor,
            is_masked,
            efixed: None,
        }
    }

    #[test]
    fn test_energy_mode_parsing() {
        assert_eq!(EnergyMode::from_name("Elastic", None).unwrap(), EnergyMode::Elastic);
        assert_eq!(
            EnergyMode::from_name("Direct", Some(25.0)).unwrap(),
            EnergyMode::Direct { ei: 25.0 }
        );
        assert!(EnergyMode::from_name("Indirect", None).is_err());
        assert!(EnergyMode::from_name("Sideways", Some(1.0)).is_err());
        assert!(EnergyMode::Direct { ei: -1.0 }.validate().is_err());
    }

    #[test]
    fn test_detector_filter() {
        let filter = DetectorFilter::accept_all();
        assert!(filter.accepts(&record(true, true)));

        let filter = filter.with_reject_monitors(true);
        assert!(!filter.accepts(&record(true, false)));
        assert!(filter.accepts(&record(false, true)));

        let filter = filter.with_reject_masked(true);
        assert!(!filter.accepts(&record(false, true)));
        assert!(filter.accepts(&record(false, false)));
    }

    #[test]
    fn test_transform_kind_ids() {
        for kind in [TransformKind::Copy, TransformKind::Magnitude, TransformKind::Vector] {
            assert_eq!(kind.id().parse::<TransformKind>().unwrap(), kind);
        }
        assert!("Q2D".parse::<TransformKind>().is_err());
    }
}
