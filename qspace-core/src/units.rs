//! Axis units and on-the-fly unit conversion.
//!
//! Conversions between time-of-flight, wavelength, wavevector and energy go
//! through the neutron wavevector `k`:
//!
//! - wavelength: `k = 2π / λ`
//! - energy: `E = 2.072 k²` (meV, Å⁻¹)
//! - time-of-flight: `λ = t · 3.956e-3 / L` (µs, m, Å)
//!
//! All of these are only defined for strictly positive input values.
#![allow(clippy::doc_markdown)]

use crate::{Error, Result};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Neutron kinetic energy per squared wavevector (meV·Å²).
pub const ENERGY_PER_K_SQUARED: f64 = 2.072_124_66;

/// `h / m_n` in m/s·Å: neutron speed is this divided by the wavelength.
pub const SPEED_TIMES_WAVELENGTH: f64 = 3956.034;

/// Units an axis can be expressed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Unit {
    /// Time-of-flight in microseconds.
    TimeOfFlight,
    /// Wavelength in Å.
    Wavelength,
    /// Neutron wavevector in Å⁻¹.
    Momentum,
    /// Neutron energy in meV.
    Energy,
    /// Energy transfer in meV.
    DeltaE,
    /// Any other labelled unit; only converts to itself.
    Other(String),
}

impl Unit {
    /// Short identifier, also accepted by [`FromStr`].
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::TimeOfFlight => "TOF",
            Self::Wavelength => "Wavelength",
            Self::Momentum => "Momentum",
            Self::Energy => "Energy",
            Self::DeltaE => "DeltaE",
            Self::Other(label) => label,
        }
    }

    /// Units label used for dimension descriptors.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::TimeOfFlight => "microsecond",
            Self::Wavelength => "Å",
            Self::Momentum => "Å^-1",
            Self::Energy | Self::DeltaE => "meV",
            Self::Other(label) => label,
        }
    }

    fn via_wavevector(&self) -> bool {
        matches!(
            self,
            Self::TimeOfFlight | Self::Wavelength | Self::Momentum | Self::Energy
        )
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Unit {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "TOF" | "TimeOfFlight" => Self::TimeOfFlight,
            "Wavelength" => Self::Wavelength,
            "Momentum" => Self::Momentum,
            "Energy" => Self::Energy,
            "DeltaE" => Self::DeltaE,
            other => Self::Other(other.to_string()),
        })
    }
}

/// Converts axis values from the source unit into the unit a transform
/// expects.
///
/// Time-of-flight conversions depend on the total flight path, which is
/// updated per detector through [`UnitConversion::set_flight_path`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnitConversion {
    from: Unit,
    to: Unit,
    flight_path: f64,
}

impl UnitConversion {
    /// Creates a conversion between two units.
    ///
    /// # Errors
    /// Returns a configuration error if no conversion between the units is
    /// known.
    pub fn new(from: Unit, to: Unit) -> Result<Self> {
        if from != to && !(from.via_wavevector() && to.via_wavevector()) {
            return Err(Error::config(format!(
                "cannot convert axis unit '{from}' into required unit '{to}'"
            )));
        }
        Ok(Self {
            from,
            to,
            flight_path: 1.0,
        })
    }

    /// Identity conversion for `unit`.
    #[must_use]
    pub fn identity(unit: Unit) -> Self {
        Self {
            from: unit.clone(),
            to: unit,
            flight_path: 1.0,
        }
    }

    /// True if values pass through unchanged.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// True if the conversion depends on the per-detector flight path.
    #[must_use]
    pub fn needs_flight_path(&self) -> bool {
        !self.is_identity()
            && (self.from == Unit::TimeOfFlight || self.to == Unit::TimeOfFlight)
    }

    /// Source unit.
    #[must_use]
    pub fn from_unit(&self) -> &Unit {
        &self.from
    }

    /// Target unit.
    #[must_use]
    pub fn to_unit(&self) -> &Unit {
        &self.to
    }

    /// Sets the total flight path (L1 + L2, metres) for TOF conversions.
    pub fn set_flight_path(&mut self, metres: f64) {
        self.flight_path = metres;
    }

    /// Converts one value. Returns `None` where the conversion is undefined.
    #[must_use]
    pub fn convert(&self, value: f64) -> Option<f64> {
        if self.is_identity() {
            return Some(value);
        }
        if value <= 0.0 || !value.is_finite() {
            return None;
        }
        let k = match self.from {
            Unit::Wavelength => TAU / value,
            Unit::Momentum => value,
            Unit::Energy => (value / ENERGY_PER_K_SQUARED).sqrt(),
            Unit::TimeOfFlight => {
                if self.flight_path <= 0.0 {
                    return None;
                }
                TAU / (value * SPEED_TIMES_WAVELENGTH * 1e-6 / self.flight_path)
            }
            Unit::DeltaE | Unit::Other(_) => return None,
        };
        let converted = match self.to {
            Unit::Wavelength => TAU / k,
            Unit::Momentum => k,
            Unit::Energy => ENERGY_PER_K_SQUARED * k * k,
            Unit::TimeOfFlight => TAU / k * self.flight_path / (SPEED_TIMES_WAVELENGTH * 1e-6),
            Unit::DeltaE | Unit::Other(_) => return None,
        };
        Some(converted)
    }

    /// Source range `[lo, hi]` expressed in the target unit as an ordered
    /// `(min, max)` pair.
    ///
    /// Returns `None` unless both ends convert; a non-identity conversion
    /// needs strictly positive ends, so clip an axis that starts at zero to
    /// its first positive value first (see
    /// [`Spectrum::positive_x_range`](crate::Spectrum::positive_x_range)).
    #[must_use]
    pub fn valid_range(&self, lo: f64, hi: f64) -> Option<(f64, f64)> {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        if self.is_identity() {
            return Some((lo, hi));
        }
        let a = self.convert(lo)?;
        let b = self.convert(hi)?;
        Some((a.min(b), a.max(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unit_ids_round_trip() {
        for unit in [
            Unit::TimeOfFlight,
            Unit::Wavelength,
            Unit::Momentum,
            Unit::Energy,
            Unit::DeltaE,
        ] {
            assert_eq!(unit.id().parse::<Unit>().unwrap(), unit);
        }
        assert_eq!("Counts".parse::<Unit>().unwrap(), Unit::Other("Counts".into()));
    }

    #[test]
    fn test_wavelength_to_momentum() {
        let conv = UnitConversion::new(Unit::Wavelength, Unit::Momentum).unwrap();
        assert_relative_eq!(conv.convert(TAU).unwrap(), 1.0);
        assert!(conv.convert(0.0).is_none());
        assert!(!conv.needs_flight_path());
    }

    #[test]
    fn test_energy_momentum_consistency() {
        // 81.8 meV neutrons have a wavelength of about 1 Å.
        let conv = UnitConversion::new(Unit::Energy, Unit::Wavelength).unwrap();
        assert_relative_eq!(conv.convert(81.804).unwrap(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_tof_uses_flight_path() {
        let mut conv = UnitConversion::new(Unit::TimeOfFlight, Unit::Wavelength).unwrap();
        assert!(conv.needs_flight_path());
        conv.set_flight_path(10.0);
        // 1 Å neutrons travel 3956 m/s: 10 m takes 2527.8 µs.
        assert_relative_eq!(conv.convert(2527.78).unwrap(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_valid_range_clips_non_positive() {
        let conv = UnitConversion::new(Unit::Momentum, Unit::Wavelength).unwrap();
        assert!(conv.valid_range(-2.0, 0.0).is_none());
        assert!(conv.valid_range(0.0, 2.0).is_none());
        let (lo, hi) = conv.valid_range(1.0, TAU).unwrap();
        assert_relative_eq!(lo, 1.0);
        assert_relative_eq!(hi, TAU);
    }

    #[test]
    fn test_unsupported_conversion() {
        assert!(UnitConversion::new(Unit::DeltaE, Unit::Momentum).is_err());
        assert!(UnitConversion::new(Unit::DeltaE, Unit::DeltaE).is_ok());
    }
}
