//! Error types for qspace-core.

use thiserror::Error;

/// Result type alias for qspace operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Conversion-level error types.
///
/// Every variant is fatal for the operation that raised it: no tree is
/// produced or mutated once one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Bad or missing configuration (unit mismatch, malformed bounds,
    /// mismatched dimension counts, missing logs).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The projection basis vectors are coplanar.
    #[error("degenerate projection basis: |det| = {determinant:e} is below tolerance")]
    DegenerateBasis { determinant: f64 },

    /// No spectrum in the dataset resolved to a usable detector.
    #[error("no valid detectors associated with any spectrum")]
    NoValidDetectors,

    /// Conversion was cancelled at a chunk boundary.
    #[error("conversion cancelled")]
    Cancelled,
}

impl Error {
    /// Shorthand for building a [`Error::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Recoverable, per-spectrum failure.
///
/// These never escalate to a conversion failure: the spectrum is skipped,
/// logged, and counted as discarded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpectrumError {
    /// The spectrum has no detector, or the detector could not be resolved.
    #[error("spectrum {spectrum}: no valid detector")]
    MissingDetector { spectrum: usize },

    /// Bin boundaries and data arrays have inconsistent lengths.
    #[error("spectrum {spectrum}: malformed axis ({edges} bin edges, {signal} signal values, {errors} error values)")]
    MalformedAxis {
        spectrum: usize,
        edges: usize,
        signal: usize,
        errors: usize,
    },

    /// The detector was rejected by the transform's detector policy.
    #[error("spectrum {spectrum}: detector {detector_id} rejected")]
    RejectedDetector { spectrum: usize, detector_id: u32 },
}

impl SpectrumError {
    /// Index of the spectrum the failure belongs to.
    #[must_use]
    pub fn spectrum(&self) -> usize {
        match self {
            Self::MissingDetector { spectrum }
            | Self::MalformedAxis { spectrum, .. }
            | Self::RejectedDetector { spectrum, .. } => *spectrum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::config("bounds count 2 does not match 3 dimensions");
        assert_eq!(
            err.to_string(),
            "configuration error: bounds count 2 does not match 3 dimensions"
        );
        assert!(Error::NoValidDetectors.to_string().contains("no valid detectors"));
    }

    #[test]
    fn test_spectrum_error_index() {
        let err = SpectrumError::MalformedAxis {
            spectrum: 7,
            edges: 3,
            signal: 5,
            errors: 5,
        };
        assert_eq!(err.spectrum(), 7);
        assert!(err.to_string().starts_with("spectrum 7"));
    }
}
