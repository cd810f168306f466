//! Box-splitting configuration.

use qspace_core::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Upper limit on the number of children a single grid box may hold.
pub const MAX_CHILDREN_PER_BOX: usize = 1 << 20;

/// Controls how boxes split.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TreeConfig {
    /// Number of slices per dimension when a box splits.
    pub split_into: usize,
    /// A leaf splits once it holds more than this many events.
    pub split_threshold: usize,
    /// Boxes at this depth never split.
    pub max_depth: usize,
    /// Every box shallower than this is split at tree creation.
    pub min_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            split_into: 5,
            split_threshold: 1000,
            max_depth: 20,
            min_depth: 0,
        }
    }
}

impl TreeConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of slices per dimension.
    #[must_use]
    pub fn with_split_into(mut self, split_into: usize) -> Self {
        self.split_into = split_into;
        self
    }

    /// Set the per-leaf event threshold.
    #[must_use]
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = threshold;
        self
    }

    /// Set the maximum depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the forced minimum depth.
    #[must_use]
    pub fn with_min_depth(mut self, depth: usize) -> Self {
        self.min_depth = depth;
        self
    }

    /// Checks the configuration on its own.
    ///
    /// # Errors
    /// Returns a configuration error for `split_into < 2`, a zero threshold,
    /// or `min_depth > max_depth`.
    pub fn validate(&self) -> Result<()> {
        if self.split_into < 2 {
            return Err(Error::config("split_into must be at least 2"));
        }
        if self.split_threshold == 0 {
            return Err(Error::config("split_threshold must be at least 1"));
        }
        if self.min_depth > self.max_depth {
            return Err(Error::config(format!(
                "min_depth {} exceeds max_depth {}",
                self.min_depth, self.max_depth
            )));
        }
        Ok(())
    }

    /// Number of children of a grid box in `n_dims` dimensions.
    ///
    /// # Errors
    /// Returns a configuration error if the count overflows or exceeds
    /// [`MAX_CHILDREN_PER_BOX`].
    pub fn fanout(&self, n_dims: usize) -> Result<usize> {
        u32::try_from(n_dims)
            .ok()
            .and_then(|exp| self.split_into.checked_pow(exp))
            .filter(|&count| count <= MAX_CHILDREN_PER_BOX)
            .ok_or_else(|| {
                Error::config(format!(
                    "splitting {n_dims} dimensions into {} gives too many children per box",
                    self.split_into
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TreeConfig::default();
        assert_eq!(config.split_into, 5);
        assert_eq!(config.split_threshold, 1000);
        assert_eq!(config.max_depth, 20);
        assert_eq!(config.min_depth, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(TreeConfig::new().with_split_into(1).validate().is_err());
        assert!(TreeConfig::new().with_split_threshold(0).validate().is_err());
        assert!(TreeConfig::new()
            .with_max_depth(2)
            .with_min_depth(3)
            .validate()
            .is_err());
    }

    #[test]
    fn test_fanout() {
        let config = TreeConfig::new().with_split_into(3);
        assert_eq!(config.fanout(1).unwrap(), 3);
        assert_eq!(config.fanout(4).unwrap(), 81);
        assert!(TreeConfig::new().with_split_into(100).fanout(4).is_err());
    }
}
