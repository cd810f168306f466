//! The adaptive box tree.
//!
//! An N-dimensional root box over the output dimensions, recursively
//! split into regular grids of `split_into^N` children whenever a leaf
//! holds more than `split_threshold` events, down to `max_depth`. Leaves
//! at `max_depth` grow without bound.

use crate::config::TreeConfig;
use crate::extent::Extent;
use crate::node::{Aggregate, BoxNode};
use qspace_core::{Dimension, Error, EventBuffer, EventRef, Result};

/// Relative tolerance when comparing dimension bounds of an existing tree.
const BOUNDS_TOLERANCE: f64 = 1e-12;

/// Structure counters for a tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub n_boxes: usize,
    pub n_leaves: usize,
    pub n_grids: usize,
    pub n_events: usize,
    /// Deepest level with a box (root is 0).
    pub deepest: usize,
}

/// N-dimensional adaptive box tree.
#[derive(Clone, Debug)]
pub struct BoxTree {
    dimensions: Vec<Dimension>,
    config: TreeConfig,
    root: BoxNode,
}

impl BoxTree {
    /// Allocates a tree over `dimensions`, pre-split to `config.min_depth`.
    ///
    /// # Errors
    /// Returns a configuration error for invalid dimensions or an invalid
    /// or oversized split configuration.
    pub fn new(dimensions: Vec<Dimension>, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let extent = Extent::from_dimensions(&dimensions)?;
        config.fanout(extent.n_dims())?;
        let root = BoxNode::new(extent, 0, &config);
        log::debug!(
            "allocated {}-D box tree (split_into={}, threshold={}, depth {}..={})",
            dimensions.len(),
            config.split_into,
            config.split_threshold,
            config.min_depth,
            config.max_depth
        );
        Ok(Self {
            dimensions,
            config,
            root,
        })
    }

    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    #[must_use]
    pub fn n_dims(&self) -> usize {
        self.dimensions.len()
    }

    #[must_use]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub fn extent(&self) -> &Extent {
        self.root.extent()
    }

    #[must_use]
    pub fn root(&self) -> &BoxNode {
        &self.root
    }

    /// Total signal in the tree.
    #[must_use]
    pub fn signal(&self) -> f64 {
        self.root.signal()
    }

    /// Total squared error in the tree.
    #[must_use]
    pub fn error_squared(&self) -> f64 {
        self.root.error_squared()
    }

    /// Total number of events in the tree.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.root.n_events()
    }

    /// Inserts one event. Returns false (and stores nothing) if the event
    /// has the wrong dimensionality or lies outside the root box.
    pub fn insert(&mut self, event: EventRef<'_>) -> bool {
        if !self.root.extent().contains(event.coords) {
            return false;
        }
        self.root.insert(event, &self.config);
        true
    }

    /// Inserts every event of `events`; returns how many were stored.
    pub fn insert_buffer(&mut self, events: &EventBuffer) -> usize {
        events.iter().filter(|event| self.insert(*event)).count()
    }

    /// Changes the split threshold. Existing leaves are not touched until
    /// the next insertion or [`Self::split_all_if_needed`].
    ///
    /// # Errors
    /// Returns a configuration error for a zero threshold.
    pub fn set_split_threshold(&mut self, threshold: usize) -> Result<()> {
        if threshold == 0 {
            return Err(Error::config("split_threshold must be at least 1"));
        }
        self.config.split_threshold = threshold;
        Ok(())
    }

    /// Splits every leaf that currently holds more than the threshold.
    /// Returns the number of leaves that split.
    pub fn split_all_if_needed(&mut self) -> usize {
        let split = self.root.split_all_if_needed(&self.config);
        if split > 0 {
            log::debug!("re-split pass converted {split} leaves into grids");
        }
        split
    }

    /// Depth-first, pre-order walk over every box.
    pub fn for_each_box<F: FnMut(&BoxNode)>(&self, mut visitor: F) {
        self.root.visit(&mut visitor);
    }

    /// Sums signal, squared error and events inside `region`.
    ///
    /// Boxes fully inside the region contribute their aggregate directly;
    /// partially covered leaves are scanned event by event.
    ///
    /// # Errors
    /// Returns a configuration error if `region` has the wrong number of
    /// dimensions.
    pub fn integrate(&self, region: &Extent) -> Result<Aggregate> {
        if region.n_dims() != self.n_dims() {
            return Err(Error::config(format!(
                "integration region has {} dimensions, tree has {}",
                region.n_dims(),
                self.n_dims()
            )));
        }
        Ok(self.root.integrate(region))
    }

    /// Counts boxes, leaves and grids.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats::default();
        self.for_each_box(|node| {
            stats.n_boxes += 1;
            if node.is_leaf() {
                stats.n_leaves += 1;
            } else {
                stats.n_grids += 1;
            }
            stats.deepest = stats.deepest.max(node.depth());
        });
        stats.n_events = self.n_events();
        stats
    }

    /// Checks that `dimensions` describe the same space as this tree, so
    /// new events can be appended to it.
    ///
    /// # Errors
    /// Returns a configuration error on a dimension count or bounds mismatch.
    pub fn check_compatible(&self, dimensions: &[Dimension]) -> Result<()> {
        if dimensions.len() != self.n_dims() {
            return Err(Error::config(format!(
                "existing tree has {} dimensions, conversion produces {}",
                self.n_dims(),
                dimensions.len()
            )));
        }
        for (ours, theirs) in self.dimensions.iter().zip(dimensions) {
            if !close(ours.min, theirs.min) || !close(ours.max, theirs.max) {
                return Err(Error::config(format!(
                    "dimension '{}' of existing tree spans [{}, {}), conversion expects [{}, {})",
                    ours.name, ours.min, ours.max, theirs.min, theirs.max
                )));
            }
        }
        Ok(())
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= BOUNDS_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}
