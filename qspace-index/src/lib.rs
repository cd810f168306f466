//! qspace-index: Adaptive N-dimensional box tree.
//!
//! Stores converted events in a recursively splitting grid of boxes with
//! O(1) per-box aggregates, and exposes depth-first enumeration and region
//! integration for downstream persistence and analysis.
//!

pub mod config;
pub mod extent;
pub mod node;
pub mod tree;

pub use config::{TreeConfig, MAX_CHILDREN_PER_BOX};
pub use extent::Extent;
pub use node::{Aggregate, BoxContent, BoxNode};
pub use tree::{BoxTree, TreeStats};
