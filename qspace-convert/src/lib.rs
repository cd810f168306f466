//! qspace-convert: Conversion of binned neutron data into box trees.
//!
//! This crate provides the conversion pipeline:
//! - **Transforms** - pass-through, `|Q|` and `Q3D` coordinate strategies
//! - **Projection** - basis vectors, lattice and scaling into a 3×3 matrix
//! - **Range estimation** - parallel scan for the output bounding box
//! - **Engine** - chunked parallel ingestion into a [`BoxTree`]
//!

pub mod context;
pub mod engine;
pub mod projection;
pub mod range;
pub mod search;
pub mod settings;
pub mod transform;

pub use context::{ConversionContext, ConversionContextBuilder, LogDimension};
pub use engine::{convert, ChunkPlan, ConversionEngine, ConversionSummary, EngineConfig};
pub use projection::{Projection, ProjectionBuilder, ScalingMode, DEGENERACY_TOLERANCE};
pub use range::{estimate_range, RangeEstimator};
pub use search::ExtremumSearch;
pub use settings::{DetectorFilter, EnergyMode, TransformKind, TransformSettings};
pub use transform::{
    CoordinateTransform, CopyTransform, MagnitudeTransform, OutputFrame, SourceDescriptor,
    Transform, TransformSetup, VectorTransform,
};

// Re-export the shared error type and tree
pub use qspace_core::{Error, Result};
pub use qspace_index::BoxTree;
