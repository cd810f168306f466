//! qspace-core: Core types for converting binned neutron data into events.
//!
//! This crate provides the shared data model (events, dimensions, units,
//! detector geometry) and the interfaces to the source dataset, instrument
//! geometry and run logs that a conversion reads from.
//!

pub mod detector;
pub mod dimension;
pub mod error;
pub mod event;
pub mod lattice;
pub mod memory;
pub mod source;
pub mod units;

pub use detector::{DetectorGeometryCache, DetectorRecord};
pub use dimension::{validate_dimensions, Bounds, Dimension, UNBOUNDED_LIMIT};
pub use error::{Error, Result, SpectrumError};
pub use event::{Event, EventBuffer, EventRef};
pub use lattice::Lattice;
pub use memory::{
    HistogramData, InstrumentTable, LogBook, SpectrumData, SyntheticInstrument, TableDetector,
};
pub use source::{
    DetectorInfo, GeometryResolver, LogValue, RunLogs, SourceDataset, Spectrum, SpectrumAxis,
};
pub use units::{Unit, UnitConversion, ENERGY_PER_K_SQUARED, SPEED_TIMES_WAVELENGTH};
