//! JSON job and data files read by the `qspace` binary.
//!
//! A job file says how to convert (transform, energy mode, bounds,
//! projection, tree and engine settings); a data file holds what to convert
//! (spectra, instrument geometry and run logs). Every job field is optional.

use crate::Result;
use qspace_convert::{
    ConversionContext, ConversionContextBuilder, DetectorFilter, EnergyMode, EngineConfig,
    ExtremumSearch, LogDimension, Projection, ProjectionBuilder, RangeEstimator, ScalingMode,
    TransformKind, TransformSettings,
};
use qspace_core::{
    Bounds, DetectorGeometryCache, Error, GeometryResolver, HistogramData, InstrumentTable,
    Lattice, LogBook, LogValue, SpectrumData, SyntheticInstrument, TableDetector, Unit,
};
use qspace_index::TreeConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// How to convert a data file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobFile {
    /// `CopyToMD`, `|Q|` or `Q3D`.
    pub transform: String,
    /// `Elastic`, `Direct` or `Indirect`.
    pub energy_mode: String,
    /// Ei for direct and Ef for indirect geometry (meV).
    pub fixed_energy: Option<f64>,
    pub gravity_correction: bool,
    pub reject_monitors: bool,
    pub reject_masked: bool,
    pub extremum_search: ExtremumSearch,
    /// `[min, max]` per output dimension, or per transform dimension only.
    /// Estimated from the data when absent.
    pub bounds: Option<Vec<[f64; 2]>>,
    /// Estimate even when bounds are given; they then act as a seed the
    /// estimate is widened to.
    pub estimate_range: bool,
    /// Fraction of each estimated width added on both sides.
    pub range_padding: f64,
    pub log_dimensions: Vec<LogDimensionSpec>,
    pub projection: ProjectionSpec,
    pub tree: TreeConfig,
    pub engine: EngineSpec,
}

impl Default for JobFile {
    fn default() -> Self {
        Self {
            transform: TransformKind::Magnitude.id().to_string(),
            energy_mode: EnergyMode::Elastic.id().to_string(),
            fixed_energy: None,
            gravity_correction: false,
            reject_monitors: true,
            reject_masked: true,
            extremum_search: ExtremumSearch::default(),
            bounds: None,
            estimate_range: false,
            range_padding: 0.01,
            log_dimensions: Vec::new(),
            projection: ProjectionSpec::default(),
            tree: TreeConfig::default(),
            engine: EngineSpec::default(),
        }
    }
}

/// A run log appended as an output dimension.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogDimensionSpec {
    pub name: String,
    pub units: Option<String>,
    pub bounds: Option<[f64; 2]>,
}

/// Basis vectors and scaling of the `Q3D` output axes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectionSpec {
    pub u: [f64; 3],
    pub v: [f64; 3],
    pub w: Option<[f64; 3]>,
    pub scaling: String,
}

impl Default for ProjectionSpec {
    fn default() -> Self {
        Self {
            u: [1.0, 0.0, 0.0],
            v: [0.0, 1.0, 0.0],
            w: None,
            scaling: ScalingMode::NoScaling.id().to_string(),
        }
    }
}

/// Engine overrides; unset fields keep the engine defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSpec {
    pub parallelism: Option<usize>,
    pub memory_fraction: Option<f64>,
    pub memory_budget_bytes: Option<usize>,
    pub flush_events: Option<usize>,
    pub ignore_zeros: bool,
}

impl JobFile {
    /// Reads a job file, or returns the default job if `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let reader = BufReader::new(File::open(path)?);
                Ok(serde_json::from_reader(reader)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn transform_kind(&self) -> Result<TransformKind> {
        Ok(self.transform.parse()?)
    }

    pub fn settings(&self) -> Result<TransformSettings> {
        let mode = EnergyMode::from_name(&self.energy_mode, self.fixed_energy)?;
        let filter = DetectorFilter::accept_all()
            .with_reject_monitors(self.reject_monitors)
            .with_reject_masked(self.reject_masked);
        Ok(TransformSettings::new()
            .with_energy_mode(mode)
            .with_detector_filter(filter)
            .with_gravity_correction(self.gravity_correction)
            .with_extremum_search(self.extremum_search))
    }

    pub fn bounds(&self) -> Option<Vec<Bounds>> {
        self.bounds
            .as_ref()
            .map(|pairs| pairs.iter().map(|&[min, max]| Bounds::new(min, max)).collect())
    }

    pub fn log_dimensions(&self) -> Vec<LogDimension> {
        self.log_dimensions
            .iter()
            .map(|spec| {
                let mut dim = LogDimension::new(&spec.name);
                if let Some(units) = &spec.units {
                    dim = dim.with_units(units);
                }
                if let Some([min, max]) = spec.bounds {
                    dim = dim.with_bounds(Bounds::new(min, max));
                }
                dim
            })
            .collect()
    }

    /// Engine configuration; `threads` overrides the job's parallelism.
    pub fn engine_config(&self, threads: Option<usize>) -> Result<EngineConfig> {
        let engine = &self.engine;
        let mut config = EngineConfig::new()
            .with_tree(self.tree.clone())
            .with_ignore_zeros(engine.ignore_zeros);
        if let Some(threads) = threads.or(engine.parallelism) {
            config = config.try_with_parallelism(threads)?;
        }
        if let Some(fraction) = engine.memory_fraction {
            config = config.with_memory_fraction(fraction);
        }
        if let Some(bytes) = engine.memory_budget_bytes {
            config = config.with_memory_budget_bytes(bytes);
        }
        if let Some(events) = engine.flush_events {
            config = config.with_flush_events(events);
        }
        Ok(config)
    }

    /// Builds the projection from the job's basis and the run's lattice and
    /// orientation. A coplanar basis falls back to the default one.
    pub fn projection(&self, logs: &LogBook) -> Result<Projection> {
        use qspace_core::RunLogs;

        let spec = &self.projection;
        let mut builder = ProjectionBuilder::new()
            .with_basis(spec.u, spec.v, spec.w)
            .with_scaling(spec.scaling.parse()?);
        if let Some(lattice) = logs.lattice() {
            builder = builder.with_lattice(lattice);
        }
        if let Some(orientation) = logs.orientation() {
            builder = builder.with_orientation(orientation);
        }
        match builder.build() {
            Err(Error::DegenerateBasis { determinant }) => {
                log::warn!(
                    "projection basis u={:?} v={:?} w={:?} is degenerate (|det| = {determinant:e}); using the default basis",
                    spec.u,
                    spec.v,
                    spec.w
                );
                let defaults = ProjectionSpec::default();
                Ok(builder.with_basis(defaults.u, defaults.v, None).build()?)
            }
            other => Ok(other?),
        }
    }

    /// Builds the conversion context for `data`, without estimating bounds.
    pub fn context<'c>(
        &self,
        data: &HistogramData,
        logs: &LogBook,
        cache: &'c DetectorGeometryCache,
    ) -> Result<ConversionContext<'c>> {
        let kind = self.transform_kind()?;
        let mut builder = ConversionContextBuilder::new(kind).with_settings(self.settings()?);
        if kind == TransformKind::Vector {
            builder = builder.with_projection(self.projection(logs)?);
        }
        if let Some(bounds) = self.bounds() {
            builder = builder.with_bounds(bounds);
        }
        for dim in self.log_dimensions() {
            builder = builder.with_log_dimension(dim);
        }
        Ok(builder.build(data, cache)?)
    }

    /// Replaces the context's bounds with estimated ones when the job gives
    /// none or asks for an estimate.
    pub fn resolve_bounds<'c>(
        &self,
        data: &HistogramData,
        geometry: &dyn GeometryResolver,
        context: ConversionContext<'c>,
    ) -> Result<ConversionContext<'c>> {
        if self.bounds.is_some() && !self.estimate_range {
            return Ok(context);
        }
        let mut estimator = RangeEstimator::new().with_padding(self.range_padding);
        if self.bounds.is_some() {
            estimator = estimator.with_seed(context.bounds());
        }
        let bounds = estimator.estimate(data, geometry, &context)?;
        Ok(context.with_bounds(&bounds)?)
    }
}

/// Spectra, geometry and logs of one run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataFile {
    /// Unit of every spectrum's x axis, e.g. `TOF`, `Wavelength`, `DeltaE`.
    pub x_unit: String,
    #[serde(default)]
    pub run_index: u16,
    /// Detector table; a synthetic instrument is used when absent.
    #[serde(default)]
    pub instrument: Option<InstrumentSpec>,
    pub spectra: Vec<SpectrumSpec>,
    #[serde(default)]
    pub spectrum_axis: Option<AxisSpec>,
    #[serde(default)]
    pub logs: BTreeMap<String, LogEntry>,
    #[serde(default)]
    pub lattice: Option<Lattice>,
    /// Rows of the orientation matrix U.
    #[serde(default)]
    pub orientation: Option<[[f64; 3]; 3]>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentSpec {
    pub name: String,
    /// Source-to-sample distance (m).
    pub l1: f64,
    /// One entry per spectrum; `null` for a spectrum without a detector.
    pub detectors: Vec<Option<DetectorSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorSpec {
    pub id: u32,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default)]
    pub monitor: bool,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub efixed: Option<f64>,
}

/// Detector position relative to the sample.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum Placement {
    /// Cartesian position (m), z along the beam.
    Cartesian { position: [f64; 3] },
    /// Distance (m) and angles in degrees.
    Spherical {
        l2: f64,
        two_theta_deg: f64,
        #[serde(default)]
        phi_deg: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpectrumSpec {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Errors; `sqrt(|y|)` when absent.
    #[serde(default)]
    pub e: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisSpec {
    pub name: String,
    pub unit: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LogEntry {
    Single(f64),
    Series(Vec<f64>),
}

fn parse_unit(text: &str) -> Unit {
    text.parse().unwrap_or_else(|never| match never {})
}

impl DataFile {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn histogram(&self) -> HistogramData {
        let mut data = HistogramData::new(parse_unit(&self.x_unit)).with_run_index(self.run_index);
        for spectrum in &self.spectra {
            data.push(match &spectrum.e {
                Some(e) => SpectrumData::new(spectrum.x.clone(), spectrum.y.clone(), e.clone()),
                None => SpectrumData::counts(spectrum.x.clone(), spectrum.y.clone()),
            });
        }
        if let Some(axis) = &self.spectrum_axis {
            data = data.with_spectrum_axis(&axis.name, parse_unit(&axis.unit), axis.values.clone());
        }
        data
    }

    /// Geometry of the run: the detector table, or one synthetic detector
    /// per spectrum.
    pub fn geometry(&self) -> Box<dyn GeometryResolver> {
        let Some(instrument) = &self.instrument else {
            return Box::new(SyntheticInstrument::new(self.spectra.len()));
        };
        let mut table = InstrumentTable::new(&instrument.name, instrument.l1);
        for row in &instrument.detectors {
            table.push(row.as_ref().map(|spec| spec.to_detector().0));
        }
        Box::new(table)
    }

    /// Run logs, lattice and orientation.
    pub fn run_logs(&self) -> Result<LogBook> {
        let mut logs = LogBook::new();
        for (name, entry) in &self.logs {
            let value = match entry {
                LogEntry::Single(value) => LogValue::Single(*value),
                LogEntry::Series(values) => LogValue::Series(values.clone()),
            };
            logs.insert(name, value);
        }
        if let Some(l) = self.lattice {
            logs = logs.with_lattice(Lattice::new(l.a, l.b, l.c, l.alpha, l.beta, l.gamma)?);
        }
        if let Some(rows) = self.orientation {
            logs = logs.with_orientation(rows);
        }
        Ok(logs)
    }
}

impl DetectorSpec {
    fn to_detector(&self) -> TableDetector {
        let mut detector = match self.placement {
            Placement::Cartesian { position } => TableDetector::new(self.id, position),
            Placement::Spherical {
                l2,
                two_theta_deg,
                phi_deg,
            } => TableDetector::spherical(self.id, l2, two_theta_deg.to_radians(), phi_deg.to_radians()),
        };
        if self.monitor {
            detector = detector.monitor();
        }
        if self.masked {
            detector = detector.masked();
        }
        if let Some(efixed) = self.efixed {
            detector = detector.with_efixed(efixed);
        }
        detector
    }
}
