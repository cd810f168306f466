//! Parallel ingestion of a dataset into a box tree.
//!
//! Spectra are split into contiguous chunks, one rayon task per chunk, on a
//! dedicated thread pool. Each task converts its spectra into a
//! thread-local [`EventBuffer`] and merges it into the shared tree whenever
//! the buffer reaches the flush threshold. The tree lock is held only for
//! the merge.

use crate::context::ConversionContext;
use crate::transform::CoordinateTransform;
use qspace_core::{
    DetectorGeometryCache, Error, EventBuffer, GeometryResolver, Result, RunLogs, SourceDataset,
    SpectrumError, UnitConversion,
};
use qspace_index::{BoxTree, TreeConfig};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::System;

const MEMORY_OVERHEAD_FACTOR: f64 = 1.2;

/// Configuration for a conversion run.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Fraction of available system memory to target (0.0 < fraction <= 1.0).
    pub memory_fraction: f64,
    /// Explicit memory budget override (bytes). If set, `memory_fraction` is ignored.
    pub memory_budget_bytes: Option<usize>,
    /// Number of worker threads; all cores if unset.
    pub parallelism: Option<usize>,
    /// Events buffered per worker before a merge; derived from the memory
    /// budget if unset.
    pub flush_events: Option<usize>,
    /// Skip bins with zero signal.
    pub ignore_zeros: bool,
    /// Box tree settings used by [`ConversionEngine::convert`] for new trees.
    pub tree: TreeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_fraction: 0.5,
            memory_budget_bytes: None,
            parallelism: None,
            flush_events: None,
            ignore_zeros: false,
            tree: TreeConfig::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fraction of available system memory to target.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Set an explicit memory budget in bytes.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Set the number of worker threads.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_parallelism`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads.max(1));
        self
    }

    /// Fallible variant of [`Self::with_parallelism`].
    ///
    /// # Errors
    /// Returns an error if `threads` is 0.
    pub fn try_with_parallelism(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::config("parallelism must be at least 1"));
        }
        self.parallelism = Some(threads);
        Ok(self)
    }

    /// Set the per-worker flush threshold in events (clamped to at least 1).
    #[must_use]
    pub fn with_flush_events(mut self, events: usize) -> Self {
        self.flush_events = Some(events.max(1));
        self
    }

    #[must_use]
    pub fn with_ignore_zeros(mut self, ignore: bool) -> Self {
        self.ignore_zeros = ignore;
        self
    }

    #[must_use]
    pub fn with_tree(mut self, tree: TreeConfig) -> Self {
        self.tree = tree;
        self
    }

    /// Return the configured worker thread count, clamped to at least 1.
    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    /// Resolve the target memory budget in bytes.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_budget_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.memory_budget_bytes {
            return Ok(bytes);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::config("memory_fraction must be in (0.0, 1.0]"));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::config("available system memory reported as 0"));
        }
        let budget = (available as f64 * self.memory_fraction).floor() as u64;
        Ok(usize::try_from(budget).unwrap_or(usize::MAX))
    }
}

/// How the spectra of one conversion are split across workers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Range<usize>>,
    pub flush_events: usize,
}

impl ChunkPlan {
    /// Plans chunks so that `spectra per chunk × average bins` fits the
    /// per-worker event budget, with at most `workers` chunks. The last
    /// chunk absorbs the remainder.
    #[must_use]
    pub fn new(n_spectra: usize, total_bins: usize, workers: usize, events_per_worker: usize) -> Self {
        let events_per_worker = events_per_worker.max(1);
        if n_spectra == 0 {
            return Self {
                chunks: Vec::new(),
                flush_events: events_per_worker,
            };
        }
        let average_bins = total_bins.div_ceil(n_spectra).max(1);
        let spectra_per_chunk = (events_per_worker / average_bins).max(1);
        let n_chunks = n_spectra.div_ceil(spectra_per_chunk).min(workers.max(1));
        let base = n_spectra / n_chunks;
        let chunks = (0..n_chunks)
            .map(|i| {
                let start = i * base;
                let end = if i + 1 == n_chunks { n_spectra } else { start + base };
                start..end
            })
            .collect();
        Self {
            chunks,
            flush_events: events_per_worker,
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn max_events_for_budget(budget_bytes: usize, bytes_per_event: usize) -> usize {
    let per_event = (bytes_per_event as f64 * MEMORY_OVERHEAD_FACTOR).ceil() as usize;
    (budget_bytes / per_event.max(1)).max(1)
}

/// Outcome of a successful conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Spectra visited.
    pub spectra: usize,
    /// Spectra skipped because of a missing or rejected detector or a
    /// malformed axis.
    pub discarded_spectra: usize,
    /// Events merged into the tree.
    pub events_added: usize,
    /// Chunks the spectra were split into.
    pub chunks: usize,
}

/// Validated inputs of one ingestion pass.
struct Preflight {
    base: Vec<f64>,
    in_bounds: bool,
    plan: ChunkPlan,
    total_bins: usize,
    pool: rayon::ThreadPool,
}

#[derive(Clone, Copy, Debug, Default)]
struct ChunkOutcome {
    discarded: usize,
    added: usize,
}

/// Per-worker copy of everything a chunk mutates.
struct Worker<'a, T> {
    transform: T,
    conversion: UnitConversion,
    base: &'a [f64],
    coords: Vec<f64>,
    buffer: EventBuffer,
    cache: &'a DetectorGeometryCache,
    run_index: u16,
    ignore_zeros: bool,
}

impl<T: CoordinateTransform> Worker<'_, T> {
    fn convert_spectrum<S: SourceDataset + ?Sized>(
        &mut self,
        source: &S,
        index: usize,
    ) -> std::result::Result<(), SpectrumError> {
        let cache = self.cache;
        let detector = cache
            .get(index)
            .ok_or(SpectrumError::MissingDetector { spectrum: index })?;
        if !self.transform.accepts_detector(detector) {
            return Err(SpectrumError::RejectedDetector {
                spectrum: index,
                detector_id: detector.detector_id,
            });
        }
        let Some(spectrum) = source.spectrum(index) else {
            return Ok(());
        };
        spectrum.validate(index)?;
        if self.conversion.needs_flight_path() {
            self.conversion.set_flight_path(detector.flight_path());
        }

        self.coords.copy_from_slice(self.base);
        if !self
            .transform
            .per_detector_coordinates(&mut self.coords, detector)
        {
            return Ok(());
        }
        for bin in 0..spectrum.n_bins() {
            let signal = spectrum.y[bin];
            if signal.is_nan() || (self.ignore_zeros && signal == 0.0) {
                continue;
            }
            let Some(x) = self.conversion.convert(spectrum.bin_center(bin)) else {
                continue;
            };
            if !self.transform.per_bin_coordinate(x, &mut self.coords) {
                continue;
            }
            let error = spectrum.e[bin];
            self.buffer.push(
                &self.coords,
                signal,
                error * error,
                detector.detector_id,
                self.run_index,
            );
        }
        Ok(())
    }
}

fn flush(tree: &Mutex<&mut BoxTree>, buffer: &mut EventBuffer) -> Result<usize> {
    if buffer.is_empty() {
        return Ok(0);
    }
    let added = {
        let mut guard = tree
            .lock()
            .map_err(|_| Error::config("box tree lock poisoned"))?;
        guard.insert_buffer(buffer)
    };
    buffer.clear();
    Ok(added)
}

/// Drives conversions with a fixed configuration and a cancellation flag
/// shared with the caller.
#[derive(Clone, Debug, Default)]
pub struct ConversionEngine {
    config: EngineConfig,
    cancel_flag: Arc<AtomicBool>,
}

impl ConversionEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `flag` for cancellation; setting it stops the conversion at the
    /// next chunk boundary.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = flag;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle to the cancellation flag.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Converts every spectrum of `source` into events in a new tree
    /// spanning the context's dimensions.
    ///
    /// # Errors
    /// - a configuration error if the detector cache was not built for
    ///   `resolver`, a log dimension has no single value, the memory budget
    ///   is invalid or the thread pool cannot start;
    /// - [`Error::NoValidDetectors`] if no spectrum has a detector;
    /// - [`Error::Cancelled`] if the cancel flag was set.
    ///
    /// Every check runs before the tree is allocated; no tree is returned
    /// on error.
    pub fn convert<S, R, L>(
        &self,
        source: &S,
        resolver: &R,
        logs: &L,
        context: &ConversionContext<'_>,
    ) -> Result<(BoxTree, ConversionSummary)>
    where
        S: SourceDataset + ?Sized,
        R: GeometryResolver + ?Sized,
        L: RunLogs + ?Sized,
    {
        let run = self.preflight(source, resolver, logs, context)?;
        let mut tree = BoxTree::new(context.dimensions().to_vec(), self.config.tree.clone())?;
        let summary = self.ingest(run, source, context, &mut tree)?;
        Ok((tree, summary))
    }

    /// Converts every spectrum of `source` and merges the events into
    /// `tree`, which must span exactly the context's dimensions.
    ///
    /// # Errors
    /// As [`ConversionEngine::convert`], plus a configuration error if
    /// `tree` does not match the context's dimensions. All of these are
    /// reported before the first merge and leave `tree` untouched.
    ///
    /// Cancellation is checked as each chunk starts. Chunks already running
    /// when the flag is set finish and keep their events in `tree`, and the
    /// call still returns [`Error::Cancelled`]. Setting the flag before the
    /// call leaves `tree` untouched.
    pub fn append<S, R, L>(
        &self,
        source: &S,
        resolver: &R,
        logs: &L,
        context: &ConversionContext<'_>,
        tree: &mut BoxTree,
    ) -> Result<ConversionSummary>
    where
        S: SourceDataset + ?Sized,
        R: GeometryResolver + ?Sized,
        L: RunLogs + ?Sized,
    {
        let run = self.preflight(source, resolver, logs, context)?;
        tree.check_compatible(context.dimensions())?;
        self.ingest(run, source, context, tree)
    }

    /// Validates the request and prepares everything ingestion needs,
    /// without touching any tree.
    fn preflight<S, R, L>(
        &self,
        source: &S,
        resolver: &R,
        logs: &L,
        context: &ConversionContext<'_>,
    ) -> Result<Preflight>
    where
        S: SourceDataset + ?Sized,
        R: GeometryResolver + ?Sized,
        L: RunLogs + ?Sized,
    {
        let cache = context.cache();
        if !cache.is_valid_for(resolver) {
            return Err(Error::config(format!(
                "detector cache does not match instrument '{}'",
                resolver.instrument_id()
            )));
        }
        if cache.valid_count() == 0 {
            return Err(Error::NoValidDetectors);
        }
        let log_values = context
            .log_dimensions()
            .iter()
            .map(|log| logs.single_value(&log.name))
            .collect::<Result<Vec<f64>>>()?;

        let n_spectra = source.spectrum_count();
        let mut base = vec![0.0; context.n_dims()];
        let mut sample_transform = context.transform().clone();
        let in_bounds = sample_transform.per_sample_coordinates(&mut base, &log_values);
        if !in_bounds {
            log::info!("run log values {log_values:?} fall outside the output bounds; nothing to add");
        }

        let workers = self.config.effective_parallelism();
        let per_worker_budget = self.config.resolve_budget_bytes()? / workers;
        let events_per_worker =
            max_events_for_budget(per_worker_budget, EventBuffer::bytes_per_event(context.n_dims()));
        let total_bins = (0..n_spectra)
            .filter_map(|i| source.spectrum(i))
            .map(|s| s.n_bins())
            .sum();
        let mut plan = ChunkPlan::new(n_spectra, total_bins, workers, events_per_worker);
        if let Some(flush_events) = self.config.flush_events {
            plan.flush_events = flush_events;
        }
        log::debug!(
            "chunk plan: {} spectra, {} bins, {} chunks on {workers} workers, flush every {} events",
            n_spectra,
            total_bins,
            plan.chunks.len(),
            plan.flush_events
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::config(format!("failed to start worker pool: {e}")))?;

        Ok(Preflight {
            base,
            in_bounds,
            plan,
            total_bins,
            pool,
        })
    }

    fn ingest<S>(
        &self,
        run: Preflight,
        source: &S,
        context: &ConversionContext<'_>,
        tree: &mut BoxTree,
    ) -> Result<ConversionSummary>
    where
        S: SourceDataset + ?Sized,
    {
        let mut summary = ConversionSummary {
            spectra: source.spectrum_count(),
            ..ConversionSummary::default()
        };
        if !run.in_bounds {
            return Ok(summary);
        }
        summary.chunks = run.plan.chunks.len();
        let Preflight {
            base,
            plan,
            total_bins,
            pool,
            ..
        } = run;

        let shared = Mutex::new(&mut *tree);
        let outcomes = pool.install(|| {
            plan.chunks
                .par_iter()
                .map(|range| {
                    let worker = Worker {
                        transform: context.transform().clone(),
                        conversion: context.unit_conversion().clone(),
                        base: &base,
                        coords: base.clone(),
                        buffer: EventBuffer::with_capacity(
                            context.n_dims(),
                            plan.flush_events.min(total_bins),
                        ),
                        cache: context.cache(),
                        run_index: source.run_index(),
                        ignore_zeros: self.config.ignore_zeros,
                    };
                    self.convert_chunk(worker, source, range.clone(), &shared, plan.flush_events)
                })
                .collect::<Vec<Result<ChunkOutcome>>>()
        });
        drop(shared);

        let mut failure = None;
        for outcome in outcomes {
            match outcome {
                Ok(outcome) => {
                    summary.discarded_spectra += outcome.discarded;
                    summary.events_added += outcome.added;
                }
                Err(err) => failure = failure.or(Some(err)),
            }
        }
        if let Some(err) = failure {
            log::warn!(
                "conversion stopped ({err}); {} events were merged before it did",
                summary.events_added
            );
            return Err(err);
        }
        log::info!(
            "converted {} spectra into {} events ({} discarded), tree holds {} events",
            summary.spectra,
            summary.events_added,
            summary.discarded_spectra,
            tree.n_events()
        );
        Ok(summary)
    }

    fn convert_chunk<T, S>(
        &self,
        mut worker: Worker<'_, T>,
        source: &S,
        range: Range<usize>,
        tree: &Mutex<&mut BoxTree>,
        flush_events: usize,
    ) -> Result<ChunkOutcome>
    where
        T: CoordinateTransform,
        S: SourceDataset + ?Sized,
    {
        if self.cancel_flag.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let mut outcome = ChunkOutcome::default();
        for index in range {
            if let Err(err) = worker.convert_spectrum(source, index) {
                log::warn!("skipping {err}");
                outcome.discarded += 1;
            }
            if worker.buffer.len() >= flush_events {
                outcome.added += flush(tree, &mut worker.buffer)?;
            }
        }
        outcome.added += flush(tree, &mut worker.buffer)?;
        Ok(outcome)
    }
}

/// Converts into a new tree with the default engine configuration.
///
/// # Errors
/// See [`ConversionEngine::convert`].
pub fn convert<S, R, L>(
    source: &S,
    resolver: &R,
    logs: &L,
    context: &ConversionContext<'_>,
) -> Result<(BoxTree, ConversionSummary)>
where
    S: SourceDataset + ?Sized,
    R: GeometryResolver + ?Sized,
    L: RunLogs + ?Sized,
{
    ConversionEngine::new(EngineConfig::default()).convert(source, resolver, logs, context)
}
