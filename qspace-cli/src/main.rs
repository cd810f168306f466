//! qspace CLI
//!
//! Converts histogram data files into box trees of events in momentum or
//! energy space.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

mod job;
mod writer;

use clap::{Parser, Subcommand};
use job::{DataFile, JobFile};
use qspace_convert::ConversionEngine;
use qspace_core::{DetectorGeometryCache, SourceDataset};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use writer::BoxDumpWriter;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Core(#[from] qspace_core::Error),
}

/// Converts binned neutron data into adaptive multidimensional event trees.
#[derive(Parser)]
#[command(name = "qspace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a data file into a box tree
    Convert {
        /// Input data file (JSON)
        input: PathBuf,

        /// Job file (JSON); defaults to an elastic |Q| conversion
        #[arg(short, long)]
        job: Option<PathBuf>,

        /// Write every box of the resulting tree as CSV
        #[arg(long)]
        dump: Option<PathBuf>,

        /// Worker threads (overrides the job file)
        #[arg(short = 't', long)]
        threads: Option<usize>,
    },

    /// Estimate the output bounds of a conversion without running it
    EstimateRange {
        /// Input data file (JSON)
        input: PathBuf,

        /// Job file (JSON); defaults to an elastic |Q| conversion
        #[arg(short, long)]
        job: Option<PathBuf>,
    },

    /// Show information about a data file
    Info {
        /// Input data file (JSON)
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Convert {
            input,
            job,
            dump,
            threads,
        } => run_convert(&input, job.as_deref(), dump.as_deref(), threads),
        Commands::EstimateRange { input, job } => run_estimate(&input, job.as_deref()),
        Commands::Info { input } => run_info(&input),
    }
}

fn run_convert(
    input: &Path,
    job_path: Option<&Path>,
    dump: Option<&Path>,
    threads: Option<usize>,
) -> Result<()> {
    let job = JobFile::load(job_path)?;
    let file = DataFile::load(input)?;
    let data = file.histogram();
    let geometry = file.geometry();
    let logs = file.run_logs()?;
    let cache = DetectorGeometryCache::build(&*geometry);

    let context = job.context(&data, &logs, &cache)?;
    let context = job.resolve_bounds(&data, &*geometry, context)?;
    let engine = ConversionEngine::new(job.engine_config(threads)?);

    let start = Instant::now();
    let (tree, summary) = engine.convert(&data, &*geometry, &logs, &context)?;
    let elapsed = start.elapsed();
    let stats = tree.stats();

    println!(
        "Converted {} spectra in {:.2}s ({} chunks)",
        summary.spectra,
        elapsed.as_secs_f64(),
        summary.chunks
    );
    println!("Events added: {}", summary.events_added);
    println!("Discarded spectra: {}", summary.discarded_spectra);
    for dim in tree.dimensions() {
        println!("  {:<16} [{:.6}, {:.6}) {}", dim.name, dim.min, dim.max, dim.units);
    }
    println!(
        "Tree: {} boxes ({} leaves), depth {}, signal {:.6e}, error² {:.6e}",
        stats.n_boxes,
        stats.n_leaves,
        stats.deepest,
        tree.signal(),
        tree.error_squared()
    );

    if let Some(path) = dump {
        let rows = BoxDumpWriter::create(path)?.write_tree(&tree)?;
        println!("Wrote {} boxes to {}", rows, path.display());
    }
    Ok(())
}

fn run_estimate(input: &Path, job_path: Option<&Path>) -> Result<()> {
    let job = JobFile::load(job_path)?;
    let file = DataFile::load(input)?;
    let data = file.histogram();
    let geometry = file.geometry();
    let logs = file.run_logs()?;
    let cache = DetectorGeometryCache::build(&*geometry);

    let context = job.context(&data, &logs, &cache)?;
    let job = JobFile {
        estimate_range: true,
        ..job
    };
    let context = job.resolve_bounds(&data, &*geometry, context)?;

    println!("Transform: {} ({})", context.kind(), context.settings().energy_mode);
    for dim in context.dimensions() {
        println!("  {:<16} [{:.6}, {:.6}) {}", dim.name, dim.min, dim.max, dim.units);
    }
    Ok(())
}

fn run_info(input: &Path) -> Result<()> {
    let file = DataFile::load(input)?;
    let data = file.histogram();
    let geometry = file.geometry();
    let cache = DetectorGeometryCache::build(&*geometry);

    println!("File: {}", input.display());
    println!("Instrument: {} (L1 = {} m)", geometry.instrument_id(), geometry.l1());
    println!(
        "Spectra: {} ({} with a detector)",
        data.spectrum_count(),
        cache.valid_count()
    );
    println!("Bins: {}", data.total_bins());
    println!("X unit: {} ({})", data.x_unit().id(), data.x_unit().label());

    let x_range = (0..data.spectrum_count())
        .filter_map(|i| data.spectrum(i))
        .filter_map(|s| s.x_range())
        .reduce(|(lo, hi), (a, b)| (lo.min(a), hi.max(b)));
    if let Some((lo, hi)) = x_range {
        println!("X range: {} - {}", lo, hi);
    }
    if let Some(axis) = data.spectrum_axis() {
        println!("Spectrum axis: {} ({})", axis.name, axis.unit.label());
    }
    if !file.logs.is_empty() {
        let names: Vec<&str> = file.logs.keys().map(String::as_str).collect();
        println!("Logs: {}", names.join(", "));
    }
    if let Some(l) = file.lattice {
        println!(
            "Lattice: a={} b={} c={} alpha={} beta={} gamma={}",
            l.a, l.b, l.c, l.alpha, l.beta, l.gamma
        );
    }
    Ok(())
}
