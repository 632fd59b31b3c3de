//! Wiring a complete run from a [`SimulatorConfig`].
//!
//! The output pipeline of a run is
//!
//! ```text
//! FlowCell -> ThreadedReadsWriter -> CompoundReadsWriter -+-> RotatingFileReadsWriter (reads/)
//!                                                         +-> SequencingSummaryWriter (live summary)
//! ```
//!
//! and reads come from a `FastaReadPool` behind a `ThreadedReadPool` that
//! prefetches two reads per channel.

use std::sync::Arc;

use log::info;

use crate::config::SimulatorConfig;
use crate::error::SimResult;
use crate::read_pool::{FastaReadPool, ReadPool, ThreadedReadPool};
use crate::run_dir::{RunDir, READS_FILE_PREFIX};
use crate::simulator::{write_simulator_stats, FlowCell, SimParams, Simulator};
use crate::writer::{
    convert_reads_dir_to_seqsum, CompoundReadsWriter, ReadsWriter, RotatingFileReadsWriter, SequencingSummaryWriter,
    ThreadedReadsWriter,
};

/// A run whose directory, pool and writers exist but that may not have
/// started yet.
#[allow(missing_docs)]
#[derive(Debug)]
pub struct PreparedRun {
    pub config: SimulatorConfig,
    pub params: SimParams,
    pub run_dir: RunDir,
    pub simulator: Arc<Simulator>,
}

/// Outcome of [`finish_run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Records written by the engine.
    pub reads_written: u64,
    /// Rows of the post-hoc sequencing summary.
    pub summary_rows: usize,
}

/// Validates the config, then creates the run directory and everything the
/// simulator needs.
///
/// # Errors
///
/// Configuration errors come first and leave the filesystem untouched.
/// Afterwards, I/O errors from the run directory, the reads file or the
/// output files.
pub fn prepare_run(config: &SimulatorConfig) -> SimResult<PreparedRun> {
    config.validate()?;
    let params = config.to_sim_params();
    let samplers = config.gap_samplers()?;
    let source = FastaReadPool::open(&config.reads_file)?;

    let run_dir = RunDir::create(&config.run_dir, config.overwrite)?;
    let prefetch = 2 * params.n_channels as usize;
    let pool: Arc<dyn ReadPool> = Arc::new(ThreadedReadPool::new(Arc::new(source), prefetch));

    let reads = RotatingFileReadsWriter::new(run_dir.reads_dir(), READS_FILE_PREFIX, config.max_reads_per_file)?;
    let live_summary = SequencingSummaryWriter::create(run_dir.live_summary_path())?;
    let sinks: Vec<Box<dyn ReadsWriter>> = vec![Box::new(reads), Box::new(live_summary)];
    let writer = ThreadedReadsWriter::new(CompoundReadsWriter::new(sinks), config.writer_queue_capacity);

    let cell = FlowCell::new(params.clone(), samplers, pool, Box::new(writer))?;
    info!(
        "Prepared run in '{}' with {} channels",
        run_dir.root().display(),
        params.n_channels
    );
    Ok(PreparedRun {
        config: config.clone(),
        params,
        run_dir,
        simulator: Arc::new(Simulator::new(cell)),
    })
}

impl PreparedRun {
    /// Starts the simulator with the configured acceleration and log interval.
    ///
    /// # Errors
    ///
    /// See [`Simulator::start`].
    pub fn start(&self) -> SimResult<()> {
        self.simulator
            .start(self.config.acceleration_factor, self.config.log_interval)
    }
}

/// Stops the run if still running, writes the statistics, flushes all output
/// and rebuilds the sequencing summary from the reads directory.
///
/// # Errors
///
/// Returns the deferred writer failure of the run; the summary is not rebuilt
/// in that case.
pub fn finish_run(run: &PreparedRun) -> SimResult<RunReport> {
    if run.simulator.stop() {
        info!("Stopped simulation");
    }
    let snapshot = run.simulator.get_channel_states()?;
    write_simulator_stats(&run.simulator, &run.params, &run.run_dir.stats_path())?;
    run.simulator.close()?;

    let summary_rows = convert_reads_dir_to_seqsum(&run.run_dir.reads_dir(), &run.run_dir.summary_path())?;
    info!(
        "Wrote {summary_rows} rows to '{}'",
        run.run_dir.summary_path().display()
    );
    Ok(RunReport {
        reads_written: snapshot.totals.reads_written,
        summary_rows,
    })
}
