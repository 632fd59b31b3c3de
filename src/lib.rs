//! # readsim - a nanopore flow cell simulator for Read Until testing
//!
//! readsim replays reads from a FASTA source through a configurable number of
//! simulated pore channels in accelerated virtual time, so adaptive-sampling
//! ("Read Until") clients can be exercised without a sequencer.
//!
//! ## Core Concepts
//!
//! - **Channel**: a pore that alternates between idle gaps and sequencing a
//!   read, and can be unblocked (ejecting the read) or retired by a client
//! - **GapSampler**: the per-channel model of how long a channel waits before
//!   its next read, and when it blocks
//! - **ReadPool**: the shared source of reads
//! - **ReadsWriter**: the output pipeline completed reads are written to
//! - **FlowCell / Simulator**: the deterministic engine and the threaded handle
//!   that drives it in real time
//!
//! ## Usage
//!
//! ```rust,no_run
//! use readsim::config::SimulatorConfig;
//! use readsim::launch::{finish_run, prepare_run};
//!
//! # fn main() -> readsim::SimResult<()> {
//! let config = SimulatorConfig {
//!     n_channels: 64,
//!     acceleration_factor: 10.0,
//!     ..SimulatorConfig::new("reads.fasta", "example_run")
//! };
//! let run = prepare_run(&config)?;
//! run.start()?;
//! let chunks = run.simulator.get_read_chunks(None, 0)?;
//! for chunk in &chunks {
//!     if chunk.seq.starts_with("ACGT") {
//!         run.simulator.unblock_read(chunk.channel, &chunk.read_id, None)?;
//!     }
//! }
//! finish_run(&run)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core model
pub mod channel;
pub mod clock;
pub mod error;
pub mod gap_sampling;
pub mod record;
pub mod rng;

// Reads in, reads out
pub mod read_pool;
pub mod writer;

// Running a simulation
pub mod config;
pub mod launch;
pub mod run_dir;
pub mod simulator;
pub mod transport;

pub use channel::{ChannelState, ChannelStats, ReadChunk, Transition};
pub use clock::VirtualClock;
pub use config::SimulatorConfig;
pub use error::{ConfigError, OperationError, SimError, SimResult, TransportError, WriterError};
pub use gap_sampling::{ConstantGapsUntilBlocked, GapDecision, GapSampler, RollingWindowGapSampler, SeqSumTrace};
pub use read_pool::{FastaReadPool, InMemoryReadPool, ReadPool, ThreadedReadPool};
pub use record::{ReadEndReason, ReadMeta, SeqRecord, SourceRead};
pub use simulator::{FlowCell, FlowCellSnapshot, SimParams, Simulator};
pub use writer::{
    ArrayReadsWriter, CompoundReadsWriter, ReadsWriter, RotatingFileReadsWriter, SequencingSummaryWriter,
    SingleFileReadsWriter, ThreadedReadsWriter,
};
