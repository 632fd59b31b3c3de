//! readsim gRPC server
//!
//! Runs one simulation and exposes it over gRPC until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use readsim::config::{parse_log_level, GapModel, SimulatorConfig};
use readsim::launch::{finish_run, prepare_run};
use readsim::transport::{bind_listener, ReadSimServiceImpl};

/// Simulates a nanopore flow cell for testing Read Until clients.
#[derive(Debug, Parser)]
#[command(name = "readsim-server", version)]
struct Args {
    /// FASTA file, or directory of FASTA files, to draw reads from
    reads_file: PathBuf,

    /// Run directory to create
    run_dir: PathBuf,

    #[arg(long, default_value_t = 512)]
    n_channels: u32,

    /// Virtual seconds per wall second
    #[arg(long, default_value_t = 1.0)]
    acceleration_factor: f64,

    /// Bases per chunk returned to clients
    #[arg(long, default_value_t = 200)]
    min_chunk_size: usize,

    #[arg(long, default_value_t = 450.0)]
    bp_per_second: f64,

    #[arg(long)]
    seed: Option<u64>,

    /// Default unblock duration in seconds
    #[arg(long, default_value_t = 0.1)]
    unblock_duration: f64,

    /// Replace an existing run directory
    #[arg(long)]
    overwrite: bool,

    /// Port to listen on, 0 picks a free one
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Wait for a start request instead of starting immediately
    #[arg(long)]
    dont_start: bool,

    /// debug, info, warning, error or critical
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[arg(long, default_value_t = 4000)]
    max_reads_per_file: usize,

    /// Virtual seconds between throughput log lines
    #[arg(long, default_value_t = 100.0)]
    log_interval: f64,

    /// Sequencing summary of a real run to take gaps from
    #[arg(long)]
    gap_trace: Option<PathBuf>,

    /// constant or rolling_window
    #[arg(long, default_value_t = GapModel::Constant)]
    gap_model: GapModel,
}

impl Args {
    fn into_config(self) -> SimulatorConfig {
        SimulatorConfig {
            n_channels: self.n_channels,
            acceleration_factor: self.acceleration_factor,
            min_chunk_size: self.min_chunk_size,
            bp_per_second: self.bp_per_second,
            seed: self.seed,
            unblock_duration: self.unblock_duration,
            overwrite: self.overwrite,
            port: self.port,
            dont_start: self.dont_start,
            verbosity: self.verbosity,
            max_reads_per_file: self.max_reads_per_file,
            log_interval: self.log_interval,
            gap_trace: self.gap_trace,
            gap_model: self.gap_model,
            ..SimulatorConfig::new(self.reads_file, self.run_dir)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config();
    let level = parse_log_level(&config.verbosity)?;
    env_logger::Builder::from_env(Env::default().default_filter_or(level.as_str())).init();

    config.validate()?;
    let (listener, port) = bind_listener(config.port)?;
    let run = prepare_run(&config)?;
    if !config.dont_start {
        run.start()?;
    }

    let svc = ReadSimServiceImpl::new(Arc::clone(&run.simulator), config.acceleration_factor, config.log_interval);
    listener.set_nonblocking(true)?;
    let incoming = TcpListenerStream::new(tokio::net::TcpListener::from_std(listener)?);
    info!("Serving on port {port}, press Ctrl+C to stop");

    let simulator = Arc::clone(&run.simulator);
    let served = Server::builder()
        .add_service(svc.into_server())
        .serve_with_incoming_shutdown(incoming, async move {
            let _ = signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
            let stopped = tokio::task::spawn_blocking(move || simulator.stop()).await;
            if matches!(stopped, Ok(true)) {
                info!("Stopped simulation");
            }
        })
        .await;
    if let Err(err) = &served {
        error!("Server failed: {err}");
    }

    let report = tokio::task::spawn_blocking(move || finish_run(&run)).await??;
    info!(
        "Run finished: {} reads written, {} summary rows",
        report.reads_written, report.summary_rows
    );
    served?;
    Ok(())
}
