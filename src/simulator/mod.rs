//! The simulator: a [`FlowCell`] driven in real time by a scheduling thread.
//!
//! [`Simulator`] is a cheap handle that can be shared between threads (the
//! server wraps it in an `Arc`). Once started, the flow cell moves onto a
//! dedicated scheduling thread and every command travels to it over a channel
//! with a reply channel, so channel state is only ever touched by that thread.
//!
//! The scheduling loop sleeps until the next channel event or the next
//! throughput log line, whichever comes first, and wakes early on a command.
//! Sleeping is the only place where the acceleration factor applies.

mod engine;
mod params;

pub use engine::{ChannelSnapshot, FlowCell, FlowCellSnapshot, RunTotals};
pub use params::SimParams;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{error, info};
use serde::Serialize;

use crate::channel::ReadChunk;
use crate::clock::VirtualClock;
use crate::error::{ConfigError, OperationError, SimError, SimResult};

enum Command {
    Unblock {
        channel: u32,
        read_id: Option<String>,
        duration: Option<f64>,
        reply: Sender<SimResult<bool>>,
    },
    StopReceiving {
        channel: u32,
        reply: Sender<SimResult<bool>>,
    },
    ReadChunks {
        channels: Option<Vec<u32>>,
        batch_size: usize,
        reply: Sender<SimResult<Vec<ReadChunk>>>,
    },
    Snapshot {
        reply: Sender<FlowCellSnapshot>,
    },
    Pause {
        reply: Sender<bool>,
    },
    Resume {
        reply: Sender<bool>,
    },
    Stop,
}

struct RunHandle {
    tx: Sender<Command>,
    join: JoinHandle<FlowCell>,
}

enum Lifecycle {
    Ready(FlowCell),
    Running(RunHandle),
    Stopped(FlowCell),
    Closed,
}

/// State owned by the scheduling loop for one run.
struct RunContext {
    clock: VirtualClock,
    log_interval: f64,
    next_log_at: f64,
}

impl RunContext {
    fn new(acceleration_factor: f64, log_interval: f64) -> Self {
        Self {
            clock: VirtualClock::start(acceleration_factor),
            log_interval,
            next_log_at: log_interval,
        }
    }

    fn log_if_due(&mut self, cell: &FlowCell) {
        if cell.now() >= self.next_log_at {
            cell.log_throughput();
            while self.next_log_at <= cell.now() {
                self.next_log_at += self.log_interval;
            }
        }
    }
}

/// Thread-safe handle on a simulation run.
///
/// A simulator supports a single run: `start` once, `stop` once. Commands are
/// only accepted while it is running; the channel states can be read at any
/// time before [`Simulator::close`].
pub struct Simulator {
    lifecycle: Mutex<Lifecycle>,
    n_channels: u32,
}

impl Simulator {
    /// Wraps a flow cell that has not started yet.
    #[must_use]
    pub fn new(cell: FlowCell) -> Self {
        let n_channels = cell.n_channels();
        Self {
            lifecycle: Mutex::new(Lifecycle::Ready(cell)),
            n_channels,
        }
    }

    #[must_use]
    pub const fn n_channels(&self) -> u32 {
        self.n_channels
    }

    fn lock(&self) -> SimResult<MutexGuard<'_, Lifecycle>> {
        self.lifecycle
            .lock()
            .map_err(|_| SimError::internal("simulator lifecycle lock poisoned"))
    }

    /// Starts the scheduling loop.
    ///
    /// `log_interval` is in virtual seconds.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if running, `RunFinished` after a stop, and a
    /// configuration error for a non-positive factor or interval.
    pub fn start(&self, acceleration_factor: f64, log_interval: f64) -> SimResult<()> {
        for (field, value) in [("acceleration_factor", acceleration_factor), ("log_interval", log_interval)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::NonPositive {
                    field,
                    value: value.to_string(),
                }
                .into());
            }
        }

        let mut guard = self.lock()?;
        let mut cell = match std::mem::replace(&mut *guard, Lifecycle::Closed) {
            Lifecycle::Ready(cell) => cell,
            other => {
                let err = match &other {
                    Lifecycle::Running(_) => OperationError::AlreadyRunning,
                    _ => OperationError::RunFinished,
                };
                *guard = other;
                return Err(err.into());
            }
        };

        cell.mark_started(Utc::now());
        info!(
            "Starting simulation of {} channels, acceleration factor {acceleration_factor}",
            cell.n_channels()
        );
        let (tx, rx) = unbounded::<Command>();
        let ctx = RunContext::new(acceleration_factor, log_interval);
        let join = thread::Builder::new()
            .name("readsim-scheduler".to_string())
            .spawn(move || run_loop(cell, &rx, ctx))
            .expect("failed to spawn readsim scheduler");
        *guard = Lifecycle::Running(RunHandle { tx, join });
        Ok(())
    }

    /// Stops the run, finalizing in-flight reads as truncated.
    ///
    /// Returns whether this call stopped a running simulation; stopping a
    /// simulator that is not running is a no-op returning `false`.
    pub fn stop(&self) -> bool {
        let Ok(mut guard) = self.lock() else {
            return false;
        };
        match std::mem::replace(&mut *guard, Lifecycle::Closed) {
            Lifecycle::Running(RunHandle { tx, join }) => {
                let _ = tx.send(Command::Stop);
                match join.join() {
                    Ok(cell) => *guard = Lifecycle::Stopped(cell),
                    Err(_) => error!("Scheduling loop panicked, simulation state is lost"),
                }
                true
            }
            other => {
                *guard = other;
                false
            }
        }
    }

    /// Whether the scheduling loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().is_ok_and(|guard| matches!(*guard, Lifecycle::Running(_)))
    }

    fn check_channel(&self, channel: u32) -> SimResult<()> {
        if channel == 0 || channel > self.n_channels {
            return Err(OperationError::UnknownChannel {
                channel,
                n_channels: self.n_channels,
            }
            .into());
        }
        Ok(())
    }

    fn command_sender(&self) -> SimResult<Sender<Command>> {
        match &*self.lock()? {
            Lifecycle::Running(run) => Ok(run.tx.clone()),
            _ => Err(OperationError::NotRunning.into()),
        }
    }

    /// Error for a command the scheduling loop did not take. A stop racing the
    /// command is `NotRunning`; a loop that died without a stop is `Disconnected`.
    fn loop_gone(&self) -> SimError {
        if self.is_running() {
            OperationError::Disconnected {
                worker: "readsim-scheduler",
            }
            .into()
        } else {
            OperationError::NotRunning.into()
        }
    }

    /// Sends a command built around a fresh reply channel and waits for the answer.
    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> SimResult<T> {
        let tx = self.command_sender()?;
        let (reply_tx, reply_rx) = bounded::<T>(1);
        tx.send(make(reply_tx)).map_err(|_| self.loop_gone())?;
        // The loop drops queued commands when it stops.
        reply_rx.recv().map_err(|_| OperationError::NotRunning.into())
    }

    /// Unblocks a channel, with the default duration if none is given.
    ///
    /// # Errors
    ///
    /// `UnknownChannel`, `InvalidOperation` on a stopped channel, `NotRunning`.
    pub fn unblock(&self, channel: u32, duration: Option<f64>) -> SimResult<bool> {
        self.check_channel(channel)?;
        self.request(|reply| Command::Unblock {
            channel,
            read_id: None,
            duration,
            reply,
        })?
    }

    /// Unblocks a channel only if `read_id` is still its in-flight read.
    ///
    /// # Errors
    ///
    /// See [`Simulator::unblock`].
    pub fn unblock_read(&self, channel: u32, read_id: &str, duration: Option<f64>) -> SimResult<bool> {
        self.check_channel(channel)?;
        self.request(|reply| Command::Unblock {
            channel,
            read_id: Some(read_id.to_string()),
            duration,
            reply,
        })?
    }

    /// Retires a channel for the rest of the run.
    ///
    /// # Errors
    ///
    /// `UnknownChannel`, `InvalidOperation` if already stopped, `NotRunning`.
    pub fn stop_receiving(&self, channel: u32) -> SimResult<bool> {
        self.check_channel(channel)?;
        self.request(|reply| Command::StopReceiving { channel, reply })?
    }

    /// New read chunks since the last poll, see [`FlowCell::read_chunks`].
    ///
    /// # Errors
    ///
    /// `UnknownChannel` for a bad requested id, `NotRunning`.
    pub fn get_read_chunks(&self, channels: Option<&[u32]>, batch_size: usize) -> SimResult<Vec<ReadChunk>> {
        if let Some(ids) = channels {
            ids.iter().try_for_each(|&id| self.check_channel(id))?;
        }
        let channels = channels.map(<[u32]>::to_vec);
        self.request(|reply| Command::ReadChunks {
            channels,
            batch_size,
            reply,
        })?
    }

    /// Point-in-time view of all channels.
    ///
    /// # Errors
    ///
    /// `NotRunning` once the simulator is closed.
    pub fn get_channel_states(&self) -> SimResult<FlowCellSnapshot> {
        let tx = {
            let guard = self.lock()?;
            match &*guard {
                Lifecycle::Ready(cell) | Lifecycle::Stopped(cell) => return Ok(cell.snapshot()),
                Lifecycle::Running(run) => run.tx.clone(),
                Lifecycle::Closed => return Err(OperationError::NotRunning.into()),
            }
        };
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(Command::Snapshot { reply: reply_tx })
            .map_err(|_| self.loop_gone())?;
        reply_rx.recv().map_err(|_| OperationError::NotRunning.into())
    }

    /// Freezes virtual time. Returns false if already paused.
    ///
    /// # Errors
    ///
    /// `NotRunning`.
    pub fn pause(&self) -> SimResult<bool> {
        self.request(|reply| Command::Pause { reply })
    }

    /// Resumes virtual time. Returns false if not paused.
    ///
    /// # Errors
    ///
    /// `NotRunning`.
    pub fn resume(&self) -> SimResult<bool> {
        self.request(|reply| Command::Resume { reply })
    }

    /// Stops the run if needed, then finishes the writer pipeline and closes
    /// the read pool. Idempotent.
    ///
    /// # Errors
    ///
    /// Surfaces the deferred writer failures of the run.
    pub fn close(&self) -> SimResult<()> {
        self.stop();
        let mut guard = self.lock()?;
        match std::mem::replace(&mut *guard, Lifecycle::Closed) {
            Lifecycle::Ready(mut cell) | Lifecycle::Stopped(mut cell) => cell.close(),
            Lifecycle::Running(_) | Lifecycle::Closed => Ok(()),
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Closing the simulator failed: {err}");
        }
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("n_channels", &self.n_channels)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run_loop(mut cell: FlowCell, rx: &Receiver<Command>, mut ctx: RunContext) -> FlowCell {
    'run: loop {
        cell.advance_to(ctx.clock.now());
        ctx.log_if_due(&cell);

        loop {
            match rx.try_recv() {
                Ok(command) => {
                    if !handle_command(&mut cell, &mut ctx, command) {
                        break 'run;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'run,
            }
        }

        let wake_at = cell.next_event_time().map_or(ctx.next_log_at, |t| t.min(ctx.next_log_at));
        let received = match ctx.clock.wall_until(wake_at) {
            Some(timeout) => rx.recv_timeout(timeout),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(command) => {
                cell.advance_to(ctx.clock.now());
                if !handle_command(&mut cell, &mut ctx, command) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    cell.advance_to(ctx.clock.now());
    let truncated = cell.finish_in_flight();
    info!(
        "Simulation stopped at t={:.3}s, {truncated} in-flight read(s) finalized",
        cell.now()
    );
    cell.log_throughput();
    cell
}

/// Applies one command. Returns false when the loop must stop.
fn handle_command(cell: &mut FlowCell, ctx: &mut RunContext, command: Command) -> bool {
    match command {
        Command::Unblock {
            channel,
            read_id,
            duration,
            reply,
        } => {
            let _ = reply.send(cell.unblock(channel, read_id.as_deref(), duration));
        }
        Command::StopReceiving { channel, reply } => {
            let _ = reply.send(cell.stop_receiving(channel));
        }
        Command::ReadChunks {
            channels,
            batch_size,
            reply,
        } => {
            let _ = reply.send(cell.read_chunks(channels.as_deref(), batch_size));
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(cell.snapshot());
        }
        Command::Pause { reply } => {
            let paused = ctx.clock.pause();
            if paused {
                info!("Simulation paused at t={:.3}s", cell.now());
            }
            let _ = reply.send(paused);
        }
        Command::Resume { reply } => {
            let resumed = ctx.clock.resume();
            if resumed {
                info!("Simulation resumed at t={:.3}s", cell.now());
            }
            let _ = reply.send(resumed);
        }
        Command::Stop => return false,
    }
    true
}

#[derive(Serialize)]
struct SimulatorStats<'a> {
    params: &'a SimParams,
    #[serde(flatten)]
    snapshot: &'a FlowCellSnapshot,
}

/// Writes the per-channel statistics and run totals as JSON.
///
/// # Errors
///
/// Returns an error if the simulator is closed or the file cannot be written.
pub fn write_simulator_stats(simulator: &Simulator, params: &SimParams, path: &Path) -> SimResult<()> {
    let snapshot = simulator.get_channel_states()?;
    let stats = SimulatorStats {
        params,
        snapshot: &snapshot,
    };
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, &stats)
        .map_err(|e| SimError::internal(format!("failed to encode simulator stats: {e}")))?;
    out.flush()?;
    info!("Wrote simulator stats to '{}'", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::gap_sampling::{ConstantGapsUntilBlocked, GapSampler};
    use crate::read_pool::InMemoryReadPool;
    use crate::record::SourceRead;
    use crate::writer::ArrayReadsWriter;

    fn simulator(n_channels: u32) -> (Simulator, ArrayReadsWriter) {
        let params = SimParams {
            n_channels,
            bp_per_second: 100.0,
            min_chunk_size: 10,
            seed: Some(1),
            ..SimParams::default()
        };
        let samplers = (0..n_channels)
            .map(|_| Box::new(ConstantGapsUntilBlocked::default()) as Box<dyn GapSampler>)
            .collect();
        let reads = (0..1000).map(|i| SourceRead::new(format!("read{i}"), "A".repeat(10_000)));
        let writer = ArrayReadsWriter::new();
        let cell = FlowCell::new(
            params,
            samplers,
            Arc::new(InMemoryReadPool::new(reads)),
            Box::new(writer.clone()),
        )
        .unwrap();
        (Simulator::new(cell), writer)
    }

    #[test]
    fn test_lifecycle() {
        let (sim, _) = simulator(2);
        assert!(!sim.stop());
        assert!(matches!(
            sim.unblock(1, None),
            Err(SimError::Operation(OperationError::NotRunning))
        ));

        sim.start(10.0, 100.0).unwrap();
        assert!(sim.is_running());
        assert!(matches!(
            sim.start(10.0, 100.0),
            Err(SimError::Operation(OperationError::AlreadyRunning))
        ));

        assert!(sim.stop());
        assert!(!sim.stop());
        assert!(!sim.is_running());
        assert!(matches!(
            sim.start(10.0, 100.0),
            Err(SimError::Operation(OperationError::RunFinished))
        ));
        sim.close().unwrap();
        sim.close().unwrap();
    }

    #[test]
    fn test_rejects_bad_start_parameters() {
        let (sim, _) = simulator(1);
        assert!(sim.start(0.0, 1.0).unwrap_err().is_config());
        assert!(sim.start(1.0, -1.0).unwrap_err().is_config());
        assert!(!sim.is_running());
    }

    #[test]
    fn test_commands_reach_running_loop() {
        let (sim, writer) = simulator(3);
        sim.start(100.0, 1000.0).unwrap();
        assert!(matches!(
            sim.stop_receiving(4),
            Err(SimError::Operation(OperationError::UnknownChannel { .. }))
        ));

        assert!(sim.stop_receiving(3).unwrap());
        assert!(sim.stop_receiving(3).is_err());

        let states = sim.get_channel_states().unwrap();
        assert_eq!(states.channels[2].state, crate::channel::ChannelState::Stopped);

        assert!(sim.pause().unwrap());
        assert!(!sim.pause().unwrap());
        assert!(sim.resume().unwrap());
        assert!(!sim.resume().unwrap());

        thread::sleep(Duration::from_millis(20));
        assert!(sim.stop());
        assert!(!writer.is_empty());
        assert!(sim.get_channel_states().unwrap().time > 0.0);
    }

    #[test]
    fn test_stop_wakes_a_sleeping_loop() {
        // One 100 s read at real-time speed: the loop sleeps until it ends.
        let (sim, writer) = simulator(1);
        sim.start(1.0, 1000.0).unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        assert!(sim.stop());
        assert!(started.elapsed() < Duration::from_secs(1));
        let reads = writer.reads();
        assert_eq!(reads.len(), 1);
        assert!(reads[0].2.contains("ended=sim_stopped"));
    }

    #[test]
    fn test_stop_wakes_a_paused_loop() {
        let (sim, _) = simulator(1);
        sim.start(1.0, 1000.0).unwrap();
        assert!(sim.pause().unwrap());
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        assert!(sim.stop());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!sim.is_running());
    }

    #[test]
    fn test_write_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, _) = simulator(2);
        let params = SimParams::default();
        sim.start(50.0, 1.0).unwrap();
        thread::sleep(Duration::from_millis(10));
        sim.stop();

        let path = dir.path().join("simulator_stats.json");
        write_simulator_stats(&sim, &params, &path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["channels"].as_array().unwrap().len(), 2);
        assert!(json["started_at"].is_string());
        assert!(json["totals"]["reads_written"].is_u64());
    }
}
