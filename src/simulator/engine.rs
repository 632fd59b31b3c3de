//! Deterministic flow-cell engine.
//!
//! [`FlowCell`] owns every channel and advances them through virtual time.
//! It never reads a clock: the caller says how far to advance, and every
//! channel event fires at exactly its scheduled time. Events are processed in
//! `(time, channel id)` order, so a run is a pure function of the seed, the
//! samplers, the reads and the commands with their times.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::params::SimParams;
use crate::channel::{Channel, ChannelState, ChannelStats, ReadChunk, Step, Transition};
use crate::error::{ConfigError, OperationError, SimResult, WriterError};
use crate::gap_sampling::GapSampler;
use crate::read_pool::ReadPool;
use crate::record::SeqRecord;
use crate::rng::channel_rng;
use crate::writer::ReadsWriter;

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    time: f64,
    channel: u32,
    generation: u64,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.channel.cmp(&other.channel))
            .then(self.generation.cmp(&other.generation))
    }
}

/// Output counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    /// Records handed to the writer pipeline.
    pub reads_written: u64,
    /// Bases of those records.
    pub bases_written: u64,
    /// Records the writer pipeline rejected.
    pub write_failures: u64,
}

/// One channel in a [`FlowCellSnapshot`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: u32,
    pub state: ChannelState,
    /// Virtual time the channel entered `state`.
    pub since: f64,
    pub read_id: Option<String>,
    pub stats: ChannelStats,
}

/// Consistent view of all channels at one virtual time.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCellSnapshot {
    pub time: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub totals: RunTotals,
    pub channels: Vec<ChannelSnapshot>,
}

impl FlowCellSnapshot {
    /// Number of channels in `state`.
    #[must_use]
    pub fn count(&self, state: ChannelState) -> usize {
        self.channels.iter().filter(|c| c.state == state).count()
    }
}

/// All channels of a run plus their event queue, read pool and writer.
pub struct FlowCell {
    params: SimParams,
    /// Channel `id` lives at index `id - 1`.
    channels: Vec<Channel>,
    queue: BinaryHeap<Reverse<Scheduled>>,
    pool: Arc<dyn ReadPool>,
    writer: Box<dyn ReadsWriter>,
    now: f64,
    started_at: Option<DateTime<Utc>>,
    transitions: Vec<Transition>,
    totals: RunTotals,
    first_write_error: Option<WriterError>,
    closed: bool,
}

impl FlowCell {
    /// Creates a flow cell with one sampler per channel, all channels idle at
    /// time 0.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid parameters or a sampler count
    /// different from `params.n_channels`.
    pub fn new(
        params: SimParams,
        samplers: Vec<Box<dyn GapSampler>>,
        pool: Arc<dyn ReadPool>,
        writer: Box<dyn ReadsWriter>,
    ) -> SimResult<Self> {
        params.validate()?;
        if samplers.len() != params.n_channels as usize {
            return Err(ConfigError::SamplerCountMismatch {
                expected: params.n_channels as usize,
                actual: samplers.len(),
            }
            .into());
        }

        let channels: Vec<Channel> = samplers
            .into_iter()
            .zip(1..=params.n_channels)
            .map(|(sampler, id)| Channel::new(id, sampler, channel_rng(params.seed, id)))
            .collect();

        let mut cell = Self {
            params,
            channels,
            queue: BinaryHeap::new(),
            pool,
            writer,
            now: 0.0,
            started_at: None,
            transitions: Vec::new(),
            totals: RunTotals::default(),
            first_write_error: None,
            closed: false,
        };
        for idx in 0..cell.channels.len() {
            cell.reschedule(idx);
        }
        Ok(cell)
    }

    /// Parameters the flow cell was built with.
    #[must_use]
    pub const fn params(&self) -> &SimParams {
        &self.params
    }

    /// Current virtual time in seconds.
    #[must_use]
    pub const fn now(&self) -> f64 {
        self.now
    }

    /// Number of channels.
    #[must_use]
    pub fn n_channels(&self) -> u32 {
        self.params.n_channels
    }

    /// Records the wall-clock start of the run.
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.started_at.get_or_insert(at);
    }

    /// Counters accumulated since the run started.
    #[must_use]
    pub const fn totals(&self) -> RunTotals {
        self.totals
    }

    /// Transitions so far, if `record_transitions` is set.
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// # Errors
    ///
    /// Returns `OperationError::UnknownChannel` for ids outside `1..=n_channels`.
    pub fn channel(&self, id: u32) -> SimResult<&Channel> {
        let idx = self.index(id)?;
        Ok(&self.channels[idx])
    }

    fn index(&self, id: u32) -> SimResult<usize> {
        if id == 0 || id > self.params.n_channels {
            return Err(OperationError::UnknownChannel {
                channel: id,
                n_channels: self.params.n_channels,
            }
            .into());
        }
        Ok(id as usize - 1)
    }

    /// Time of the earliest pending channel event.
    pub fn next_event_time(&mut self) -> Option<f64> {
        while let Some(Reverse(top)) = self.queue.peek() {
            if self.is_current(top) {
                return Some(top.time);
            }
            self.queue.pop();
        }
        None
    }

    fn is_current(&self, event: &Scheduled) -> bool {
        self.channels[event.channel as usize - 1].generation() == event.generation
    }

    /// Fires every event scheduled at or before `time` and moves `now` there.
    ///
    /// Time never goes backwards; an earlier `time` is a no-op. Returns the
    /// number of events fired.
    pub fn advance_to(&mut self, time: f64) -> usize {
        let target = time.max(self.now);
        let bp_per_second = self.params.bp_per_second;
        let mut fired = 0;
        while let Some(Reverse(top)) = self.queue.peek().copied() {
            if top.time > target {
                break;
            }
            self.queue.pop();
            if !self.is_current(&top) {
                continue;
            }
            let idx = top.channel as usize - 1;
            self.now = top.time.max(self.now);
            let step = self.channels[idx].on_due(top.time, self.pool.as_ref(), bp_per_second);
            self.apply(idx, step);
            fired += 1;
        }
        self.now = target;
        fired
    }

    /// Unblocks a channel at the current time.
    ///
    /// With `read_id`, the command only applies if that read is still in the
    /// pore. Returns whether the channel was unblocked; a permanently blocked
    /// channel cannot be.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` for a bad id, `InvalidOperation` for a stopped channel
    /// or a negative duration.
    pub fn unblock(&mut self, channel: u32, read_id: Option<&str>, duration: Option<f64>) -> SimResult<bool> {
        let idx = self.index(channel)?;
        let ch = &self.channels[idx];
        if ch.state() == ChannelState::Stopped {
            return Err(invalid(channel, "channel is stopped"));
        }
        let duration = duration.unwrap_or(self.params.default_unblock_duration);
        if !(duration >= 0.0 && duration.is_finite()) {
            return Err(invalid(channel, &format!("unblock duration must be >= 0, got {duration}")));
        }
        if let Some(read_id) = read_id {
            if ch.current_read_id() != Some(read_id) {
                return Ok(false);
            }
        }
        let now = self.now;
        let bp_per_second = self.params.bp_per_second;
        match self.channels[idx].unblock(now, duration, bp_per_second) {
            Some(step) => {
                self.apply(idx, step);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Retires a channel at the current time.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` for a bad id, `InvalidOperation` if already stopped.
    pub fn stop_receiving(&mut self, channel: u32) -> SimResult<bool> {
        let idx = self.index(channel)?;
        let now = self.now;
        let bp_per_second = self.params.bp_per_second;
        match self.channels[idx].stop_receiving(now, bp_per_second) {
            Some(step) => {
                self.apply(idx, step);
                Ok(true)
            }
            None => Err(invalid(channel, "channel is already stopped")),
        }
    }

    /// New chunks of the reads in the pores, by ascending channel id.
    ///
    /// `channels` restricts the poll to those ids; `batch_size` caps the
    /// number of chunks returned, 0 meaning no cap. Channels left out by the
    /// cap keep their chunks for the next poll.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` if a requested id is out of range.
    pub fn read_chunks(&mut self, channels: Option<&[u32]>, batch_size: usize) -> SimResult<Vec<ReadChunk>> {
        let indices: Vec<usize> = match channels {
            Some(ids) => {
                let mut indices = ids.iter().map(|&id| self.index(id)).collect::<SimResult<Vec<_>>>()?;
                indices.sort_unstable();
                indices.dedup();
                indices
            }
            None => (0..self.channels.len()).collect(),
        };
        let cap = if batch_size == 0 { usize::MAX } else { batch_size };
        let (now, bp_per_second, min_chunk_size) = (self.now, self.params.bp_per_second, self.params.min_chunk_size);

        let mut chunks = Vec::new();
        for idx in indices {
            if chunks.len() >= cap {
                break;
            }
            if let Some(chunk) = self.channels[idx].poll_chunk(now, bp_per_second, min_chunk_size) {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Serializable view of the run state.
    #[must_use]
    pub fn snapshot(&self) -> FlowCellSnapshot {
        FlowCellSnapshot {
            time: self.now,
            started_at: self.started_at,
            totals: self.totals,
            channels: self
                .channels
                .iter()
                .map(|ch| ChannelSnapshot {
                    channel: ch.id(),
                    state: ch.state(),
                    since: ch.state_since(),
                    read_id: ch.current_read_id().map(str::to_string),
                    stats: ch.stats().clone(),
                })
                .collect(),
        }
    }

    /// Number of channels per state, in [`ChannelState::ALL`] order.
    #[must_use]
    pub fn state_counts(&self) -> [(ChannelState, usize); 5] {
        ChannelState::ALL.map(|state| (state, self.channels.iter().filter(|c| c.state() == state).count()))
    }

    /// Logs aggregate throughput.
    pub fn log_throughput(&self) {
        let counts = self
            .state_counts()
            .iter()
            .map(|(state, n)| format!("{state}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            "t={:.1}s: {} reads ({} bases) written; {counts}",
            self.now, self.totals.reads_written, self.totals.bases_written
        );
    }

    /// Finalizes every in-flight read as truncated at the current time and
    /// cancels all pending events. Returns the number of reads finalized.
    pub fn finish_in_flight(&mut self) -> usize {
        let now = self.now;
        let bp_per_second = self.params.bp_per_second;
        let mut finalized = 0;
        for idx in 0..self.channels.len() {
            let step = self.channels[idx].finish_in_flight(now, bp_per_second);
            finalized += usize::from(step.record.is_some());
            self.apply(idx, step);
        }
        self.queue.clear();
        finalized
    }

    /// Finishes the writer and closes the read pool. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first write failure of the run, or the failure of the
    /// writer's teardown.
    pub fn close(&mut self) -> SimResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pool.close();
        let finished = self.writer.finish();
        if let Some(err) = self.first_write_error.take() {
            return Err(err.into());
        }
        finished.map_err(Into::into)
    }

    fn apply(&mut self, idx: usize, step: Step) {
        if let Some(record) = step.record {
            self.write(&record);
        }
        if let Some(transition) = step.transition {
            if self.params.record_transitions {
                self.transitions.push(transition);
            }
        }
        self.reschedule(idx);
    }

    /// Queues the channel's next event. Every channel mutation bumps its
    /// generation, so the entry it replaces goes stale.
    fn reschedule(&mut self, idx: usize) {
        let ch = &self.channels[idx];
        if let Some(time) = ch.next_event() {
            self.queue.push(Reverse(Scheduled {
                time,
                channel: ch.id(),
                generation: ch.generation(),
            }));
        }
    }

    fn write(&mut self, record: &SeqRecord) {
        if self.closed {
            warn!("Dropping read '{}' finalized after the writer was closed", record.id);
            return;
        }
        match self.writer.write_read(record) {
            Ok(()) => {
                self.totals.reads_written += 1;
                self.totals.bases_written += record.seq.len() as u64;
            }
            Err(err) => {
                self.totals.write_failures += 1;
                error!("Failed to write read '{}': {err}", record.id);
                self.first_write_error.get_or_insert(err);
            }
        }
    }
}

fn invalid(channel: u32, reason: &str) -> crate::error::SimError {
    OperationError::InvalidOperation {
        channel,
        reason: reason.to_string(),
    }
    .into()
}

impl Drop for FlowCell {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Closing the flow cell failed: {err}");
        }
    }
}

impl std::fmt::Debug for FlowCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowCell")
            .field("params", &self.params)
            .field("now", &self.now)
            .field("queued_events", &self.queue.len())
            .field("totals", &self.totals)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap_sampling::ConstantGapsUntilBlocked;
    use crate::read_pool::InMemoryReadPool;
    use crate::record::{ReadEndReason, SourceRead};
    use crate::writer::ArrayReadsWriter;

    fn flow_cell(n_channels: u32, n_reads: usize, sampler: &ConstantGapsUntilBlocked) -> (FlowCell, ArrayReadsWriter) {
        let params = SimParams {
            n_channels,
            bp_per_second: 100.0,
            min_chunk_size: 50,
            default_unblock_duration: 0.5,
            seed: Some(7),
            record_transitions: true,
        };
        let reads = (0..n_reads).map(|i| SourceRead::new(format!("read{i}"), "ACGT".repeat(100)));
        let samplers = (0..n_channels)
            .map(|_| Box::new(sampler.clone()) as Box<dyn GapSampler>)
            .collect();
        let writer = ArrayReadsWriter::new();
        let cell = FlowCell::new(
            params,
            samplers,
            Arc::new(InMemoryReadPool::new(reads)),
            Box::new(writer.clone()),
        )
        .unwrap();
        (cell, writer)
    }

    fn short_gaps() -> ConstantGapsUntilBlocked {
        ConstantGapsUntilBlocked::new(1.0, 10.0, 0.0, f64::INFINITY, 0.0).unwrap()
    }

    #[test]
    fn test_channels_start_by_ascending_id() {
        let (mut cell, _) = flow_cell(3, 10, &short_gaps());
        assert_eq!(cell.advance_to(0.0), 3);
        let order: Vec<u32> = cell.transitions().iter().map(|t| t.channel).collect();
        assert_eq!(order, vec![1, 2, 3]);
        let snapshot = cell.snapshot();
        assert_eq!(snapshot.count(ChannelState::Sequencing), 3);
        assert_eq!(snapshot.channels[0].read_id.as_deref(), Some("read0"));
    }

    #[test]
    fn test_reads_complete_at_scheduled_time() {
        let (mut cell, writer) = flow_cell(1, 10, &short_gaps());
        // 400 bases at 100 bp/s -> 4 s, then a 1 s gap.
        cell.advance_to(3.999);
        assert!(writer.is_empty());
        cell.advance_to(4.0);
        assert_eq!(writer.len(), 1);
        assert_eq!(cell.channel(1).unwrap().state(), ChannelState::Idle);
        cell.advance_to(5.0);
        assert_eq!(cell.channel(1).unwrap().state(), ChannelState::Sequencing);
        assert_eq!(cell.next_event_time(), Some(9.0));
    }

    #[test]
    fn test_time_never_goes_backwards() {
        let (mut cell, _) = flow_cell(1, 1, &short_gaps());
        cell.advance_to(2.0);
        assert_eq!(cell.advance_to(1.0), 0);
        assert_eq!(cell.now(), 2.0);
    }

    #[test]
    fn test_unblock_with_stale_read_id_is_ignored() {
        let (mut cell, writer) = flow_cell(1, 10, &short_gaps());
        cell.advance_to(1.0);
        assert!(!cell.unblock(1, Some("read9"), None).unwrap());
        assert_eq!(cell.channel(1).unwrap().state(), ChannelState::Sequencing);

        assert!(cell.unblock(1, Some("read0"), None).unwrap());
        assert_eq!(cell.channel(1).unwrap().state(), ChannelState::Unblocking);
        let (_, seq, description) = writer.reads().remove(0);
        assert_eq!(seq.len(), 100);
        assert!(description.contains("ended=unblocked"));

        cell.advance_to(1.5);
        assert_eq!(cell.channel(1).unwrap().current_read_id(), Some("read1"));
    }

    #[test]
    fn test_commands_validate_channel() {
        let (mut cell, _) = flow_cell(2, 10, &short_gaps());
        assert!(cell.unblock(0, None, None).unwrap_err().is_operation());
        assert!(cell.stop_receiving(3).unwrap_err().is_operation());
        assert!(cell.read_chunks(Some(&[5][..]), 0).is_err());

        assert!(cell.stop_receiving(2).unwrap());
        assert!(cell.stop_receiving(2).is_err());
        assert!(cell.unblock(2, None, None).is_err());
        assert!(cell.unblock(1, None, Some(-1.0)).is_err());
    }

    #[test]
    fn test_read_chunks_respect_batch_size() {
        let (mut cell, _) = flow_cell(3, 10, &short_gaps());
        cell.advance_to(1.2);
        let chunks = cell.read_chunks(None, 2).unwrap();
        assert_eq!(chunks.iter().map(|c| c.channel).collect::<Vec<_>>(), vec![1, 2]);
        assert!(chunks.iter().all(|c| c.seq.len() == 100));

        let rest = cell.read_chunks(None, 0).unwrap();
        assert_eq!(rest.iter().map(|c| c.channel).collect::<Vec<_>>(), vec![3]);
        assert!(cell.read_chunks(Some(&[1, 1, 2][..]), 0).unwrap().is_empty());
    }

    #[test]
    fn test_finish_in_flight_truncates_running_reads() {
        let (mut cell, writer) = flow_cell(2, 10, &short_gaps());
        cell.advance_to(2.0);
        cell.stop_receiving(2).unwrap();
        assert_eq!(cell.finish_in_flight(), 1);
        assert_eq!(cell.next_event_time(), None);

        let reasons: Vec<ReadEndReason> = writer
            .reads()
            .iter()
            .map(|(_, seq, desc)| {
                let meta = crate::record::ReadMeta::parse(desc).unwrap();
                assert_eq!(seq.len(), 200);
                meta.end_reason
            })
            .collect();
        assert_eq!(reasons, vec![ReadEndReason::StoppedReceiving, ReadEndReason::SimStopped]);
        assert_eq!(cell.totals().reads_written, 2);
        cell.close().unwrap();
        cell.close().unwrap();
    }

    #[test]
    fn test_pool_exhaustion_leaves_channels_idle() {
        let (mut cell, writer) = flow_cell(2, 1, &short_gaps());
        cell.advance_to(100.0);
        assert_eq!(writer.len(), 1);
        assert_eq!(cell.next_event_time(), None);
        assert_eq!(cell.snapshot().count(ChannelState::Idle), 2);
    }

    #[test]
    fn test_sampler_count_must_match() {
        let params = SimParams {
            n_channels: 2,
            ..SimParams::default()
        };
        let err = FlowCell::new(
            params,
            vec![Box::new(short_gaps())],
            Arc::new(InMemoryReadPool::default()),
            Box::new(ArrayReadsWriter::new()),
        )
        .unwrap_err();
        assert!(err.is_config());
    }
}
