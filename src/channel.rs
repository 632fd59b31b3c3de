//! One simulated pore.
//!
//! A [`Channel`] is a small state machine advanced by the engine. It never
//! reads the clock: every method takes the virtual time `now` at which the
//! transition happens, which keeps a run reproducible for a given seed.
//!
//! ```text
//! Idle ──pull──> Sequencing ──done──> Idle (after gap)
//!                    │        └─────> Blocked ──> Idle
//!                    └──unblock────> Unblocking ──> Idle
//! any ──stop_receiving──> Stopped
//! ```

use std::fmt;

use log::{debug, warn};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::gap_sampling::GapSampler;
use crate::read_pool::ReadPool;
use crate::record::{ReadEndReason, ReadMeta, SeqRecord, SourceRead};

/// State of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Waiting for the next molecule.
    Idle,
    /// A read is going through the pore.
    Sequencing,
    /// The pore is blocked.
    Blocked,
    /// Voltage reversal after an unblock command.
    Unblocking,
    /// Retired for the rest of the run.
    Stopped,
}

impl ChannelState {
    /// All states, in display order.
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::Sequencing,
        Self::Blocked,
        Self::Unblocking,
        Self::Stopped,
    ];

    /// Lowercase name, as used in logs and summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sequencing => "sequencing",
            Self::Blocked => "blocked",
            Self::Unblocking => "unblocking",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters accumulated by a channel over the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Reads pulled from the pool.
    pub reads_pulled: u64,
    /// Reads sequenced to the end.
    pub reads_finished: u64,
    /// Reads rejected by an unblock command.
    pub reads_unblocked: u64,
    /// Reads cut short by stop-receiving or by the end of the run.
    pub reads_stopped: u64,
    /// Bases of all finalized reads.
    pub bases_sequenced: u64,
    /// Completed blocking periods, in virtual seconds.
    pub time_blocked: f64,
    /// Unblock commands applied.
    pub unblock_count: u64,
}

impl ChannelStats {
    /// Time the channel was not blocked, as of `now`.
    #[must_use]
    pub fn active_time(&self, now: f64) -> f64 {
        (now - self.time_blocked).max(0.0)
    }

    /// Reads finalized for any reason.
    #[must_use]
    pub fn reads_written(&self) -> u64 {
        self.reads_finished + self.reads_unblocked + self.reads_stopped
    }
}

/// The read currently in the pore.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightRead {
    /// The full source read.
    pub read: SourceRead,
    /// Virtual time the read entered the pore.
    pub start_time: f64,
    /// Bases already handed out to pollers.
    pub bases_returned: usize,
}

/// A state change, stamped with the virtual time it happened at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Virtual time of the change.
    pub time: f64,
    /// Channel id, 1-based.
    pub channel: u32,
    /// State left.
    pub from: ChannelState,
    /// State entered.
    pub to: ChannelState,
}

/// Result of advancing a channel by one step.
#[derive(Debug, Default)]
pub struct Step {
    /// Read finalized by this step, if any.
    pub record: Option<SeqRecord>,
    /// State change made by this step, if any.
    pub transition: Option<Transition>,
}

/// A newly available prefix of an in-flight read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadChunk {
    /// Channel the read is in.
    pub channel: u32,
    /// Id of the in-flight read, for guarded unblocks.
    pub read_id: String,
    /// Bases that became available since the previous poll of this read.
    pub seq: String,
    /// Offset of `seq` in the read.
    pub offset: usize,
}

/// One simulated pore.
#[derive(Debug)]
pub struct Channel {
    id: u32,
    state: ChannelState,
    state_since: f64,
    next_event: Option<f64>,
    /// Bumped whenever `next_event` changes so the engine can skip stale events.
    generation: u64,
    in_flight: Option<InFlightRead>,
    stats: ChannelStats,
    sampler: Box<dyn GapSampler>,
    rng: StdRng,
    pool_exhausted: bool,
}

impl Channel {
    /// Creates an idle channel that looks for its first read at time 0.
    #[must_use]
    pub fn new(id: u32, sampler: Box<dyn GapSampler>, rng: StdRng) -> Self {
        Self {
            id,
            state: ChannelState::Idle,
            state_since: 0.0,
            next_event: Some(0.0),
            generation: 0,
            in_flight: None,
            stats: ChannelStats::default(),
            sampler,
            rng,
            pool_exhausted: false,
        }
    }

    /// Channel id, 1-based.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Virtual time of the last transition.
    #[must_use]
    pub const fn state_since(&self) -> f64 {
        self.state_since
    }

    /// Time of the next scheduled transition, `None` if nothing is scheduled.
    #[must_use]
    pub const fn next_event(&self) -> Option<f64> {
        self.next_event
    }

    /// Counter bumped on every reschedule; queued events with an older
    /// generation are stale.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Counters accumulated so far.
    #[must_use]
    pub const fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// The read in the pore, while sequencing.
    #[must_use]
    pub fn in_flight(&self) -> Option<&InFlightRead> {
        self.in_flight.as_ref()
    }

    /// Id of the read in the pore.
    #[must_use]
    pub fn current_read_id(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|r| r.read.id.as_str())
    }

    /// Whether the channel stopped pulling because the pool ran dry.
    #[must_use]
    pub const fn pool_exhausted(&self) -> bool {
        self.pool_exhausted
    }

    /// Name of the gap model driving this channel.
    #[must_use]
    pub fn sampler_name(&self) -> &'static str {
        self.sampler.name()
    }

    /// Performs the transition scheduled at `now`.
    ///
    /// The engine only calls this when `next_event() <= now`.
    pub fn on_due(&mut self, now: f64, pool: &dyn ReadPool, bp_per_second: f64) -> Step {
        match self.state {
            ChannelState::Idle => self.start_read(now, pool, bp_per_second),
            ChannelState::Sequencing => self.complete_read(now),
            ChannelState::Blocked => {
                self.stats.time_blocked += now - self.state_since;
                let transition = self.set_state(now, ChannelState::Idle, Some(now));
                Step {
                    record: None,
                    transition: Some(transition),
                }
            }
            ChannelState::Unblocking => {
                let transition = self.set_state(now, ChannelState::Idle, Some(now));
                Step {
                    record: None,
                    transition: Some(transition),
                }
            }
            ChannelState::Stopped => {
                self.schedule(None);
                Step::default()
            }
        }
    }

    fn start_read(&mut self, now: f64, pool: &dyn ReadPool, bp_per_second: f64) -> Step {
        if self.pool_exhausted {
            self.schedule(None);
            return Step::default();
        }
        loop {
            match pool.next_record() {
                Ok(Some(read)) if !read.seq.is_ascii() => {
                    warn!("Channel {}: skipping read '{}' with non-ASCII bases", self.id, read.id);
                }
                Ok(Some(read)) => {
                    let end = now + read.len() as f64 / bp_per_second;
                    self.stats.reads_pulled += 1;
                    self.in_flight = Some(InFlightRead {
                        read,
                        start_time: now,
                        bases_returned: 0,
                    });
                    let transition = self.set_state(now, ChannelState::Sequencing, Some(end));
                    return Step {
                        record: None,
                        transition: Some(transition),
                    };
                }
                Ok(None) => {
                    debug!("Channel {}: read pool exhausted at t={now:.3}", self.id);
                    self.pool_exhausted = true;
                    self.schedule(None);
                    return Step::default();
                }
                // A malformed record only costs that record.
                Err(err) if err.is_config() => {
                    warn!("Channel {}: skipping read: {err}", self.id);
                }
                Err(err) => {
                    warn!("Channel {}: cannot pull a read: {err}", self.id);
                    self.pool_exhausted = true;
                    self.schedule(None);
                    return Step::default();
                }
            }
        }
    }

    fn complete_read(&mut self, now: f64) -> Step {
        let record = self.finalize(now, usize::MAX, ReadEndReason::Finished);
        let decision = self.sampler.next_gap(self.id, &self.stats, now, &mut self.rng);
        let transition = match decision.block {
            Some(duration) => {
                let until = now + duration;
                self.set_state(now, ChannelState::Blocked, until.is_finite().then_some(until))
            }
            None => self.set_state(now, ChannelState::Idle, Some(now + decision.gap)),
        };
        Step {
            record,
            transition: Some(transition),
        }
    }

    /// Rejects the read in the pore and reverses the voltage for `duration`.
    ///
    /// Applies in every state except `Stopped` and a permanent block; returns
    /// `None` without changing anything in those cases. A temporary block is
    /// cleared by the unblock.
    pub fn unblock(&mut self, now: f64, duration: f64, bp_per_second: f64) -> Option<Step> {
        match self.state {
            ChannelState::Stopped => return None,
            ChannelState::Blocked if self.next_event.is_none() => return None,
            ChannelState::Blocked => self.stats.time_blocked += now - self.state_since,
            _ => {}
        }
        let record = self.truncate(now, bp_per_second, ReadEndReason::Unblocked);
        self.stats.unblock_count += 1;
        let transition = self.set_state(now, ChannelState::Unblocking, Some(now + duration.max(0.0)));
        Some(Step {
            record,
            transition: Some(transition),
        })
    }

    /// Retires the channel, finalizing the read in the pore as it is.
    ///
    /// Returns `None` if the channel is already stopped.
    pub fn stop_receiving(&mut self, now: f64, bp_per_second: f64) -> Option<Step> {
        match self.state {
            ChannelState::Stopped => return None,
            ChannelState::Blocked if self.next_event.is_some() => {
                self.stats.time_blocked += now - self.state_since;
            }
            _ => {}
        }
        let record = self.truncate(now, bp_per_second, ReadEndReason::StoppedReceiving);
        let transition = self.set_state(now, ChannelState::Stopped, None);
        Some(Step {
            record,
            transition: Some(transition),
        })
    }

    /// Finalizes the in-flight read at the end of the run.
    ///
    /// A sequencing channel returns to `Idle`; nothing is scheduled afterwards.
    pub fn finish_in_flight(&mut self, now: f64, bp_per_second: f64) -> Step {
        let record = self.truncate(now, bp_per_second, ReadEndReason::SimStopped);
        let transition = (self.state == ChannelState::Sequencing).then(|| self.set_state(now, ChannelState::Idle, None));
        self.schedule(None);
        Step { record, transition }
    }

    /// Hands out the bases of the in-flight read sequenced since the last poll.
    ///
    /// Only whole chunks of `min_chunk_size` bases are handed out; returns
    /// `None` when no new chunk is complete.
    pub fn poll_chunk(&mut self, now: f64, bp_per_second: f64, min_chunk_size: usize) -> Option<ReadChunk> {
        if self.state != ChannelState::Sequencing {
            return None;
        }
        let id = self.id;
        let in_flight = self.in_flight.as_mut()?;
        let sequenced = sequenced_bases(in_flight, now, bp_per_second);
        let available = sequenced / min_chunk_size.max(1) * min_chunk_size.max(1);
        if available <= in_flight.bases_returned {
            return None;
        }
        let offset = in_flight.bases_returned;
        in_flight.bases_returned = available;
        Some(ReadChunk {
            channel: id,
            read_id: in_flight.read.id.clone(),
            seq: in_flight.read.seq[offset..available].to_string(),
            offset,
        })
    }

    fn truncate(&mut self, now: f64, bp_per_second: f64, reason: ReadEndReason) -> Option<SeqRecord> {
        let in_flight = self.in_flight.as_ref()?;
        let keep = sequenced_bases(in_flight, now, bp_per_second);
        self.finalize(now, keep, reason)
    }

    fn finalize(&mut self, now: f64, keep: usize, reason: ReadEndReason) -> Option<SeqRecord> {
        let InFlightRead { read, start_time, .. } = self.in_flight.take()?;
        let full_seqlen = read.len();
        let keep = keep.min(full_seqlen);
        match reason {
            ReadEndReason::Finished => self.stats.reads_finished += 1,
            ReadEndReason::Unblocked => self.stats.reads_unblocked += 1,
            ReadEndReason::StoppedReceiving | ReadEndReason::SimStopped => self.stats.reads_stopped += 1,
        }
        self.stats.bases_sequenced += keep as u64;

        let meta = ReadMeta {
            channel: self.id,
            start_time,
            end_time: now,
            full_seqlen,
            end_reason: reason,
        };
        let mut seq = read.seq;
        seq.truncate(keep);
        Some(SeqRecord::new(read.id, seq, meta.to_description()))
    }

    fn set_state(&mut self, now: f64, to: ChannelState, next_event: Option<f64>) -> Transition {
        let from = self.state;
        self.state = to;
        self.state_since = now;
        self.schedule(next_event);
        Transition {
            time: now,
            channel: self.id,
            from,
            to,
        }
    }

    fn schedule(&mut self, next_event: Option<f64>) {
        self.next_event = next_event;
        self.generation += 1;
    }
}

/// Bases of the in-flight read that went through the pore by `now`.
fn sequenced_bases(in_flight: &InFlightRead, now: f64, bp_per_second: f64) -> usize {
    let elapsed = (now - in_flight.start_time).max(0.0);
    let bases = (elapsed * bp_per_second).floor();
    if bases >= in_flight.read.len() as f64 {
        in_flight.read.len()
    } else {
        bases as usize
    }
}
