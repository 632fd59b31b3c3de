//! Gap samplers: when does a channel start its next read, and does it block.
//!
//! A [`GapSampler`] is consulted by a channel each time a read completes. It
//! returns a [`GapDecision`]: either an idle gap before the next read, or a
//! blocking period (possibly infinite, which retires the channel).
//!
//! Each channel owns its own sampler instance and random generator, so sampler
//! state is partitioned by channel and never shared across threads.

mod constant;
mod rolling_window;
mod seqsum;

pub use constant::ConstantGapsUntilBlocked;
pub use rolling_window::RollingWindowGapSampler;
pub use seqsum::{SeqSumTrace, TraceRead};

use std::fmt;

use rand::rngs::StdRng;

use crate::channel::ChannelStats;

/// Outcome of a gap sampling decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapDecision {
    /// Idle time before the channel looks for its next read.
    pub gap: f64,
    /// Blocking period, `f64::INFINITY` for a permanent block.
    pub block: Option<f64>,
}

impl GapDecision {
    /// Channel stays available, next read after `gap` seconds.
    #[must_use]
    pub fn gap(gap: f64) -> Self {
        Self {
            gap: gap.max(0.0),
            block: None,
        }
    }

    /// Channel blocks for `duration` seconds.
    #[must_use]
    pub fn blocked(duration: f64) -> Self {
        Self {
            gap: 0.0,
            block: Some(duration.max(0.0)),
        }
    }

    /// Channel blocks and never recovers.
    #[must_use]
    pub fn blocked_forever() -> Self {
        Self::blocked(f64::INFINITY)
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.block.is_some()
    }

    /// Whether the decision retires the channel.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.block.is_some_and(f64::is_infinite)
    }
}

/// Produces timing decisions for one channel.
pub trait GapSampler: Send + fmt::Debug {
    /// Decides what happens after a read ends on `channel` at virtual time `now`.
    ///
    /// Durations in the returned decision are never negative.
    fn next_gap(&mut self, channel: u32, stats: &ChannelStats, now: f64, rng: &mut StdRng) -> GapDecision;

    /// Short name used in logs and stats.
    fn name(&self) -> &'static str;
}
