use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{GapDecision, GapSampler, SeqSumTrace};
use crate::channel::ChannelStats;
use crate::error::{ConfigError, SimResult};

/// Short or long gaps of fixed length until the channel blocks for good.
///
/// After each read the channel waits `short_gap_length` (or, with probability
/// `prob_long_gap`, `long_gap_length`) plus `read_delay` before its next read.
/// Once the channel has been active for `time_until_blocked` seconds it
/// blocks permanently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantGapsUntilBlocked {
    /// Usual gap, in virtual seconds.
    pub short_gap_length: f64,
    /// Occasional long gap, in virtual seconds.
    pub long_gap_length: f64,
    /// Probability of a long gap, in `[0, 1]`.
    pub prob_long_gap: f64,
    /// May be `f64::INFINITY` for channels that never block.
    pub time_until_blocked: f64,
    /// Delay between a molecule being captured and its first base being read.
    pub read_delay: f64,
}

impl Default for ConstantGapsUntilBlocked {
    fn default() -> Self {
        Self {
            short_gap_length: 0.4,
            long_gap_length: 10.0,
            prob_long_gap: 0.05,
            time_until_blocked: f64::INFINITY,
            read_delay: 0.05,
        }
    }
}

impl ConstantGapsUntilBlocked {
    /// Creates a validated sampler.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a length is negative or NaN, or if
    /// `prob_long_gap` is outside `[0, 1]`.
    pub fn new(
        short_gap_length: f64,
        long_gap_length: f64,
        prob_long_gap: f64,
        time_until_blocked: f64,
        read_delay: f64,
    ) -> SimResult<Self> {
        let sampler = Self {
            short_gap_length,
            long_gap_length,
            prob_long_gap,
            time_until_blocked,
            read_delay,
        };
        sampler.validate()?;
        Ok(sampler)
    }

    /// Checks parameter ranges.
    ///
    /// # Errors
    ///
    /// See [`ConstantGapsUntilBlocked::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("short_gap_length", self.short_gap_length),
            ("long_gap_length", self.long_gap_length),
            ("time_until_blocked", self.time_until_blocked),
            ("read_delay", self.read_delay),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(ConfigError::Negative {
                    field,
                    value: value.to_string(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.prob_long_gap) {
            return Err(ConfigError::OutOfRange {
                field: "prob_long_gap",
                range: "[0, 1]",
                value: self.prob_long_gap.to_string(),
            });
        }
        Ok(())
    }

    /// Estimates the parameters from a recorded run.
    ///
    /// Gaps of at least `long_gap_threshold` seconds count as long gaps. The
    /// short and long gap lengths are the medians of their class, the long-gap
    /// probability is the fraction of long gaps, and the time until blocked is
    /// the median time at which channels produced their last read.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the resulting parameters are invalid.
    pub fn from_trace(trace: &SeqSumTrace, long_gap_threshold: f64, read_delay: f64) -> SimResult<Self> {
        let mut short = Vec::new();
        let mut long = Vec::new();
        let mut end_times = Vec::new();
        for channel in trace.channel_ids() {
            for (_, len) in trace.gaps(channel) {
                if len >= long_gap_threshold {
                    long.push(len);
                } else {
                    short.push(len);
                }
            }
            end_times.extend(trace.channel_end_time(channel));
        }

        let n_gaps = short.len() + long.len();
        let prob_long_gap = if n_gaps == 0 {
            0.0
        } else {
            long.len() as f64 / n_gaps as f64
        };
        let defaults = Self::default();
        Self::new(
            median(&mut short).unwrap_or(defaults.short_gap_length),
            median(&mut long).unwrap_or(defaults.long_gap_length),
            prob_long_gap,
            median(&mut end_times).unwrap_or(f64::INFINITY),
            read_delay,
        )
    }
}

impl GapSampler for ConstantGapsUntilBlocked {
    fn next_gap(&mut self, _channel: u32, stats: &ChannelStats, now: f64, rng: &mut StdRng) -> GapDecision {
        if stats.active_time(now) >= self.time_until_blocked {
            return GapDecision::blocked_forever();
        }
        let gap = if self.prob_long_gap > 0.0 && rng.gen_bool(self.prob_long_gap) {
            self.long_gap_length
        } else {
            self.short_gap_length
        };
        GapDecision::gap(gap + self.read_delay)
    }

    fn name(&self) -> &'static str {
        "constant_gaps_until_blocked"
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}
