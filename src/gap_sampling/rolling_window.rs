use rand::rngs::StdRng;
use rand::Rng;

use super::{GapDecision, GapSampler, SeqSumTrace};
use crate::channel::ChannelStats;
use crate::error::{ConfigError, SimResult};

/// Replays the gap behaviour of a recorded channel.
///
/// The sampler keeps the gaps `(gap_start, gap_length)` of one channel of a
/// recorded run. At time `t` it draws uniformly among the gaps that started in
/// the trailing window `[t - window_width, t]`; if the window holds no gap,
/// among all gaps that started before `t`, and failing that among all gaps.
/// Gaps of at least `long_gap_threshold` are treated as blocking periods.
/// After the recorded channel produced its last read, the channel blocks for
/// good.
#[derive(Debug, Clone)]
pub struct RollingWindowGapSampler {
    /// Sorted by gap start.
    gaps: Vec<(f64, f64)>,
    window_width: f64,
    long_gap_threshold: f64,
    time_until_blocked: f64,
}

impl RollingWindowGapSampler {
    /// Creates a sampler from the gaps of one channel.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for non-positive window width or threshold.
    pub fn new(
        mut gaps: Vec<(f64, f64)>,
        window_width: f64,
        long_gap_threshold: f64,
        time_until_blocked: f64,
    ) -> SimResult<Self> {
        if window_width.is_nan() || window_width <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "window_width",
                value: window_width.to_string(),
            }
            .into());
        }
        if long_gap_threshold.is_nan() || long_gap_threshold <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "long_gap_threshold",
                value: long_gap_threshold.to_string(),
            }
            .into());
        }
        gaps.retain(|(start, len)| start.is_finite() && len.is_finite() && *len >= 0.0);
        gaps.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self {
            gaps,
            window_width,
            long_gap_threshold,
            time_until_blocked,
        })
    }

    /// Builds one sampler per simulated channel from a recorded run.
    ///
    /// Simulated channel `i` (1-based) replays trace channel number
    /// `(i - 1) % trace_channels`, taking trace channels in ascending order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the trace has no channels or the
    /// window parameters are invalid.
    pub fn from_trace(
        trace: &SeqSumTrace,
        n_channels: u32,
        window_width: f64,
        long_gap_threshold: f64,
    ) -> SimResult<Vec<Self>> {
        let trace_channels: Vec<u32> = trace.channel_ids().collect();
        if trace_channels.is_empty() {
            return Err(ConfigError::EmptyTrace.into());
        }
        (0..n_channels as usize)
            .map(|i| {
                let source = trace_channels[i % trace_channels.len()];
                Self::new(
                    trace.gaps(source),
                    window_width,
                    long_gap_threshold,
                    trace.channel_end_time(source).unwrap_or(f64::INFINITY),
                )
            })
            .collect()
    }

    /// Number of recorded gaps.
    #[must_use]
    pub fn n_gaps(&self) -> usize {
        self.gaps.len()
    }

    fn candidates(&self, now: f64) -> &[(f64, f64)] {
        let upto = self.gaps.partition_point(|(start, _)| *start <= now);
        let from = self.gaps.partition_point(|(start, _)| *start < now - self.window_width);
        if from < upto {
            &self.gaps[from..upto]
        } else if upto > 0 {
            &self.gaps[..upto]
        } else {
            &self.gaps
        }
    }
}

impl GapSampler for RollingWindowGapSampler {
    fn next_gap(&mut self, _channel: u32, _stats: &ChannelStats, now: f64, rng: &mut StdRng) -> GapDecision {
        if now >= self.time_until_blocked {
            return GapDecision::blocked_forever();
        }
        let candidates = self.candidates(now);
        if candidates.is_empty() {
            return GapDecision::gap(0.0);
        }
        let (_, len) = candidates[rng.gen_range(0..candidates.len())];
        if len >= self.long_gap_threshold {
            GapDecision::blocked(len)
        } else {
            GapDecision::gap(len)
        }
    }

    fn name(&self) -> &'static str {
        "rolling_window"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::create_rng;

    fn sampler(gaps: Vec<(f64, f64)>) -> RollingWindowGapSampler {
        RollingWindowGapSampler::new(gaps, 10.0, 5.0, 100.0).unwrap()
    }

    #[test]
    fn test_draws_only_from_window() {
        let mut s = sampler(vec![(0.0, 1.0), (50.0, 2.0), (55.0, 3.0)]);
        let mut rng = create_rng(Some(3));
        for _ in 0..50 {
            let d = s.next_gap(1, &ChannelStats::default(), 58.0, &mut rng);
            assert!(d.gap == 2.0 || d.gap == 3.0, "unexpected gap {}", d.gap);
        }
    }

    #[test]
    fn test_falls_back_to_past_then_all_gaps() {
        let mut s = sampler(vec![(0.0, 1.0), (50.0, 2.0)]);
        let mut rng = create_rng(Some(3));
        // Window [20, 30] is empty, only the gap at 0 lies in the past.
        assert_eq!(s.next_gap(1, &ChannelStats::default(), 30.0, &mut rng), GapDecision::gap(1.0));

        let mut late_start = sampler(vec![(50.0, 2.0)]);
        assert_eq!(
            late_start.next_gap(1, &ChannelStats::default(), 1.0, &mut rng),
            GapDecision::gap(2.0)
        );
    }

    #[test]
    fn test_long_gaps_block() {
        let mut s = sampler(vec![(0.0, 7.5)]);
        let mut rng = create_rng(Some(3));
        assert_eq!(s.next_gap(1, &ChannelStats::default(), 1.0, &mut rng), GapDecision::blocked(7.5));
    }

    #[test]
    fn test_blocks_forever_after_trace_ends() {
        let mut s = sampler(vec![(0.0, 1.0)]);
        let mut rng = create_rng(Some(3));
        assert!(s.next_gap(1, &ChannelStats::default(), 100.0, &mut rng).is_permanent());
    }

    #[test]
    fn test_from_trace_cycles_channels() {
        let trace = SeqSumTrace::from_reader(
            "channel\tstart_time\tduration\n1\t0\t1\n1\t2\t1\n3\t0\t1\n".as_bytes(),
        )
        .unwrap();
        let samplers = RollingWindowGapSampler::from_trace(&trace, 5, 30.0, 5.0).unwrap();
        assert_eq!(samplers.len(), 5);
        let gaps: Vec<usize> = samplers.iter().map(RollingWindowGapSampler::n_gaps).collect();
        assert_eq!(gaps, vec![1, 0, 1, 0, 1]);
        assert_eq!(samplers[1].time_until_blocked, 1.0);
    }

    #[test]
    fn test_invalid_window() {
        assert!(RollingWindowGapSampler::new(Vec::new(), 0.0, 5.0, 1.0).is_err());
        assert!(RollingWindowGapSampler::new(Vec::new(), 1.0, -5.0, 1.0).is_err());
    }
}
