//! Parsing of sequencing-summary traces.
//!
//! A trace is a tab-separated file with a header row. The columns `channel`,
//! `start_time` and `duration` are required; any others are ignored. Both real
//! instrument summaries and the summaries written by this crate qualify.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, SimResult};

const REQUIRED_COLUMNS: [&str; 3] = ["channel", "start_time", "duration"];

/// The columns of a trace row this crate reads.
#[derive(Debug, Deserialize)]
struct TraceRow {
    channel: String,
    start_time: f64,
    duration: f64,
}

/// One read of a trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRead {
    /// Virtual seconds at which the read entered the pore.
    pub start_time: f64,
    /// `start_time` plus the read duration.
    pub end_time: f64,
}

/// Reads of a sequencing summary grouped by channel, sorted by start time.
#[derive(Debug, Clone, Default)]
pub struct SeqSumTrace {
    channels: BTreeMap<u32, Vec<TraceRead>>,
}

impl SeqSumTrace {
    /// Loads a trace from a file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or is malformed.
    pub fn from_path(path: &Path) -> SimResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Parses a trace from any reader.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MalformedTrace` on a missing column or a value
    /// that is not a finite, non-negative number, and `ConfigError::EmptyTrace`
    /// if there are no reads.
    pub fn from_reader<R: Read>(reader: R) -> SimResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers().map_err(|e| malformed(1, e.to_string()))?.clone();
        if headers.is_empty() {
            return Err(ConfigError::EmptyTrace.into());
        }
        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|name| !headers.iter().any(|h| h == **name)) {
            return Err(malformed(1, format!("missing column '{missing}'")).into());
        }

        let mut channels: BTreeMap<u32, Vec<TraceRead>> = BTreeMap::new();
        for result in reader.records() {
            let record = result.map_err(|e| {
                let line = e.position().map_or(0, csv::Position::line);
                malformed(to_line(line), e.to_string())
            })?;
            let line = to_line(record.position().map_or(0, csv::Position::line));
            let row: TraceRow = record
                .deserialize(Some(&headers))
                .map_err(|e| malformed(line, e.to_string()))?;

            let channel =
                parse_channel(&row.channel).ok_or_else(|| malformed(line, "channel is not a number".to_string()))?;
            let end_time = row.start_time + row.duration;
            if !(row.start_time.is_finite() && row.duration.is_finite() && end_time.is_finite()) {
                return Err(malformed(line, "start_time and duration must be finite".to_string()).into());
            }
            if row.start_time < 0.0 || row.duration < 0.0 {
                return Err(malformed(line, "negative start_time or duration".to_string()).into());
            }
            channels.entry(channel).or_default().push(TraceRead {
                start_time: row.start_time,
                end_time,
            });
        }

        if channels.is_empty() {
            return Err(ConfigError::EmptyTrace.into());
        }
        for reads in channels.values_mut() {
            reads.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        }
        Ok(Self { channels })
    }

    /// Channel ids present in the trace, ascending.
    pub fn channel_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.channels.keys().copied()
    }

    /// Reads of one channel, sorted by start time.
    #[must_use]
    pub fn reads(&self, channel: u32) -> &[TraceRead] {
        self.channels.get(&channel).map_or(&[], Vec::as_slice)
    }

    /// Number of channels in the trace.
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Gaps between consecutive reads of a channel, as `(gap_start, gap_length)`.
    ///
    /// Overlapping reads yield no gap.
    #[must_use]
    pub fn gaps(&self, channel: u32) -> Vec<(f64, f64)> {
        self.reads(channel)
            .windows(2)
            .filter_map(|pair| {
                let len = pair[1].start_time - pair[0].end_time;
                (len >= 0.0).then_some((pair[0].end_time, len))
            })
            .collect()
    }

    /// Time at which the last read of a channel ended.
    #[must_use]
    pub fn channel_end_time(&self, channel: u32) -> Option<f64> {
        self.reads(channel).iter().map(|r| r.end_time).max_by(f64::total_cmp)
    }
}

/// Accepts `12` as well as the `ch12`/`chan12` forms used by some tools.
fn parse_channel(value: &str) -> Option<u32> {
    let digits = value.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    digits.parse().ok()
}

fn malformed(line: usize, reason: String) -> ConfigError {
    ConfigError::MalformedTrace { line, reason }
}

fn to_line(line: u64) -> usize {
    usize::try_from(line).unwrap_or(usize::MAX)
}
