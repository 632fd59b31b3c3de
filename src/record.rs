//! Read records flowing through the simulator.
//!
//! A [`SourceRead`] is handed out by a read pool, sequenced by a channel and
//! finalized into a [`SeqRecord`] whose description carries the simulation
//! metadata ([`ReadMeta`]). The record is immutable once finalized.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Description written for records that carry none.
pub const UNKNOWN_DESCRIPTION: &str = "<unknown description>";

/// A raw sequence record supplied by a read pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRead {
    /// Read identifier (first word of the FASTA header).
    pub id: String,
    /// Full sequence available for this molecule.
    pub seq: String,
}

impl SourceRead {
    /// Creates a new source read.
    pub fn new(id: impl Into<String>, seq: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            seq: seq.into(),
        }
    }

    /// Number of bases in the full record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    /// Whether the record has no bases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

/// A completed (possibly truncated) read, as handed to the writer pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqRecord {
    /// Id of the source read.
    pub id: String,
    /// Sequenced bases, possibly a prefix of the source read.
    pub seq: String,
    /// Free text after the id, empty if none.
    pub description: String,
}

impl SeqRecord {
    /// Creates a record with a description.
    pub fn new(id: impl Into<String>, seq: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            seq: seq.into(),
            description: description.into(),
        }
    }

    /// A record without description.
    pub fn without_description(id: impl Into<String>, seq: impl Into<String>) -> Self {
        Self::new(id, seq, "")
    }

    /// Description to serialize, substituting [`UNKNOWN_DESCRIPTION`] when empty.
    #[must_use]
    pub fn description_or_unknown(&self) -> &str {
        if self.description.is_empty() {
            UNKNOWN_DESCRIPTION
        } else {
            &self.description
        }
    }

    /// Parses the simulation metadata out of the description, if present.
    #[must_use]
    pub fn meta(&self) -> Option<ReadMeta> {
        ReadMeta::parse(&self.description)
    }
}

/// Why a read stopped being sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadEndReason {
    /// The whole molecule went through the pore.
    Finished,
    /// Rejected by an unblock command.
    Unblocked,
    /// The channel was retired by a stop-receiving command.
    StoppedReceiving,
    /// The simulation stopped while the read was in flight.
    SimStopped,
}

impl ReadEndReason {
    /// Whether the read was cut short.
    #[must_use]
    pub const fn is_truncation(self) -> bool {
        !matches!(self, Self::Finished)
    }

    /// Name used in descriptions and summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Unblocked => "unblocked",
            Self::StoppedReceiving => "stopped_receiving",
            Self::SimStopped => "sim_stopped",
        }
    }
}

impl fmt::Display for ReadEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadEndReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finished" => Ok(Self::Finished),
            "unblocked" => Ok(Self::Unblocked),
            "stopped_receiving" => Ok(Self::StoppedReceiving),
            "sim_stopped" => Ok(Self::SimStopped),
            other => Err(format!("unknown read end reason '{other}'")),
        }
    }
}

/// Simulation metadata attached to every finalized read.
///
/// Encoded in the record description as space-separated `key=value` pairs:
/// `ch=3 start_time=1.250000 end_time=3.472222 full_seqlen=1000 ended=finished`.
/// The number of sequenced bases is the length of the record itself.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadMeta {
    pub channel: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub full_seqlen: usize,
    pub end_reason: ReadEndReason,
}

impl ReadMeta {
    /// Virtual seconds the read spent in the pore.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Formats the metadata as a record description.
    #[must_use]
    pub fn to_description(&self) -> String {
        format!(
            "ch={} start_time={:.6} end_time={:.6} full_seqlen={} ended={}",
            self.channel, self.start_time, self.end_time, self.full_seqlen, self.end_reason
        )
    }

    /// Parses a description produced by [`ReadMeta::to_description`].
    ///
    /// Unknown keys are ignored; returns `None` if a required key is missing or
    /// malformed.
    #[must_use]
    pub fn parse(description: &str) -> Option<Self> {
        let mut channel = None;
        let mut start_time = None;
        let mut end_time = None;
        let mut full_seqlen = None;
        let mut end_reason = None;

        for token in description.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "ch" => channel = value.parse().ok(),
                "start_time" => start_time = value.parse().ok(),
                "end_time" => end_time = value.parse().ok(),
                "full_seqlen" => full_seqlen = value.parse().ok(),
                "ended" => end_reason = value.parse().ok(),
                _ => {}
            }
        }

        Some(Self {
            channel: channel?,
            start_time: start_time?,
            end_time: end_time?,
            full_seqlen: full_seqlen?,
            end_reason: end_reason?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_parses_back() {
        let meta = ReadMeta {
            channel: 7,
            start_time: 1.25,
            end_time: 3.5,
            full_seqlen: 1000,
            end_reason: ReadEndReason::Unblocked,
        };
        let record = SeqRecord::new("read1", "ACGT", meta.to_description());
        assert_eq!(record.meta(), Some(meta));
        assert!((meta.duration() - 2.25).abs() < 1e-12);
    }

    #[test]
    fn test_parse_ignores_unknown_keys_and_requires_all_fields() {
        let parsed = ReadMeta::parse("foo=bar ch=2 start_time=0 end_time=1 full_seqlen=5 ended=finished extra");
        assert_eq!(parsed.map(|m| m.channel), Some(2));

        assert!(ReadMeta::parse("ch=2 start_time=0 end_time=1 full_seqlen=5").is_none());
        assert!(ReadMeta::parse("ch=x start_time=0 end_time=1 full_seqlen=5 ended=finished").is_none());
        assert!(ReadMeta::parse("").is_none());
    }

    #[test]
    fn test_unknown_description_substitution() {
        let record = SeqRecord::without_description("read1", "AACCGTT");
        assert_eq!(record.description_or_unknown(), UNKNOWN_DESCRIPTION);
        assert!(record.meta().is_none());
    }

    #[test]
    fn test_end_reason_round_trips_through_str() {
        for reason in [
            ReadEndReason::Finished,
            ReadEndReason::Unblocked,
            ReadEndReason::StoppedReceiving,
            ReadEndReason::SimStopped,
        ] {
            assert_eq!(reason.as_str().parse::<ReadEndReason>(), Ok(reason));
        }
        assert!(!ReadEndReason::Finished.is_truncation());
        assert!(ReadEndReason::SimStopped.is_truncation());
    }
}
