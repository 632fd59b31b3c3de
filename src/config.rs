//! Run-level configuration: everything the server binary accepts.
//!
//! [`SimulatorConfig::validate`] must pass before anything touches the
//! filesystem, so a bad argument never leaves a half-created run directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SimResult};
use crate::gap_sampling::{ConstantGapsUntilBlocked, GapSampler, RollingWindowGapSampler, SeqSumTrace};
use crate::simulator::SimParams;

/// How per-channel gaps are generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapModel {
    /// Fixed short/long gaps; estimated from the trace when one is given.
    #[default]
    Constant,
    /// Replays the gaps of a recorded run. Requires a trace.
    RollingWindow,
}

impl FromStr for GapModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant" => Ok(Self::Constant),
            "rolling_window" | "rolling-window" => Ok(Self::RollingWindow),
            other => Err(format!("unknown gap model '{other}', expected constant or rolling_window")),
        }
    }
}

impl fmt::Display for GapModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constant => "constant",
            Self::RollingWindow => "rolling_window",
        })
    }
}

/// Maps a verbosity name to a log filter. `critical` has no `log` level of
/// its own and maps to `error`.
///
/// # Errors
///
/// `UnknownLogLevel` for any other name.
pub fn parse_log_level(level: &str) -> Result<LevelFilter, ConfigError> {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warning" | "warn" => Ok(LevelFilter::Warn),
        "error" | "critical" => Ok(LevelFilter::Error),
        _ => Err(ConfigError::UnknownLogLevel {
            level: level.to_string(),
        }),
    }
}

/// Everything a run is set up from, as parsed from the command line.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// FASTA file, or directory of FASTA files, to draw reads from.
    pub reads_file: PathBuf,
    pub run_dir: PathBuf,
    pub n_channels: u32,
    /// Virtual seconds per wall second.
    pub acceleration_factor: f64,
    pub min_chunk_size: usize,
    pub bp_per_second: f64,
    pub seed: Option<u64>,
    pub unblock_duration: f64,
    pub overwrite: bool,
    /// 0 picks a free port.
    pub port: u16,
    pub dont_start: bool,
    pub verbosity: String,
    pub max_reads_per_file: usize,
    /// Virtual seconds between throughput log lines.
    pub log_interval: f64,
    /// `None` for an unbounded writer queue.
    pub writer_queue_capacity: Option<usize>,
    pub gap_model: GapModel,
    /// Sequencing summary of a real run to take gap statistics from.
    pub gap_trace: Option<PathBuf>,
    pub long_gap_threshold: f64,
    pub window_width: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            reads_file: PathBuf::new(),
            run_dir: PathBuf::from("example_run"),
            n_channels: 512,
            acceleration_factor: 1.0,
            min_chunk_size: 200,
            bp_per_second: 450.0,
            seed: None,
            unblock_duration: 0.1,
            overwrite: false,
            port: 0,
            dont_start: false,
            verbosity: "info".to_string(),
            max_reads_per_file: 4000,
            log_interval: 100.0,
            writer_queue_capacity: Some(4096),
            gap_model: GapModel::Constant,
            gap_trace: None,
            long_gap_threshold: 10.0,
            window_width: 100.0,
        }
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositive {
            field,
            value: value.to_string(),
        })
    }
}

fn existing(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConfigError::ReadsFileMissing {
            path: path.to_path_buf(),
        })
    }
}

impl SimulatorConfig {
    /// Config with the defaults for everything but the two required paths.
    #[must_use]
    pub fn new(reads_file: impl Into<PathBuf>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            reads_file: reads_file.into(),
            run_dir: run_dir.into(),
            ..Self::default()
        }
    }

    /// Checks every value without touching the filesystem beyond existence
    /// checks of the input files.
    ///
    /// # Errors
    ///
    /// Returns the first invalid option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_sim_params().validate()?;
        positive("acceleration_factor", self.acceleration_factor)?;
        positive("log_interval", self.log_interval)?;
        if self.max_reads_per_file == 0 {
            return Err(ConfigError::NonPositive {
                field: "max_reads_per_file",
                value: "0".to_string(),
            });
        }
        if self.writer_queue_capacity == Some(0) {
            return Err(ConfigError::NonPositive {
                field: "writer_queue_capacity",
                value: "0".to_string(),
            });
        }
        parse_log_level(&self.verbosity)?;
        existing(&self.reads_file)?;

        match (&self.gap_trace, self.gap_model) {
            (None, GapModel::RollingWindow) => {
                return Err(ConfigError::OutOfRange {
                    field: "gap_model",
                    range: "constant unless a gap trace is given",
                    value: self.gap_model.to_string(),
                });
            }
            (Some(trace), _) => {
                existing(trace)?;
                positive("long_gap_threshold", self.long_gap_threshold)?;
                positive("window_width", self.window_width)?;
            }
            (None, GapModel::Constant) => {}
        }
        Ok(())
    }

    /// Engine parameters of this configuration.
    #[must_use]
    pub fn to_sim_params(&self) -> SimParams {
        SimParams {
            n_channels: self.n_channels,
            bp_per_second: self.bp_per_second,
            min_chunk_size: self.min_chunk_size,
            default_unblock_duration: self.unblock_duration,
            seed: self.seed,
            record_transitions: false,
        }
    }

    /// One gap sampler per channel, as selected by `gap_model`.
    ///
    /// # Errors
    ///
    /// Returns an error if the gap trace cannot be read or yields invalid
    /// parameters.
    pub fn gap_samplers(&self) -> SimResult<Vec<Box<dyn GapSampler>>> {
        let Some(trace_path) = &self.gap_trace else {
            return Ok(default_gap_samplers(self.n_channels));
        };
        let trace = SeqSumTrace::from_path(trace_path)?;
        match self.gap_model {
            GapModel::Constant => {
                let defaults = ConstantGapsUntilBlocked::default();
                let sampler = ConstantGapsUntilBlocked::from_trace(&trace, self.long_gap_threshold, defaults.read_delay)?;
                log::info!("Estimated gap model from '{}': {sampler:?}", trace_path.display());
                Ok((0..self.n_channels)
                    .map(|_| Box::new(sampler.clone()) as Box<dyn GapSampler>)
                    .collect())
            }
            GapModel::RollingWindow => Ok(RollingWindowGapSampler::from_trace(
                &trace,
                self.n_channels,
                self.window_width,
                self.long_gap_threshold,
            )?
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn GapSampler>)
            .collect()),
        }
    }
}

/// The default gap model for every channel: short gaps with occasional long
/// ones, never blocking.
#[must_use]
pub fn default_gap_samplers(n_channels: u32) -> Vec<Box<dyn GapSampler>> {
    (0..n_channels)
        .map(|_| Box::new(ConstantGapsUntilBlocked::default()) as Box<dyn GapSampler>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config(dir: &Path) -> SimulatorConfig {
        let reads = dir.join("reads.fasta");
        std::fs::write(&reads, ">r1\nACGT\n").unwrap();
        SimulatorConfig::new(reads, dir.join("run"))
    }

    #[test]
    fn test_defaults() {
        let config = SimulatorConfig::default();
        assert_eq!(config.n_channels, 512);
        assert!((config.bp_per_second - 450.0).abs() < f64::EPSILON);
        assert_eq!(config.min_chunk_size, 200);
        assert!((config.unblock_duration - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.port, 0);
        assert_eq!(config.verbosity, "info");
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let dir = tempfile::tempdir().unwrap();
        valid_config(dir.path()).validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let base = valid_config(dir.path());
        let cases = [
            SimulatorConfig {
                n_channels: 0,
                ..base.clone()
            },
            SimulatorConfig {
                min_chunk_size: 0,
                ..base.clone()
            },
            SimulatorConfig {
                bp_per_second: -1.0,
                ..base.clone()
            },
            SimulatorConfig {
                unblock_duration: -0.1,
                ..base.clone()
            },
            SimulatorConfig {
                acceleration_factor: 0.0,
                ..base.clone()
            },
            SimulatorConfig {
                verbosity: "loud".to_string(),
                ..base.clone()
            },
            SimulatorConfig {
                reads_file: dir.path().join("missing.fasta"),
                ..base.clone()
            },
            SimulatorConfig {
                gap_model: GapModel::RollingWindow,
                ..base.clone()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
        assert!(!dir.path().join("run").exists());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(parse_log_level("critical").unwrap(), LevelFilter::Error);
        assert_eq!(parse_log_level("WARNING").unwrap(), LevelFilter::Warn);
        assert!(parse_log_level("trace").is_err());
    }

    #[test]
    fn test_gap_model_parsing() {
        assert_eq!("rolling-window".parse::<GapModel>().unwrap(), GapModel::RollingWindow);
        assert_eq!(GapModel::Constant.to_string(), "constant");
        assert!("other".parse::<GapModel>().is_err());
    }

    #[test]
    fn test_samplers_from_trace() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("summary.txt");
        std::fs::write(
            &trace,
            "channel\tstart_time\tduration\n1\t0.0\t2.0\n1\t3.0\t2.0\n2\t1.0\t1.0\n2\t20.0\t1.0\n",
        )
        .unwrap();
        let config = SimulatorConfig {
            n_channels: 3,
            gap_trace: Some(trace),
            gap_model: GapModel::RollingWindow,
            ..valid_config(dir.path())
        };
        config.validate().unwrap();
        let samplers = config.gap_samplers().unwrap();
        assert_eq!(samplers.len(), 3);
        assert_eq!(samplers[0].name(), "rolling_window");

        let constant = SimulatorConfig {
            gap_model: GapModel::Constant,
            ..config
        };
        assert_eq!(constant.gap_samplers().unwrap().len(), 3);
    }
}
