//! Error types for the read simulator.
//!
//! All errors are strongly typed using thiserror, split by where they can
//! occur: configuration errors are fatal at startup, operation errors are
//! reported to the caller of a simulator command, writer errors come from the
//! output pipeline and transport errors from the server surface.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors, detected before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A parameter that must be strictly positive is not.
    #[error("{field} must be > 0, got {value}")]
    NonPositive {
        field: &'static str,
        value: String,
    },

    /// A parameter that must not be negative is.
    #[error("{field} must be >= 0, got {value}")]
    Negative {
        field: &'static str,
        value: String,
    },

    /// A parameter is outside its allowed range.
    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: String,
    },

    /// The run directory exists and overwrite is off.
    #[error("Run directory '{}' already exists, use overwrite to replace it", .path.display())]
    RunDirExists {
        path: PathBuf,
    },

    /// The reads path does not exist.
    #[error("Reads file '{}' does not exist", .path.display())]
    ReadsFileMissing {
        path: PathBuf,
    },

    /// The reads directory holds no FASTA file.
    #[error("No FASTA files found in '{}'", .path.display())]
    NoReadFiles {
        path: PathBuf,
    },

    /// A FASTA file cannot be indexed, or one of its records is unusable.
    #[error("Malformed FASTA '{}': {reason}", .path.display())]
    MalformedFasta {
        path: PathBuf,
        reason: String,
    },

    /// A gap trace row cannot be used; `line` is 1-based, header included.
    #[error("Malformed sequencing summary at line {line}: {reason}")]
    MalformedTrace {
        line: usize,
        reason: String,
    },

    /// A gap trace holds no read.
    #[error("Sequencing summary contains no reads")]
    EmptyTrace,

    /// The number of gap samplers differs from the number of channels.
    #[error("Expected {expected} gap samplers (one per channel), got {actual}")]
    SamplerCountMismatch {
        expected: usize,
        actual: usize,
    },

    /// The verbosity is not a known log level.
    #[error("Unknown log level '{level}'")]
    UnknownLogLevel {
        level: String,
    },
}

/// Errors returned by simulator operations during a run.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Channel id outside `1..=n_channels`.
    #[error("Unknown channel {channel}, valid channels are 1..={n_channels}")]
    UnknownChannel {
        channel: u32,
        n_channels: u32,
    },

    /// The command does not apply to the channel in its current state.
    #[error("Invalid operation on channel {channel}: {reason}")]
    InvalidOperation {
        channel: u32,
        reason: String,
    },

    /// `start` on a running simulator.
    #[error("Simulation is already running")]
    AlreadyRunning,

    /// A run command sent while no run is in progress.
    #[error("Simulation is not running")]
    NotRunning,

    /// `start` after the single run of a simulator ended.
    #[error("Simulation already ran, a simulator supports a single run")]
    RunFinished,

    /// The read pool was closed.
    #[error("Read pool is closed")]
    PoolClosed,

    /// A worker thread exited while a request was in flight.
    #[error("The {worker} thread is gone")]
    Disconnected {
        worker: &'static str,
    },
}

/// Errors from the reads writer pipeline.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} sink(s) failed: {}", .failures.len(), .failures.join("; "))]
    SinkFailures {
        failures: Vec<String>,
    },

    #[error("Writer worker is gone")]
    WorkerGone,

    #[error("Writer worker panicked")]
    WorkerPanicked,

    #[error("Writer already finished")]
    Finished,
}

impl WriterError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the server surface.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Port {port} is already in use")]
    PortInUse {
        port: u16,
    },

    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {message}")]
    Serve {
        message: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SimError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is an operation error.
    #[must_use]
    pub const fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// Returns true if this is a writer error.
    #[must_use]
    pub const fn is_writer(&self) -> bool {
        matches!(self, Self::Writer(_))
    }

    /// Returns true if the error is fatal at startup.
    #[must_use]
    pub const fn is_fatal_at_startup(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Transport(_))
    }
}

/// Result type alias for simulator operations.
pub type SimResult<T> = Result<T, SimError>;

/// Result type alias for writer operations.
pub type WriterResult<T> = Result<T, WriterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_non_positive() {
        let err = ConfigError::NonPositive {
            field: "n_channels",
            value: "0".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("n_channels"));
        assert!(msg.contains("> 0"));
    }

    #[test]
    fn test_run_dir_exists_mentions_overwrite() {
        let err = ConfigError::RunDirExists {
            path: PathBuf::from("example_run"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("example_run"));
        assert!(msg.contains("overwrite"));
    }

    #[test]
    fn test_unknown_channel() {
        let err = OperationError::UnknownChannel {
            channel: 9,
            n_channels: 4,
        };
        let msg = format!("{err}");
        assert!(msg.contains('9'));
        assert!(msg.contains("1..=4"));
    }

    #[test]
    fn test_sink_failures_joined() {
        let err = WriterError::SinkFailures {
            failures: vec!["sink 0: disk full".to_string(), "sink 2: closed".to_string()],
        };
        let msg = format!("{err}");
        assert!(msg.starts_with("2 sink(s) failed"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_sim_error_from_config() {
        let err: SimError = ConfigError::EmptyTrace.into();
        assert!(err.is_config());
        assert!(err.is_fatal_at_startup());
        assert!(!err.is_operation());
    }

    #[test]
    fn test_sim_error_from_operation() {
        let err: SimError = OperationError::AlreadyRunning.into();
        assert!(err.is_operation());
        assert!(!err.is_fatal_at_startup());
    }

    #[test]
    fn test_sim_error_internal() {
        let err = SimError::internal("unexpected state");
        assert!(!err.is_writer());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
