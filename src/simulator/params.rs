use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Engine-level parameters of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    /// Channels, numbered from 1.
    pub n_channels: u32,
    /// Pore speed, bases per virtual second.
    pub bp_per_second: f64,
    /// Granularity of the chunks handed to pollers.
    pub min_chunk_size: usize,
    /// Unblock duration used when a command does not give one.
    pub default_unblock_duration: f64,
    /// `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Keep every state transition in memory (for tests and analysis).
    pub record_transitions: bool,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            n_channels: 512,
            bp_per_second: 450.0,
            min_chunk_size: 200,
            default_unblock_duration: 0.1,
            seed: None,
            record_transitions: false,
        }
    }
}

impl SimParams {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first offending parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_channels == 0 {
            return Err(ConfigError::NonPositive {
                field: "n_channels",
                value: self.n_channels.to_string(),
            });
        }
        if !(self.bp_per_second > 0.0 && self.bp_per_second.is_finite()) {
            return Err(ConfigError::NonPositive {
                field: "bp_per_second",
                value: self.bp_per_second.to_string(),
            });
        }
        if self.min_chunk_size == 0 {
            return Err(ConfigError::NonPositive {
                field: "min_chunk_size",
                value: self.min_chunk_size.to_string(),
            });
        }
        if !(self.default_unblock_duration >= 0.0 && self.default_unblock_duration.is_finite()) {
            return Err(ConfigError::Negative {
                field: "unblock_duration",
                value: self.default_unblock_duration.to_string(),
            });
        }
        Ok(())
    }
}
