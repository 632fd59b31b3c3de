//! Layout of a run directory.
//!
//! ```text
//! <run_dir>/
//!   .lock                          held while the run is alive
//!   reads/reads_<n>.fasta          rotated read files, n from 0
//!   live_sequencing_summary.txt    one row per read, written as reads complete
//!   sequencing_summary.txt         rebuilt from reads/ after a normal finish
//!   simulator_stats.json           per-channel statistics
//! ```

mod file_lock;

pub use file_lock::FileLock;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{ConfigError, SimError, SimResult};

/// Prefix of the rotated read files.
pub const READS_FILE_PREFIX: &str = "reads_";

/// A created and locked run directory.
#[derive(Debug)]
pub struct RunDir {
    root: PathBuf,
    lock: FileLock,
}

impl RunDir {
    /// Creates the run directory and its `reads/` subdirectory.
    ///
    /// An existing directory is an error unless `overwrite` is set, in which
    /// case it is removed first.
    ///
    /// # Errors
    ///
    /// `RunDirExists`, an I/O error, or `WouldBlock` wrapped in an I/O error
    /// when another simulator holds the directory.
    pub fn create(root: &Path, overwrite: bool) -> SimResult<Self> {
        if root.exists() {
            if !overwrite {
                return Err(ConfigError::RunDirExists {
                    path: root.to_path_buf(),
                }
                .into());
            }
            warn!("Overwriting existing run directory '{}'", root.display());
            // Refuse to wipe a directory a live run still holds.
            if root.is_dir() {
                match FileLock::acquire(root) {
                    Ok(lock) => drop(lock),
                    Err(err) if err.kind() == ErrorKind::WouldBlock => return Err(SimError::Io(err)),
                    Err(_) => {}
                }
                fs::remove_dir_all(root)?;
            } else {
                fs::remove_file(root)?;
            }
        }

        fs::create_dir_all(root.join("reads"))?;
        let lock = FileLock::acquire(root)?;
        info!("Created run directory '{}'", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            lock,
        })
    }

    /// Run directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the rotating reads files.
    #[must_use]
    pub fn reads_dir(&self) -> PathBuf {
        self.root.join("reads")
    }

    #[must_use]
    pub fn live_summary_path(&self) -> PathBuf {
        self.root.join("live_sequencing_summary.txt")
    }

    /// Summary rebuilt from `reads/` after the run.
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.root.join("sequencing_summary.txt")
    }

    #[must_use]
    pub fn stats_path(&self) -> PathBuf {
        self.root.join("simulator_stats.json")
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }
}
