//! Read pool backed by FASTA files on disk.
//!
//! Every file is indexed up front with a `.fai` index built in memory, which
//! validates its layout and counts its reads. Records are then streamed with
//! the `noodles` FASTA reader, one file after the other.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, info};
use noodles::fasta::{self, fai};

use super::ReadPool;
use crate::error::{ConfigError, OperationError, SimError, SimResult};
use crate::record::SourceRead;

const FASTA_EXTENSIONS: [&str; 3] = ["fasta", "fa", "fna"];

/// `.fai` indexes of a set of FASTA files, in read order.
#[derive(Debug, Clone, Default)]
pub struct FastaIndex {
    files: Vec<PathBuf>,
    indexes: Vec<fai::Index>,
}

impl FastaIndex {
    /// Indexes a FASTA file, or every `.fasta`/`.fa`/`.fna` file of a directory
    /// in lexicographic order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the path does not exist, the directory
    /// holds no FASTA file, or a file cannot be indexed.
    pub fn build(path: &Path) -> SimResult<Self> {
        if !path.exists() {
            return Err(ConfigError::ReadsFileMissing {
                path: path.to_path_buf(),
            }
            .into());
        }
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|p| p.is_file() && has_fasta_extension(p))
                .collect();
            files.sort();
            if files.is_empty() {
                return Err(ConfigError::NoReadFiles {
                    path: path.to_path_buf(),
                }
                .into());
            }
            files
        } else {
            vec![path.to_path_buf()]
        };

        let indexes = files
            .iter()
            .map(|file| fasta::fs::index(file).map_err(|e| malformed(file, &e.to_string())))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Self { files, indexes })
    }

    /// Number of indexed reads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records().count()
    }

    /// Whether no file holds a read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records().next().is_none()
    }

    /// Indexed files, in read order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Total number of bases over all reads.
    #[must_use]
    pub fn total_bases(&self) -> u64 {
        self.records().map(fai::Record::length).sum()
    }

    /// Read ids, in read order.
    pub fn ids(&self) -> impl Iterator<Item = String> + '_ {
        self.records()
            .map(|record| String::from_utf8_lossy(record.name().as_ref()).into_owned())
    }

    fn records(&self) -> impl Iterator<Item = &fai::Record> + '_ {
        self.indexes.iter().flat_map(|index| {
            let records: &[fai::Record] = index.as_ref();
            records.iter()
        })
    }
}

fn has_fasta_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| FASTA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn malformed(path: &Path, reason: &str) -> SimError {
    ConfigError::MalformedFasta {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
    .into()
}

type FastaReader = fasta::io::Reader<BufReader<File>>;

#[derive(Default)]
struct Cursor {
    /// Index of the file `reader` streams, or of the next file to open.
    file: usize,
    reader: Option<FastaReader>,
}

/// Pool handing out the records of a [`FastaIndex`] in file order.
///
/// Sequences must be ASCII; a record with other bytes is returned as
/// [`ConfigError::MalformedFasta`] and the pool moves on to the next one.
pub struct FastaReadPool {
    index: FastaIndex,
    cursor: Mutex<Cursor>,
    closed: AtomicBool,
}

impl std::fmt::Debug for FastaReadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastaReadPool")
            .field("files", &self.index.files)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FastaReadPool {
    /// Indexes `path` (file or directory) and logs how long it took.
    ///
    /// # Errors
    ///
    /// See [`FastaIndex::build`].
    pub fn open(path: &Path) -> SimResult<Self> {
        let started = Instant::now();
        let index = FastaIndex::build(path)?;
        info!(
            "Indexed {} reads ({} bases) from {} file(s) in '{}' in {:.2?}",
            index.len(),
            index.total_bases(),
            index.files().len(),
            path.display(),
            started.elapsed()
        );
        Ok(Self::from_index(index))
    }

    /// Wraps an existing index; nothing is read until the first record is asked for.
    #[must_use]
    pub fn from_index(index: FastaIndex) -> Self {
        Self {
            index,
            cursor: Mutex::new(Cursor::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Index the pool reads from.
    #[must_use]
    pub const fn index(&self) -> &FastaIndex {
        &self.index
    }
}

fn to_source_read(path: &Path, record: &fasta::Record) -> SimResult<SourceRead> {
    let id = std::str::from_utf8(record.name())
        .map_err(|_| malformed(path, "read id is not valid UTF-8"))?
        .to_string();
    let sequence: &[u8] = record.sequence().as_ref();
    if !sequence.is_ascii() {
        return Err(malformed(path, &format!("read '{id}' has non-ASCII sequence bytes")));
    }
    let seq = String::from_utf8(sequence.to_vec()).map_err(|e| malformed(path, &e.to_string()))?;
    Ok(SourceRead::new(id, seq))
}

impl ReadPool for FastaReadPool {
    fn next_record(&self) -> SimResult<Option<SourceRead>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OperationError::PoolClosed.into());
        }
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| SimError::internal("fasta read pool lock poisoned"))?;

        loop {
            let Some(path) = self.index.files.get(cursor.file) else {
                return Ok(None);
            };
            if cursor.reader.is_none() {
                debug!("Streaming reads from '{}'", path.display());
                let file = File::open(path)?;
                cursor.reader = Some(fasta::io::Reader::new(BufReader::new(file)));
            }
            let next = cursor.reader.as_mut().and_then(|reader| reader.records().next());
            match next {
                Some(Ok(record)) => return to_source_read(path, &record).map(Some),
                Some(Err(e)) => {
                    // The rest of the file cannot be trusted after a parse error.
                    cursor.reader = None;
                    cursor.file += 1;
                    return Err(malformed(path, &e.to_string()));
                }
                None => {
                    cursor.reader = None;
                    cursor.file += 1;
                }
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut cursor) = self.cursor.lock() {
            cursor.reader = None;
        }
    }
}
