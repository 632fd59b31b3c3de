use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{write_fasta_record, ReadsWriter};
use crate::error::{WriterError, WriterResult};
use crate::record::SeqRecord;

/// Appends records to a single file.
///
/// The writer is its configuration (path and prefix) plus a lazily opened
/// handle. The first open truncates the file; once it has been opened, later
/// reopens append. Serializing drops the handle, so a deserialized writer
/// resumes appending without clobbering what was written.
#[derive(Debug, Serialize, Deserialize)]
pub struct SingleFileReadsWriter {
    path: PathBuf,
    prefix: String,
    /// Whether the file was created by this writer already.
    started: bool,
    #[serde(skip)]
    handle: Option<BufWriter<File>>,
}

impl SingleFileReadsWriter {
    /// Writer to `path`; ids get `prefix` prepended. The file is created on the first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.into(),
            started: false,
            handle: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a file handle is currently open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn ensure_open(&mut self) -> WriterResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let mut options = OpenOptions::new();
        if self.started {
            options.append(true);
        } else {
            options.write(true).create(true).truncate(true);
        }
        let file = options.open(&self.path).map_err(|e| WriterError::io(&self.path, e))?;
        self.started = true;
        self.handle = Some(BufWriter::new(file));
        Ok(())
    }
}

impl ReadsWriter for SingleFileReadsWriter {
    fn write_read(&mut self, record: &SeqRecord) -> WriterResult<()> {
        self.ensure_open()?;
        let Self {
            path, prefix, handle, ..
        } = self;
        match handle.as_mut() {
            Some(out) => write_fasta_record(out, prefix, record).map_err(|e| WriterError::io(path.as_path(), e)),
            None => Err(WriterError::Finished),
        }
    }

    fn finish(&mut self) -> WriterResult<()> {
        match self.handle.take() {
            Some(mut out) => out.flush().map_err(|e| WriterError::io(&self.path, e)),
            None => Ok(()),
        }
    }
}

impl Drop for SingleFileReadsWriter {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_writes_prefixed_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads1.txt");
        let mut writer = SingleFileReadsWriter::new(&path, "Pref:");
        writer.write_read(&SeqRecord::without_description("read1", "AACCGTT")).unwrap();
        writer.write_read(&SeqRecord::without_description("read2", "GGGGCCAA")).unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            ">Pref:read1 <unknown description>\nAACCGTT\n>Pref:read2 <unknown description>\nGGGGCCAA\n"
        );
    }

    #[test]
    fn test_serialized_writer_drops_handle_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fasta");
        let mut writer = SingleFileReadsWriter::new(&path, "");
        writer.write_read(&SeqRecord::without_description("read1", "AC")).unwrap();
        writer.finish().unwrap();

        let json = serde_json::to_string(&writer).unwrap();
        let mut restored: SingleFileReadsWriter = serde_json::from_str(&json).unwrap();
        assert!(!restored.is_open());
        assert_eq!(fs::read_to_string(&path).unwrap(), ">read1 <unknown description>\nAC\n");

        restored.write_read(&SeqRecord::without_description("read2", "GT")).unwrap();
        restored.finish().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            ">read1 <unknown description>\nAC\n>read2 <unknown description>\nGT\n"
        );
    }

    #[test]
    fn test_unwritable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SingleFileReadsWriter::new(dir.path().join("missing").join("reads.fasta"), "");
        let err = writer.write_read(&SeqRecord::without_description("r", "A")).unwrap_err();
        assert!(matches!(err, WriterError::Io { .. }));
    }
}
