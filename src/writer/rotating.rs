use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{write_fasta_record, ReadsWriter};
use crate::error::{WriterError, WriterResult};
use crate::record::SeqRecord;

/// Splits records over files holding at most `max_reads_per_file` each.
///
/// Files are named `{prefix}{index}.fasta` with a zero-based index. A file is
/// written to a temporary name and renamed into place once it holds
/// `max_reads_per_file` records, or on teardown for the last, partial file,
/// so a `.fasta` file on disk is always complete and no record is split.
#[derive(Debug, Serialize, Deserialize)]
pub struct RotatingFileReadsWriter {
    output_dir: PathBuf,
    prefix: String,
    max_reads_per_file: usize,
    /// Index of the file currently being filled.
    file_index: usize,
    /// Records in the file currently being filled.
    reads_in_file: usize,
    #[serde(skip)]
    current: Option<BufWriter<File>>,
}

impl RotatingFileReadsWriter {
    /// Creates the output directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>, max_reads_per_file: usize) -> WriterResult<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir).map_err(|e| WriterError::io(&output_dir, e))?;
        Ok(Self {
            output_dir,
            prefix: prefix.into(),
            max_reads_per_file: max_reads_per_file.max(1),
            file_index: 0,
            reads_in_file: 0,
            current: None,
        })
    }

    /// Directory the numbered files are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the file with the given index.
    #[must_use]
    pub fn file_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("{}{index}.fasta", self.prefix))
    }

    fn temp_path(&self) -> PathBuf {
        self.output_dir.join(format!(".{}{}.fasta.tmp", self.prefix, self.file_index))
    }

    /// Number of files published so far.
    #[must_use]
    pub const fn files_written(&self) -> usize {
        self.file_index
    }

    fn publish(&mut self) -> WriterResult<()> {
        let Some(mut out) = self.current.take() else {
            if self.reads_in_file > 0 {
                // Restored writer that never reopened its partial file.
                let temp = self.temp_path();
                let target = self.file_path(self.file_index);
                fs::rename(&temp, &target).map_err(|e| WriterError::io(&target, e))?;
                self.file_index += 1;
                self.reads_in_file = 0;
            }
            return Ok(());
        };
        let temp = self.temp_path();
        let target = self.file_path(self.file_index);
        out.flush().map_err(|e| WriterError::io(&temp, e))?;
        out.get_ref().sync_all().map_err(|e| WriterError::io(&temp, e))?;
        drop(out);
        fs::rename(&temp, &target).map_err(|e| WriterError::io(&target, e))?;
        debug!("Published {} ({} reads)", target.display(), self.reads_in_file);
        self.file_index += 1;
        self.reads_in_file = 0;
        Ok(())
    }
}

impl ReadsWriter for RotatingFileReadsWriter {
    fn write_read(&mut self, record: &SeqRecord) -> WriterResult<()> {
        if self.current.is_none() {
            // A writer restored from its serialized form resumes its partial file.
            let temp = self.temp_path();
            let mut options = OpenOptions::new();
            if self.reads_in_file > 0 {
                options.create(true).append(true);
            } else {
                options.write(true).create(true).truncate(true);
            }
            let file = options.open(&temp).map_err(|e| WriterError::io(&temp, e))?;
            self.current = Some(BufWriter::new(file));
        }
        let temp = self.temp_path();
        if let Some(out) = self.current.as_mut() {
            write_fasta_record(out, "", record).map_err(|e| WriterError::io(&temp, e))?;
        }
        self.reads_in_file += 1;
        if self.reads_in_file >= self.max_reads_per_file {
            self.publish()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> WriterResult<()> {
        self.publish()
    }
}

impl Drop for RotatingFileReadsWriter {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fasta_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "fasta"))
            .count()
    }

    #[test]
    fn test_files_appear_only_when_complete() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("reads_writer");
        let mut writer = RotatingFileReadsWriter::new(&target, "reads_", 3).unwrap();
        assert_eq!(fasta_files(&target), 0);

        for (i, expected_files) in [(1, 0), (2, 0), (3, 1), (4, 1)] {
            writer
                .write_read(&SeqRecord::without_description(format!("read{i}"), "AACCGTT"))
                .unwrap();
            assert_eq!(fasta_files(&target), expected_files, "after read{i}");
        }
        writer.finish().unwrap();
        assert_eq!(fasta_files(&target), 2);
        assert_eq!(writer.files_written(), 2);

        writer.finish().unwrap();
        assert_eq!(fasta_files(&target), 2);
    }

    #[test]
    fn test_restored_writer_resumes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RotatingFileReadsWriter::new(dir.path(), "reads_", 2).unwrap();
        writer.write_read(&SeqRecord::without_description("read1", "A")).unwrap();
        let json = serde_json::to_string(&writer).unwrap();
        // Release the open handle without publishing.
        if let Some(mut out) = writer.current.take() {
            out.flush().unwrap();
        }
        writer.reads_in_file = 0;
        drop(writer);

        let mut restored: RotatingFileReadsWriter = serde_json::from_str(&json).unwrap();
        restored.write_read(&SeqRecord::without_description("read2", "C")).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("reads_0.fasta")).unwrap(),
            ">read1 <unknown description>\nA\n>read2 <unknown description>\nC\n"
        );
    }

    #[test]
    fn test_empty_writer_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RotatingFileReadsWriter::new(dir.path(), "reads_", 3).unwrap();
        writer.finish().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_publishes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = RotatingFileReadsWriter::new(dir.path(), "r_", 10).unwrap();
            writer.write_read(&SeqRecord::without_description("read1", "AC")).unwrap();
        }
        assert_eq!(
            fs::read_to_string(dir.path().join("r_0.fasta")).unwrap(),
            ">read1 <unknown description>\nAC\n"
        );
    }
}
