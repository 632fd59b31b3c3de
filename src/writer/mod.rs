//! Output pipeline for completed reads.
//!
//! Every sink implements [`ReadsWriter`]. Sinks compose: a
//! [`CompoundReadsWriter`] fans records out to several sinks and a
//! [`ThreadedReadsWriter`] moves any sink onto a background thread.
//!
//! # Record format
//! ```text
//! >{prefix}{id} {description or "<unknown description>"}
//! {sequence, wrapped at 80 bases}
//! ```
//!
//! Records reach a sink in the order `write_read` was called. `finish` flushes
//! and releases resources; calling it again is a no-op.

mod array;
mod compound;
mod rotating;
mod single;
mod summary;
mod threaded;

pub use array::ArrayReadsWriter;
pub use compound::CompoundReadsWriter;
pub use rotating::RotatingFileReadsWriter;
pub use single::SingleFileReadsWriter;
pub use summary::{convert_reads_dir_to_seqsum, SequencingSummaryWriter, SUMMARY_COLUMNS};
pub use threaded::ThreadedReadsWriter;

use std::io::{self, Write};

use noodles::fasta::{
    self,
    record::{Definition, Sequence},
};

use crate::error::WriterResult;
use crate::record::SeqRecord;

/// A sink for completed reads.
pub trait ReadsWriter: Send {
    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns a writer error if the record cannot be written; sinks that
    /// defer failures to teardown return `Ok`.
    fn write_read(&mut self, record: &SeqRecord) -> WriterResult<()>;

    /// Flushes and releases all resources. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first failure the sink hit, once.
    fn finish(&mut self) -> WriterResult<()>;
}

impl<W: ReadsWriter + ?Sized> ReadsWriter for Box<W> {
    fn write_read(&mut self, record: &SeqRecord) -> WriterResult<()> {
        (**self).write_read(record)
    }

    fn finish(&mut self) -> WriterResult<()> {
        (**self).finish()
    }
}

/// Writes one record block.
pub(crate) fn write_fasta_record<W: Write>(out: &mut W, prefix: &str, record: &SeqRecord) -> io::Result<()> {
    let definition = Definition::new(
        format!("{prefix}{}", record.id),
        Some(record.description_or_unknown().to_string().into()),
    );
    let sequence = Sequence::from(record.seq.as_bytes().to_vec());
    fasta::io::Writer::new(out).write_record(&fasta::Record::new(definition, sequence))
}
