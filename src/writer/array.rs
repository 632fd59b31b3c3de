use std::sync::{Arc, Mutex, PoisonError};

use super::ReadsWriter;
use crate::error::WriterResult;
use crate::record::SeqRecord;

/// One stored record: id, sequence, description.
pub type StoredRead = (String, String, String);

/// Keeps records in memory, for tests.
///
/// Clones share the same storage, so a test can keep a clone and inspect the
/// reads after handing the writer to the simulator.
#[derive(Debug, Clone, Default)]
pub struct ArrayReadsWriter {
    reads: Arc<Mutex<Vec<StoredRead>>>,
}

impl ArrayReadsWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records written so far, in write order.
    ///
    /// Missing descriptions are stored as `<unknown description>`.
    #[must_use]
    pub fn reads(&self) -> Vec<StoredRead> {
        self.reads.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of records written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reads.lock().map_or(0, |r| r.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReadsWriter for ArrayReadsWriter {
    fn write_read(&mut self, record: &SeqRecord) -> WriterResult<()> {
        let mut reads = self.reads.lock().unwrap_or_else(PoisonError::into_inner);
        reads.push((
            record.id.clone(),
            record.seq.clone(),
            record.description_or_unknown().to_string(),
        ));
        Ok(())
    }

    fn finish(&mut self) -> WriterResult<()> {
        Ok(())
    }
}
