use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Sender};
use log::{debug, error};

use super::ReadsWriter;
use crate::error::{WriterError, WriterResult};
use crate::record::SeqRecord;

/// Moves a sink onto a background thread.
///
/// `write_read` only enqueues the record; a single worker performs the writes
/// in FIFO order. With a bounded capacity a slow sink eventually blocks the
/// producer; with `None` the queue grows without limit.
///
/// The worker owns the sink and its open handles, so this decorator is not
/// serializable; serialize the inner sink instead.
pub struct ThreadedReadsWriter {
    tx: Option<Sender<SeqRecord>>,
    worker: Option<JoinHandle<WriterResult<()>>>,
    capacity: Option<usize>,
    finished: bool,
}

impl ThreadedReadsWriter {
    /// Moves `inner` to a worker thread fed by a queue of `capacity` records, unbounded if `None`.
    pub fn new<W: ReadsWriter + 'static>(inner: W, capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(cap) => bounded::<SeqRecord>(cap.max(1)),
            None => unbounded::<SeqRecord>(),
        };
        let worker = thread::Builder::new()
            .name("readsim-writer".to_string())
            .spawn(move || {
                let mut inner = inner;
                let mut first_error = None;
                for record in rx {
                    if first_error.is_some() {
                        continue;
                    }
                    if let Err(err) = inner.write_read(&record) {
                        error!("Background reads writer failed on '{}': {err}", record.id);
                        first_error = Some(err);
                    }
                }
                let finished = inner.finish();
                debug!("Background reads writer exited");
                match first_error {
                    Some(err) => Err(err),
                    None => finished,
                }
            })
            .expect("failed to spawn readsim writer worker");

        Self {
            tx: Some(tx),
            worker: Some(worker),
            capacity,
            finished: false,
        }
    }

    /// Queue capacity, `None` for unbounded.
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl ReadsWriter for ThreadedReadsWriter {
    fn write_read(&mut self, record: &SeqRecord) -> WriterResult<()> {
        let tx = self.tx.as_ref().ok_or(WriterError::Finished)?;
        tx.send(record.clone()).map_err(|_| WriterError::WorkerGone)
    }

    fn finish(&mut self) -> WriterResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        // Closing the queue lets the worker drain it and finish the sink.
        drop(self.tx.take());
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| WriterError::WorkerPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for ThreadedReadsWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            error!("Background reads writer failed: {err}");
        }
    }
}

impl std::fmt::Debug for ThreadedReadsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedReadsWriter")
            .field("capacity", &self.capacity)
            .field("queued", &self.tx.as_ref().map_or(0, Sender::len))
            .field("finished", &self.finished)
            .finish()
    }
}
