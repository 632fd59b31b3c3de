//! Supply of source reads to channels.
//!
//! A [`ReadPool`] hands out every record exactly once, to whichever caller
//! asks first, until it runs dry; from then on every caller gets `Ok(None)`.
//! Closing a pool releases its resources and makes later calls fail with
//! [`OperationError::PoolClosed`].

mod fasta;
mod threaded;

pub use fasta::{FastaIndex, FastaReadPool};
pub use threaded::ThreadedReadPool;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{OperationError, SimError, SimResult};
use crate::record::SourceRead;

/// Thread-safe source of reads.
pub trait ReadPool: Send + Sync {
    /// Takes the next record, `Ok(None)` once the pool is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::PoolClosed` after [`ReadPool::close`], an
    /// I/O error from the backing store, or a configuration error for a
    /// malformed record, which the pool moves past.
    fn next_record(&self) -> SimResult<Option<SourceRead>>;

    /// Releases the pool. Idempotent.
    fn close(&self);
}

/// Pool over reads held in memory.
#[derive(Debug, Default)]
pub struct InMemoryReadPool {
    reads: Mutex<VecDeque<SourceRead>>,
    closed: AtomicBool,
}

impl InMemoryReadPool {
    #[must_use]
    pub fn new(reads: impl IntoIterator<Item = SourceRead>) -> Self {
        Self {
            reads: Mutex::new(reads.into_iter().collect()),
            closed: AtomicBool::new(false),
        }
    }

    /// Reads not handed out yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.reads.lock().map_or(0, |reads| reads.len())
    }
}

impl ReadPool for InMemoryReadPool {
    fn next_record(&self) -> SimResult<Option<SourceRead>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OperationError::PoolClosed.into());
        }
        let mut reads = self
            .reads
            .lock()
            .map_err(|_| SimError::internal("read pool lock poisoned"))?;
        Ok(reads.pop_front())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut reads) = self.reads.lock() {
            reads.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_pool_hands_out_in_order_then_none() {
        let pool = InMemoryReadPool::new(vec![SourceRead::new("a", "AC"), SourceRead::new("b", "GT")]);
        assert_eq!(pool.remaining(), 2);
        assert_eq!(pool.next_record().unwrap().unwrap().id, "a");
        assert_eq!(pool.next_record().unwrap().unwrap().id, "b");
        assert!(pool.next_record().unwrap().is_none());
        assert!(pool.next_record().unwrap().is_none());
    }

    #[test]
    fn test_closed_pool_fails() {
        let pool = InMemoryReadPool::new(vec![SourceRead::new("a", "AC")]);
        pool.close();
        pool.close();
        let err = pool.next_record().unwrap_err();
        assert!(matches!(err, SimError::Operation(OperationError::PoolClosed)));
        assert_eq!(pool.remaining(), 0);
    }
}
