use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, warn};

use super::ReadPool;
use crate::error::{OperationError, SimResult};
use crate::record::SourceRead;

/// Prefetching decorator around another pool.
///
/// A single background worker keeps a bounded queue filled from the inner
/// pool, so callers wait on the queue rather than on the inner pool's I/O.
/// Memory is bounded by the queue capacity.
pub struct ThreadedReadPool {
    inner: Arc<dyn ReadPool>,
    rx: Receiver<SourceRead>,
    /// Dropped on close; wakes the worker and any blocked caller.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    queue_size: usize,
}

impl ThreadedReadPool {
    /// Starts the prefetch worker. `queue_size` is clamped to at least 1.
    pub fn new(inner: Arc<dyn ReadPool>, queue_size: usize) -> Self {
        let queue_size = queue_size.max(1);
        let (tx, rx) = bounded::<SourceRead>(queue_size);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let worker_pool = Arc::clone(&inner);
        let worker_shutdown = shutdown_rx.clone();
        let worker = thread::Builder::new()
            .name("readsim-prefetch".to_string())
            .spawn(move || prefetch_loop(worker_pool.as_ref(), &tx, &worker_shutdown))
            .expect("failed to spawn readsim prefetch worker");

        Self {
            inner,
            rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            queue_size,
        }
    }

    #[must_use]
    pub const fn queue_size(&self) -> usize {
        self.queue_size
    }
}

fn prefetch_loop(pool: &dyn ReadPool, tx: &Sender<SourceRead>, shutdown: &Receiver<()>) {
    loop {
        match pool.next_record() {
            Ok(Some(read)) => {
                select! {
                    send(tx, read) -> res => {
                        if res.is_err() {
                            break;
                        }
                    }
                    recv(shutdown) -> _ => break,
                }
            }
            Ok(None) => {
                debug!("Prefetch worker: inner read pool exhausted");
                break;
            }
            Err(err) if err.is_config() => {
                warn!("Prefetch worker skipping read: {err}");
            }
            Err(err) => {
                warn!("Prefetch worker stopping, inner read pool failed: {err}");
                break;
            }
        }
    }
    debug!("Prefetch worker exited");
}

impl ReadPool for ThreadedReadPool {
    fn next_record(&self) -> SimResult<Option<SourceRead>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OperationError::PoolClosed.into());
        }
        select! {
            // Disconnected once the worker is done and the queue is drained.
            recv(self.rx) -> msg => Ok(msg.ok()),
            recv(self.shutdown_rx) -> _ => Ok(None),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut guard) = self.shutdown_tx.lock() {
            guard.take();
        }
        // Unblocks a worker waiting on the inner pool before joining it.
        self.inner.close();
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
        for _ in self.rx.try_iter() {}
    }
}

impl Drop for ThreadedReadPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ThreadedReadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedReadPool")
            .field("queue_size", &self.queue_size)
            .field("queued", &self.rx.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
