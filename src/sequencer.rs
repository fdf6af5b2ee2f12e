//! Single-worker, strictly ordered work queue.
//!
//! Any number of threads may [`Sequencer::submit`] work; items run one at a
//! time on a dedicated worker thread in submission order. A failing or
//! panicking item is logged and the worker moves on to the next one.
//!
//! Shutdown closes the intake, waits for queued work up to a timeout, and
//! reports (rather than silently drops) anything still pending after it.

use crate::error::{Result, SyncError};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// One queued unit of work.
struct WorkItem {
    id: u64,
    label: &'static str,
    job: Job,
}

/// Counters shared with the worker thread.
#[derive(Default)]
struct Shared {
    pending: AtomicUsize,
    executed: AtomicU64,
    failed: AtomicU64,
    /// Set when shutdown timed out; the worker skips anything it dequeues after.
    abandon: AtomicBool,
    /// Items the worker itself skipped after `abandon` was set.
    abandoned: AtomicUsize,
}

/// Outcome of a clean shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Items that ran to completion (successfully).
    pub executed: u64,
    /// Items that returned an error or panicked.
    pub failed: u64,
}

/// Ordered work queue with exactly one worker.
pub struct Sequencer {
    name: String,
    sender: RwLock<Option<Sender<WorkItem>>>,
    /// Kept to drain abandoned items after a shutdown timeout.
    receiver: Receiver<WorkItem>,
    /// Disconnects when the worker exits.
    done: Mutex<Option<Receiver<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl Sequencer {
    /// Spawn the worker thread.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<WorkItem>();
        let (done_tx, done_rx) = bounded::<()>(0);
        let shared = Arc::new(Shared::default());

        let worker = {
            let receiver = receiver.clone();
            let shared = Arc::clone(&shared);
            let name = name.clone();
            thread::Builder::new().name(name.clone()).spawn(move || {
                // Dropped on exit, which disconnects `done`.
                let _done = done_tx;
                run_worker(&name, receiver, &shared);
            })?
        };

        debug!(sequencer = %name, "sequencer started");

        Ok(Self {
            name,
            sender: RwLock::new(Some(sender)),
            receiver,
            done: Mutex::new(Some(done_rx)),
            worker: Mutex::new(Some(worker)),
            shared,
            next_id: AtomicU64::new(1),
        })
    }

    /// Enqueue a unit of work. Never blocks; returns the item id.
    pub fn submit<F>(&self, label: &'static str, work: F) -> Result<u64>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(SyncError::SequencerStopped)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        let item = WorkItem {
            id,
            label,
            job: Box::new(work),
        };
        if sender.send(item).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncError::SequencerStopped);
        }
        Ok(id)
    }

    /// Stop accepting work and wait up to `timeout` for queued items.
    ///
    /// Items still queued when the timeout elapses are drained without
    /// running, logged, and counted in [`SyncError::ShutdownTimeout`].
    pub fn shutdown(&self, timeout: Duration) -> Result<ShutdownReport> {
        if self.sender.write().take().is_none() {
            return Err(SyncError::SequencerStopped);
        }

        let done = self.done.lock().take().ok_or(SyncError::SequencerStopped)?;

        match done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.lock().take() {
                    if worker.join().is_err() {
                        error!(sequencer = %self.name, "sequencer worker panicked");
                    }
                }
                let report = self.report();
                info!(
                    sequencer = %self.name,
                    executed = report.executed,
                    failed = report.failed,
                    "sequencer shut down"
                );
                Ok(report)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.shared.abandon.store(true, Ordering::SeqCst);

                let mut abandoned = 0;
                for item in self.receiver.try_iter() {
                    self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                    warn!(
                        sequencer = %self.name,
                        item = item.id,
                        label = item.label,
                        "abandoning work item at shutdown"
                    );
                    abandoned += 1;
                }

                // An item the worker dequeued during the drain is still
                // counted in `pending` until the worker settles it.
                let settle = Instant::now() + Duration::from_millis(50);
                while self.shared.pending.load(Ordering::SeqCst) > 0 && Instant::now() < settle {
                    thread::yield_now();
                }
                abandoned += self.shared.abandoned.load(Ordering::SeqCst);

                // The worker is stuck in an item; leave it detached.
                self.worker.lock().take();

                error!(
                    sequencer = %self.name,
                    abandoned,
                    timeout_ms = timeout.as_millis() as u64,
                    "sequencer shutdown timed out"
                );
                Err(SyncError::ShutdownTimeout { abandoned, timeout })
            }
        }
    }

    /// Close the intake without waiting. Queued work still runs.
    pub fn close(&self) {
        if self.sender.write().take().is_some() {
            debug!(sequencer = %self.name, "sequencer intake closed");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Items queued but not yet started.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> ShutdownReport {
        ShutdownReport {
            executed: self.shared.executed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        // Let the worker drain and exit on its own.
        self.sender.get_mut().take();
    }
}

fn run_worker(name: &str, receiver: Receiver<WorkItem>, shared: &Shared) {
    while let Ok(item) = receiver.recv() {
        if shared.abandon.load(Ordering::SeqCst) {
            warn!(
                sequencer = %name,
                item = item.id,
                label = item.label,
                "abandoning work item at shutdown"
            );
            shared.abandoned.fetch_add(1, Ordering::SeqCst);
            shared.pending.fetch_sub(1, Ordering::SeqCst);
            continue;
        }
        shared.pending.fetch_sub(1, Ordering::SeqCst);

        let WorkItem { id, label, job } = item;
        match catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => {
                shared.executed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                error!(sequencer = %name, item = id, label, error = %e, "work item failed");
            }
            Err(panic) => {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    sequencer = %name,
                    item = id,
                    label,
                    panic = %panic_message(panic.as_ref()),
                    "work item panicked"
                );
            }
        }
    }

    debug!(sequencer = %name, "sequencer worker exiting");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
