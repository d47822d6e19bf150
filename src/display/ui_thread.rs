//! Executor for the UI-affine thread.
//!
//! Display and pipeline objects are only ever touched from this thread. Other
//! threads marshal closures onto it with [`UiThread::invoke_and_wait`]; a
//! call made from the UI thread itself runs inline, so the insertion path can
//! be re-entered (snap display, frozen-store retry) without deadlocking.

use crossbeam_channel::{RecvTimeoutError, Sender, bounded, unbounded};
use log::warn;
use parking_lot::Mutex;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct UiThread {
    tx: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    warn_after: Duration,
}

impl UiThread {
    pub fn spawn(warn_after: Duration) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let (id_tx, id_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("liveframe-display".to_string())
            .spawn(move || {
                let _ = id_tx.send(thread::current().id());
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .expect("failed to spawn display thread");
        let thread_id = id_rx.recv().expect("display thread did not start");
        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            thread_id,
            warn_after,
        }
    }

    /// Whether the calling thread is the UI thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `f` on the UI thread and wait for its result. Runs inline when
    /// already on the UI thread. Returns `None` when the executor has shut
    /// down, in which case `f` never ran.
    pub fn invoke_and_wait<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Some(f());
        }

        let tx = self.tx.lock().clone()?;
        let (done_tx, done_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = done_tx.send(f());
        });
        if tx.send(job).is_err() {
            return None;
        }

        // The wait is bounded: log and keep waiting rather than block
        // silently behind a slow display operation.
        loop {
            match done_rx.recv_timeout(self.warn_after) {
                Ok(result) => return Some(result),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "display thread busy for more than {}ms; still waiting",
                        self.warn_after.as_millis()
                    );
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Stop accepting work and join the thread. Pending jobs run to
    /// completion first. Must not be called from the UI thread itself.
    pub fn shutdown(&self) {
        debug_assert!(!self.is_current());
        drop(self.tx.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
