//! Single-threaded delayed runner for grab iterations.
//!
//! One worker thread per manager, strictly sequential: an iteration re-arms
//! the next one only after it completes, so two grabs never run concurrently.

use super::cancel::SessionToken;
use super::manager::LiveCore;
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// One scheduled grab iteration.
pub(crate) struct GrabJob {
    pub run_at: Instant,
    pub session: u64,
    pub token: SessionToken,
}

pub(crate) struct GrabScheduler {
    tx: Mutex<Option<Sender<GrabJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GrabScheduler {
    pub fn spawn(core: Weak<LiveCore>) -> Self {
        let (tx, rx) = unbounded::<GrabJob>();
        let handle = thread::Builder::new()
            .name("liveframe-grab".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let Some(core) = core.upgrade() else { break };
                    // Interruptible wait until the scheduled fire time; a
                    // cancelled session skips its pending iteration.
                    let now = Instant::now();
                    if job.run_at > now && job.token.wait_timeout(job.run_at - now) {
                        continue;
                    }
                    if job.token.cancelled() {
                        continue;
                    }
                    core.run_grab_iteration(&job);
                }
            })
            .expect("failed to spawn grab scheduler thread");
        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a job. Silently dropped after shutdown.
    pub fn submit(&self, job: GrabJob) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(job);
        }
    }

    /// Stop accepting work and join the worker thread. Must not be called
    /// from the worker itself.
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
