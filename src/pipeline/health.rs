//! Counters for the live acquisition path.
//!
//! All fields use atomic operations for thread-safe access from the grab
//! scheduler, the display thread and embedder threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Observability counters kept by a live manager.
pub struct LiveHealth {
    /// Frames delivered to the pipeline.
    frames_routed: AtomicU64,

    /// Frames rejected at insertion because their sequence number was not
    /// strictly greater than the last accepted frame on the same channel.
    frames_rejected: AtomicU64,

    /// Frames the hardware produced but the core never saw, attributed from
    /// sequence-number gaps at insertion time.
    frames_dropped: AtomicU64,

    /// Ring-buffer positions scanned with no frame available.
    buffer_underruns: AtomicU64,

    /// Grab cycles aborted because of malformed frame tag metadata.
    metadata_failures: AtomicU64,

    /// Grab cycles that stopped at the cancellation boundary.
    cycles_cancelled: AtomicU64,

    /// Datastore/display resets.
    resets: AtomicU64,

    /// Writes rejected by an erasable store (invariant violations).
    invariant_violations: AtomicU64,

    /// Unix timestamp (microseconds) of the last frame routed.
    last_frame_time: AtomicU64,
}

impl LiveHealth {
    pub fn new() -> Self {
        Self {
            frames_routed: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            buffer_underruns: AtomicU64::new(0),
            metadata_failures: AtomicU64::new(0),
            cycles_cancelled: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_frame_routed(&self) {
        let now_micros = chrono::Utc::now().timestamp_micros().max(0) as u64;
        self.last_frame_time.store(now_micros, Ordering::Relaxed);
        self.frames_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frames_dropped(&self, gap: u64) {
        self.frames_dropped.fetch_add(gap, Ordering::Relaxed);
    }

    pub(crate) fn record_buffer_underrun(&self) {
        self.buffer_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_metadata_failure(&self) {
        self.metadata_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle_cancelled(&self) {
        self.cycles_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invariant_violation(&self) {
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_routed(&self) -> u64 {
        self.frames_routed.load(Ordering::Relaxed)
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn buffer_underruns(&self) -> u64 {
        self.buffer_underruns.load(Ordering::Relaxed)
    }

    pub fn metadata_failures(&self) -> u64 {
        self.metadata_failures.load(Ordering::Relaxed)
    }

    pub fn cycles_cancelled(&self) -> u64 {
        self.cycles_cancelled.load(Ordering::Relaxed)
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    pub fn last_frame_time_micros(&self) -> u64 {
        self.last_frame_time.load(Ordering::Relaxed)
    }

    /// Fraction of hardware frames lost between the sequence buffer and the
    /// display, in [0, 1].
    pub fn frame_drop_rate(&self) -> f64 {
        let dropped = self.frames_dropped();
        let routed = self.frames_routed();
        if dropped + routed == 0 {
            return 0.0;
        }
        dropped as f64 / (dropped + routed) as f64
    }
}

impl Default for LiveHealth {
    fn default() -> Self {
        Self::new()
    }
}
