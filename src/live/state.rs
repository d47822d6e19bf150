//! Mutable state guarded by the live-mode and grab locks.

use super::cancel::SessionToken;
use crate::frame::FrameObservation;

/// Nominal live-mode state, independent of the suspend depth.
///
/// The hardware is physically acquiring iff `is_live_on` and
/// `suspend_count == 0`.
pub(crate) struct LiveState {
    pub is_live_on: bool,
    /// Reentrant suspend depth; never goes below zero.
    pub suspend_count: u32,
}

impl LiveState {
    pub fn new() -> Self {
        Self {
            is_live_on: false,
            suspend_count: 0,
        }
    }
}

/// Parameters of the currently running acquisition session, captured from the
/// hardware at start time.
pub(crate) struct ActiveSession {
    /// Monotonically increasing session id; scheduled work carrying a stale
    /// id must no-op.
    pub id: u64,
    pub token: SessionToken,
    pub exposure_ms: f64,
    pub channel_count: usize,
    pub camera: String,
}

/// State guarded by the grab lock: the scheduling handle and the per-channel
/// last-frame table.
pub(crate) struct GrabState {
    /// Sessions started so far; the source of session ids.
    pub start_count: u64,
    /// Existence of this handle is the sole signal that the scheduler loop
    /// should keep re-arming itself.
    pub scheduled: Option<ActiveSession>,
    /// Most recently displayed frame per channel. Cleared on every
    /// acquisition (re)start and on every datastore reset.
    pub last_frames: Vec<Option<FrameObservation>>,
}

impl GrabState {
    pub fn new() -> Self {
        Self {
            start_count: 0,
            scheduled: None,
            last_frames: Vec::new(),
        }
    }

    pub fn last_for(&self, channel: usize) -> Option<&FrameObservation> {
        self.last_frames.get(channel).and_then(Option::as_ref)
    }

    pub fn record_last(&mut self, channel: usize, frame: FrameObservation) {
        if self.last_frames.len() <= channel {
            self.last_frames.resize_with(channel + 1, || None);
        }
        self.last_frames[channel] = Some(frame);
    }
}
