//! Scripted frame source for tests and harnesses.

use super::{FrameSource, RawFrame, channel_index_tag};
use crate::frame::FrameFormat;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-memory [`FrameSource`] backed by a scripted ring buffer.
///
/// `start_continuous`/`stop_acquisition` just flip the acquiring flag, so the
/// "physically running iff nominal on and not suspended" invariant can be
/// checked synchronously after every state-machine call.
pub struct MockSource {
    state: Mutex<MockState>,
    acquiring: AtomicBool,
    fail_start: AtomicBool,
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
    snap_calls: AtomicU64,
}

struct MockState {
    channel_count: usize,
    exposure_ms: f64,
    camera: String,
    channel_config: String,
    /// Indexed newest-relative, mirroring `pull_frame_at`.
    buffer: Vec<Option<RawFrame>>,
    snap_frames: Vec<RawFrame>,
}

impl MockSource {
    pub fn new(channel_count: usize, exposure_ms: f64) -> Self {
        Self {
            state: Mutex::new(MockState {
                channel_count,
                exposure_ms,
                camera: "MockCam".to_string(),
                channel_config: "Default".to_string(),
                buffer: Vec::new(),
                snap_frames: Vec::new(),
            }),
            acquiring: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            start_calls: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
            snap_calls: AtomicU64::new(0),
        }
    }

    /// A frame carrying the camera channel tag, the way multi-camera
    /// adapters stamp theirs.
    pub fn tagged_frame(&self, channel: usize, sequence: u64, format: FrameFormat) -> RawFrame {
        let camera = self.state.lock().camera.clone();
        RawFrame::new(format)
            .with_sequence(sequence)
            .with_tag(channel_index_tag(&camera), Value::from(channel as u64))
    }

    pub fn set_buffer(&self, buffer: Vec<Option<RawFrame>>) {
        self.state.lock().buffer = buffer;
    }

    pub fn set_snap_frames(&self, frames: Vec<RawFrame>) {
        self.state.lock().snap_frames = frames;
    }

    pub fn set_channel_count(&self, channel_count: usize) {
        self.state.lock().channel_count = channel_count;
    }

    pub fn set_channel_config(&self, name: impl Into<String>) {
        self.state.lock().channel_config = name.into();
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn snap_calls(&self) -> u64 {
        self.snap_calls.load(Ordering::SeqCst)
    }
}

impl FrameSource for MockSource {
    fn start_continuous(&self) -> anyhow::Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("mock start failure");
        }
        self.acquiring.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_acquisition(&self) -> anyhow::Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.acquiring.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_acquiring(&self) -> bool {
        self.acquiring.load(Ordering::SeqCst)
    }

    fn channel_count(&self) -> usize {
        self.state.lock().channel_count
    }

    fn exposure_ms(&self) -> f64 {
        self.state.lock().exposure_ms
    }

    fn camera_name(&self) -> String {
        self.state.lock().camera.clone()
    }

    fn current_channel_config(&self) -> String {
        self.state.lock().channel_config.clone()
    }

    fn pull_frame_at(&self, n_before_last: usize) -> Option<RawFrame> {
        self.state
            .lock()
            .buffer
            .get(n_before_last)
            .and_then(|slot| slot.clone())
    }

    fn snap(&self) -> anyhow::Result<Vec<RawFrame>> {
        self.snap_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().snap_frames.clone())
    }

    fn sleep(&self, ms: u64) {
        // Keep test stop-polling fast but still yield.
        std::thread::sleep(std::time::Duration::from_millis(ms.min(1)));
    }
}
