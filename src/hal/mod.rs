//! Hardware frame source abstraction.
//!
//! The core never talks to camera hardware directly; it consumes this trait.
//! Continuous acquisition is a singleton hardware resource: frames are
//! captured on an internal timer into a bounded ring buffer that the core
//! drains out-of-band via [`FrameSource::pull_frame_at`].

pub mod mock;

use crate::frame::{FrameFormat, FrameIdentity, FrameObservation};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Tag key carrying the camera channel index for a frame, when the hardware
/// provides one. Multi-camera adapters stamp this on every frame.
pub fn channel_index_tag(camera_name: &str) -> String {
    format!("{camera_name}-CameraChannelIndex")
}

/// A frame as pulled from the hardware ring buffer, before relabeling.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub format: FrameFormat,
    /// Hardware sequence number, when the adapter numbers its frames.
    pub sequence: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// Hardware-native tag map (device properties, channel index, ...).
    pub tags: Map<String, Value>,
    pub pixels: Arc<[u8]>,
}

impl RawFrame {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            sequence: None,
            timestamp: Utc::now(),
            tags: Map::new(),
            pixels: Arc::from([]),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.tags.insert(key.into(), value);
        self
    }

    pub fn with_pixels(mut self, pixels: impl Into<Arc<[u8]>>) -> Self {
        self.pixels = pixels.into();
        self
    }

    /// Relabel for live display: time coordinate 0, the resolved channel, and
    /// a fresh identity so downstream change detection treats it as new.
    pub fn into_observation(self, channel: usize) -> FrameObservation {
        FrameObservation {
            identity: FrameIdentity::fresh(),
            channel,
            time: 0,
            format: self.format,
            sequence: self.sequence,
            timestamp: self.timestamp,
            tags: self.tags,
            pixels: self.pixels,
        }
    }
}

/// Interface presented by the camera hardware layer.
///
/// `start_continuous` and `stop_acquisition` must never be issued
/// concurrently from two call paths; the live manager serializes them behind
/// a non-reentrant gate.
pub trait FrameSource: Send + Sync {
    /// Put the hardware into continuous acquisition mode.
    fn start_continuous(&self) -> anyhow::Result<()>;

    /// Ask the hardware to leave continuous acquisition mode. Completion is
    /// confirmed by polling [`FrameSource::is_acquiring`].
    fn stop_acquisition(&self) -> anyhow::Result<()>;

    /// Whether continuous acquisition is physically running.
    fn is_acquiring(&self) -> bool;

    /// Number of camera channels the hardware currently exposes.
    fn channel_count(&self) -> usize;

    /// Current exposure time in milliseconds.
    fn exposure_ms(&self) -> f64;

    /// Name of the current camera device, used to resolve per-frame tags.
    fn camera_name(&self) -> String;

    /// Name of the currently selected channel configuration. Feeds the
    /// per-channel display names recorded in the store summary metadata.
    fn current_channel_config(&self) -> String;

    /// Newest-relative access into the hardware ring buffer: 0 is the most
    /// recent frame, 1 the one before it, and so on. `None` when no frame is
    /// available at that position.
    fn pull_frame_at(&self, n_before_last: usize) -> Option<RawFrame>;

    /// Capture a single frame set (one per channel) outside continuous mode.
    fn snap(&self) -> anyhow::Result<Vec<RawFrame>>;

    /// Blocking sleep on the hardware clock. The default is a plain thread
    /// sleep; adapters with their own timebase may override.
    fn sleep(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
