//! Frame types shared between the hardware layer and the live pipeline.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pixel geometry and sample format of a frame.
///
/// Any change in these fields between two frames on the same channel forces
/// the datastore and display to be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    /// Bit depth expressed as bytes per pixel per component.
    pub bytes_per_pixel: u8,
    /// Number of color components (1 for grayscale, 3 for RGB).
    pub components: u8,
}

impl FrameFormat {
    /// 8-bit single-component format, the common case in tests and harnesses.
    pub fn gray8(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel: 1,
            components: 1,
        }
    }
}

/// Unique identity token attached to a frame.
///
/// A fresh token is assigned every time a frame is relabeled for display, so
/// downstream change detection treats it as new even when the pixel content
/// is identical to the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameIdentity(u64);

impl FrameIdentity {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A single frame as delivered to the pipeline and display.
///
/// Produced from a [`crate::hal::RawFrame`] by the frame router, which rewrites
/// the time coordinate to 0, resolves the channel index and assigns a fresh
/// identity. Cloning is cheap: pixel data is shared.
#[derive(Debug, Clone)]
pub struct FrameObservation {
    pub identity: FrameIdentity,
    /// Resolved camera channel index.
    pub channel: usize,
    /// Time coordinate; always 0 for live frames.
    pub time: u32,
    pub format: FrameFormat,
    /// Hardware sequence number, when the source provides one.
    pub sequence: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// Hardware-native tag map carried along for downstream consumers.
    pub tags: Map<String, Value>,
    pub pixels: Arc<[u8]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_identities_are_distinct() {
        let a = FrameIdentity::fresh();
        let b = FrameIdentity::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn format_equality_covers_all_fields() {
        let base = FrameFormat::gray8(64, 48);
        assert_eq!(base, FrameFormat::gray8(64, 48));
        assert_ne!(base, FrameFormat::gray8(64, 50));
        assert_ne!(
            base,
            FrameFormat {
                bytes_per_pixel: 2,
                ..base
            }
        );
        assert_ne!(
            base,
            FrameFormat {
                components: 3,
                ..base
            }
        );
    }
}
