//! Display (viewer) abstraction consumed by the live core.
//!
//! The display is owned by the embedding application and must only be
//! mutated from the UI-affine thread; the live core routes every display
//! call through [`ui_thread::UiThread`].

pub mod ui_thread;

/// On-screen position of a display window, preserved across resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLocation {
    pub x: i32,
    pub y: i32,
}

/// Interface presented by the live/snap display window.
pub trait FrameDisplay: Send + Sync {
    /// Quantile of the recently observed draw intervals, in milliseconds.
    /// Returns 0 when no draws have been observed yet.
    fn recent_draw_interval_quantile(&self, q: f64) -> f64;

    /// Discard the draw-interval history, e.g. when a new acquisition run
    /// starts and the old cadence no longer applies.
    fn reset_interval_estimate(&self);

    /// Whether the user has closed the window out-of-band.
    fn is_closed(&self) -> bool;

    fn close(&self);

    fn bring_to_front(&self);

    /// Current window position, when the window still exists.
    fn location(&self) -> Option<WindowLocation>;
}
