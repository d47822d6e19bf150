//! Error taxonomy for the live acquisition core.
//!
//! None of these propagate as panics across the scheduler boundary: a failed
//! grab iteration is logged and the loop re-arms, unless the failure
//! specifically halts live mode.

use thiserror::Error;

/// Failures surfaced by the live-mode control surface and the grab scheduler.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The hardware refused to start continuous acquisition. The start is
    /// abandoned and nominal live mode is forced back off.
    #[error("couldn't start continuous acquisition: {0}")]
    HardwareStart(anyhow::Error),

    /// The hardware failed to stop cleanly. The scheduler stays stopped
    /// regardless.
    #[error("failed to stop continuous acquisition: {0}")]
    HardwareStop(anyhow::Error),

    /// A hardware start/stop is already in flight on another call path.
    /// The request was short-circuited to avoid contending for the camera
    /// lock; nominal state is unchanged by the short-circuit itself.
    #[error("a hardware start/stop operation is already in flight")]
    Busy,

    /// A frame carried a malformed per-camera tag. The whole grab cycle is
    /// aborted, since malformed tags indicate a systemic issue.
    #[error("malformed frame tag metadata: {0}")]
    MetadataParse(String),

    /// Single-frame capture failed.
    #[error("failed to snap image: {0}")]
    Snap(anyhow::Error),
}

/// Result of handing a frame to the pipeline/datastore.
#[derive(Debug, Error)]
pub enum InsertError {
    /// The datastore has been frozen out-of-band (e.g. persisted by the
    /// user). Expected transient: the store and display are recreated and
    /// the frame is retried once.
    #[error("datastore is frozen")]
    Frozen,

    /// The datastore rejected the write even though it is erasable. Treated
    /// as an invariant violation: reported, acquisition continues.
    #[error("datastore rejected the write")]
    Rejected,

    /// The pipeline has already been halted.
    #[error("pipeline is halted")]
    Halted,

    /// A processor failed while handling the frame. Halts live mode and
    /// clears the error backlog so a future run starts clean.
    #[error("error while processing frame: {0}")]
    Processing(String),
}
