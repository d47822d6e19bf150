//! Processing pipeline and datastore abstraction.
//!
//! The concrete pipeline, its backing store and the display are owned by the
//! embedding application; the live core consumes them through these traits
//! and replaces them wholesale on reset, never mutating one in place.

pub mod health;

use crate::display::{FrameDisplay, WindowLocation};
use crate::error::InsertError;
use crate::frame::FrameObservation;
use std::sync::Arc;

/// A processing pipeline bound to a backing store.
///
/// Live mode uses a synchronous pipeline: `insert_frame` returns only after
/// the frame has passed every stage and reached the store. Insertions from
/// concurrent sources are serialized by the caller.
pub trait FramePipeline: Send + Sync {
    fn insert_frame(&self, frame: &FrameObservation) -> Result<(), InsertError>;

    /// Halt the pipeline; further insertions fail with
    /// [`InsertError::Halted`].
    fn halt(&self);

    /// Clear any accumulated processing-error backlog so a future run starts
    /// clean.
    fn clear_errors(&self);

    /// Channel display names recorded in the store's summary metadata.
    fn channel_names(&self) -> Vec<String>;

    /// Persist channel display names into the store's summary metadata.
    fn set_channel_names(&self, names: Vec<String>) -> Result<(), InsertError>;
}

/// Builds the pipeline/store pair and the display bound to it.
///
/// Called on every reset; implementations must not call back into the live
/// manager synchronously.
pub trait ViewFactory: Send + Sync {
    /// A fresh in-memory store with a fresh synchronous pipeline bound to it.
    fn create_pipeline(&self) -> Arc<dyn FramePipeline>;

    /// A fresh display bound to the given pipeline's store, placed at
    /// `location` when the previous display's position is known.
    fn create_display(
        &self,
        pipeline: &Arc<dyn FramePipeline>,
        location: Option<WindowLocation>,
    ) -> Arc<dyn FrameDisplay>;
}
