//! Live camera acquisition core.
//!
//! [`LiveManager`] owns live mode for one camera source: it starts and stops
//! continuous acquisition, paces grab iterations off the exposure time and
//! the display's observed draw cadence, dedupes and relabels frames pulled
//! from the hardware ring buffer, and manages the lifecycle of the
//! pipeline/datastore/display triple it routes frames into.
//!
//! The embedding application provides the hardware ([`FrameSource`]) and the
//! view layer ([`ViewFactory`], [`FramePipeline`], [`FrameDisplay`]); the
//! manager provides the policy.

pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod frame;
pub mod hal;
pub mod live;
pub mod pipeline;

pub use config::LiveConfig;
pub use display::{FrameDisplay, WindowLocation};
pub use error::{InsertError, LiveError};
pub use events::{LiveModeEvent, LiveModeListener};
pub use frame::{FrameFormat, FrameIdentity, FrameObservation};
pub use hal::{FrameSource, RawFrame};
pub use live::LiveManager;
pub use live::delay::compute_grab_delay_ms;
pub use pipeline::health::LiveHealth;
pub use pipeline::{FramePipeline, ViewFactory};
