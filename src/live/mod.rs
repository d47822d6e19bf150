//! Live acquisition: state machine, grab scheduling and frame routing.

pub mod delay;

mod cancel;
mod manager;
mod router;
mod scheduler;
mod state;

pub use manager::LiveManager;
