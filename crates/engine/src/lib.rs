//! Command execution against an abstract map surface.
//!
//! The [`MapSurface`] trait is the sole seam between the command
//! pipeline and whatever actually renders the map. [`CommandExecutor`]
//! extracts directives from AI response text and runs each against the
//! surface inside its own failure boundary. [`LocalSurface`] is the
//! in-process implementation bound to the feature store, the spatial
//! analysis worker pool, and the history tracker.

mod executor;
mod local;
mod surface;
mod tasks;

pub use executor::{CommandExecutor, Measurement, ProcessOutcome, BUFFER_LAYER};
pub use local::{LocalSurface, SessionHandles};
pub use surface::MapSurface;
