//! The authoritative in-memory map model: layer groups, layers,
//! features, view state, plus snapshot persistence and export.
//!
//! Mutations go through [`FeatureStore`]'s operations only; lookup
//! misses come back as `false`/`None` with a `warn` log, never as
//! errors. Snapshot and export I/O uses [`error::StoreError`].

pub mod error;
pub mod export;
pub mod snapshot;
mod store;
mod types;

pub use error::{Result, StoreError};
pub use snapshot::{AutoSaver, AutoSaverConfig, FileSnapshotSink, SnapshotSink, STATE_KEY};
pub use store::FeatureStore;
pub use types::{Layer, LayerGroup, LayerKind, LayerStyle, MapState};
