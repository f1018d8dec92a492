//! Feature model and spatial analysis for the Carto map engine.
//!
//! Features follow the GeoJSON interchange shape (`geojson::Feature`):
//! a geometry, an open-ended `properties` object, and an optional
//! string-or-number id. This crate adds the id/coordinate helpers the
//! rest of the workspace builds on, plus the spatial analysis functions.
//!
//! Analysis functions deliberately return safe defaults instead of
//! errors: they run inside an AI-command pipeline where a single bad
//! directive must not abort the rest of the response. Failures are
//! logged at `warn`. The clustering crate takes the opposite stance;
//! see `carto-cluster`.

pub mod analysis;
pub mod feature;
pub mod units;

pub use feature::{
    ensure_feature_id, extract_coordinates, feature_center, feature_id_matches,
    is_editable_feature, new_point_feature, replace_coordinates,
};
pub use units::DistanceUnit;

pub use geojson;
pub use geojson::feature::Id as FeatureId;
pub use geojson::{Feature, JsonObject, JsonValue};
