use anyhow::Result;
use async_trait::async_trait;
use carto_geo::{DistanceUnit, Feature, JsonObject};
use carto_protocol::MeasureKind;
use carto_store::LayerStyle;

/// The capability object a command executor drives. This is the only
/// seam between the command pipeline and a concrete map renderer; every
/// method may fail and failures are isolated per command by the
/// executor.
#[async_trait]
pub trait MapSurface: Send + Sync {
    /// Move the view. `center` is `[lat, lng]`; `zoom` keeps the
    /// current level when `None`.
    async fn zoom_to(&self, center: [f64; 2], zoom: Option<u32>) -> Result<()>;

    /// Add a feature to the addressed layer, optionally applying a
    /// default style to that layer.
    async fn add_feature(
        &self,
        feature: Feature,
        layer_id: &str,
        style: Option<LayerStyle>,
    ) -> Result<()>;

    /// Merge properties into an existing feature.
    async fn modify_feature(&self, feature_id: &str, properties: &JsonObject) -> Result<()>;

    /// Remove a feature; the containing layer is located by scan when
    /// `layer_id` is `None`.
    async fn remove_feature(&self, feature_id: &str, layer_id: Option<&str>) -> Result<()>;

    /// Apply style properties to a single feature.
    async fn style_feature(&self, feature_id: &str, style: &JsonObject) -> Result<()>;

    /// Compute a distance (km) or area (km²) over the given features.
    async fn measure(&self, kind: MeasureKind, features: &[Feature]) -> Result<f64>;

    /// Produce a buffered polygon feature around the input.
    async fn buffer(&self, feature: &Feature, distance: f64, units: DistanceUnit)
        -> Result<Feature>;
}
