use carto_geo::{Feature, JsonObject};
use carto_history::HistoryState;
use serde::{Deserialize, Serialize};

/// Layer type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Feature,
    Marker,
    Vector,
}

/// Default rendering style for a layer, and the shape `style_feature`
/// payloads deserialize into. All fields optional; unknown keys in
/// AI-supplied style JSON are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
}

impl LayerStyle {
    /// Best-effort conversion from an open style JSON object.
    pub fn from_json(style: &JsonObject) -> Self {
        serde_json::from_value(serde_json::Value::Object(style.clone())).unwrap_or_default()
    }
}

/// Named, ordered container of features. Owned by exactly one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<LayerStyle>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// Named, ordered container of layers with its own visibility flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerGroup {
    pub id: String,
    pub name: String,
    pub visible: bool,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

/// The externally observable snapshot of the whole map: view, layer
/// tree, selection, and the bounded history sub-state. This is exactly
/// the persisted JSON document shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapState {
    /// View center as `[lat, lng]`.
    pub center: [f64; 2],
    pub zoom: f64,
    pub layers: Vec<LayerGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_layer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_feature_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryState>,
}

impl Default for MapState {
    fn default() -> Self {
        Self {
            center: [51.505, -0.09],
            zoom: 13.0,
            layers: Vec::new(),
            active_layer_id: None,
            selected_feature_ids: Vec::new(),
            history: None,
        }
    }
}
