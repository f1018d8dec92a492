use carto_geo::{DistanceUnit, Feature, JsonObject};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What a `measure` directive computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureKind {
    Distance,
    Area,
}

impl FromStr for MeasureKind {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "distance" => Ok(MeasureKind::Distance),
            "area" => Ok(MeasureKind::Area),
            _ => Err(()),
        }
    }
}

/// A parsed map command. Exactly seven kinds exist; the serialized form
/// is `{"type": "...", "parameters": {...}}`.
///
/// Coordinates follow directive order, `[lat, lng]`. Features are full
/// GeoJSON feature objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum Command {
    ZoomTo {
        coordinates: [f64; 2],
        #[serde(skip_serializing_if = "Option::is_none")]
        zoom: Option<u32>,
    },
    AddFeature {
        feature: Feature,
        #[serde(skip_serializing_if = "Option::is_none")]
        layer_id: Option<String>,
    },
    ModifyFeature {
        feature_id: String,
        properties: JsonObject,
    },
    RemoveFeature {
        feature_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        layer_id: Option<String>,
    },
    StyleFeature {
        feature_id: String,
        style: JsonObject,
    },
    Measure {
        kind: MeasureKind,
        features: Vec<Feature>,
    },
    Buffer {
        feature: Feature,
        distance: f64,
        units: DistanceUnit,
    },
}

impl Command {
    /// Directive name of this command, as written in AI text.
    pub fn name(&self) -> &'static str {
        match self {
            Command::ZoomTo { .. } => "zoom_to",
            Command::AddFeature { .. } => "add_feature",
            Command::ModifyFeature { .. } => "modify_feature",
            Command::RemoveFeature { .. } => "remove_feature",
            Command::StyleFeature { .. } => "style_feature",
            Command::Measure { .. } => "measure",
            Command::Buffer { .. } => "buffer",
        }
    }

    /// Whether `name` is one of the seven recognized directive names.
    pub fn is_known_name(name: &str) -> bool {
        matches!(
            name,
            "zoom_to"
                | "add_feature"
                | "modify_feature"
                | "remove_feature"
                | "style_feature"
                | "measure"
                | "buffer"
        )
    }
}
