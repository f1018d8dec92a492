//! GeoJSON passthrough and a minimal KML placemark converter.
//!
//! Export consumes the store's visible features. KML output covers
//! Point and LineString placemarks with name/description only; styles
//! and other geometry kinds are out of scope for the converter.

use crate::error::{Result, StoreError};
use crate::store::FeatureStore;
use carto_geo::geojson::{Feature, FeatureCollection, GeoJson, Value};

/// Serialize all visible features as a GeoJSON FeatureCollection.
pub fn to_geojson(store: &FeatureStore) -> Result<String> {
    let collection = FeatureCollection {
        bbox: None,
        features: store.visible_features().cloned().collect(),
        foreign_members: None,
    };
    Ok(serde_json::to_string_pretty(&GeoJson::FeatureCollection(collection))?)
}

/// Parse a GeoJSON document into features, validated by its top-level
/// `type` tag. Accepts a FeatureCollection or a single Feature.
pub fn parse_geojson_features(raw: &str) -> Result<Vec<Feature>> {
    let geojson: GeoJson = raw
        .parse()
        .map_err(|e: carto_geo::geojson::Error| StoreError::UnsupportedImport(e.to_string()))?;
    match geojson {
        GeoJson::FeatureCollection(collection) => Ok(collection.features),
        GeoJson::Feature(feature) => Ok(vec![feature]),
        GeoJson::Geometry(_) => Err(StoreError::UnsupportedImport(
            "bare geometries are not importable; wrap in a Feature".to_string(),
        )),
    }
}

/// Render the store's visible Point and LineString features as KML
/// placemarks. Other geometry kinds are skipped with a log note.
pub fn to_kml(store: &FeatureStore) -> String {
    let mut placemarks = String::new();
    let mut skipped = 0usize;
    for feature in store.visible_features() {
        match placemark(feature) {
            Some(p) => placemarks.push_str(&p),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::info!("kml export skipped {skipped} features with unsupported geometry");
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <kml xmlns=\"http://www.opengis.net/kml/2.2\">\n\
         <Document>\n{placemarks}</Document>\n</kml>\n"
    )
}

fn placemark(feature: &Feature) -> Option<String> {
    let geometry = feature.geometry.as_ref()?;
    let coordinates = match &geometry.value {
        Value::Point(pos) => position_text(pos)?,
        Value::LineString(line) => {
            let mut parts = Vec::with_capacity(line.len());
            for pos in line {
                parts.push(position_text(pos)?);
            }
            parts.join(" ")
        }
        _ => return None,
    };
    let tag = match &geometry.value {
        Value::Point(_) => "Point",
        _ => "LineString",
    };

    let name = property_text(feature, "name");
    let description = property_text(feature, "description");
    let mut out = String::from("  <Placemark>\n");
    if let Some(name) = name {
        out.push_str(&format!("    <name>{}</name>\n", escape_xml(&name)));
    }
    if let Some(description) = description {
        out.push_str(&format!(
            "    <description>{}</description>\n",
            escape_xml(&description)
        ));
    }
    out.push_str(&format!(
        "    <{tag}><coordinates>{coordinates}</coordinates></{tag}>\n"
    ));
    out.push_str("  </Placemark>\n");
    Some(out)
}

fn position_text(pos: &[f64]) -> Option<String> {
    (pos.len() >= 2).then(|| format!("{},{}", pos[0], pos[1]))
}

fn property_text(feature: &Feature, key: &str) -> Option<String> {
    feature
        .properties
        .as_ref()?
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LayerKind;
    use carto_geo::{new_point_feature, JsonObject};

    fn store_with_point(name: &str) -> FeatureStore {
        let mut store = FeatureStore::new();
        let group = store.create_layer_group("Base");
        let layer = store
            .create_layer(&group.id, "POIs", LayerKind::Feature)
            .unwrap();
        let mut props = JsonObject::new();
        props.insert("name".into(), name.into());
        store.add_feature_to_layer(&layer.id, new_point_feature([-0.1246, 51.5007], props));
        store
    }

    #[test]
    fn geojson_round_trip() {
        let store = store_with_point("Big Ben");
        let raw = to_geojson(&store).unwrap();
        let features = parse_geojson_features(&raw).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0].properties.as_ref().unwrap()["name"],
            "Big Ben"
        );
    }

    #[test]
    fn single_feature_documents_import() {
        let raw = r#"{"type":"Feature","geometry":{"type":"Point","coordinates":[0,0]},"properties":{}}"#;
        assert_eq!(parse_geojson_features(raw).unwrap().len(), 1);
        assert!(parse_geojson_features(r#"{"type":"Point","coordinates":[0,0]}"#).is_err());
        assert!(parse_geojson_features("not geojson").is_err());
    }

    #[test]
    fn kml_contains_escaped_placemark() {
        let store = store_with_point("Big <Ben> & Co");
        let kml = to_kml(&store);
        assert!(kml.contains("<name>Big &lt;Ben&gt; &amp; Co</name>"));
        assert!(kml.contains("<coordinates>-0.1246,51.5007</coordinates>"));
        assert!(kml.starts_with("<?xml"));
    }

    #[test]
    fn hidden_layers_are_not_exported() {
        let mut store = store_with_point("Big Ben");
        let layer_id = store.layer_by_name("POIs").unwrap().id.clone();
        store.set_layer_visibility(&layer_id, false);
        let raw = to_geojson(&store).unwrap();
        assert_eq!(parse_geojson_features(&raw).unwrap().len(), 0);
    }
}
