use crate::types::{Layer, LayerGroup, LayerKind, LayerStyle, MapState};
use carto_geo::{ensure_feature_id, feature_id_matches, Feature, FeatureId, JsonObject};
use carto_history::{HistoryState, MapOperation, OperationKind};
use uuid::Uuid;

fn feature_id_of(feature: &Feature) -> Option<String> {
    match &feature.id {
        Some(FeatureId::String(s)) => Some(s.clone()),
        Some(FeatureId::Number(n)) => Some(n.to_string()),
        None => None,
    }
}

/// The authoritative feature/layer model.
///
/// Layer and feature identifiers are unique store-wide (auto-assigned
/// ids come from a UUID generator; caller-supplied ids are the caller's
/// responsibility and are never silently overwritten). Layer *names*
/// are not required to be unique.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStore {
    groups: Vec<LayerGroup>,
    center: [f64; 2],
    zoom: f64,
    active_layer_id: Option<String>,
    selected_feature_ids: Vec<String>,
}

impl Default for FeatureStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureStore {
    pub fn new() -> Self {
        let defaults = MapState::default();
        Self {
            groups: Vec::new(),
            center: defaults.center,
            zoom: defaults.zoom,
            active_layer_id: None,
            selected_feature_ids: Vec::new(),
        }
    }

    /// Append a new, empty, visible layer group. Always succeeds.
    pub fn create_layer_group(&mut self, name: &str) -> LayerGroup {
        let group = LayerGroup {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            visible: true,
            layers: Vec::new(),
        };
        log::info!("created layer group '{}' ({})", group.name, group.id);
        self.groups.push(group.clone());
        group
    }

    /// Append a new layer to the named group, or `None` when the group
    /// id does not resolve.
    pub fn create_layer(&mut self, group_id: &str, name: &str, kind: LayerKind) -> Option<Layer> {
        let Some(group) = self.groups.iter_mut().find(|g| g.id == group_id) else {
            log::warn!("create_layer: no layer group with id {group_id}");
            return None;
        };
        let layer = Layer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind,
            visible: true,
            style: None,
            features: Vec::new(),
        };
        log::info!("created layer '{}' ({}) in group {}", layer.name, layer.id, group_id);
        group.layers.push(layer.clone());
        Some(layer)
    }

    /// Append a feature to the layer, assigning it a fresh id when it
    /// has none. `false` when the layer does not resolve.
    pub fn add_feature_to_layer(&mut self, layer_id: &str, mut feature: Feature) -> bool {
        let Some(layer) = self.layer_by_id_mut(layer_id) else {
            log::warn!("add_feature_to_layer: no layer with id {layer_id}");
            return false;
        };
        if feature.properties.is_none() {
            feature.properties = Some(JsonObject::new());
        }
        let id = ensure_feature_id(&mut feature);
        layer.features.push(feature);
        log::debug!("added feature {id} to layer {layer_id}");
        true
    }

    /// Remove the first feature in the layer whose id matches. `false`
    /// when the layer or the feature is absent.
    pub fn remove_feature(&mut self, layer_id: &str, feature_id: &str) -> bool {
        let Some(layer) = self.layer_by_id_mut(layer_id) else {
            log::warn!("remove_feature: no layer with id {layer_id}");
            return false;
        };
        let Some(index) = layer
            .features
            .iter()
            .position(|f| feature_id_matches(f, feature_id))
        else {
            log::warn!("remove_feature: no feature {feature_id} in layer {layer_id}");
            return false;
        };
        layer.features.remove(index);
        true
    }

    /// Shallow-merge `properties` into the feature's property map.
    /// `false` when the layer or the feature is absent.
    pub fn modify_feature(
        &mut self,
        layer_id: &str,
        feature_id: &str,
        properties: &JsonObject,
    ) -> bool {
        let Some(layer) = self.layer_by_id_mut(layer_id) else {
            log::warn!("modify_feature: no layer with id {layer_id}");
            return false;
        };
        let Some(feature) = layer
            .features
            .iter_mut()
            .find(|f| feature_id_matches(f, feature_id))
        else {
            log::warn!("modify_feature: no feature {feature_id} in layer {layer_id}");
            return false;
        };
        let merged = feature.properties.get_or_insert_with(JsonObject::new);
        for (key, value) in properties {
            merged.insert(key.clone(), value.clone());
        }
        true
    }

    pub fn set_layer_visibility(&mut self, layer_id: &str, visible: bool) -> bool {
        let Some(layer) = self.layer_by_id_mut(layer_id) else {
            log::warn!("set_layer_visibility: no layer with id {layer_id}");
            return false;
        };
        layer.visible = visible;
        true
    }

    pub fn set_layer_style(&mut self, layer_id: &str, style: LayerStyle) -> bool {
        let Some(layer) = self.layer_by_id_mut(layer_id) else {
            log::warn!("set_layer_style: no layer with id {layer_id}");
            return false;
        };
        layer.style = Some(style);
        true
    }

    /// Linear scan across all groups and layers.
    pub fn feature_by_id(&self, feature_id: &str) -> Option<&Feature> {
        self.all_features()
            .find(|f| feature_id_matches(f, feature_id))
    }

    pub fn layer_by_id(&self, layer_id: &str) -> Option<&Layer> {
        self.groups
            .iter()
            .flat_map(|g| g.layers.iter())
            .find(|l| l.id == layer_id)
    }

    fn layer_by_id_mut(&mut self, layer_id: &str) -> Option<&mut Layer> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.layers.iter_mut())
            .find(|l| l.id == layer_id)
    }

    /// First layer with this name, in group order. Names are not unique.
    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.groups
            .iter()
            .flat_map(|g| g.layers.iter())
            .find(|l| l.name == name)
    }

    /// Id of the layer containing the feature, with a clone of the
    /// feature as currently stored.
    pub fn locate_feature(&self, feature_id: &str) -> Option<(String, Feature)> {
        for group in &self.groups {
            for layer in &group.layers {
                if let Some(feature) =
                    layer.features.iter().find(|f| feature_id_matches(f, feature_id))
                {
                    return Some((layer.id.clone(), feature.clone()));
                }
            }
        }
        None
    }

    pub fn groups(&self) -> &[LayerGroup] {
        self.groups.as_slice()
    }

    pub fn all_features(&self) -> impl Iterator<Item = &Feature> {
        self.groups
            .iter()
            .flat_map(|g| g.layers.iter())
            .flat_map(|l| l.features.iter())
    }

    /// Features on visible layers inside visible groups.
    pub fn visible_features(&self) -> impl Iterator<Item = &Feature> {
        self.groups
            .iter()
            .filter(|g| g.visible)
            .flat_map(|g| g.layers.iter())
            .filter(|l| l.visible)
            .flat_map(|l| l.features.iter())
    }

    pub fn feature_count(&self) -> usize {
        self.all_features().count()
    }

    pub fn center(&self) -> [f64; 2] {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Update the view. `center` is `[lat, lng]`.
    pub fn set_view(&mut self, center: [f64; 2], zoom: f64) {
        self.center = center;
        self.zoom = zoom;
    }

    pub fn set_active_layer(&mut self, layer_id: Option<String>) -> bool {
        if let Some(id) = &layer_id {
            if self.layer_by_id(id).is_none() {
                log::warn!("set_active_layer: no layer with id {id}");
                return false;
            }
        }
        self.active_layer_id = layer_id;
        true
    }

    pub fn active_layer_id(&self) -> Option<&str> {
        self.active_layer_id.as_deref()
    }

    pub fn select_feature(&mut self, feature_id: &str) -> bool {
        if self.feature_by_id(feature_id).is_none() {
            log::warn!("select_feature: no feature with id {feature_id}");
            return false;
        }
        if !self.selected_feature_ids.iter().any(|id| id == feature_id) {
            self.selected_feature_ids.push(feature_id.to_string());
        }
        true
    }

    pub fn clear_selection(&mut self) {
        self.selected_feature_ids.clear();
    }

    pub fn selected_feature_ids(&self) -> &[String] {
        self.selected_feature_ids.as_slice()
    }

    /// Snapshot the store (and optionally the history stacks) into the
    /// persisted document shape.
    pub fn to_map_state(&self, history: Option<HistoryState>) -> MapState {
        MapState {
            center: self.center,
            zoom: self.zoom,
            layers: self.groups.clone(),
            active_layer_id: self.active_layer_id.clone(),
            selected_feature_ids: self.selected_feature_ids.clone(),
            history,
        }
    }

    /// Reverse a recorded operation: created features are removed,
    /// deleted features are re-inserted, and modifications are rolled
    /// back to the `before` snapshot.
    pub fn apply_undo(&mut self, operation: &MapOperation) -> bool {
        match operation.kind {
            OperationKind::Create => match operation.after.as_ref().and_then(feature_id_of) {
                Some(id) => self.remove_feature(&operation.layer_id, &id),
                None => false,
            },
            OperationKind::Delete => match &operation.before {
                Some(feature) => self.add_feature_to_layer(&operation.layer_id, feature.clone()),
                None => false,
            },
            OperationKind::Modify | OperationKind::Style | OperationKind::Move => {
                match &operation.before {
                    Some(feature) => self.replace_feature(&operation.layer_id, feature.clone()),
                    None => false,
                }
            }
        }
    }

    /// Replay a previously undone operation.
    pub fn apply_redo(&mut self, operation: &MapOperation) -> bool {
        match operation.kind {
            OperationKind::Create => match &operation.after {
                Some(feature) => self.add_feature_to_layer(&operation.layer_id, feature.clone()),
                None => false,
            },
            OperationKind::Delete => match operation.before.as_ref().and_then(feature_id_of) {
                Some(id) => self.remove_feature(&operation.layer_id, &id),
                None => false,
            },
            OperationKind::Modify | OperationKind::Style | OperationKind::Move => {
                match &operation.after {
                    Some(feature) => self.replace_feature(&operation.layer_id, feature.clone()),
                    None => false,
                }
            }
        }
    }

    /// Overwrite the stored feature that shares `feature`'s id.
    pub fn replace_feature(&mut self, layer_id: &str, feature: Feature) -> bool {
        let Some(id) = feature_id_of(&feature) else {
            return false;
        };
        let Some(layer) = self.layer_by_id_mut(layer_id) else {
            log::warn!("replace_feature: no layer with id {layer_id}");
            return false;
        };
        let Some(slot) = layer
            .features
            .iter_mut()
            .find(|f| feature_id_matches(f, &id))
        else {
            log::warn!("replace_feature: no feature {id} in layer {layer_id}");
            return false;
        };
        *slot = feature;
        true
    }

    /// Rebuild a store from a persisted snapshot. The history sub-state
    /// is handed back for the caller's tracker.
    pub fn from_map_state(state: MapState) -> (Self, Option<HistoryState>) {
        let store = Self {
            groups: state.layers,
            center: state.center,
            zoom: state.zoom,
            active_layer_id: state.active_layer_id,
            selected_feature_ids: state.selected_feature_ids,
        };
        (store, state.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carto_geo::new_point_feature;
    use pretty_assertions::assert_eq;

    fn store_with_layer() -> (FeatureStore, String) {
        let mut store = FeatureStore::new();
        let group = store.create_layer_group("Base");
        let layer = store.create_layer(&group.id, "POIs", LayerKind::Feature).unwrap();
        (store, layer.id)
    }

    fn point() -> Feature {
        new_point_feature([0.0, 0.0], JsonObject::new())
    }

    #[test]
    fn create_layer_requires_existing_group() {
        let mut store = FeatureStore::new();
        assert!(store.create_layer("nope", "x", LayerKind::Vector).is_none());
        let group = store.create_layer_group("Base");
        assert!(store.create_layer(&group.id, "x", LayerKind::Vector).is_some());
    }

    #[test]
    fn inserted_features_get_distinct_generated_ids() {
        let (mut store, layer_id) = store_with_layer();
        assert!(store.add_feature_to_layer(&layer_id, point()));
        assert!(store.add_feature_to_layer(&layer_id, point()));

        let layer = store.layer_by_id(&layer_id).unwrap();
        let ids: Vec<_> = layer.features.iter().map(|f| f.id.clone()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].is_some());
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn add_to_unknown_layer_is_refused() {
        let mut store = FeatureStore::new();
        assert!(!store.add_feature_to_layer("missing", point()));
    }

    #[test]
    fn remove_feature_matches_by_id() {
        let (mut store, layer_id) = store_with_layer();
        let mut feature = point();
        feature.id = Some(carto_geo::FeatureId::String("bench".into()));
        store.add_feature_to_layer(&layer_id, feature);

        assert!(!store.remove_feature(&layer_id, "fountain"));
        assert!(store.remove_feature(&layer_id, "bench"));
        assert!(!store.remove_feature(&layer_id, "bench"));
        assert_eq!(store.feature_count(), 0);
    }

    #[test]
    fn modify_feature_shallow_merges_properties() {
        let (mut store, layer_id) = store_with_layer();
        let mut feature = point();
        feature.id = Some(carto_geo::FeatureId::String("bench".into()));
        feature
            .properties
            .as_mut()
            .unwrap()
            .insert("name".into(), "Old".into());
        store.add_feature_to_layer(&layer_id, feature);

        let mut patch = JsonObject::new();
        patch.insert("name".into(), "New".into());
        patch.insert("material".into(), "oak".into());
        assert!(store.modify_feature(&layer_id, "bench", &patch));

        let stored = store.feature_by_id("bench").unwrap();
        let props = stored.properties.as_ref().unwrap();
        assert_eq!(props["name"], "New");
        assert_eq!(props["material"], "oak");
    }

    #[test]
    fn visibility_and_style_toggles() {
        let (mut store, layer_id) = store_with_layer();
        assert!(store.set_layer_visibility(&layer_id, false));
        assert!(!store.layer_by_id(&layer_id).unwrap().visible);

        let style = LayerStyle {
            color: Some("#ff0000".into()),
            ..Default::default()
        };
        assert!(store.set_layer_style(&layer_id, style.clone()));
        assert_eq!(store.layer_by_id(&layer_id).unwrap().style, Some(style));
        assert!(!store.set_layer_style("missing", LayerStyle::default()));
    }

    #[test]
    fn visible_features_respect_group_and_layer_flags() {
        let (mut store, layer_id) = store_with_layer();
        store.add_feature_to_layer(&layer_id, point());
        assert_eq!(store.visible_features().count(), 1);
        store.set_layer_visibility(&layer_id, false);
        assert_eq!(store.visible_features().count(), 0);
        assert_eq!(store.all_features().count(), 1);
    }

    #[test]
    fn selection_requires_an_existing_feature() {
        let (mut store, layer_id) = store_with_layer();
        let mut feature = point();
        feature.id = Some(carto_geo::FeatureId::String("bench".into()));
        store.add_feature_to_layer(&layer_id, feature);

        assert!(!store.select_feature("ghost"));
        assert!(store.select_feature("bench"));
        assert!(store.select_feature("bench"));
        assert_eq!(store.selected_feature_ids(), ["bench".to_string()]);
        store.clear_selection();
        assert!(store.selected_feature_ids().is_empty());
    }

    #[test]
    fn layer_names_are_not_unique_first_wins() {
        let mut store = FeatureStore::new();
        let group = store.create_layer_group("Base");
        let first = store.create_layer(&group.id, "dup", LayerKind::Feature).unwrap();
        let _second = store.create_layer(&group.id, "dup", LayerKind::Feature).unwrap();
        assert_eq!(store.layer_by_name("dup").unwrap().id, first.id);
    }

    #[test]
    fn undo_and_redo_reverse_store_mutations() {
        let (mut store, layer_id) = store_with_layer();
        let mut feature = point();
        feature.id = Some(carto_geo::FeatureId::String("bench".into()));
        store.add_feature_to_layer(&layer_id, feature.clone());

        let create = carto_history::MapOperation::new(
            carto_history::OperationKind::Create,
            layer_id.clone(),
            None,
            Some(store.feature_by_id("bench").unwrap().clone()),
        );
        assert!(store.apply_undo(&create));
        assert!(store.feature_by_id("bench").is_none());
        assert!(store.apply_redo(&create));
        assert!(store.feature_by_id("bench").is_some());

        let mut after = store.feature_by_id("bench").unwrap().clone();
        after
            .properties
            .as_mut()
            .unwrap()
            .insert("name".into(), "renamed".into());
        let modify = carto_history::MapOperation::new(
            carto_history::OperationKind::Modify,
            layer_id.clone(),
            Some(store.feature_by_id("bench").unwrap().clone()),
            Some(after.clone()),
        );
        assert!(store.apply_redo(&modify));
        assert_eq!(
            store.feature_by_id("bench").unwrap().properties.as_ref().unwrap()["name"],
            "renamed"
        );
        assert!(store.apply_undo(&modify));
        assert!(store
            .feature_by_id("bench")
            .unwrap()
            .properties
            .as_ref()
            .unwrap()
            .get("name")
            .is_none());
    }

    #[test]
    fn map_state_round_trip() {
        let (mut store, layer_id) = store_with_layer();
        store.add_feature_to_layer(&layer_id, point());
        store.set_view([48.85, 2.35], 11.0);
        store.set_active_layer(Some(layer_id.clone()));

        let state = store.to_map_state(None);
        let json = serde_json::to_string(&state).unwrap();
        let parsed: MapState = serde_json::from_str(&json).unwrap();
        let (restored, history) = FeatureStore::from_map_state(parsed);

        assert!(history.is_none());
        assert_eq!(restored, store);
        assert_eq!(restored.active_layer_id(), Some(layer_id.as_str()));
    }
}
