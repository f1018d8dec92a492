use crate::surface::MapSurface;
use crate::tasks::{run_spatial_task, OP_BUFFER, OP_MEASURE_AREA, OP_MEASURE_DISTANCE};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use carto_geo::{
    ensure_feature_id, is_editable_feature, replace_coordinates, DistanceUnit, Feature, JsonObject,
};
use carto_history::HistoryTracker;
use carto_protocol::MeasureKind;
use carto_runtime::{
    generate_key, CacheConfig, CacheStats, QueryCache, TaskRequest, WorkerPool, WorkerPoolConfig,
};
use carto_store::{FeatureStore, LayerKind, LayerStyle};
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_GROUP: &str = "Layers";

/// Shared ownership of the session's store and history tracker, as
/// handed to the surface, the persistence loop, and any other consumer.
#[derive(Clone)]
pub struct SessionHandles {
    pub store: Arc<Mutex<FeatureStore>>,
    pub history: Arc<Mutex<HistoryTracker>>,
}

impl SessionHandles {
    pub fn new(store: FeatureStore, history: HistoryTracker) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            history: Arc::new(Mutex::new(history)),
        }
    }
}

/// In-process map surface bound to the feature store.
///
/// Measure and buffer computations run on the worker pool; measure
/// results are memoized in a TTL cache keyed by normalized parameters.
/// Layer addressing resolves an id first, then a layer name, and
/// finally creates the layer on demand in the default group.
pub struct LocalSurface {
    handles: SessionHandles,
    pool: WorkerPool,
    cache: QueryCache<f64>,
}

impl LocalSurface {
    pub fn new(handles: SessionHandles) -> Self {
        let pool = WorkerPool::new(WorkerPoolConfig::default(), run_spatial_task);
        let cache = QueryCache::new(CacheConfig::default());
        cache.spawn_cleanup();
        Self {
            handles,
            pool,
            cache,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Undo the most recent recorded operation against the store.
    pub async fn undo(&self) -> bool {
        let mut store = self.handles.store.lock().await;
        let mut history = self.handles.history.lock().await;
        match history.undo() {
            Some(operation) => store.apply_undo(&operation),
            None => false,
        }
    }

    /// Replay the most recently undone operation.
    pub async fn redo(&self) -> bool {
        let mut store = self.handles.store.lock().await;
        let mut history = self.handles.history.lock().await;
        match history.redo() {
            Some(operation) => store.apply_redo(&operation),
            None => false,
        }
    }

    /// Move an editable feature by replacing its coordinate set
    /// (editing-mode drag). Records a move operation.
    pub async fn move_feature(&self, feature_id: &str, coords: &[[f64; 2]]) -> Result<()> {
        let mut store = self.handles.store.lock().await;
        let (layer, before) = store
            .locate_feature(feature_id)
            .ok_or_else(|| anyhow!("feature {feature_id} not found"))?;
        if !is_editable_feature(&before) {
            bail!("feature {feature_id} is not an editable geometry");
        }
        let moved = replace_coordinates(&before, coords)
            .ok_or_else(|| anyhow!("coordinate count mismatch for feature {feature_id}"))?;
        if !store.replace_feature(&layer, moved.clone()) {
            bail!("feature {feature_id} vanished during move");
        }
        self.handles
            .history
            .lock()
            .await
            .record_move(&layer, before, moved);
        Ok(())
    }

    /// Tear down the pool and cache.
    pub async fn dispose(&self) {
        self.pool.dispose().await;
        self.cache.dispose();
    }

    fn resolve_layer(store: &mut FeatureStore, address: &str) -> Option<String> {
        if store.layer_by_id(address).is_some() {
            return Some(address.to_string());
        }
        store.layer_by_name(address).map(|layer| layer.id.clone())
    }

    fn resolve_or_create_layer(store: &mut FeatureStore, address: &str) -> Result<String> {
        if let Some(id) = Self::resolve_layer(store, address) {
            return Ok(id);
        }
        let group_id = match store.groups().first() {
            Some(group) => group.id.clone(),
            None => store.create_layer_group(DEFAULT_GROUP).id,
        };
        store
            .create_layer(&group_id, address, LayerKind::Feature)
            .map(|layer| layer.id)
            .ok_or_else(|| anyhow!("could not create layer {address}"))
    }
}

#[async_trait]
impl MapSurface for LocalSurface {
    async fn zoom_to(&self, center: [f64; 2], zoom: Option<u32>) -> Result<()> {
        let mut store = self.handles.store.lock().await;
        let zoom = zoom.map(f64::from).unwrap_or_else(|| store.zoom());
        store.set_view(center, zoom);
        Ok(())
    }

    async fn add_feature(
        &self,
        mut feature: Feature,
        layer_id: &str,
        style: Option<LayerStyle>,
    ) -> Result<()> {
        let mut store = self.handles.store.lock().await;
        let layer = Self::resolve_or_create_layer(&mut store, layer_id)?;
        if let Some(style) = style {
            store.set_layer_style(&layer, style);
        }
        ensure_feature_id(&mut feature);
        if !store.add_feature_to_layer(&layer, feature.clone()) {
            bail!("layer {layer} vanished during insert");
        }
        self.handles.history.lock().await.record_create(&layer, feature);
        Ok(())
    }

    async fn modify_feature(&self, feature_id: &str, properties: &JsonObject) -> Result<()> {
        let mut store = self.handles.store.lock().await;
        let (layer, before) = store
            .locate_feature(feature_id)
            .ok_or_else(|| anyhow!("feature {feature_id} not found"))?;
        store.modify_feature(&layer, feature_id, properties);
        let after = store
            .feature_by_id(feature_id)
            .cloned()
            .ok_or_else(|| anyhow!("feature {feature_id} vanished during modify"))?;
        self.handles
            .history
            .lock()
            .await
            .record_modify(&layer, before, after);
        Ok(())
    }

    async fn remove_feature(&self, feature_id: &str, layer_id: Option<&str>) -> Result<()> {
        let mut store = self.handles.store.lock().await;
        let (located_layer, before) = store
            .locate_feature(feature_id)
            .ok_or_else(|| anyhow!("feature {feature_id} not found"))?;
        let layer = match layer_id {
            Some(address) => Self::resolve_layer(&mut store, address)
                .ok_or_else(|| anyhow!("layer {address} not found"))?,
            None => located_layer,
        };
        if !store.remove_feature(&layer, feature_id) {
            bail!("feature {feature_id} is not in layer {layer}");
        }
        self.handles.history.lock().await.record_delete(&layer, before);
        Ok(())
    }

    async fn style_feature(&self, feature_id: &str, style: &JsonObject) -> Result<()> {
        let mut store = self.handles.store.lock().await;
        let (layer, before) = store
            .locate_feature(feature_id)
            .ok_or_else(|| anyhow!("feature {feature_id} not found"))?;
        store.modify_feature(&layer, feature_id, style);
        let after = store
            .feature_by_id(feature_id)
            .cloned()
            .ok_or_else(|| anyhow!("feature {feature_id} vanished during style"))?;
        self.handles
            .history
            .lock()
            .await
            .record_style(&layer, before, after);
        Ok(())
    }

    async fn measure(&self, kind: MeasureKind, features: &[Feature]) -> Result<f64> {
        let mut params = serde_json::Map::new();
        params.insert("kind".into(), serde_json::to_value(kind)?);
        params.insert("features".into(), serde_json::to_value(features)?);
        let key = generate_key("measure", &params);
        if let Some(value) = self.cache.get(&key) {
            log::debug!("measure cache hit for {kind:?}");
            return Ok(value);
        }

        let op = match kind {
            MeasureKind::Distance => OP_MEASURE_DISTANCE,
            MeasureKind::Area => OP_MEASURE_AREA,
        };
        let result = self
            .pool
            .execute(TaskRequest::new(op, serde_json::to_value(features)?))
            .await
            .map_err(|e| anyhow!(e))?;
        let value = result
            .as_f64()
            .ok_or_else(|| anyhow!("spatial task returned a non-numeric result"))?;
        self.cache.set(key, value, None);
        Ok(value)
    }

    async fn buffer(
        &self,
        feature: &Feature,
        distance: f64,
        units: DistanceUnit,
    ) -> Result<Feature> {
        let payload = serde_json::json!({
            "feature": feature,
            "distance": distance,
            "units": units,
        });
        let result = self
            .pool
            .execute(TaskRequest::new(OP_BUFFER, payload))
            .await
            .map_err(|e| anyhow!(e))?;
        serde_json::from_value(result).context("buffer task returned a non-feature result")
    }
}
