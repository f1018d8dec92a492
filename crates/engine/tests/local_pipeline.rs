//! End-to-end pipeline tests: AI response text through the parser and
//! executor into the real store-backed surface.

use carto_engine::{CommandExecutor, LocalSurface, SessionHandles, BUFFER_LAYER};
use carto_geo::geojson::Value;
use carto_history::HistoryTracker;
use carto_store::FeatureStore;
use std::sync::Arc;

const BEN_JSON: &str = r#"{"type":"Feature","id":"big-ben","geometry":{"type":"Point","coordinates":[-0.1246,51.5007]},"properties":{"name":"Big Ben"}}"#;
const EYE_JSON: &str = r#"{"type":"Feature","id":"eye","geometry":{"type":"Point","coordinates":[-0.1196,51.5033]},"properties":{"name":"London Eye"}}"#;

fn session() -> (SessionHandles, Arc<LocalSurface>, CommandExecutor) {
    let handles = SessionHandles::new(FeatureStore::new(), HistoryTracker::default());
    let surface = Arc::new(LocalSurface::new(handles.clone()));
    let executor = CommandExecutor::new(surface.clone());
    (handles, surface, executor)
}

#[tokio::test]
async fn zoom_command_updates_the_view() {
    let (handles, _surface, executor) = session();
    let outcome = executor
        .process_response("Here it is [zoom_to 51.5007 -0.1246 15]")
        .await;
    assert_eq!(outcome.executed, 1);

    let store = handles.store.lock().await;
    assert_eq!(store.center(), [51.5007, -0.1246]);
    assert_eq!(store.zoom(), 15.0);
}

#[tokio::test]
async fn add_feature_creates_the_layer_on_demand() {
    let (handles, _surface, executor) = session();
    let text = format!("[add_feature {BEN_JSON} poi]");
    let outcome = executor.process_response(&text).await;
    assert_eq!(outcome.executed, 1);

    let store = handles.store.lock().await;
    let layer = store.layer_by_name("poi").expect("layer created on demand");
    assert_eq!(layer.features.len(), 1);
    assert!(store.feature_by_id("big-ben").is_some());
}

#[tokio::test]
async fn modify_remove_and_style_round_trip() {
    let (handles, _surface, executor) = session();
    let text = format!(
        "[add_feature {BEN_JSON} poi] [add_feature {EYE_JSON} poi] \
         [modify_feature big-ben {{\"name\":\"Elizabeth Tower\"}}] \
         [style_feature big-ben {{\"color\":\"#cc0000\"}}] \
         [remove_feature eye]"
    );
    let outcome = executor.process_response(&text).await;
    assert_eq!(outcome.executed, 5);
    assert_eq!(outcome.failed, 0);

    let store = handles.store.lock().await;
    let ben = store.feature_by_id("big-ben").unwrap();
    let props = ben.properties.as_ref().unwrap();
    assert_eq!(props["name"], "Elizabeth Tower");
    assert_eq!(props["color"], "#cc0000");
    assert!(store.feature_by_id("eye").is_none());
}

#[tokio::test]
async fn buffer_lands_in_the_buffers_layer_as_a_polygon() {
    let (handles, _surface, executor) = session();
    let text = format!("[buffer {BEN_JSON} 1 kilometers]");
    let outcome = executor.process_response(&text).await;
    assert_eq!(outcome.executed, 1);

    let store = handles.store.lock().await;
    let layer = store.layer_by_name(BUFFER_LAYER).expect("buffers layer");
    assert_eq!(layer.features.len(), 1);
    let geometry = layer.features[0].geometry.as_ref().unwrap();
    assert!(matches!(geometry.value, Value::Polygon(_)));
}

#[tokio::test]
async fn measure_is_computed_and_then_served_from_cache() {
    let (_handles, surface, executor) = session();
    let text = format!("[measure distance {BEN_JSON} {EYE_JSON}]");

    let first = executor.process_response(&text).await;
    assert_eq!(first.measurements.len(), 1);
    let km = first.measurements[0].value;
    assert!(km > 0.2 && km < 2.0, "got {km}");

    let second = executor.process_response(&text).await;
    assert_eq!(second.measurements[0].value, km);
    assert!(surface.cache_stats().hit_rate > 0.0);
}

#[tokio::test]
async fn unknown_feature_counts_as_a_failed_command() {
    let (_handles, _surface, executor) = session();
    let outcome = executor
        .process_response("[remove_feature ghost] [zoom_to 1 2]")
        .await;
    assert_eq!(outcome.executed, 1);
    assert_eq!(outcome.failed, 1);
}

#[tokio::test]
async fn move_feature_replaces_coordinates_and_can_be_undone() {
    let (handles, surface, executor) = session();
    let text = format!("[add_feature {BEN_JSON} poi]");
    executor.process_response(&text).await;

    surface
        .move_feature("big-ben", &[[-0.13, 51.51]])
        .await
        .unwrap();
    {
        let store = handles.store.lock().await;
        let geometry = store.feature_by_id("big-ben").unwrap().geometry.as_ref().unwrap();
        match &geometry.value {
            Value::Point(pos) => assert_eq!(pos.as_slice(), &[-0.13, 51.51]),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    // A wrong coordinate count is rejected before touching the store.
    assert!(surface
        .move_feature("big-ben", &[[0.0, 0.0], [1.0, 1.0]])
        .await
        .is_err());

    assert!(surface.undo().await);
    let store = handles.store.lock().await;
    let geometry = store.feature_by_id("big-ben").unwrap().geometry.as_ref().unwrap();
    match &geometry.value {
        Value::Point(pos) => assert_eq!(pos.as_slice(), &[-0.1246, 51.5007]),
        other => panic!("unexpected geometry {other:?}"),
    }
}

#[tokio::test]
async fn undo_and_redo_walk_the_recorded_operations() {
    let (handles, surface, executor) = session();
    let text = format!("[add_feature {BEN_JSON} poi]");
    executor.process_response(&text).await;

    assert!(surface.undo().await);
    {
        let store = handles.store.lock().await;
        assert!(store.feature_by_id("big-ben").is_none());
    }

    assert!(surface.redo().await);
    {
        let store = handles.store.lock().await;
        assert!(store.feature_by_id("big-ben").is_some());
    }

    // Nothing left to undo after one more round.
    assert!(surface.undo().await);
    assert!(!surface.undo().await);
}
