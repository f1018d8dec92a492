//! End-to-end session tests over a temporary state directory.

use carto_cli::{
    apply_text, cluster_query, export_text, import_file, parse_text, redo, undo, ExportFormat,
};
use carto_cluster::ClusterItem;
use carto_protocol::Command;

const BEN_JSON: &str = r#"{"type":"Feature","id":"big-ben","geometry":{"type":"Point","coordinates":[-0.1246,51.5007]},"properties":{"name":"Big Ben"}}"#;

#[test]
fn parse_is_pure_and_typed() {
    let commands = parse_text("Big Ben is in London [zoom_to 51.5007 -0.1246 15]");
    assert_eq!(
        commands,
        vec![Command::ZoomTo {
            coordinates: [51.5007, -0.1246],
            zoom: Some(15),
        }]
    );
}

#[tokio::test]
async fn apply_persists_state_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let text = format!("[add_feature {BEN_JSON} poi] [zoom_to 51.5007 -0.1246 15]");
    let outcome = apply_text(dir.path(), &text).await.unwrap();
    assert_eq!(outcome.executed, 2);
    assert_eq!(outcome.failed, 0);

    // A second invocation sees the persisted feature.
    let outcome = apply_text(
        dir.path(),
        r#"[modify_feature big-ben {"name":"Elizabeth Tower"}]"#,
    )
    .await
    .unwrap();
    assert_eq!(outcome.executed, 1);

    let geojson = export_text(dir.path(), ExportFormat::Geojson).await.unwrap();
    assert!(geojson.contains("Elizabeth Tower"));
}

#[tokio::test]
async fn undo_survives_the_session_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let text = format!("[add_feature {BEN_JSON} poi]");
    apply_text(dir.path(), &text).await.unwrap();

    assert!(undo(dir.path()).await.unwrap());
    let geojson = export_text(dir.path(), ExportFormat::Geojson).await.unwrap();
    assert!(!geojson.contains("big-ben"));

    assert!(redo(dir.path()).await.unwrap());
    let geojson = export_text(dir.path(), ExportFormat::Geojson).await.unwrap();
    assert!(geojson.contains("big-ben"));

    // Exhausted stacks are a no-op, not an error.
    assert!(undo(dir.path()).await.unwrap());
    assert!(!undo(dir.path()).await.unwrap());
}

#[tokio::test]
async fn import_batches_a_feature_collection() {
    let dir = tempfile::tempdir().unwrap();
    let features: Vec<String> = (0..25)
        .map(|i| {
            format!(
                r#"{{"type":"Feature","geometry":{{"type":"Point","coordinates":[{},{}]}},"properties":{{"n":{i}}}}}"#,
                0.001 * i as f64,
                0.001 * i as f64
            )
        })
        .collect();
    let collection = format!(
        r#"{{"type":"FeatureCollection","features":[{}]}}"#,
        features.join(",")
    );
    let file = dir.path().join("points.geojson");
    tokio::fs::write(&file, collection).await.unwrap();

    let imported = import_file(dir.path(), &file, "sensors").await.unwrap();
    assert_eq!(imported, 25);

    // Dense import clusters into a single bucket at low zoom.
    let items = cluster_query(dir.path(), [-1.0, -1.0, 1.0, 1.0], 5.0)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    match &items[0] {
        ClusterItem::Cluster(cluster) => assert_eq!(cluster.count, 25),
        ClusterItem::Single(_) => panic!("expected a cluster"),
    }
}

#[tokio::test]
async fn kml_export_renders_placemarks() {
    let dir = tempfile::tempdir().unwrap();
    let text = format!("[add_feature {BEN_JSON} poi]");
    apply_text(dir.path(), &text).await.unwrap();

    let kml = export_text(dir.path(), ExportFormat::Kml).await.unwrap();
    assert!(kml.contains("<Placemark>"));
    assert!(kml.contains("<name>Big Ben</name>"));
    assert!(kml.contains("-0.1246,51.5007"));
}

#[tokio::test]
async fn malformed_directives_do_not_fail_the_apply() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = apply_text(
        dir.path(),
        "[add_feature {broken json}] [zoom_to 51.5 -0.12]",
    )
    .await
    .unwrap();
    assert_eq!(outcome.executed, 1);
    assert_eq!(outcome.failed, 0);
}
