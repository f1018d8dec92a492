//! `carto` command-line front-end: apply AI response text to the
//! persisted map state, inspect parsed commands, import/export data,
//! and query display clusters.

use anyhow::{anyhow, Context, Result};
use carto_cluster::{ClusterConfig, ClusterIndex, ClusterItem};
use carto_engine::{CommandExecutor, LocalSurface, ProcessOutcome, SessionHandles};
use carto_geo::Feature;
use carto_history::HistoryTracker;
use carto_protocol::{parse_commands, Command};
use carto_runtime::{BatchConfig, BatchProcessor, ThrottleConfig, ThrottleManager};
use carto_store::{
    export, snapshot, AutoSaver, FeatureStore, FileSnapshotSink, LayerKind, STATE_KEY,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt};

const MAX_THROTTLE_CONCURRENCY: usize = 64;

#[derive(Parser)]
#[command(name = "carto", version, about = "AI-directed interactive map engine")]
pub struct Cli {
    /// Directory holding the persisted map state.
    #[arg(long, default_value = ".carto", global = true)]
    pub state_dir: PathBuf,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand)]
pub enum CliCommand {
    /// Extract map commands from response text and print them as JSON.
    Parse {
        /// Response text; read from stdin when omitted.
        text: Option<String>,
    },
    /// Execute the directives in response text against the map state.
    Apply {
        /// Response text; read from stdin when omitted.
        text: Option<String>,
        /// Print the resulting map state as JSON.
        #[arg(long)]
        show_state: bool,
    },
    /// Read response text line by line and apply each, auto-saving.
    Repl,
    /// Import a GeoJSON file into a layer.
    Import {
        file: PathBuf,
        #[arg(long, default_value = "imported")]
        layer: String,
    },
    /// Query display clusters for a bounding box and zoom level.
    Clusters {
        /// Bounding box as min_lng,min_lat,max_lng,max_lat.
        #[arg(long, allow_hyphen_values = true)]
        bbox: String,
        #[arg(long)]
        zoom: f64,
    },
    /// Export visible features.
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Geojson)]
        format: ExportFormat,
    },
    /// Undo the most recent map operation.
    Undo,
    /// Redo the most recently undone operation.
    Redo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Geojson,
    Kml,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Parse { text } => {
            let text = text_or_stdin(text).await?;
            let commands = parse_text(&text);
            println!("{}", serde_json::to_string_pretty(&commands)?);
        }
        CliCommand::Apply { text, show_state } => {
            let text = text_or_stdin(text).await?;
            let outcome = apply_text(&cli.state_dir, &text).await?;
            print_outcome(&outcome);
            if show_state {
                let (handles, _) = load_session(&cli.state_dir).await?;
                let store = handles.store.lock().await;
                println!("{}", serde_json::to_string_pretty(&store.to_map_state(None))?);
            }
        }
        CliCommand::Repl => repl(&cli.state_dir).await?,
        CliCommand::Import { file, layer } => {
            let imported = import_file(&cli.state_dir, &file, &layer).await?;
            println!("imported {imported} features into layer '{layer}'");
        }
        CliCommand::Clusters { bbox, zoom } => {
            let bbox = parse_bbox(&bbox)?;
            let items = cluster_query(&cli.state_dir, bbox, zoom).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        CliCommand::Export { format } => {
            let text = export_text(&cli.state_dir, format).await?;
            println!("{text}");
        }
        CliCommand::Undo => {
            let applied = undo(&cli.state_dir).await?;
            println!("{}", if applied { "undone" } else { "nothing to undo" });
        }
        CliCommand::Redo => {
            let applied = redo(&cli.state_dir).await?;
            println!("{}", if applied { "redone" } else { "nothing to redo" });
        }
    }
    Ok(())
}

/// Parse directives without touching any state.
pub fn parse_text(text: &str) -> Vec<Command> {
    parse_commands(text)
}

/// Run response text through the executor against the persisted state
/// and save the result.
pub async fn apply_text(state_dir: &Path, text: &str) -> Result<ProcessOutcome> {
    let (handles, sink) = load_session(state_dir).await?;
    let surface = Arc::new(LocalSurface::new(handles.clone()));
    let executor = CommandExecutor::with_throttle(surface.clone(), throttle_from_env());

    let outcome = executor.process_response(text).await;

    save_session(&handles, &sink).await?;
    surface.dispose().await;
    Ok(outcome)
}

/// Import a GeoJSON file, grouping store insertions through the batch
/// processor.
pub async fn import_file(state_dir: &Path, file: &Path, layer_name: &str) -> Result<usize> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let features = export::parse_geojson_features(&raw)?;
    if features.is_empty() {
        return Ok(0);
    }

    let (handles, sink) = load_session(state_dir).await?;
    let layer_id = {
        let mut store = handles.store.lock().await;
        match store.layer_by_name(layer_name) {
            Some(layer) => layer.id.clone(),
            None => {
                let group_id = match store.groups().first() {
                    Some(group) => group.id.clone(),
                    None => store.create_layer_group("Imports").id,
                };
                store
                    .create_layer(&group_id, layer_name, LayerKind::Feature)
                    .map(|layer| layer.id)
                    .ok_or_else(|| anyhow!("could not create layer {layer_name}"))?
            }
        }
    };

    let store = handles.store.clone();
    let target = layer_id.clone();
    let processor: BatchProcessor<Feature, bool> =
        BatchProcessor::new(BatchConfig::default(), move |items: Vec<Feature>| {
            let store = store.clone();
            let target = target.clone();
            async move {
                let mut store = store.lock().await;
                let results = items
                    .into_iter()
                    .map(|feature| store.add_feature_to_layer(&target, feature))
                    .collect();
                Ok(results)
            }
        });

    let mut waiters = Vec::with_capacity(features.len());
    for feature in features {
        let processor = processor.clone();
        waiters.push(tokio::spawn(async move { processor.add(feature).await }));
    }
    let mut imported = 0usize;
    for waiter in waiters {
        if matches!(waiter.await, Ok(Ok(true))) {
            imported += 1;
        }
    }

    save_session(&handles, &sink).await?;
    Ok(imported)
}

/// Cluster the stored features for a viewport query.
pub async fn cluster_query(
    state_dir: &Path,
    bbox: [f64; 4],
    zoom: f64,
) -> Result<Vec<ClusterItem>> {
    let (handles, _sink) = load_session(state_dir).await?;
    let features: Vec<Feature> = {
        let store = handles.store.lock().await;
        store.visible_features().cloned().collect()
    };
    let mut index = ClusterIndex::new(ClusterConfig::default());
    index.load_features(&features)?;
    Ok(index.clusters(bbox, zoom)?)
}

pub async fn export_text(state_dir: &Path, format: ExportFormat) -> Result<String> {
    let (handles, _sink) = load_session(state_dir).await?;
    let store = handles.store.lock().await;
    match format {
        ExportFormat::Geojson => Ok(export::to_geojson(&store)?),
        ExportFormat::Kml => Ok(export::to_kml(&store)),
    }
}

pub async fn undo(state_dir: &Path) -> Result<bool> {
    let (handles, sink) = load_session(state_dir).await?;
    let applied = {
        let mut store = handles.store.lock().await;
        let mut history = handles.history.lock().await;
        match history.undo() {
            Some(operation) => store.apply_undo(&operation),
            None => false,
        }
    };
    save_session(&handles, &sink).await?;
    Ok(applied)
}

pub async fn redo(state_dir: &Path) -> Result<bool> {
    let (handles, sink) = load_session(state_dir).await?;
    let applied = {
        let mut store = handles.store.lock().await;
        let mut history = handles.history.lock().await;
        match history.redo() {
            Some(operation) => store.apply_redo(&operation),
            None => false,
        }
    };
    save_session(&handles, &sink).await?;
    Ok(applied)
}

async fn repl(state_dir: &Path) -> Result<()> {
    let (handles, sink) = load_session(state_dir).await?;
    let surface = Arc::new(LocalSurface::new(handles.clone()));
    let executor = CommandExecutor::with_throttle(surface.clone(), throttle_from_env());
    let saver = AutoSaver::start(
        handles.store.clone(),
        handles.history.clone(),
        Arc::new(sink.clone()),
        Default::default(),
        Some(Arc::new(|e| log::warn!("auto-save error: {e}"))),
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let outcome = executor.process_response(&line).await;
        print_outcome(&outcome);
    }

    saver.stop();
    save_session(&handles, &sink).await?;
    surface.dispose().await;
    Ok(())
}

async fn load_session(state_dir: &Path) -> Result<(SessionHandles, FileSnapshotSink)> {
    let sink = FileSnapshotSink::new(state_dir);
    let (store, history_state) = match snapshot::load_state(&sink, STATE_KEY).await? {
        Some(state) => FeatureStore::from_map_state(state),
        None => (FeatureStore::new(), None),
    };
    let mut history = HistoryTracker::default();
    if let Some(state) = history_state {
        history.restore(state);
    }
    Ok((SessionHandles::new(store, history), sink))
}

async fn save_session(handles: &SessionHandles, sink: &FileSnapshotSink) -> Result<()> {
    let state = {
        let store = handles.store.lock().await;
        let history = handles.history.lock().await;
        store.to_map_state(Some(history.state()))
    };
    snapshot::save_state(sink, STATE_KEY, &state).await?;
    Ok(())
}

fn print_outcome(outcome: &ProcessOutcome) {
    println!(
        "executed {} command(s), {} failed",
        outcome.executed, outcome.failed
    );
    for measurement in &outcome.measurements {
        println!("measured {:?}: {:.3}", measurement.kind, measurement.value);
    }
}

fn throttle_from_env() -> ThrottleManager {
    let raw = std::env::var("CARTO_MAX_CONCURRENT").ok();
    let defaults = ThrottleConfig::default();
    let max_concurrent = parse_max_concurrent(raw.as_deref(), defaults.max_concurrent);
    ThrottleManager::new(ThrottleConfig {
        max_concurrent,
        ..defaults
    })
}

fn parse_max_concurrent(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_THROTTLE_CONCURRENCY)
}

fn parse_bbox(raw: &str) -> Result<[f64; 4]> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .context("bbox must be four comma-separated numbers")?;
    if parts.len() != 4 {
        return Err(anyhow!("bbox must be min_lng,min_lat,max_lng,max_lat"));
    }
    Ok([parts[0], parts[1], parts[2], parts[3]])
}

async fn text_or_stdin(text: Option<String>) -> Result<String> {
    match text {
        Some(text) => Ok(text),
        None => {
            let mut buffer = String::new();
            tokio::io::stdin().read_to_string(&mut buffer).await?;
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_concurrent_parse_defaults_and_clamps() {
        assert_eq!(parse_max_concurrent(None, 5), 5);
        assert_eq!(parse_max_concurrent(Some(""), 5), 5);
        assert_eq!(parse_max_concurrent(Some("abc"), 5), 5);
        assert_eq!(parse_max_concurrent(Some(" 3 "), 5), 3);
        assert_eq!(parse_max_concurrent(Some("0"), 5), 1);
        assert_eq!(parse_max_concurrent(Some("999"), 5), MAX_THROTTLE_CONCURRENCY);
    }

    #[test]
    fn bbox_parsing_accepts_negatives_and_rejects_garbage() {
        assert_eq!(
            parse_bbox("-1.0, -2.0, 3.0, 4.0").unwrap(),
            [-1.0, -2.0, 3.0, 4.0]
        );
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
    }
}
