//! Snapshot persistence: a key-value blob sink plus the periodic
//! auto-save loop.
//!
//! The map state is written under a fixed key, re-read at session
//! start, and rewritten on a fixed interval only when it actually
//! changed (structural comparison against the last written state).
//! Persistence failures go to an optional error callback and never stop
//! the loop; the next scheduled attempt still runs.

use crate::error::{Result, StoreError};
use crate::store::FeatureStore;
use crate::types::MapState;
use async_trait::async_trait;
use carto_history::HistoryTracker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Fixed storage key for the persisted map state.
pub const STATE_KEY: &str = "carto.map_state";

/// Key-value blob sink the snapshot layer writes through. Local device
/// storage, a file, or a test recorder all fit behind this.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, blob: &str) -> Result<()>;
}

/// File-backed sink: one JSON file per key under a base directory,
/// written atomically (temp file, then rename).
#[derive(Debug, Clone)]
pub struct FileSnapshotSink {
    base_dir: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", safe_component(key)))
    }
}

#[async_trait]
impl SnapshotSink for FileSnapshotSink {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, blob: &str) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, blob).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn safe_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

/// Load the persisted map state, or `None` on first run.
pub async fn load_state(sink: &dyn SnapshotSink, key: &str) -> Result<Option<MapState>> {
    let Some(blob) = sink.load(key).await? else {
        return Ok(None);
    };
    let state: MapState = serde_json::from_str(&blob)
        .map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;
    Ok(Some(state))
}

/// Serialize and write the current state unconditionally.
pub async fn save_state(sink: &dyn SnapshotSink, key: &str, state: &MapState) -> Result<()> {
    let blob = serde_json::to_string(state)?;
    sink.save(key, &blob).await
}

#[derive(Debug, Clone)]
pub struct AutoSaverConfig {
    pub interval: Duration,
    pub key: String,
}

impl Default for AutoSaverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            key: STATE_KEY.to_string(),
        }
    }
}

type ErrorCallback = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Periodic snapshot writer. Owns a background task; `stop` tears it
/// down.
pub struct AutoSaver {
    handle: JoinHandle<()>,
}

impl AutoSaver {
    /// Spawn the auto-save loop over a shared store and history tracker.
    pub fn start(
        store: Arc<Mutex<FeatureStore>>,
        history: Arc<Mutex<HistoryTracker>>,
        sink: Arc<dyn SnapshotSink>,
        config: AutoSaverConfig,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the loop only
            // writes after a full interval has passed.
            ticker.tick().await;

            let mut last_written: Option<MapState> = None;
            loop {
                ticker.tick().await;
                let state = {
                    let store = store.lock().await;
                    let history = history.lock().await;
                    store.to_map_state(Some(history.state()))
                };
                if last_written.as_ref() == Some(&state) {
                    log::debug!("auto-save: state unchanged, skipping write");
                    continue;
                }
                match save_state(sink.as_ref(), &config.key, &state).await {
                    Ok(()) => {
                        log::debug!("auto-save: wrote snapshot under {}", config.key);
                        last_written = Some(state);
                    }
                    Err(e) => {
                        log::warn!("auto-save failed: {e}");
                        if let Some(callback) = &on_error {
                            callback(&e);
                        }
                    }
                }
            }
        });
        Self { handle }
    }

    /// Stop the loop. Pending unsaved changes are not flushed; call
    /// `save_state` first for a final write.
    pub fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSink {
        saves: Mutex<Vec<String>>,
        fail: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                saves: Mutex::new(Vec::new()),
                fail: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SnapshotSink for RecordingSink {
        async fn load(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn save(&self, _key: &str, blob: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) > 0 {
                self.fail.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::InvalidSnapshot("injected".into()));
            }
            self.saves.lock().await.push(blob.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn file_sink_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSnapshotSink::new(dir.path());

        assert!(load_state(&sink, STATE_KEY).await.unwrap().is_none());

        let mut store = FeatureStore::new();
        store.create_layer_group("Base");
        let state = store.to_map_state(None);
        save_state(&sink, STATE_KEY, &state).await.unwrap();

        let loaded = load_state(&sink, STATE_KEY).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_invalid_snapshot_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSnapshotSink::new(dir.path());
        sink.save(STATE_KEY, "{not json").await.unwrap();
        let err = load_state(&sink, STATE_KEY).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSnapshot(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_save_writes_only_when_state_changed() {
        let store = Arc::new(Mutex::new(FeatureStore::new()));
        let history = Arc::new(Mutex::new(HistoryTracker::default()));
        let sink = Arc::new(RecordingSink::new());
        let config = AutoSaverConfig {
            interval: Duration::from_secs(30),
            ..Default::default()
        };
        let saver = AutoSaver::start(
            store.clone(),
            history.clone(),
            sink.clone(),
            config,
            None,
        );

        // Let the spawned loop initialize its `interval` timer before we
        // advance the (paused) clock, so its first tick is anchored at t=0.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(sink.saves.lock().await.len(), 1);

        // Unchanged state: the next tick skips the write.
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(sink.saves.lock().await.len(), 1);

        // Mutate, then expect exactly one more write.
        store.lock().await.create_layer_group("Overlay");
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(sink.saves.lock().await.len(), 2);

        saver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn auto_save_survives_sink_failures() {
        let store = Arc::new(Mutex::new(FeatureStore::new()));
        let history = Arc::new(Mutex::new(HistoryTracker::default()));
        let sink = Arc::new(RecordingSink::new());
        sink.fail.store(1, Ordering::SeqCst);

        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let saver = AutoSaver::start(
            store.clone(),
            history,
            sink.clone(),
            AutoSaverConfig::default(),
            Some(Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );

        // Let the spawned loop initialize its `interval` timer before we
        // advance the (paused) clock, so its first tick is anchored at t=0.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(sink.saves.lock().await.len(), 0);

        // The loop keeps running; the next attempt succeeds.
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(sink.saves.lock().await.len(), 1);

        saver.stop();
    }
}
