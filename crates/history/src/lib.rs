//! Bounded undo/redo tracking for map store mutations.
//!
//! Two stacks, both capped: pushing a new operation drops the oldest
//! entry on overflow (never the newest) and clears the redo stack, since
//! a fresh action invalidates any previously-undone future. `undo` and
//! `redo` are no-ops on empty stacks.

use carto_geo::Feature;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::SystemTime;

pub const DEFAULT_CAPACITY: usize = 50;

/// Kind of store mutation an operation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Modify,
    Delete,
    Style,
    Move,
}

/// One recorded mutation: the affected layer, and the feature snapshot
/// before and/or after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapOperation {
    pub kind: OperationKind,
    pub layer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Feature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Feature>,
    pub at: SystemTime,
}

impl MapOperation {
    pub fn new(
        kind: OperationKind,
        layer_id: impl Into<String>,
        before: Option<Feature>,
        after: Option<Feature>,
    ) -> Self {
        Self {
            kind,
            layer_id: layer_id.into(),
            before,
            after,
            at: SystemTime::now(),
        }
    }
}

/// Serializable form of the tracker's stacks, embedded in the persisted
/// map snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryState {
    pub undo: Vec<MapOperation>,
    pub redo: Vec<MapOperation>,
}

type OperationCallback = Box<dyn Fn(&MapOperation) + Send + Sync>;

/// The operation log. Owns the undo and redo stacks and optional
/// callbacks fired when an operation crosses between them.
pub struct HistoryTracker {
    undo: VecDeque<MapOperation>,
    redo: VecDeque<MapOperation>,
    capacity: usize,
    on_undo: Option<OperationCallback>,
    on_redo: Option<OperationCallback>,
}

impl Default for HistoryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HistoryTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            capacity: capacity.max(1),
            on_undo: None,
            on_redo: None,
        }
    }

    /// Install a callback invoked with each operation moved by `undo`.
    pub fn on_undo(mut self, callback: impl Fn(&MapOperation) + Send + Sync + 'static) -> Self {
        self.on_undo = Some(Box::new(callback));
        self
    }

    /// Install a callback invoked with each operation moved by `redo`.
    pub fn on_redo(mut self, callback: impl Fn(&MapOperation) + Send + Sync + 'static) -> Self {
        self.on_redo = Some(Box::new(callback));
        self
    }

    /// Push a new operation. Clears the redo stack and evicts the oldest
    /// undo entry when the stack is full.
    pub fn record(&mut self, operation: MapOperation) {
        if !self.redo.is_empty() {
            log::debug!("new {:?} operation clears {} redo entries", operation.kind, self.redo.len());
            self.redo.clear();
        }
        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(operation);
    }

    pub fn record_create(&mut self, layer_id: &str, feature: Feature) {
        self.record(MapOperation::new(OperationKind::Create, layer_id, None, Some(feature)));
    }

    pub fn record_modify(&mut self, layer_id: &str, before: Feature, after: Feature) {
        self.record(MapOperation::new(
            OperationKind::Modify,
            layer_id,
            Some(before),
            Some(after),
        ));
    }

    pub fn record_delete(&mut self, layer_id: &str, feature: Feature) {
        self.record(MapOperation::new(OperationKind::Delete, layer_id, Some(feature), None));
    }

    pub fn record_style(&mut self, layer_id: &str, before: Feature, after: Feature) {
        self.record(MapOperation::new(
            OperationKind::Style,
            layer_id,
            Some(before),
            Some(after),
        ));
    }

    pub fn record_move(&mut self, layer_id: &str, before: Feature, after: Feature) {
        self.record(MapOperation::new(
            OperationKind::Move,
            layer_id,
            Some(before),
            Some(after),
        ));
    }

    /// Move the newest undo entry to the redo stack and return it.
    /// `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<MapOperation> {
        let operation = self.undo.pop_back()?;
        if let Some(callback) = &self.on_undo {
            callback(&operation);
        }
        if self.redo.len() == self.capacity {
            self.redo.pop_front();
        }
        self.redo.push_back(operation.clone());
        Some(operation)
    }

    /// Move the newest redo entry back to the undo stack and return it.
    /// `None` when there is nothing to redo.
    pub fn redo(&mut self) -> Option<MapOperation> {
        let operation = self.redo.pop_back()?;
        if let Some(callback) = &self.on_redo {
            callback(&operation);
        }
        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(operation.clone());
        Some(operation)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Snapshot both stacks for persistence.
    pub fn state(&self) -> HistoryState {
        HistoryState {
            undo: self.undo.iter().cloned().collect(),
            redo: self.redo.iter().cloned().collect(),
        }
    }

    /// Restore stacks from a persisted snapshot, truncating to capacity
    /// from the oldest end.
    pub fn restore(&mut self, state: HistoryState) {
        self.undo = state.undo.into_iter().collect();
        self.redo = state.redo.into_iter().collect();
        while self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
        while self.redo.len() > self.capacity {
            self.redo.pop_front();
        }
    }
}

impl std::fmt::Debug for HistoryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryTracker")
            .field("undo", &self.undo.len())
            .field("redo", &self.redo.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
