//! Zoom-aware spatial bucketing of features into display clusters.
//!
//! Every loaded feature is reduced to a representative point (the mean
//! of its coordinate set) and indexed in an R-tree. Queries group
//! points within a pixel radius at the given zoom into synthetic
//! cluster points carrying a count; sparse points come back as raw
//! features.
//!
//! Unlike the spatial analysis functions, failures here are typed
//! errors and are NOT swallowed: serving queries from a corrupted index
//! is worse than failing loudly.

use carto_geo::{extract_coordinates, feature_center, Feature};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("no features loaded into the cluster index")]
    NotLoaded,

    #[error("feature {index} has invalid geometry: {reason}")]
    InvalidGeometry { index: usize, reason: String },

    #[error("unknown or stale cluster id {0}")]
    UnknownCluster(u64),
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Cluster radius in screen pixels.
    pub radius_px: f64,
    /// Minimum points that form a cluster; fewer stay raw features.
    pub min_points: usize,
    /// Zoom level beyond which nothing clusters.
    pub max_zoom: f64,
    /// Pixels per tile side, for radius-to-degrees conversion.
    pub tile_extent: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            radius_px: 40.0,
            min_points: 2,
            max_zoom: 16.0,
            tile_extent: 256.0,
        }
    }
}

/// A synthetic point standing in for `count` nearby features. The
/// serialized form carries `"cluster": true` to distinguish it from a
/// raw feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: u64,
    pub cluster: bool,
    /// `[lng, lat]` mean position of the members.
    pub center: [f64; 2],
    pub count: usize,
}

/// One item of a cluster query: either a merged cluster point or a raw
/// feature left unclustered at this zoom.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClusterItem {
    Cluster(Cluster),
    Single(Feature),
}

#[derive(Debug, Clone)]
struct IndexedPoint {
    position: [f64; 2],
    feature: Feature,
}

#[derive(Debug, Clone)]
struct ClusterRecord {
    members: Vec<usize>,
    zoom: f64,
}

/// The clustering engine. `load_features` rebuilds the index wholesale;
/// it is not incrementally updated. Cluster ids are valid until the
/// next `load_features` or `clusters` call.
pub struct ClusterIndex {
    config: ClusterConfig,
    points: Vec<IndexedPoint>,
    tree: Option<RTree<GeomWithData<[f64; 2], usize>>>,
    records: HashMap<u64, ClusterRecord>,
    next_cluster_id: u64,
}

impl ClusterIndex {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            points: Vec::new(),
            tree: None,
            records: HashMap::new(),
            next_cluster_id: 1,
        }
    }

    /// Convert every feature to its representative point and rebuild
    /// the spatial index. On invalid input the previous index is left
    /// untouched and the error is returned. Returns the number of
    /// indexed points.
    pub fn load_features(&mut self, features: &[Feature]) -> Result<usize> {
        let mut points = Vec::with_capacity(features.len());
        for (index, feature) in features.iter().enumerate() {
            let Some(center) = feature_center(feature) else {
                let error = ClusterError::InvalidGeometry {
                    index,
                    reason: "no finite coordinates".to_string(),
                };
                log::error!("cluster load rejected: {error}");
                return Err(error);
            };
            points.push(IndexedPoint {
                position: [center.x(), center.y()],
                feature: feature.clone(),
            });
        }

        let entries: Vec<GeomWithData<[f64; 2], usize>> = points
            .iter()
            .enumerate()
            .map(|(idx, p)| GeomWithData::new(p.position, idx))
            .collect();
        self.tree = Some(RTree::bulk_load(entries));
        self.points = points;
        self.records.clear();
        log::debug!("cluster index rebuilt with {} points", self.points.len());
        Ok(self.points.len())
    }

    /// Cluster the indexed points inside `bbox` (`[min_lng, min_lat,
    /// max_lng, max_lat]`) at `zoom`. Invalidates ids from previous
    /// queries.
    pub fn clusters(&mut self, bbox: [f64; 4], zoom: f64) -> Result<Vec<ClusterItem>> {
        let tree = self.tree.as_ref().ok_or(ClusterError::NotLoaded)?;
        let radius = self.radius_degrees(zoom);
        self.records.clear();

        let envelope = AABB::from_corners(
            [bbox[0] - radius, bbox[1] - radius],
            [bbox[2] + radius, bbox[3] + radius],
        );
        let mut candidates: Vec<usize> = tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
            .collect();
        candidates.sort_unstable();

        let mut visited = vec![false; self.points.len()];
        let mut items = Vec::new();
        for &idx in &candidates {
            if visited[idx] {
                continue;
            }
            let mut members: Vec<usize> = tree
                .locate_within_distance(self.points[idx].position, radius * radius)
                .map(|entry| entry.data)
                .filter(|&j| !visited[j])
                .collect();
            members.sort_unstable();

            if members.len() >= self.config.min_points && zoom < self.config.max_zoom {
                for &member in &members {
                    visited[member] = true;
                }
                let id = self.next_cluster_id;
                self.next_cluster_id += 1;
                let center = mean_position(&self.points, &members);
                items.push(ClusterItem::Cluster(Cluster {
                    id,
                    cluster: true,
                    center,
                    count: members.len(),
                }));
                self.records.insert(id, ClusterRecord { members, zoom });
            } else {
                visited[idx] = true;
                items.push(ClusterItem::Single(self.points[idx].feature.clone()));
            }
        }
        Ok(items)
    }

    /// Minimum zoom at which this cluster splits into smaller groups or
    /// singletons. `max_zoom + 1` when its members never separate.
    pub fn expansion_zoom(&self, cluster_id: u64) -> Result<f64> {
        let record = self
            .records
            .get(&cluster_id)
            .ok_or(ClusterError::UnknownCluster(cluster_id))?;
        let start = record.zoom.floor() as i64 + 1;
        for zoom in start..=(self.config.max_zoom as i64) {
            let radius = self.radius_degrees(zoom as f64);
            if self.splits_at(&record.members, radius) {
                return Ok(zoom as f64);
            }
        }
        Ok(self.config.max_zoom + 1.0)
    }

    /// Paginated originals behind a cluster. `limit` of 0 means all
    /// remaining members.
    pub fn leaves(&self, cluster_id: u64, limit: usize, offset: usize) -> Result<Vec<Feature>> {
        let record = self
            .records
            .get(&cluster_id)
            .ok_or(ClusterError::UnknownCluster(cluster_id))?;
        let end = if limit == 0 {
            record.members.len()
        } else {
            (offset + limit).min(record.members.len())
        };
        let slice = record.members.get(offset..end).unwrap_or(&[]);
        Ok(slice
            .iter()
            .map(|&idx| self.points[idx].feature.clone())
            .collect())
    }

    /// Bounding box (`[min_lng, min_lat, max_lng, max_lat]`) over every
    /// coordinate of the cluster's leaf features.
    pub fn cluster_bounds(&self, cluster_id: u64) -> Result<[f64; 4]> {
        let record = self
            .records
            .get(&cluster_id)
            .ok_or(ClusterError::UnknownCluster(cluster_id))?;
        let mut bbox: Option<[f64; 4]> = None;
        for &idx in &record.members {
            for pos in extract_coordinates(&self.points[idx].feature) {
                bbox = Some(match bbox {
                    None => [pos[0], pos[1], pos[0], pos[1]],
                    Some([min_x, min_y, max_x, max_y]) => [
                        min_x.min(pos[0]),
                        min_y.min(pos[1]),
                        max_x.max(pos[0]),
                        max_y.max(pos[1]),
                    ],
                });
            }
        }
        bbox.ok_or(ClusterError::UnknownCluster(cluster_id))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn radius_degrees(&self, zoom: f64) -> f64 {
        self.config.radius_px * 360.0 / (self.config.tile_extent * 2f64.powf(zoom))
    }

    /// Whether the member set breaks into more than one group at the
    /// given radius.
    fn splits_at(&self, members: &[usize], radius: f64) -> bool {
        let Some(&first) = members.first() else {
            return false;
        };
        let origin = self.points[first].position;
        members.iter().any(|&idx| {
            let pos = self.points[idx].position;
            let dx = pos[0] - origin[0];
            let dy = pos[1] - origin[1];
            dx * dx + dy * dy > radius * radius
        })
    }
}

fn mean_position(points: &[IndexedPoint], members: &[usize]) -> [f64; 2] {
    let n = members.len() as f64;
    let (sum_x, sum_y) = members.iter().fold((0.0, 0.0), |(x, y), &idx| {
        (x + points[idx].position[0], y + points[idx].position[1])
    });
    [sum_x / n, sum_y / n]
}
