//! Spatial computation jobs dispatched through the worker pool.
//!
//! Requests cross the pool boundary as named operations with JSON
//! payloads, the same shape a task would need to reach an isolated
//! execution context.

use carto_geo::{analysis, DistanceUnit, Feature};
use carto_runtime::TaskRequest;
use serde::Deserialize;

pub const OP_MEASURE_DISTANCE: &str = "measure_distance";
pub const OP_MEASURE_AREA: &str = "measure_area";
pub const OP_BUFFER: &str = "buffer";

#[derive(Deserialize)]
struct BufferPayload {
    feature: Feature,
    distance: f64,
    units: DistanceUnit,
}

/// Synchronous task body for the pool's blocking contexts.
pub fn run_spatial_task(request: TaskRequest) -> Result<serde_json::Value, String> {
    match request.op.as_str() {
        OP_MEASURE_DISTANCE => {
            let features: Vec<Feature> =
                serde_json::from_value(request.payload).map_err(|e| e.to_string())?;
            Ok(serde_json::json!(analysis::calculate_distance(&features)))
        }
        OP_MEASURE_AREA => {
            let features: Vec<Feature> =
                serde_json::from_value(request.payload).map_err(|e| e.to_string())?;
            Ok(serde_json::json!(analysis::calculate_area(&features)))
        }
        OP_BUFFER => {
            let payload: BufferPayload =
                serde_json::from_value(request.payload).map_err(|e| e.to_string())?;
            let buffered =
                analysis::create_buffer(&payload.feature, payload.distance, payload.units);
            serde_json::to_value(&buffered).map_err(|e| e.to_string())
        }
        other => Err(format!("unknown spatial task {other}")),
    }
}
