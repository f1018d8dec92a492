use crate::surface::MapSurface;
use carto_protocol::{parse_commands, Command, MeasureKind};
use carto_runtime::ThrottleManager;
use serde::Serialize;
use std::sync::Arc;

/// Fixed destination layer for buffer results. Chaining `buffer` output
/// into `add_feature` on this layer is a protocol rule, not a
/// configuration knob.
pub const BUFFER_LAYER: &str = "buffers";

/// A measurement produced by a `measure` command during processing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub kind: MeasureKind,
    pub value: f64,
}

/// Result of processing one AI response: the input text unchanged
/// (commands have side effects on the surface, they never rewrite the
/// text stream), plus execution counts and any measurements.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub text: String,
    pub executed: usize,
    pub failed: usize,
    pub measurements: Vec<Measurement>,
}

/// Extracts commands from response text and dispatches them, in order,
/// against a bound map surface.
pub struct CommandExecutor {
    surface: Arc<dyn MapSurface>,
    throttle: Option<ThrottleManager>,
}

impl CommandExecutor {
    pub fn new(surface: Arc<dyn MapSurface>) -> Self {
        Self {
            surface,
            throttle: None,
        }
    }

    /// Wrap every surface dispatch in the given throttle manager
    /// (typically one manager per command pipeline).
    pub fn with_throttle(surface: Arc<dyn MapSurface>, throttle: ThrottleManager) -> Self {
        Self {
            surface,
            throttle: Some(throttle),
        }
    }

    /// Parse and execute every command found in `text`. Each command
    /// runs inside its own failure boundary: an error is logged with
    /// the failing command payload and does not stop the rest of the
    /// batch.
    pub async fn process_response(&self, text: &str) -> ProcessOutcome {
        let commands = parse_commands(text);
        log::debug!("processing response with {} commands", commands.len());

        let mut outcome = ProcessOutcome {
            text: text.to_string(),
            executed: 0,
            failed: 0,
            measurements: Vec::new(),
        };
        for command in commands {
            let payload = serde_json::to_string(&command)
                .unwrap_or_else(|_| format!("<unserializable {}>", command.name()));
            let result = match &self.throttle {
                Some(throttle) => throttle.execute(self.run(command)).await,
                None => self.run(command).await,
            };
            match result {
                Ok(measurement) => {
                    outcome.executed += 1;
                    if let Some(measurement) = measurement {
                        outcome.measurements.push(measurement);
                    }
                }
                Err(e) => {
                    outcome.failed += 1;
                    log::error!("command execution failed: {e:#}; payload={payload}");
                }
            }
        }
        outcome
    }

    async fn run(&self, command: Command) -> anyhow::Result<Option<Measurement>> {
        match command {
            Command::ZoomTo { coordinates, zoom } => {
                self.surface.zoom_to(coordinates, zoom).await?;
            }
            Command::AddFeature { feature, layer_id } => {
                self.surface
                    .add_feature(feature, layer_id.as_deref().unwrap_or("features"), None)
                    .await?;
            }
            Command::ModifyFeature {
                feature_id,
                properties,
            } => {
                self.surface.modify_feature(&feature_id, &properties).await?;
            }
            Command::RemoveFeature {
                feature_id,
                layer_id,
            } => {
                self.surface
                    .remove_feature(&feature_id, layer_id.as_deref())
                    .await?;
            }
            Command::StyleFeature { feature_id, style } => {
                self.surface.style_feature(&feature_id, &style).await?;
            }
            Command::Measure { kind, features } => {
                let value = self.surface.measure(kind, &features).await?;
                return Ok(Some(Measurement { kind, value }));
            }
            Command::Buffer {
                feature,
                distance,
                units,
            } => {
                let buffered = self.surface.buffer(&feature, distance, units).await?;
                self.surface
                    .add_feature(buffered, BUFFER_LAYER, None)
                    .await?;
            }
        }
        Ok(None)
    }
}
