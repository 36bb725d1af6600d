//! Progress records of stage transitions and the sinks consuming them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    SelectTests,
    Measure,
    RootCause,
    Done,
    Failed,
}

/// One transition of the pipeline state machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub stage: PipelineState,
    pub next: PipelineState,
    /// Summary of what the stage worked on
    pub inputs: Value,
    /// Summary of what the stage produced, or the error
    pub outcome: Value,
}

impl ProgressEvent {
    pub fn new(stage: PipelineState, next: PipelineState, inputs: Value, outcome: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            stage,
            next,
            inputs,
            outcome,
        }
    }
}

/// Append-only consumer of progress events. Recording must not fail the pipeline.
pub trait ProgressSink: Send + Sync {
    fn record(&self, event: &ProgressEvent);
}

/// Forwards events to the `log` facade.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn record(&self, event: &ProgressEvent) {
        info!(
            "{:?} -> {:?}: inputs {} outcome {}",
            event.stage, event.next, event.inputs, event.outcome
        );
    }
}

/// Appends one JSON object per event to a file.
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open progress file {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ProgressSink for JsonLinesSink {
    fn record(&self, event: &ProgressEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize progress event: {}", e);
                return;
            }
        };
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("Failed to write progress event: {}", e);
        }
    }
}

/// Keeps events in memory, mainly for tests and embedding callers.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for CollectingSink {
    fn record(&self, event: &ProgressEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
