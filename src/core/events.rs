//! State change notifications.
//!
//! Publishing is fire-and-forget: a sink never blocks the save that produced the event,
//! and sink failures are logged, never returned to the caller.

use crate::core::error::StateError;
use crate::core::store::ProjectId;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

pub const EVENT_SOURCE: &str = "projstate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    RequirementsUpdated,
    ScopeUpdated,
    ImplementationProgress,
    ProjectStructureUpdated,
    MockupCreated,
    PhaseCompleted,
    ProjectPathUpdated,
    ProjectDeleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RequirementsUpdated => "requirements-updated",
            EventType::ScopeUpdated => "scope-updated",
            EventType::ImplementationProgress => "implementation-progress",
            EventType::ProjectStructureUpdated => "project-structure-updated",
            EventType::MockupCreated => "mockup-created",
            EventType::PhaseCompleted => "phase-completed",
            EventType::ProjectPathUpdated => "project-path-updated",
            EventType::ProjectDeleted => "project-deleted",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub project_id: ProjectId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub source: String,
}

impl StateEvent {
    pub fn new(event_type: EventType, project_id: &ProjectId, payload: serde_json::Value) -> Self {
        Self {
            event_id: time::new_event_id(),
            event_type,
            payload,
            project_id: project_id.clone(),
            timestamp: time::now_millis(),
            source: EVENT_SOURCE.to_string(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &StateEvent) -> Result<(), StateError>;
}

/// Publish to `sink`, logging instead of failing.
pub fn emit(sink: &dyn EventSink, event_type: EventType, project: &ProjectId, payload: serde_json::Value) {
    let event = StateEvent::new(event_type, project, payload);
    match sink.publish(&event) {
        Ok(()) => tracing::debug!(project = %project, event = %event_type, "event published"),
        Err(e) => tracing::warn!(project = %project, event = %event_type, error = %e, "event publish failed"),
    }
}

/// In-process fan-out to channel subscribers. Dropped receivers are pruned on the
/// next publish.
#[derive(Debug, Default, Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<StateEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Result<Receiver<StateEvent>, StateError> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .map_err(|_| StateError::ValidationError("event bus lock poisoned".to_string()))?
            .push(tx);
        Ok(rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: &StateEvent) -> Result<(), StateError> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| StateError::ValidationError("event bus lock poisoned".to_string()))?;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        Ok(())
    }
}

/// Append-only JSONL audit file, one event per line.
#[derive(Debug, Clone)]
pub struct JsonlEventLog {
    path: PathBuf,
}

impl JsonlEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every parseable event in the log; malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<StateEvent>, StateError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl EventSink for JsonlEventLog {
    fn publish(&self, event: &StateEvent) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(f, "{}", line)?;
        Ok(())
    }
}

/// Publishes to every sink; all are attempted, the first error is returned.
#[derive(Default, Clone)]
pub struct FanOut {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanOut {
    fn publish(&self, event: &StateEvent) -> Result<(), StateError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
