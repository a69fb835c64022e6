//! Pipeline lifecycle events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::StageStatus;

/// An event emitted while a pipeline runs or its artifact is finalized.
///
/// Events are consumed by event sinks for logging and by tests that need to
/// observe which stages were launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type (e.g., "stage.launched", "artifact.promoted").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl PipelineEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the `stage` field, if present.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.data.get("stage").and_then(serde_json::Value::as_str)
    }

    /// Converts the event to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.event_type,
            "timestamp": self.timestamp,
            "data": self.data,
        })
    }

    /// Creates a "pipeline.started" event.
    #[must_use]
    pub fn pipeline_started(pipeline: &str, run_id: &str, stages: usize) -> Self {
        Self::new("pipeline.started")
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("run_id", serde_json::json!(run_id))
            .add_data("stages", serde_json::json!(stages))
    }

    /// Creates a "stage.launched" event.
    #[must_use]
    pub fn stage_launched(stage: &str, index: usize, pid: Option<u32>, command: &str) -> Self {
        Self::new("stage.launched")
            .add_data("stage", serde_json::json!(stage))
            .add_data("index", serde_json::json!(index))
            .add_data("pid", serde_json::json!(pid))
            .add_data("command", serde_json::json!(command))
    }

    /// Creates a "stage.exited" event.
    #[must_use]
    pub fn stage_exited(stage: &str, status: StageStatus, duration_ms: f64) -> Self {
        Self::new("stage.exited")
            .add_data("stage", serde_json::json!(stage))
            .add_data("status", serde_json::json!(status.to_string()))
            .add_data("success", serde_json::json!(status.is_success()))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "pipeline.completed" event.
    #[must_use]
    pub fn pipeline_completed(pipeline: &str, duration_ms: f64) -> Self {
        Self::new("pipeline.completed")
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "pipeline.failed" event.
    #[must_use]
    pub fn pipeline_failed(pipeline: &str, error: &str) -> Self {
        Self::new("pipeline.failed")
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("error", serde_json::json!(error))
    }

    /// Creates an "artifact.promoted" event.
    #[must_use]
    pub fn artifact_promoted(temporary: &Path, canonical: &Path) -> Self {
        Self::new("artifact.promoted")
            .add_data("temporary", serde_json::json!(temporary.display().to_string()))
            .add_data("canonical", serde_json::json!(canonical.display().to_string()))
    }

    /// Creates an "artifact.indexed" event.
    #[must_use]
    pub fn artifact_indexed(canonical: &Path, index: &Path) -> Self {
        Self::new("artifact.indexed")
            .add_data("canonical", serde_json::json!(canonical.display().to_string()))
            .add_data("index", serde_json::json!(index.display().to_string()))
    }

    /// Creates an "artifact.index_failed" event.
    #[must_use]
    pub fn artifact_index_failed(canonical: &Path, error: &str) -> Self {
        Self::new("artifact.index_failed")
            .add_data("canonical", serde_json::json!(canonical.display().to_string()))
            .add_data("error", serde_json::json!(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = PipelineEvent::new("test.event");
        assert_eq!(event.event_type, "test.event");
        assert!(event.data.is_empty());
        assert!(event.stage().is_none());
    }

    #[test]
    fn test_stage_launched() {
        let event = PipelineEvent::stage_launched("filter", 1, Some(4242), "NanoFilt -q 10");
        assert_eq!(event.event_type, "stage.launched");
        assert_eq!(event.stage(), Some("filter"));
        assert_eq!(event.data.get("pid"), Some(&serde_json::json!(4242)));
    }

    #[test]
    fn test_stage_exited() {
        let event = PipelineEvent::stage_exited("align", StageStatus::Exited(1), 12.5);
        assert_eq!(event.data.get("status"), Some(&serde_json::json!("exit code 1")));
        assert_eq!(event.data.get("success"), Some(&serde_json::json!(false)));
    }

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::artifact_promoted(Path::new("a.tmp"), Path::new("a.bam"));
        let json = serde_json::to_string(&event).unwrap();
        let back: PipelineEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.event_type, "artifact.promoted");
        assert_eq!(event.to_value()["data"]["canonical"], "a.bam");
    }
}
