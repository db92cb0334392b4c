//! JSON-lines output of results and the final report.

use serde::Serialize;
use std::io::{self, Write};

use stampede::RunReport;
use stampede_core::RunOnceResult;

/// JSON event types that can be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonEventType {
    TaskResult,
    RunReport,
    Error,
}

/// A JSON event to be output to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct JsonEvent {
    pub event: JsonEventType,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl JsonEvent {
    /// Create a new JSON event with the current timestamp.
    pub fn new(event: JsonEventType, data: serde_json::Value) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Output this event as a JSON line to stdout.
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}

/// Build a task_result event.
pub fn task_result(result: &RunOnceResult) -> JsonEvent {
    JsonEvent::new(
        JsonEventType::TaskResult,
        serde_json::to_value(result).unwrap_or_default(),
    )
}

/// Build a run_report event. Per-task results are emitted separately.
pub fn run_report(report: &RunReport) -> JsonEvent {
    let mut data = serde_json::to_value(report).unwrap_or_default();
    if let Some(obj) = data.as_object_mut() {
        obj.remove("results");
    }
    JsonEvent::new(JsonEventType::RunReport, data)
}

/// Build an error event.
pub fn error(message: &str) -> JsonEvent {
    JsonEvent::new(
        JsonEventType::Error,
        serde_json::json!({
            "message": message,
        }),
    )
}
