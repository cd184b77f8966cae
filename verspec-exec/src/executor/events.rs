use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;
use verspec_core::UnitId;

use crate::executor::result::UnitOutcome;

#[derive(Debug, Clone)]
pub enum Event {
    SessionStarted {
        session_id: Uuid,
        units: usize,
    },
    SessionFinished {
        session_id: Uuid,
        passed: usize,
        failed: usize,
        skipped: usize,
        errored: usize,
        aborted: bool,
    },
    UnitStarted {
        session_id: Uuid,
        unit: UnitId,
        label: String,
    },
    UnitFinished {
        session_id: Uuid,
        unit: UnitId,
        label: String,
        outcome: UnitOutcome,
        duration_ms: u64,
    },
    AssertionFailed {
        session_id: Uuid,
        unit: UnitId,
        label: String,
        expression: String,
        expected: String,
        actual: String,
    },
}

impl Event {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Event::SessionStarted { session_id, units } => {
                json!({ "type": "session.started", "session_id": session_id.to_string(), "units": units })
            }
            Event::SessionFinished {
                session_id,
                passed,
                failed,
                skipped,
                errored,
                aborted,
            } => json!({
                "type": "session.finished",
                "session_id": session_id.to_string(),
                "passed": passed,
                "failed": failed,
                "skipped": skipped,
                "errored": errored,
                "aborted": aborted
            }),
            Event::UnitStarted {
                session_id,
                unit,
                label,
            } => {
                json!({ "type": "unit.started", "session_id": session_id.to_string(), "unit": unit.to_string(), "label": label })
            }
            Event::UnitFinished {
                session_id,
                unit,
                label,
                outcome,
                duration_ms,
            } => json!({
                "type": "unit.finished",
                "session_id": session_id.to_string(),
                "unit": unit.to_string(),
                "label": label,
                "outcome": outcome.as_str(),
                "duration_ms": duration_ms
            }),
            Event::AssertionFailed {
                session_id,
                unit,
                label,
                expression,
                expected,
                actual,
            } => json!({
                "type": "assertion.failed",
                "session_id": session_id.to_string(),
                "unit": unit.to_string(),
                "label": label,
                "expression": expression,
                "expected": expected,
                "actual": actual
            }),
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

pub struct CompositeEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl Default for CompositeEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl EventSink for CompositeEventSink {
    async fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

/// One JSON object per line on stdout.
pub struct StdoutEventSink;

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit(&self, event: Event) {
        println!("{}", serde_json::to_string(&event.to_json()).unwrap_or_default());
    }
}

/// Forwards events to `tracing`; failures at `warn`, everything else at `debug`.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: Event) {
        match &event {
            Event::UnitFinished {
                label,
                outcome: UnitOutcome::Failed | UnitOutcome::Errored,
                ..
            } => {
                tracing::warn!(unit = %label, event = %event.to_json(), "unit did not pass");
            }
            Event::AssertionFailed { label, expression, .. } => {
                tracing::warn!(unit = %label, %expression, "assertion failed");
            }
            _ => tracing::debug!(event = %event.to_json(), "event"),
        }
    }
}

pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: Event) {}
}
