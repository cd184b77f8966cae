use chrono::{DateTime, Utc};
use uuid::Uuid;
use verspec_core::planner::UnitInstance;
use verspec_core::UnitId;

use crate::executor::assertions::AssertionReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitOutcome {
    Passed,
    /// An assertion, timeout, HTTP, script or interpolation failure.
    Failed,
    /// Not executed: a dependency did not pass or the session halted first.
    Skipped,
    /// The session could not continue (e.g. the target is unreachable).
    Errored,
}

impl UnitOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Assertion,
    Timeout,
    Http,
    Network,
    UnresolvedVariable,
    InvalidRequest,
    Script,
    Dependency,
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UnitReport {
    pub unit: UnitId,
    /// `path#name`
    pub label: String,
    pub file: String,
    pub line: usize,
    pub instance: UnitInstance,
    pub selected: bool,
    pub outcome: UnitOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub duration_ms: u64,
    pub assertions: Vec<AssertionReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// In plan order.
    pub units: Vec<UnitReport>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errored: usize,
    /// Why scheduling stopped early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
    /// True when a fatal error ended the session.
    pub aborted: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errored == 0 && !self.aborted
    }

    pub fn unit(&self, label: &str) -> impl Iterator<Item = &UnitReport> {
        let label = label.to_string();
        self.units.iter().filter(move |u| u.label == label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("task join error: {0}")]
    TaskJoin(String),
    #[error("concurrency limiter closed")]
    LimiterClosed,
}
