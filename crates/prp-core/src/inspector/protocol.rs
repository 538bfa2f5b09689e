use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::analysis::{Analysis, Classification, ProcessingRequest, Recommendation};
use crate::signal::Signal;

pub type WorkerId = usize;

// ─── Envelope ─────────────────────────────────────────────────────────────

/// Wire form of every coordinator ↔ worker message:
/// `{"type": ..., "payload": ..., "timestamp": ..., "workerId": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<M> {
    #[serde(flatten)]
    pub message: M,
    pub timestamp: DateTime<Utc>,
    pub worker_id: WorkerId,
}

impl<M> Envelope<M> {
    pub fn new(worker_id: WorkerId, message: M) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
            worker_id,
        }
    }
}

// ─── Coordinator → worker ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    Process(Box<ProcessingRequest>),
    Ping,
    Shutdown,
}

// ─── Worker → coordinator ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Pong,
    Result(Box<WorkerResult>),
    Error(WorkerFailure),
    ShutdownComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerErrorCode {
    InitializationError,
    ProcessingError,
    TimeoutError,
    PoolUnavailable,
}

impl WorkerErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerErrorCode::InitializationError => "INITIALIZATION_ERROR",
            WorkerErrorCode::ProcessingError => "PROCESSING_ERROR",
            WorkerErrorCode::TimeoutError => "TIMEOUT_ERROR",
            WorkerErrorCode::PoolUnavailable => "POOL_UNAVAILABLE",
        }
    }
}

impl fmt::Display for WorkerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful inspection of one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub signal_id: String,
    pub signal: Signal,
    /// Unit of work the originating request belongs to.
    pub prp: String,
    pub classification: Classification,
    pub recommendations: Vec<Recommendation>,
    pub analysis: Analysis,
    pub processing_time_ms: u64,
    pub worker_id: WorkerId,
    pub success: bool,
}

/// A request (or a worker) that did not produce a [`WorkerResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerFailure {
    pub code: WorkerErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prp: Option<String>,
    /// `None` when the pool itself produced the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
}

impl WorkerFailure {
    pub fn for_request(
        code: WorkerErrorCode,
        request: &ProcessingRequest,
        worker_id: Option<WorkerId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            signal_id: Some(request.signal.id.clone()),
            prp: Some(request.prp()),
            worker_id,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_type_payload_and_worker_id() {
        let env = Envelope::new(3, WorkerMessage::Ready);
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "ready");
        assert_eq!(value["workerId"], 3);
        assert!(value["timestamp"].is_string());
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn error_payload_uses_screaming_codes() {
        let request = ProcessingRequest::new(Signal::new("zz", 1, 0, "[zz]".into()));
        let failure = WorkerFailure::for_request(
            WorkerErrorCode::ProcessingError,
            &request,
            Some(1),
            "no guideline",
        );
        let env = Envelope::new(1, WorkerMessage::Error(failure.clone()));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], "PROCESSING_ERROR");
        assert_eq!(value["payload"]["signalId"], request.signal.id.as_str());

        let back: Envelope<WorkerMessage> = serde_json::from_value(value).unwrap();
        assert_eq!(back.message, WorkerMessage::Error(failure));
    }

    #[test]
    fn process_message_wraps_the_request() {
        let request = ProcessingRequest::new(Signal::new("tp", 2, 4, "x [tp]".into()));
        let env = Envelope::new(0, CoordinatorMessage::Process(Box::new(request)));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "process");
        assert_eq!(value["payload"]["signal"]["code"], "tp");
        assert_eq!(value["payload"]["priority"], 5);
    }
}
