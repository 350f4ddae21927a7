use serde::{Deserialize, Serialize};

/// One item handed out by `GET /work`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemPayload {
    pub work_id: u64,
    pub content: String,
}

/// Body of `POST /result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSubmission {
    pub work_id: u64,
    pub result: String,
}

/// Read-only snapshot served by `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub in_flight: usize,
    pub pending: usize,
    pub heap_len: usize,
    pub last_processed_id: i64,
    pub expired_reissues: u64,
    pub tombstoned: u64,
}

/// Logical result of a `GET /work` call. The HTTP status code (200 / 404 /
/// connection failure) is collapsed into this enum so callers never match on
/// status codes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkResponse {
    Work(WorkItemPayload),
    AllWorkComplete,
    ServerUnavailable,
}

/// Logical result of a `POST /result` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    ServerUnavailable,
}
