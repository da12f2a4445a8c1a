//! Trace record assembly (C6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CorrelationId, OperationId};

/// Outcome of a traced action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ActionStatus {
    ActiveActionStatus,
    CompletedActionStatus,
    FailedActionStatus,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveActionStatus => "ActiveActionStatus",
            Self::CompletedActionStatus => "CompletedActionStatus",
            Self::FailedActionStatus => "FailedActionStatus",
        }
    }

    /// Best-effort parse of a response body's `actionStatus` field,
    /// defaulting to completed when absent or unrecognised.
    pub fn from_response_body(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
            return Self::CompletedActionStatus;
        };
        match value.get("actionStatus").and_then(|v| v.as_str()) {
            Some("FailedActionStatus") => Self::FailedActionStatus,
            Some("ActiveActionStatus") => Self::ActiveActionStatus,
            _ => Self::CompletedActionStatus,
        }
    }
}

/// Whether a payload pointer column holds a real store locator or the
/// redaction sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadLocator {
    Stored(String),
    Redacted,
}

impl PayloadLocator {
    pub fn as_column_value(&self) -> &str {
        match self {
            Self::Stored(s) => s,
            Self::Redacted => crate::policy::REDACTION_SENTINEL,
        }
    }
}

/// One retained trace of a semantic action (§3 `ActionExecution`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecution {
    pub operation_id: String,
    pub correlation_id: String,
    pub parent_operation_id: Option<String>,

    pub action_type: String,
    pub object_type: String,
    pub service_id: String,
    pub endpoint: String,
    pub http_method: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,

    pub action_status: String,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub error_type: Option<String>,

    pub request_url: String,
    pub response_url: String,
    pub request_size_bytes: i64,
    pub response_size_bytes: i64,

    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,

    pub trace_id: Option<String>,
    pub span_id: Option<String>,

    pub data_subject_id: Option<String>,
    pub data_region: String,
    pub legal_basis: String,
    pub retention_until: Option<DateTime<Utc>>,
    pub contains_pii: bool,
    pub pii_redacted: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_s3_key: Option<String>,
    pub consent_id: Option<String>,
}

/// Everything the assembler needs about one completed request/response
/// cycle, gathered by the middleware (C1/C2/C4) before assembly.
pub struct AssemblyInput<'a> {
    pub correlation_id: &'a CorrelationId,
    pub operation_id: &'a OperationId,
    pub parent_operation_id: Option<&'a OperationId>,
    pub action_type: &'a str,
    pub object_type: &'a str,
    pub service_id: &'a str,
    pub endpoint: &'a str,
    pub http_method: &'a str,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub request_locator: PayloadLocator,
    pub response_locator: PayloadLocator,
    pub request_size_bytes: i64,
    pub response_size_bytes: i64,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub data_subject_id: Option<String>,
    pub contains_pii: bool,
    pub pii_redacted: bool,
}

/// Assemble an [`ActionExecution`] from the middleware's collected inputs
/// and the service's compliance configuration.
pub fn assemble(
    input: AssemblyInput<'_>,
    action_status: ActionStatus,
    data_region: &str,
    legal_basis: &str,
    retention_until: Option<DateTime<Utc>>,
) -> ActionExecution {
    let duration_ms = (input.completed_at - input.started_at).num_milliseconds().max(0);

    ActionExecution {
        operation_id: input.operation_id.to_string(),
        correlation_id: input.correlation_id.to_string(),
        parent_operation_id: input.parent_operation_id.map(|id| id.to_string()),
        action_type: input.action_type.to_string(),
        object_type: input.object_type.to_string(),
        service_id: input.service_id.to_string(),
        endpoint: input.endpoint.to_string(),
        http_method: input.http_method.to_string(),
        started_at: input.started_at,
        completed_at: input.completed_at,
        duration_ms,
        action_status: action_status.as_str().to_string(),
        status_code: input.status_code,
        error_message: input.error_message,
        error_type: input.error_type,
        request_url: input.request_locator.as_column_value().to_string(),
        response_url: input.response_locator.as_column_value().to_string(),
        request_size_bytes: input.request_size_bytes,
        response_size_bytes: input.response_size_bytes,
        client_ip: input.client_ip,
        user_agent: input.user_agent,
        metadata: input.metadata,
        trace_id: None,
        span_id: None,
        data_subject_id: input.data_subject_id,
        data_region: data_region.to_string(),
        legal_basis: legal_basis.to_string(),
        retention_until,
        contains_pii: input.contains_pii,
        pii_redacted: input.pii_redacted,
        archived_at: None,
        archived_s3_key: None,
        consent_id: None,
    }
}
