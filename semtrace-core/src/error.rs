//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Relational store operation being performed when the error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Connect,
    Insert,
    Query,
    Update,
    Delete,
    Transaction,
    PoolAcquire,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Insert => write!(f, "insert"),
            Self::Query => write!(f, "query"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Transaction => write!(f, "transaction"),
            Self::PoolAcquire => write!(f, "pool_acquire"),
        }
    }
}

/// Category of relational/object store error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    ConnectionFailed,
    NotFound,
    ConstraintViolation,
    QueryFailed,
    Timeout,
    PermissionDenied,
    Configuration,
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::NotFound => write!(f, "not_found"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::QueryFailed => write!(f, "query_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::PermissionDenied => write!(f, "permission_denied"),
            Self::Configuration => write!(f, "configuration"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured store error with operation context, shared by the relational
/// writer (C8) and the object-store writer (C9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub operation: StoreOperation,
    pub kind: StoreErrorKind,
    pub message: String,
    pub context: Option<String>,
}

impl StoreError {
    pub fn new(operation: StoreOperation, kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self { operation, kind, message: message.into(), context: None }
    }

    pub fn with_context(
        operation: StoreOperation,
        kind: StoreErrorKind,
        message: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self { operation, kind, message: message.into(), context: Some(context.into()) }
    }

    /// Transient failures a retry layer above the core may reasonably retry.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::ConnectionFailed | StoreErrorKind::Timeout
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store {} error during {}: {}", self.kind, self.operation, self.message)?;
        if let Some(ref ctx) = self.context {
            write!(f, " [context: {ctx}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// The hot tracing path never lets these escape to the handler (see the
/// error-handling design in SPEC_FULL.md §7); only the compliance and
/// archival operations and the admin endpoints return `Error` to a caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),

    #[error("{0}")]
    Store(StoreError),

    #[error("object store error: {0}")]
    ObjectStore(Box<object_store::Error>),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("invalid action document: {0}")]
    InvalidAction(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("erasure request must include data_subject_id or correlation_id")]
    ErasureSelectorRequired,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Store(e)
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::ObjectStore(Box::new(e))
    }
}

/// Error response body returned by the admin endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self { error: error.into(), code: None, status: status.as_u16() }
    }

    pub fn with_code(status: StatusCode, code: impl Into<String>, error: impl Into<String>) -> Self {
        Self { error: error.into(), code: Some(code.into()), status: status.as_u16() }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Error::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", e.to_string()),
            ),
            Error::Store(ref e) => {
                let status = match e.kind {
                    StoreErrorKind::NotFound => StatusCode::NOT_FOUND,
                    StoreErrorKind::ConstraintViolation => StatusCode::CONFLICT,
                    StoreErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    StoreErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                tracing::error!(
                    operation = %e.operation,
                    kind = %e.kind,
                    context = e.context.as_deref().unwrap_or(""),
                    retriable = e.is_retriable(),
                    "store operation failed"
                );
                (status, ErrorResponse::with_code(status, "STORE_ERROR", e.to_string()))
            }
            Error::ObjectStore(ref e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "OBJECT_STORE_ERROR", e.to_string()),
            ),
            Error::Policy(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "POLICY_ERROR", msg),
            ),
            Error::InvalidAction(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "INVALID_ACTION", msg),
            ),
            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ),
            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ),
            Error::ErasureSelectorRequired => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(
                    StatusCode::BAD_REQUEST,
                    "ERASURE_SELECTOR_REQUIRED",
                    self.to_string(),
                ),
            ),
            Error::Io(ref e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ),
        };

        (status, Json(body)).into_response()
    }
}
