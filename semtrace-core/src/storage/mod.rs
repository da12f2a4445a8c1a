//! Relational writer (C8): a narrow capability trait for persisting
//! [`ActionExecution`] rows and [`PiiDetection`] rows, plus the
//! [`TraceAccessAudit`] trail the compliance operations write to.
//!
//! Kept behind a trait so the core stays free of any vendor-specific type;
//! tests and hosts without Postgres can use [`memory::InMemoryStorage`].

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pii::PiiDetection;
use crate::record::ActionExecution;

/// A [`PiiDetection`] as persisted, with the context it was found under.
/// Returned by [`ActionExecutionStorage::query_pii_detections`] for the PII
/// report admin endpoint (§6.5).
#[derive(Debug, Clone)]
pub struct PiiDetectionRecord {
    pub correlation_id: String,
    pub operation_id: String,
    pub data_subject_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub detection: PiiDetection,
}

/// One row of the `trace_access_audit` table (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceAccessAudit {
    pub accessed_at: DateTime<Utc>,
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_ip: Option<String>,
    pub access_type: AccessType,
    pub resource_type: String,
    pub correlation_id: Option<String>,
    pub operation_id: Option<String>,
    pub data_subject_id: Option<String>,
    pub query_parameters: Option<serde_json::Value>,
    pub results_count: Option<i64>,
    pub purpose: Option<String>,
    pub legal_basis: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Query,
    View,
    Export,
    Delete,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::View => "view",
            Self::Export => "export",
            Self::Delete => "delete",
        }
    }
}

/// Selector used by erasure/export/pseudonymisation to scope which rows a
/// compliance operation touches.
#[derive(Debug, Clone, Default)]
pub struct TraceSelector {
    pub data_subject_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl TraceSelector {
    pub fn is_empty(&self) -> bool {
        self.data_subject_id.is_none() && self.correlation_id.is_none()
    }
}

/// A row fetched for archival, paired with its relational identity.
#[derive(Debug, Clone)]
pub struct ArchivableRow {
    pub operation_id: String,
    pub record: ActionExecution,
}

/// The relational capability the rest of the crate depends on. A Postgres
/// implementation and an in-memory implementation both satisfy this trait;
/// callers program against the trait object.
#[async_trait]
pub trait ActionExecutionStorage: Send + Sync {
    async fn insert(&self, record: &ActionExecution) -> Result<()>;

    async fn insert_pii_detections(
        &self,
        correlation_id: &str,
        operation_id: &str,
        data_subject_id: Option<&str>,
        detections: &[PiiDetection],
    ) -> Result<()>;

    async fn find_by_selector(&self, selector: &TraceSelector) -> Result<Vec<ActionExecution>>;

    async fn find_by_operation_id(&self, operation_id: &str) -> Result<Option<ActionExecution>>;

    async fn delete_by_selector(&self, selector: &TraceSelector) -> Result<u64>;

    async fn delete_pii_by_selector(&self, selector: &TraceSelector) -> Result<u64>;

    async fn pseudonymize_data_subject(&self, data_subject_id: &str, pseudonym: &str) -> Result<u64>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn rows_eligible_for_archival(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ArchivableRow>>;

    async fn mark_archived(&self, operation_id: &str, archived_at: DateTime<Utc>, s3_key: &str) -> Result<()>;

    async fn delete_archived_before(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<ArchivableRow>>;

    async fn insert_access_audit(&self, audit: &TraceAccessAudit) -> Result<()>;

    async fn query_access_audit(
        &self,
        data_subject_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<TraceAccessAudit>>;

    async fn query_pii_detections(
        &self,
        correlation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PiiDetectionRecord>>;
}
