//! PostgreSQL implementation of [`ActionExecutionStorage`] (C8).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{AccessType, ActionExecutionStorage, ArchivableRow, PiiDetectionRecord, TraceAccessAudit, TraceSelector};
use crate::error::{Error, Result, StoreError, StoreErrorKind, StoreOperation};
use crate::pii::PiiDetection;
use crate::record::ActionExecution;

/// Convert an empty string into `None` so optional columns never store
/// materialised empty strings.
fn null_if_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn insert_failed(e: sqlx::Error, context: &str) -> Error {
    StoreError::with_context(StoreOperation::Insert, StoreErrorKind::QueryFailed, e.to_string(), context).into()
}

fn query_failed(e: sqlx::Error, context: &str) -> Error {
    StoreError::with_context(StoreOperation::Query, StoreErrorKind::QueryFailed, e.to_string(), context).into()
}

/// Postgres-backed relational writer.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `action_executions`, `pii_detections`, and
    /// `trace_access_audit` tables and their indexes (§6.2). Idempotent;
    /// safe to call on every startup.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS action_executions (
                operation_id TEXT PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                parent_operation_id TEXT,
                action_type TEXT NOT NULL,
                object_type TEXT NOT NULL,
                service_id TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                http_method TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ NOT NULL,
                duration_ms BIGINT NOT NULL,
                action_status TEXT NOT NULL,
                status_code SMALLINT NOT NULL,
                error_message TEXT,
                error_type TEXT,
                request_url TEXT NOT NULL,
                response_url TEXT NOT NULL,
                request_size_bytes BIGINT NOT NULL,
                response_size_bytes BIGINT NOT NULL,
                client_ip TEXT,
                user_agent TEXT,
                metadata JSONB,
                trace_id TEXT,
                span_id TEXT,
                data_subject_id TEXT,
                data_region TEXT NOT NULL,
                legal_basis TEXT NOT NULL,
                retention_until TIMESTAMPTZ,
                contains_pii BOOLEAN NOT NULL DEFAULT FALSE,
                pii_redacted BOOLEAN NOT NULL DEFAULT FALSE,
                archived_at TIMESTAMPTZ,
                archived_s3_key TEXT,
                consent_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed(e, "create action_executions table"))?;

        for (name, col) in [
            ("idx_action_executions_correlation_id", "correlation_id"),
            ("idx_action_executions_started_at", "started_at"),
            ("idx_action_executions_data_subject_id", "data_subject_id"),
        ] {
            sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {name} ON action_executions ({col})"))
                .execute(&self.pool)
                .await
                .map_err(|e| insert_failed(e, name))?;
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_action_executions_archived_at ON action_executions (archived_at) WHERE archived_at IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed(e, "idx_action_executions_archived_at"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pii_detections (
                id BIGSERIAL PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                operation_id TEXT NOT NULL,
                location TEXT NOT NULL,
                field_path TEXT,
                pii_type TEXT NOT NULL,
                pattern_matched TEXT,
                confidence REAL NOT NULL,
                redacted BOOLEAN NOT NULL,
                data_subject_id TEXT,
                detected_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed(e, "create pii_detections table"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trace_access_audit (
                id BIGSERIAL PRIMARY KEY,
                accessed_at TIMESTAMPTZ NOT NULL,
                user_id TEXT NOT NULL,
                user_email TEXT,
                user_ip TEXT,
                access_type TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                correlation_id TEXT,
                operation_id TEXT,
                data_subject_id TEXT,
                query_parameters JSONB,
                results_count BIGINT,
                purpose TEXT,
                legal_basis TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed(e, "create trace_access_audit table"))?;

        Ok(())
    }
}

#[async_trait]
impl ActionExecutionStorage for PostgresStorage {
    async fn insert(&self, r: &ActionExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO action_executions (
                operation_id, correlation_id, parent_operation_id,
                action_type, object_type, service_id, endpoint, http_method,
                started_at, completed_at, duration_ms,
                action_status, status_code, error_message, error_type,
                request_url, response_url, request_size_bytes, response_size_bytes,
                client_ip, user_agent, metadata, trace_id, span_id,
                data_subject_id, data_region, legal_basis, retention_until,
                contains_pii, pii_redacted, archived_at, archived_s3_key, consent_id
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28,
                $29, $30, $31, $32, $33
            )
            ON CONFLICT (operation_id) DO NOTHING
            "#,
        )
        .bind(&r.operation_id)
        .bind(&r.correlation_id)
        .bind(r.parent_operation_id.as_deref().and_then(null_if_empty))
        .bind(&r.action_type)
        .bind(&r.object_type)
        .bind(&r.service_id)
        .bind(&r.endpoint)
        .bind(&r.http_method)
        .bind(r.started_at)
        .bind(r.completed_at)
        .bind(r.duration_ms)
        .bind(&r.action_status)
        .bind(r.status_code as i16)
        .bind(r.error_message.as_deref().and_then(null_if_empty))
        .bind(r.error_type.as_deref().and_then(null_if_empty))
        .bind(&r.request_url)
        .bind(&r.response_url)
        .bind(r.request_size_bytes)
        .bind(r.response_size_bytes)
        .bind(r.client_ip.as_deref().and_then(null_if_empty))
        .bind(r.user_agent.as_deref().and_then(null_if_empty))
        .bind(&r.metadata)
        .bind(r.trace_id.as_deref().and_then(null_if_empty))
        .bind(r.span_id.as_deref().and_then(null_if_empty))
        .bind(r.data_subject_id.as_deref().and_then(null_if_empty))
        .bind(&r.data_region)
        .bind(&r.legal_basis)
        .bind(r.retention_until)
        .bind(r.contains_pii)
        .bind(r.pii_redacted)
        .bind(r.archived_at)
        .bind(r.archived_s3_key.as_deref().and_then(null_if_empty))
        .bind(r.consent_id.as_deref().and_then(null_if_empty))
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed(e, &r.operation_id))?;

        Ok(())
    }

    async fn insert_pii_detections(
        &self,
        correlation_id: &str,
        operation_id: &str,
        data_subject_id: Option<&str>,
        detections: &[PiiDetection],
    ) -> Result<()> {
        for d in detections {
            sqlx::query(
                r#"
                INSERT INTO pii_detections
                    (correlation_id, operation_id, location, pii_type, pattern_matched, confidence, redacted, data_subject_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(correlation_id)
            .bind(operation_id)
            .bind(d.location.as_str())
            .bind(d.pii_type)
            .bind(&d.pattern_matched)
            .bind(d.confidence)
            .bind(d.confidence >= crate::pii::REDACTION_CONFIDENCE_THRESHOLD)
            .bind(data_subject_id)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_failed(e, operation_id))?;
        }
        Ok(())
    }

    async fn find_by_selector(&self, selector: &TraceSelector) -> Result<Vec<ActionExecution>> {
        if selector.is_empty() {
            return Err(Error::ErasureSelectorRequired);
        }
        let rows = sqlx::query_as::<_, ActionExecutionRow>(
            r#"
            SELECT * FROM action_executions
            WHERE ($1::text IS NULL OR data_subject_id = $1)
              AND ($2::text IS NULL OR correlation_id = $2)
            ORDER BY started_at ASC
            "#,
        )
        .bind(&selector.data_subject_id)
        .bind(&selector.correlation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed(e, "find_by_selector"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_by_operation_id(&self, operation_id: &str) -> Result<Option<ActionExecution>> {
        let row = sqlx::query_as::<_, ActionExecutionRow>("SELECT * FROM action_executions WHERE operation_id = $1")
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed(e, "find_by_operation_id"))?;

        Ok(row.map(Into::into))
    }

    async fn delete_by_selector(&self, selector: &TraceSelector) -> Result<u64> {
        if selector.is_empty() {
            return Err(Error::ErasureSelectorRequired);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM action_executions
            WHERE ($1::text IS NULL OR data_subject_id = $1)
              AND ($2::text IS NULL OR correlation_id = $2)
            "#,
        )
        .bind(&selector.data_subject_id)
        .bind(&selector.correlation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed(e, "delete_by_selector"))?;

        Ok(result.rows_affected())
    }

    async fn delete_pii_by_selector(&self, selector: &TraceSelector) -> Result<u64> {
        if selector.is_empty() {
            return Err(Error::ErasureSelectorRequired);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM pii_detections
            WHERE ($1::text IS NULL OR data_subject_id = $1)
              AND ($2::text IS NULL OR correlation_id = $2)
            "#,
        )
        .bind(&selector.data_subject_id)
        .bind(&selector.correlation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed(e, "delete_pii_by_selector"))?;

        Ok(result.rows_affected())
    }

    async fn pseudonymize_data_subject(&self, data_subject_id: &str, pseudonym: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE action_executions SET data_subject_id = $1 WHERE data_subject_id = $2")
            .bind(pseudonym)
            .bind(data_subject_id)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_failed(e, "pseudonymize_data_subject"))?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM action_executions WHERE retention_until IS NOT NULL AND retention_until < $1")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| insert_failed(e, "delete_expired"))?;

        Ok(result.rows_affected())
    }

    async fn rows_eligible_for_archival(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ArchivableRow>> {
        let rows = sqlx::query_as::<_, ActionExecutionRow>(
            "SELECT * FROM action_executions WHERE archived_at IS NULL AND started_at < $1 ORDER BY started_at ASC LIMIT $2",
        )
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed(e, "rows_eligible_for_archival"))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let record: ActionExecution = row.into();
                ArchivableRow { operation_id: record.operation_id.clone(), record }
            })
            .collect())
    }

    async fn mark_archived(&self, operation_id: &str, archived_at: DateTime<Utc>, s3_key: &str) -> Result<()> {
        sqlx::query("UPDATE action_executions SET archived_at = $1, archived_s3_key = $2 WHERE operation_id = $3")
            .bind(archived_at)
            .bind(s3_key)
            .bind(operation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_failed(e, operation_id))?;

        Ok(())
    }

    async fn delete_archived_before(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<ArchivableRow>> {
        let rows = sqlx::query_as::<_, ActionExecutionRow>(
            "SELECT * FROM action_executions WHERE archived_at IS NOT NULL AND archived_at < $1 ORDER BY archived_at ASC LIMIT $2",
        )
        .bind(older_than)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed(e, "delete_archived_before: select"))?;

        let ids: Vec<String> = rows.iter().map(|r| r.operation_id.clone()).collect();
        if !ids.is_empty() {
            sqlx::query("DELETE FROM action_executions WHERE operation_id = ANY($1)")
                .bind(&ids)
                .execute(&self.pool)
                .await
                .map_err(|e| insert_failed(e, "delete_archived_before: delete"))?;
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let record: ActionExecution = row.into();
                ArchivableRow { operation_id: record.operation_id.clone(), record }
            })
            .collect())
    }

    async fn insert_access_audit(&self, audit: &TraceAccessAudit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trace_access_audit (
                accessed_at, user_id, user_email, user_ip, access_type, resource_type,
                correlation_id, operation_id, data_subject_id, query_parameters,
                results_count, purpose, legal_basis
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(audit.accessed_at)
        .bind(&audit.user_id)
        .bind(&audit.user_email)
        .bind(&audit.user_ip)
        .bind(audit.access_type.as_str())
        .bind(&audit.resource_type)
        .bind(&audit.correlation_id)
        .bind(&audit.operation_id)
        .bind(&audit.data_subject_id)
        .bind(&audit.query_parameters)
        .bind(audit.results_count)
        .bind(&audit.purpose)
        .bind(&audit.legal_basis)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_failed(e, "insert_access_audit"))?;

        Ok(())
    }

    async fn query_access_audit(
        &self,
        data_subject_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<TraceAccessAudit>> {
        let rows = sqlx::query_as::<_, TraceAccessAuditRow>(
            r#"
            SELECT * FROM trace_access_audit
            WHERE accessed_at >= $1 AND ($2::text IS NULL OR data_subject_id = $2)
            ORDER BY accessed_at DESC
            "#,
        )
        .bind(since)
        .bind(data_subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed(e, "query_access_audit"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn query_pii_detections(&self, correlation_id: &str, since: DateTime<Utc>) -> Result<Vec<PiiDetectionRecord>> {
        let rows = sqlx::query_as::<_, PiiDetectionRow>(
            r#"
            SELECT correlation_id, operation_id, data_subject_id, location, pii_type, pattern_matched, confidence, detected_at
            FROM pii_detections
            WHERE correlation_id = $1 AND detected_at >= $2
            ORDER BY detected_at ASC
            "#,
        )
        .bind(correlation_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed(e, "query_pii_detections"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct PiiDetectionRow {
    correlation_id: String,
    operation_id: String,
    data_subject_id: Option<String>,
    location: String,
    pii_type: String,
    pattern_matched: Option<String>,
    confidence: f32,
    detected_at: DateTime<Utc>,
}

impl From<PiiDetectionRow> for PiiDetectionRecord {
    fn from(row: PiiDetectionRow) -> Self {
        let pii_type: &'static str = match row.pii_type.as_str() {
            "email" => "email",
            "ssn" => "ssn",
            "credit_card" => "credit_card",
            "phone" => "phone",
            "ip_address" => "ip_address",
            "iban" => "iban",
            "passport" => "passport",
            _ => "unknown",
        };
        PiiDetectionRecord {
            correlation_id: row.correlation_id,
            operation_id: row.operation_id,
            data_subject_id: row.data_subject_id,
            detected_at: row.detected_at,
            detection: PiiDetection {
                location: match row.location.as_str() {
                    "response" => crate::pii::PiiLocation::Response,
                    "metadata" => crate::pii::PiiLocation::Metadata,
                    _ => crate::pii::PiiLocation::Request,
                },
                pii_type,
                pattern_matched: row.pattern_matched.unwrap_or_default(),
                confidence: row.confidence,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct ActionExecutionRow {
    operation_id: String,
    correlation_id: String,
    parent_operation_id: Option<String>,
    action_type: String,
    object_type: String,
    service_id: String,
    endpoint: String,
    http_method: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    duration_ms: i64,
    action_status: String,
    status_code: i16,
    error_message: Option<String>,
    error_type: Option<String>,
    request_url: String,
    response_url: String,
    request_size_bytes: i64,
    response_size_bytes: i64,
    client_ip: Option<String>,
    user_agent: Option<String>,
    metadata: Option<serde_json::Value>,
    trace_id: Option<String>,
    span_id: Option<String>,
    data_subject_id: Option<String>,
    data_region: String,
    legal_basis: String,
    retention_until: Option<DateTime<Utc>>,
    contains_pii: bool,
    pii_redacted: bool,
    archived_at: Option<DateTime<Utc>>,
    archived_s3_key: Option<String>,
    consent_id: Option<String>,
}

impl From<ActionExecutionRow> for ActionExecution {
    fn from(row: ActionExecutionRow) -> Self {
        ActionExecution {
            operation_id: row.operation_id,
            correlation_id: row.correlation_id,
            parent_operation_id: row.parent_operation_id,
            action_type: row.action_type,
            object_type: row.object_type,
            service_id: row.service_id,
            endpoint: row.endpoint,
            http_method: row.http_method,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
            action_status: row.action_status,
            status_code: row.status_code as u16,
            error_message: row.error_message,
            error_type: row.error_type,
            request_url: row.request_url,
            response_url: row.response_url,
            request_size_bytes: row.request_size_bytes,
            response_size_bytes: row.response_size_bytes,
            client_ip: row.client_ip,
            user_agent: row.user_agent,
            metadata: row.metadata,
            trace_id: row.trace_id,
            span_id: row.span_id,
            data_subject_id: row.data_subject_id,
            data_region: row.data_region,
            legal_basis: row.legal_basis,
            retention_until: row.retention_until,
            contains_pii: row.contains_pii,
            pii_redacted: row.pii_redacted,
            archived_at: row.archived_at,
            archived_s3_key: row.archived_s3_key,
            consent_id: row.consent_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TraceAccessAuditRow {
    accessed_at: DateTime<Utc>,
    user_id: String,
    user_email: Option<String>,
    user_ip: Option<String>,
    access_type: String,
    resource_type: String,
    correlation_id: Option<String>,
    operation_id: Option<String>,
    data_subject_id: Option<String>,
    query_parameters: Option<serde_json::Value>,
    results_count: Option<i64>,
    purpose: Option<String>,
    legal_basis: Option<String>,
}

impl From<TraceAccessAuditRow> for TraceAccessAudit {
    fn from(row: TraceAccessAuditRow) -> Self {
        TraceAccessAudit {
            accessed_at: row.accessed_at,
            user_id: row.user_id,
            user_email: row.user_email,
            user_ip: row.user_ip,
            access_type: match row.access_type.as_str() {
                "view" => AccessType::View,
                "export" => AccessType::Export,
                "delete" => AccessType::Delete,
                _ => AccessType::Query,
            },
            resource_type: row.resource_type,
            correlation_id: row.correlation_id,
            operation_id: row.operation_id,
            data_subject_id: row.data_subject_id,
            query_parameters: row.query_parameters,
            results_count: row.results_count,
            purpose: row.purpose,
            legal_basis: row.legal_basis,
        }
    }
}
