//! Administrative HTTP handlers (§6.5): erasure, export, audit trail, and
//! PII report. These four endpoints SHOULD be exposed by a service
//! embedding this crate, but the library does not mount them itself — a
//! host wires them into its own router, typically behind its own
//! authentication/authorization layer, e.g.:
//!
//! ```rust,no_run
//! # use axum::Router;
//! # use axum::routing::{get, post};
//! # use semtrace_core::admin;
//! # use semtrace_core::middleware::Tracer;
//! # use std::sync::Arc;
//! # fn wire(tracer: Arc<Tracer>) -> Router {
//! Router::new()
//!     .route("/admin/trace/erase", post(admin::erase))
//!     .route("/admin/trace/export", get(admin::export))
//!     .route("/admin/trace/audit", get(admin::audit))
//!     .route("/admin/trace/pii", get(admin::pii_report))
//!     .with_state(tracer)
//! # }
//! ```

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::compliance;
use crate::error::{Error, Result};
use crate::middleware::Tracer;
use crate::record::ActionExecution;
use crate::storage::{AccessType, PiiDetectionRecord, TraceAccessAudit, TraceSelector};

/// Body of `POST /admin/trace/erase`.
#[derive(Debug, Deserialize)]
pub struct EraseRequest {
    pub data_subject_id: Option<String>,
    pub correlation_id: Option<String>,
    pub user_id: String,
    pub purpose: String,
}

/// `POST /admin/trace/erase`: right-to-erasure. Deletes relational rows,
/// PII detections, and object-store payloads matching the selector, and
/// records the erasure in the access audit trail.
pub async fn erase(
    State(tracer): State<Arc<Tracer>>,
    Json(req): Json<EraseRequest>,
) -> Result<Json<compliance::ErasureCertificate>> {
    let selector = TraceSelector { data_subject_id: req.data_subject_id, correlation_id: req.correlation_id };
    let certificate = match tracer.objects() {
        Some(objects) => compliance::erase_traces(tracer.storage().as_ref(), objects, selector, &req.user_id, &req.purpose).await?,
        None => {
            let (deleted_actions, deleted_pii) = compliance::erase_traces_without_object_store(
                tracer.storage().as_ref(),
                selector,
                &req.user_id,
                &req.purpose,
            )
            .await?;
            compliance::ErasureCertificate {
                certificate_id: format!("cert-{}", uuid::Uuid::new_v4().simple()),
                deleted_actions,
                deleted_pii,
                locators_deleted: 0,
            }
        }
    };
    Ok(Json(certificate))
}

/// Query params for `GET /admin/trace/export`.
#[derive(Debug, Deserialize)]
pub struct ExportQueryParams {
    pub data_subject_id: String,
}

/// `GET /admin/trace/export?data_subject_id=<id>`: right-to-portability
/// export of every retained row for a data subject.
pub async fn export(
    State(tracer): State<Arc<Tracer>>,
    Query(params): Query<ExportQueryParams>,
) -> Result<Json<Vec<ActionExecution>>> {
    let rows = compliance::export_data_subject_data(tracer.storage().as_ref(), &params.data_subject_id, "admin").await?;
    Ok(Json(rows))
}

fn default_audit_window_hours() -> i64 {
    24
}

/// Query params for `GET /admin/trace/audit`.
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub data_subject_id: Option<String>,
    #[serde(default = "default_audit_window_hours")]
    pub hours: i64,
}

/// `GET /admin/trace/audit?data_subject_id=<id>&hours=<n>`: the access
/// trail for the last `hours` hours, optionally scoped to one subject.
/// The read itself is not logged as an access — it is the audit log.
pub async fn audit(
    State(tracer): State<Arc<Tracer>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<Vec<TraceAccessAudit>>> {
    let since = Utc::now() - chrono::Duration::hours(params.hours);
    let rows = compliance::get_audit_trail(tracer.storage().as_ref(), params.data_subject_id.as_deref(), since).await?;
    Ok(Json(rows))
}

/// Query params for `GET /admin/trace/pii`.
#[derive(Debug, Deserialize)]
pub struct PiiReportQueryParams {
    pub correlation_id: String,
    #[serde(default = "default_audit_window_hours")]
    pub hours: i64,
}

/// One row of the PII report response.
#[derive(Debug, Serialize)]
pub struct PiiReportEntry {
    pub operation_id: String,
    pub location: &'static str,
    pub pii_type: &'static str,
    pub confidence: f32,
}

impl From<PiiDetectionRecord> for PiiReportEntry {
    fn from(record: PiiDetectionRecord) -> Self {
        Self {
            operation_id: record.operation_id,
            location: record.detection.location.as_str(),
            pii_type: record.detection.pii_type,
            confidence: record.detection.confidence,
        }
    }
}

/// `GET /admin/trace/pii?correlation_id=<id>&hours=<n>`: every PII
/// detection recorded for a correlation id in the last `hours` hours.
/// Records the read in the access audit trail, since this surfaces what
/// PII was found even when the payload itself was redacted or dropped.
pub async fn pii_report(
    State(tracer): State<Arc<Tracer>>,
    Query(params): Query<PiiReportQueryParams>,
) -> Result<Json<Vec<PiiReportEntry>>> {
    let since = Utc::now() - chrono::Duration::hours(params.hours);
    let detections = tracer
        .storage()
        .query_pii_detections(&params.correlation_id, since)
        .await?;

    compliance::log_trace_access(
        tracer.storage().as_ref(),
        TraceAccessAudit {
            accessed_at: Utc::now(),
            user_id: "admin".to_string(),
            user_email: None,
            user_ip: None,
            access_type: AccessType::View,
            resource_type: "pii_detection".to_string(),
            correlation_id: Some(params.correlation_id.clone()),
            operation_id: None,
            data_subject_id: None,
            query_parameters: None,
            results_count: Some(detections.len() as i64),
            purpose: Some("pii_report".to_string()),
            legal_basis: None,
        },
    )
    .await?;

    Ok(Json(detections.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExporterConfig, TracerConfig};
    use crate::exporter::Exporter;
    use crate::metrics::noop;
    use crate::pii::{PiiDetection, PiiLocation};
    use crate::storage::memory::InMemoryStorage;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;

    fn sample_record(operation_id: &str, data_subject_id: &str) -> ActionExecution {
        ActionExecution {
            operation_id: operation_id.to_string(),
            correlation_id: "wf-1".to_string(),
            parent_operation_id: None,
            action_type: "CreateAction".to_string(),
            object_type: "SoftwareApplication".to_string(),
            service_id: "svc".to_string(),
            endpoint: "/x".to_string(),
            http_method: "POST".to_string(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_ms: 1,
            action_status: "CompletedActionStatus".to_string(),
            status_code: 200,
            error_message: None,
            error_type: None,
            request_url: "store://traces/wf-1/op/request.json".to_string(),
            response_url: "store://traces/wf-1/op/response.json".to_string(),
            request_size_bytes: 0,
            response_size_bytes: 0,
            client_ip: None,
            user_agent: None,
            metadata: None,
            trace_id: None,
            span_id: None,
            data_subject_id: Some(data_subject_id.to_string()),
            data_region: "us".to_string(),
            legal_basis: "legitimate_interest".to_string(),
            retention_until: None,
            contains_pii: false,
            pii_redacted: false,
            archived_at: None,
            archived_s3_key: None,
            consent_id: None,
        }
    }

    fn app(tracer: Arc<Tracer>) -> Router {
        Router::new()
            .route("/admin/trace/erase", post(erase))
            .route("/admin/trace/export", get(export))
            .route("/admin/trace/audit", get(audit))
            .route("/admin/trace/pii", get(pii_report))
            .with_state(tracer)
    }

    fn tracer_with(storage: Arc<InMemoryStorage>) -> Arc<Tracer> {
        let config = ExporterConfig::default();
        let exporter = Exporter::spawn(&config, storage.clone());
        Arc::new(Tracer::new(TracerConfig::default(), exporter.queue(), storage, None, noop()))
    }

    #[tokio::test]
    async fn erase_endpoint_deletes_matching_rows() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert(&sample_record("op-1", "user-42")).await.unwrap();
        let router = app(tracer_with(storage.clone()));

        let body = serde_json::to_vec(&serde_json::json!({
            "data_subject_id": "user-42",
            "user_id": "admin",
            "purpose": "test"
        }))
        .unwrap();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/admin/trace/erase")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let remaining = storage
            .find_by_selector(&TraceSelector { data_subject_id: Some("user-42".to_string()), correlation_id: None })
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn export_endpoint_returns_subject_rows() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert(&sample_record("op-1", "user-42")).await.unwrap();
        let router = app(tracer_with(storage));

        let request = HttpRequest::builder()
            .method("GET")
            .uri("/admin/trace/export?data_subject_id=user-42")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let rows: Vec<ActionExecution> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn audit_endpoint_returns_recent_access_rows() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert(&sample_record("op-1", "user-42")).await.unwrap();
        let _ = compliance::export_data_subject_data(storage.as_ref(), "user-42", "analyst").await.unwrap();
        let router = app(tracer_with(storage));

        let request = HttpRequest::builder()
            .method("GET")
            .uri("/admin/trace/audit?data_subject_id=user-42&hours=1")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let rows: Vec<TraceAccessAudit> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].access_type, AccessType::Export);
    }

    #[tokio::test]
    async fn pii_report_endpoint_returns_detections_and_logs_access() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .insert_pii_detections(
                "wf-1",
                "op-1",
                Some("user-42"),
                &[PiiDetection {
                    location: PiiLocation::Request,
                    pii_type: "email",
                    pattern_matched: "a@b.com".to_string(),
                    confidence: 0.95,
                }],
            )
            .await
            .unwrap();
        let router = app(tracer_with(storage.clone()));

        let request = HttpRequest::builder()
            .method("GET")
            .uri("/admin/trace/pii?correlation_id=wf-1&hours=1")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let rows: Vec<PiiReportEntry> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pii_type, "email");

        let audit = compliance::get_audit_trail(storage.as_ref(), None, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].access_type, AccessType::View);
    }

    #[tokio::test]
    async fn erase_without_selector_returns_bad_request() {
        let storage = Arc::new(InMemoryStorage::new());
        let router = app(tracer_with(storage));

        let body = serde_json::to_vec(&serde_json::json!({
            "user_id": "admin",
            "purpose": "test"
        }))
        .unwrap();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/admin/trace/erase")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
