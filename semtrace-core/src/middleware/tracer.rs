//! Tracing middleware: wires C1/C2/C3/C4/C5/C6 into the request-interception
//! flow — intercept, parse the body, decide whether to trace, run the
//! handler while buffering the response, assemble a record, sample it, and
//! hand off anything kept to the exporter (C7).
//!
//! Within a request, the relational insert is attempted before the
//! object-store upload: both happen in the exporter (off the request path),
//! and the worker writes the row first. The middleware only computes where a
//! payload *will* land — the hot-path key layout is deterministic, so the
//! locator is known without uploading anything — and carries the bytes
//! through the queue for the worker to upload after the insert succeeds.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;

use crate::action::{self, ParsedAction};
use crate::config::TracerConfig;
use crate::exporter::{ExportItem, ExportQueue};
use crate::ids::{
    resolve_correlation_id, CorrelationId, OperationId, CORRELATION_ID_HEADER, PARENT_OPERATION_ID_HEADER,
};
use crate::metrics::{metric_labels, metric_names, SharedMetrics};
use crate::objectstore::{PayloadStore, REQUEST_BLOB_NAME, RESPONSE_BLOB_NAME};
use crate::pii::{self, PiiDetection, PiiLocation};
use crate::policy::{self, PolicyDecision};
use crate::record::{self, ActionStatus, AssemblyInput, PayloadLocator};
use crate::sampler;
use crate::storage::ActionExecutionStorage;

/// A traced body larger than this is rejected rather than buffered whole.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Everything the middleware needs, shared across every request via
/// [`axum::extract::State`].
pub struct Tracer {
    config: TracerConfig,
    queue: ExportQueue,
    storage: Arc<dyn ActionExecutionStorage>,
    objects: Option<PayloadStore>,
    metrics: SharedMetrics,
}

impl Tracer {
    pub fn new(
        config: TracerConfig,
        queue: ExportQueue,
        storage: Arc<dyn ActionExecutionStorage>,
        objects: Option<PayloadStore>,
        metrics: SharedMetrics,
    ) -> Self {
        Self { config, queue, storage, objects, metrics }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// The relational writer backing this tracer. Exposed so a host can
    /// build its own admin router (see [`crate::admin`]) against the same
    /// storage the middleware writes to.
    pub fn storage(&self) -> &Arc<dyn ActionExecutionStorage> {
        &self.storage
    }

    pub fn objects(&self) -> Option<&PayloadStore> {
        self.objects.as_ref()
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok()).map(String::from)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn buffer_body(body: Body) -> Result<Bytes, Response> {
    to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| (StatusCode::PAYLOAD_TOO_LARGE, format!("failed to buffer body: {e}")).into_response())
}

/// Detect PII in a body, recording every match regardless of confidence.
fn detect_pii(body: &[u8], location: PiiLocation, enabled: bool) -> Vec<PiiDetection> {
    if !enabled {
        return Vec::new();
    }
    let text = String::from_utf8_lossy(body);
    pii::detect(&text, location)
}

/// What the middleware decided about one side (request or response) of a
/// traced body: where it will live once uploaded, the (possibly redacted)
/// bytes to carry through the export queue, and whether redaction changed
/// anything.
struct PayloadPlan {
    locator: PayloadLocator,
    bytes: Option<Bytes>,
    redacted: bool,
}

/// Redact `body` per its detections, then work out where it will land in the
/// object store without uploading anything — the hot-path key layout is
/// deterministic, so the locator is known up front. Bytes are carried only
/// when there is actually somewhere for the worker to put them.
fn plan_payload(
    objects: Option<&PayloadStore>,
    should_store: bool,
    correlation_id: &CorrelationId,
    operation_id: &OperationId,
    name: &str,
    body: &[u8],
    detections: &[PiiDetection],
) -> PayloadPlan {
    if !should_store {
        return PayloadPlan { locator: PayloadLocator::Redacted, bytes: None, redacted: false };
    }
    let Some(objects) = objects else {
        return PayloadPlan { locator: PayloadLocator::Redacted, bytes: None, redacted: false };
    };

    let (bytes, redacted) = if detections.is_empty() {
        (Bytes::copy_from_slice(body), false)
    } else {
        let text = String::from_utf8_lossy(body);
        let redacted_text = pii::redact(&text, detections);
        let changed = redacted_text != text;
        (Bytes::from(redacted_text.into_owned()), changed)
    };

    let locator = objects.hot_locator(correlation_id.as_str(), operation_id.as_str(), name);
    PayloadPlan { locator: PayloadLocator::Stored(locator), bytes: Some(bytes), redacted }
}

/// Axum middleware entry point. Mount with
/// `axum::middleware::from_fn_with_state(tracer, trace_middleware)`.
pub async fn trace_middleware(State(tracer): State<Arc<Tracer>>, request: Request<Body>, next: Next) -> Response {
    if !tracer.config.service.enabled {
        return next.run(request).await;
    }

    let started_at = Utc::now();
    let wall_clock = Instant::now();

    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();
    let headers = request.headers().clone();

    let (parts, body) = request.into_parts();
    let request_bytes = match buffer_body(body).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let parsed: ParsedAction = action::parse_action(&request_bytes);
    let decision: PolicyDecision = policy::evaluate(&parsed, &tracer.config.policy);

    if !decision.should_trace {
        let request = Request::from_parts(parts, Body::from(request_bytes));
        return next.run(request).await;
    }

    let correlation_id = resolve_correlation_id(header_str(&headers, CORRELATION_ID_HEADER));
    let operation_id = OperationId::new();
    let parent_operation_id =
        header_str(&headers, PARENT_OPERATION_ID_HEADER).and_then(|v| OperationId::from_str(v).ok());

    let pii_enabled = tracer.config.pii.enable_pii;
    let request_pii = detect_pii(&request_bytes, PiiLocation::Request, pii_enabled);
    let request_size_bytes = request_bytes.len() as i64;

    let request_plan = plan_payload(
        tracer.objects.as_ref(),
        decision.should_store_payload,
        &correlation_id,
        &operation_id,
        REQUEST_BLOB_NAME,
        &request_bytes,
        &request_pii,
    );

    let mut request = Request::from_parts(parts, Body::from(request_bytes));
    request.extensions_mut().insert(correlation_id.clone());
    request.extensions_mut().insert(operation_id.clone());

    let response = next.run(request).await;
    let status_code = response.status();
    let (resp_parts, resp_body) = response.into_parts();
    let response_bytes = match buffer_body(resp_body).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let completed_at = Utc::now();
    let duration_ms = wall_clock.elapsed().as_millis() as i64;

    let response_pii = detect_pii(&response_bytes, PiiLocation::Response, pii_enabled);
    let response_size_bytes = response_bytes.len() as i64;

    let response_plan = plan_payload(
        tracer.objects.as_ref(),
        decision.should_store_payload,
        &correlation_id,
        &operation_id,
        RESPONSE_BLOB_NAME,
        &response_bytes,
        &response_pii,
    );

    let contains_pii = !request_pii.is_empty() || !response_pii.is_empty();
    let pii_redacted = request_plan.redacted || response_plan.redacted;

    let (error_message, error_type) = if status_code.as_u16() >= 500 {
        (Some(format!("handler returned {status_code}")), Some("server_error".to_string()))
    } else if status_code.as_u16() >= 400 {
        (Some(format!("handler returned {status_code}")), Some("client_error".to_string()))
    } else {
        (None, None)
    };

    let data_region = tracer.config.compliance.data_region.as_str().to_string();
    let legal_basis = tracer.config.compliance.legal_basis.clone();
    let retention_until = (tracer.config.compliance.retention_days > 0)
        .then(|| completed_at + chrono::Duration::days(tracer.config.compliance.retention_days as i64));

    let input = AssemblyInput {
        correlation_id: &correlation_id,
        operation_id: &operation_id,
        parent_operation_id: parent_operation_id.as_ref(),
        action_type: &parsed.action_type,
        object_type: &parsed.object_type,
        service_id: &tracer.config.service.service_id,
        endpoint: &endpoint,
        http_method: &method,
        started_at,
        completed_at,
        status_code: status_code.as_u16(),
        error_message,
        error_type,
        request_locator: request_plan.locator,
        response_locator: response_plan.locator,
        request_size_bytes,
        response_size_bytes,
        client_ip: client_ip(&headers),
        user_agent: user_agent(&headers),
        metadata: None,
        data_subject_id: parsed.data_subject_id,
        contains_pii,
        pii_redacted,
    };

    let action_status = ActionStatus::from_response_body(&response_bytes);
    let record = record::assemble(input, action_status, &data_region, &legal_basis, retention_until);
    let data_subject_id = record.data_subject_id.clone();

    let sample = sampler::evaluate(&record, &tracer.config.sampling, &correlation_id);
    tracer
        .metrics
        .increment_counter(metric_names::TRACES_CAPTURED, &[(metric_labels::ACTION_TYPE, &record.action_type)]);

    if sample.should_sample {
        let item = ExportItem { record, request_payload: request_plan.bytes, response_payload: response_plan.bytes };
        if !tracer.queue.enqueue(item) {
            tracer.metrics.increment_counter(metric_names::TRACES_DROPPED, &[]);
        }
    } else {
        // Nothing was uploaded yet — the sampled-out record's payload bytes
        // are simply dropped here, so there is no orphaned blob to clean up.
        tracer.metrics.increment_counter(
            metric_names::TRACES_SAMPLED_OUT,
            &[(metric_labels::SAMPLE_REASON, sample.reason.as_str())],
        );
    }

    if contains_pii {
        let storage = tracer.storage.clone();
        let correlation_id = correlation_id.to_string();
        let operation_id = operation_id.to_string();
        let mut detections = request_pii;
        detections.extend(response_pii);
        tracer.metrics.increment_counter(metric_names::PII_DETECTIONS, &[]);
        tokio::spawn(async move {
            if let Err(e) = storage
                .insert_pii_detections(&correlation_id, &operation_id, data_subject_id.as_deref(), &detections)
                .await
            {
                tracing::error!(operation_id, error = %e, "failed to record PII detections");
            }
        });
    }

    tracing::debug!(duration_ms, status = %status_code, "traced action");

    Response::from_parts(resp_parts, Body::from(response_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExporterConfig, TracerConfig};
    use crate::exporter::Exporter;
    use crate::metrics::noop;
    use crate::storage::memory::InMemoryStorage;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::middleware::from_fn_with_state;
    use axum::routing::post;
    use axum::Router;
    use object_store::memory::InMemory;
    use tower::ServiceExt;

    fn tracer(config: TracerConfig, storage: Arc<InMemoryStorage>, queue: ExportQueue, objects: PayloadStore) -> Arc<Tracer> {
        Arc::new(Tracer::new(config, queue, storage, Some(objects), noop()))
    }

    async fn echo(body: axum::body::Bytes) -> axum::body::Bytes {
        body
    }

    fn app(tracer: Arc<Tracer>) -> Router {
        Router::new().route("/actions", post(echo)).layer(from_fn_with_state(tracer, trace_middleware))
    }

    #[tokio::test]
    async fn untraced_action_skips_export_and_storage() {
        let storage = Arc::new(InMemoryStorage::new());
        let objects = PayloadStore::new(Arc::new(InMemory::new()), "traces");
        let config = ExporterConfig { queue_capacity: 16, worker_count: 1, batch_size: 1, flush_period_secs: 1 };
        let exporter = Exporter::spawn_with_objects(&config, storage.clone(), Some(objects.clone()));
        let mut tracer_config = TracerConfig::default();
        tracer_config.sampling.enabled = true;
        tracer_config.sampling.base_rate = 1.0;
        let router = app(tracer(tracer_config, storage.clone(), exporter.queue(), objects));

        let body = br#"{"@type":"CreateAction","meta":{"trace":false}}"#.to_vec();
        let request = HttpRequest::builder().method("POST").uri("/actions").body(Body::from(body)).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        exporter.shutdown(std::time::Duration::from_millis(200)).await;
        let rows = storage
            .find_by_selector(&crate::storage::TraceSelector {
                correlation_id: Some("wf-nonexistent".to_string()),
                data_subject_id: None,
            })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn traced_action_reaches_storage_through_the_exporter() {
        let storage = Arc::new(InMemoryStorage::new());
        let objects = PayloadStore::new(Arc::new(InMemory::new()), "traces");
        let config = ExporterConfig { queue_capacity: 16, worker_count: 1, batch_size: 1, flush_period_secs: 1 };
        let exporter = Exporter::spawn_with_objects(&config, storage.clone(), Some(objects.clone()));
        let mut tracer_config = TracerConfig::default();
        tracer_config.sampling.enabled = true;
        tracer_config.sampling.base_rate = 1.0;
        let router = app(tracer(tracer_config, storage.clone(), exporter.queue(), objects));

        let body = br#"{"@type":"CreateAction","object":{"@type":"SoftwareApplication"}}"#.to_vec();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/actions")
            .header(CORRELATION_ID_HEADER, "wf-deadbeef")
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        exporter.shutdown(std::time::Duration::from_secs(2)).await;
        let rows = storage
            .find_by_selector(&crate::storage::TraceSelector {
                correlation_id: Some("wf-deadbeef".to_string()),
                data_subject_id: None,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action_type, "CreateAction");
    }

    #[tokio::test]
    async fn credential_object_never_stores_payload_locator() {
        let storage = Arc::new(InMemoryStorage::new());
        let objects = PayloadStore::new(Arc::new(InMemory::new()), "traces");
        let config = ExporterConfig { queue_capacity: 16, worker_count: 1, batch_size: 1, flush_period_secs: 1 };
        let exporter = Exporter::spawn_with_objects(&config, storage.clone(), Some(objects.clone()));
        let mut tracer_config = TracerConfig::default();
        tracer_config.policy.store_payloads = true;
        tracer_config.sampling.enabled = true;
        tracer_config.sampling.base_rate = 1.0;
        let router = app(tracer(tracer_config, storage.clone(), exporter.queue(), objects));

        let body = br#"{"@type":"CreateAction","object":{"@type":"Secret"}}"#.to_vec();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/actions")
            .header(CORRELATION_ID_HEADER, "wf-secret01")
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        exporter.shutdown(std::time::Duration::from_secs(2)).await;
        let rows = storage
            .find_by_selector(&crate::storage::TraceSelector {
                correlation_id: Some("wf-secret01".to_string()),
                data_subject_id: None,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request_url, crate::policy::REDACTION_SENTINEL);
    }

    #[tokio::test]
    async fn stored_payload_lands_at_its_precomputed_locator() {
        let storage = Arc::new(InMemoryStorage::new());
        let objects = PayloadStore::new(Arc::new(InMemory::new()), "traces");
        let config = ExporterConfig { queue_capacity: 16, worker_count: 1, batch_size: 1, flush_period_secs: 1 };
        let exporter = Exporter::spawn_with_objects(&config, storage.clone(), Some(objects.clone()));
        let mut tracer_config = TracerConfig::default();
        tracer_config.policy.store_payloads = true;
        tracer_config.sampling.enabled = true;
        tracer_config.sampling.base_rate = 1.0;
        let router = app(tracer(tracer_config, storage.clone(), exporter.queue(), objects.clone()));

        let body = br#"{"@type":"CreateAction","object":{"@type":"SoftwareApplication"}}"#.to_vec();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/actions")
            .header(CORRELATION_ID_HEADER, "wf-payload1")
            .body(Body::from(body.clone()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        exporter.shutdown(std::time::Duration::from_secs(2)).await;
        let rows = storage
            .find_by_selector(&crate::storage::TraceSelector {
                correlation_id: Some("wf-payload1".to_string()),
                data_subject_id: None,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].request_url.starts_with("store://traces/wf-payload1/"));

        let uploaded = objects
            .get_hot("wf-payload1", &rows[0].operation_id, REQUEST_BLOB_NAME)
            .await
            .unwrap();
        assert_eq!(&uploaded[..], &body[..]);
    }
}
