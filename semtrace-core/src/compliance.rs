//! Compliance operations (C10): erasure, pseudonymisation, export, audit
//! trail, retention sweep.
//!
//! Every mutating operation writes its audit row before acting, so the
//! access trail survives even if the subsequent delete/update fails midway.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::objectstore::PayloadStore;
use crate::record::ActionExecution;
use crate::storage::{AccessType, ActionExecutionStorage, TraceAccessAudit, TraceSelector};

/// Outcome of [`erase_traces`].
#[derive(Debug, Clone, Serialize)]
pub struct ErasureCertificate {
    pub certificate_id: String,
    pub deleted_actions: u64,
    pub deleted_pii: u64,
    pub locators_deleted: u64,
}

/// Hash a data-subject identifier into a stable pseudonym. Deterministic:
/// the same subject always yields the same pseudonym, which is what lets
/// pseudonymised rows still be grouped without re-identifying the subject.
pub fn pseudonym_for(data_subject_id: &str) -> String {
    format!("anon-{}", blake3::hash(data_subject_id.as_bytes()).to_hex())
}

/// Erase all traces matching the selector: relational rows, PII detections,
/// and their object-store payloads. Requires at least one selector field.
pub async fn erase_traces(
    storage: &dyn ActionExecutionStorage,
    objects: &PayloadStore,
    selector: TraceSelector,
    user_id: &str,
    purpose: &str,
) -> Result<ErasureCertificate> {
    if selector.is_empty() {
        return Err(Error::ErasureSelectorRequired);
    }

    storage
        .insert_access_audit(&TraceAccessAudit {
            accessed_at: Utc::now(),
            user_id: user_id.to_string(),
            user_email: None,
            user_ip: None,
            access_type: AccessType::Delete,
            resource_type: "action_execution".to_string(),
            correlation_id: selector.correlation_id.clone(),
            operation_id: None,
            data_subject_id: selector.data_subject_id.clone(),
            query_parameters: None,
            results_count: None,
            purpose: Some(purpose.to_string()),
            legal_basis: None,
        })
        .await?;

    let rows = storage.find_by_selector(&selector).await?;
    let mut locators_deleted = 0u64;
    for row in &rows {
        for locator in [&row.request_url, &row.response_url] {
            if objects.delete_locator(locator).await? {
                locators_deleted += 1;
            }
        }
        if let Some(ref key) = row.archived_s3_key {
            objects.delete_archived(key).await?;
            locators_deleted += 1;
        }
    }

    let deleted_actions = storage.delete_by_selector(&selector).await?;
    let deleted_pii = storage.delete_pii_by_selector(&selector).await?;

    let certificate_id = format!("cert-{}", uuid::Uuid::new_v4().simple());

    tracing::info!(
        certificate_id = %certificate_id,
        deleted_actions,
        deleted_pii,
        locators_deleted,
        "erasure certificate issued"
    );

    Ok(ErasureCertificate { certificate_id, deleted_actions, deleted_pii, locators_deleted })
}

/// Rewrite `data_subject_id` to a stable pseudonym for every matching row.
/// Payload locators are left untouched.
pub async fn pseudonymize_traces(
    storage: &dyn ActionExecutionStorage,
    data_subject_id: &str,
    user_id: &str,
) -> Result<u64> {
    let pseudonym = pseudonym_for(data_subject_id);

    storage
        .insert_access_audit(&TraceAccessAudit {
            accessed_at: Utc::now(),
            user_id: user_id.to_string(),
            user_email: None,
            user_ip: None,
            access_type: AccessType::Delete,
            resource_type: "action_execution".to_string(),
            correlation_id: None,
            operation_id: None,
            data_subject_id: Some(data_subject_id.to_string()),
            query_parameters: None,
            results_count: None,
            purpose: Some("pseudonymisation".to_string()),
            legal_basis: None,
        })
        .await?;

    storage.pseudonymize_data_subject(data_subject_id, &pseudonym).await
}

/// Return every retained column for every row belonging to `data_subject_id`
/// (right-to-portability export).
pub async fn export_data_subject_data(
    storage: &dyn ActionExecutionStorage,
    data_subject_id: &str,
    user_id: &str,
) -> Result<Vec<ActionExecution>> {
    let selector = TraceSelector { data_subject_id: Some(data_subject_id.to_string()), correlation_id: None };

    storage
        .insert_access_audit(&TraceAccessAudit {
            accessed_at: Utc::now(),
            user_id: user_id.to_string(),
            user_email: None,
            user_ip: None,
            access_type: AccessType::Export,
            resource_type: "action_execution".to_string(),
            correlation_id: None,
            operation_id: None,
            data_subject_id: Some(data_subject_id.to_string()),
            query_parameters: None,
            results_count: None,
            purpose: Some("data_subject_export".to_string()),
            legal_basis: None,
        })
        .await?;

    storage.find_by_selector(&selector).await
}

/// Record an administrative access to trace data. Exposed so admin
/// endpoints (§6.5) can log reads that are not themselves mutations.
pub async fn log_trace_access(storage: &dyn ActionExecutionStorage, audit: TraceAccessAudit) -> Result<()> {
    storage.insert_access_audit(&audit).await
}

pub async fn get_audit_trail(
    storage: &dyn ActionExecutionStorage,
    data_subject_id: Option<&str>,
    since: DateTime<Utc>,
) -> Result<Vec<TraceAccessAudit>> {
    storage.query_access_audit(data_subject_id, since).await
}

/// Hard-delete every row whose `retention_until` has passed.
pub async fn delete_expired_traces(storage: &dyn ActionExecutionStorage) -> Result<u64> {
    storage.delete_expired(Utc::now()).await
}

/// Convenience wrapper constructing a [`PayloadStore`]-free erasure for
/// callers that have already confirmed no payloads were ever stored
/// (e.g. `store_payloads = false` deployments).
pub async fn erase_traces_without_object_store(
    storage: &dyn ActionExecutionStorage,
    selector: TraceSelector,
    user_id: &str,
    purpose: &str,
) -> Result<(u64, u64)> {
    if selector.is_empty() {
        return Err(Error::ErasureSelectorRequired);
    }

    storage
        .insert_access_audit(&TraceAccessAudit {
            accessed_at: Utc::now(),
            user_id: user_id.to_string(),
            user_email: None,
            user_ip: None,
            access_type: AccessType::Delete,
            resource_type: "action_execution".to_string(),
            correlation_id: selector.correlation_id.clone(),
            operation_id: None,
            data_subject_id: selector.data_subject_id.clone(),
            query_parameters: None,
            results_count: None,
            purpose: Some(purpose.to_string()),
            legal_basis: None,
        })
        .await?;

    let deleted_actions = storage.delete_by_selector(&selector).await?;
    let deleted_pii = storage.delete_pii_by_selector(&selector).await?;

    Ok((deleted_actions, deleted_pii))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStorage;

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

    #[test]
    fn pseudonym_is_deterministic() {
        assert_eq!(pseudonym_for("user-42"), pseudonym_for("user-42"));
        assert_ne!(pseudonym_for("user-42"), pseudonym_for("user-43"));
    }

    #[tokio::test]
    async fn erase_without_selector_is_rejected() {
        let storage = InMemoryStorage::new();
        let err = erase_traces_without_object_store(&storage, TraceSelector::default(), "admin", "erasure")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ErasureSelectorRequired));
    }

    #[tokio::test]
    async fn erase_writes_audit_row_and_deletes_rows() {
        let storage = InMemoryStorage::new();
        storage.insert(&sample_record("op-1", "user-42")).await.unwrap();

        let (deleted, _) = erase_traces_without_object_store(
            &storage,
            TraceSelector { data_subject_id: Some("user-42".to_string()), correlation_id: None },
            "admin",
            "right_to_erasure",
        )
        .await
        .unwrap();
        assert_eq!(deleted, 1);

        let audit = get_audit_trail(&storage, Some("user-42"), Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].access_type, AccessType::Delete);
    }

    #[tokio::test]
    async fn pseudonymize_rewrites_subject_but_keeps_payload_pointers() {
        let storage = InMemoryStorage::new();
        storage.insert(&sample_record("op-1", "user-42")).await.unwrap();

        let updated = pseudonymize_traces(&storage, "user-42", "admin").await.unwrap();
        assert_eq!(updated, 1);

        let exported = export_data_subject_data(&storage, &pseudonym_for("user-42"), "admin").await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].request_url, "store://traces/wf-1/op/request.json");
    }

    #[tokio::test]
    async fn erase_with_object_store_deletes_every_locator_and_empties_export() {
        use crate::objectstore::PayloadStore;
        use object_store::memory::InMemory;
        use std::sync::Arc;

        let storage = InMemoryStorage::new();
        let objects = PayloadStore::new(Arc::new(InMemory::new()), "traces");

        let mut request_only = sample_record("op-1", "user-42");
        request_only.request_url = objects.put_hot("wf-1", "op-1", crate::objectstore::REQUEST_BLOB_NAME, bytes::Bytes::from_static(b"{}")).await.unwrap();
        request_only.response_url = crate::policy::REDACTION_SENTINEL.to_string();
        storage.insert(&request_only).await.unwrap();

        let mut both_payloads = sample_record("op-2", "user-42");
        both_payloads.request_url = objects.put_hot("wf-1", "op-2", crate::objectstore::REQUEST_BLOB_NAME, bytes::Bytes::from_static(b"{}")).await.unwrap();
        both_payloads.response_url = objects.put_hot("wf-1", "op-2", crate::objectstore::RESPONSE_BLOB_NAME, bytes::Bytes::from_static(b"{}")).await.unwrap();
        storage.insert(&both_payloads).await.unwrap();

        let certificate = erase_traces(
            &storage,
            &objects,
            TraceSelector { data_subject_id: Some("user-42".to_string()), correlation_id: None },
            "admin",
            "test",
        )
        .await
        .unwrap();

        assert_eq!(certificate.deleted_actions, 2);
        assert_eq!(certificate.locators_deleted, 3);

        let audit = get_audit_trail(&storage, Some("user-42"), Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].access_type, AccessType::Delete);

        let remaining = export_data_subject_data(&storage, "user-42", "admin").await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn export_logs_an_access_audit_row() {
        let storage = InMemoryStorage::new();
        storage.insert(&sample_record("op-1", "user-42")).await.unwrap();
        let _ = export_data_subject_data(&storage, "user-42", "analyst").await.unwrap();

        let audit = get_audit_trail(&storage, Some("user-42"), Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].access_type, AccessType::Export);
    }
}
