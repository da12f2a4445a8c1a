//! In-memory [`ActionExecutionStorage`] for tests and hosts without a
//! relational database wired up yet.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ActionExecutionStorage, ArchivableRow, PiiDetectionRecord, TraceAccessAudit, TraceSelector};
use crate::error::{Error, Result};
use crate::pii::PiiDetection;
use crate::record::ActionExecution;

#[derive(Debug, Clone)]
struct StoredPii {
    correlation_id: String,
    operation_id: String,
    data_subject_id: Option<String>,
    detected_at: DateTime<Utc>,
    detection: PiiDetection,
}

#[derive(Default)]
pub struct InMemoryStorage {
    rows: Mutex<Vec<ActionExecution>>,
    pii: Mutex<Vec<StoredPii>>,
    audit: Mutex<Vec<TraceAccessAudit>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(record: &ActionExecution, selector: &TraceSelector) -> bool {
        let subject_ok = selector
            .data_subject_id
            .as_deref()
            .is_none_or(|s| record.data_subject_id.as_deref() == Some(s));
        let correlation_ok = selector
            .correlation_id
            .as_deref()
            .is_none_or(|c| record.correlation_id == c);
        subject_ok && correlation_ok
    }
}

#[async_trait]
impl ActionExecutionStorage for InMemoryStorage {
    async fn insert(&self, record: &ActionExecution) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|r| r.operation_id == record.operation_id) {
            return Ok(());
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn insert_pii_detections(
        &self,
        correlation_id: &str,
        operation_id: &str,
        data_subject_id: Option<&str>,
        detections: &[PiiDetection],
    ) -> Result<()> {
        let mut pii = self.pii.lock().unwrap();
        for detection in detections {
            pii.push(StoredPii {
                correlation_id: correlation_id.to_string(),
                operation_id: operation_id.to_string(),
                data_subject_id: data_subject_id.map(str::to_string),
                detected_at: Utc::now(),
                detection: detection.clone(),
            });
        }
        Ok(())
    }

    async fn find_by_selector(&self, selector: &TraceSelector) -> Result<Vec<ActionExecution>> {
        if selector.is_empty() {
            return Err(Error::ErasureSelectorRequired);
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().filter(|r| Self::matches(r, selector)).cloned().collect())
    }

    async fn find_by_operation_id(&self, operation_id: &str) -> Result<Option<ActionExecution>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().find(|r| r.operation_id == operation_id).cloned())
    }

    async fn delete_by_selector(&self, selector: &TraceSelector) -> Result<u64> {
        if selector.is_empty() {
            return Err(Error::ErasureSelectorRequired);
        }
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !Self::matches(r, selector));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_pii_by_selector(&self, selector: &TraceSelector) -> Result<u64> {
        if selector.is_empty() {
            return Err(Error::ErasureSelectorRequired);
        }
        let mut pii = self.pii.lock().unwrap();
        let before = pii.len();
        pii.retain(|p| {
            let subject_ok = selector
                .data_subject_id
                .as_deref()
                .is_none_or(|s| p.data_subject_id.as_deref() == Some(s));
            let correlation_ok = selector.correlation_id.as_deref().is_none_or(|c| p.correlation_id == c);
            !(subject_ok && correlation_ok)
        });
        Ok((before - pii.len()) as u64)
    }

    async fn pseudonymize_data_subject(&self, data_subject_id: &str, pseudonym: &str) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0u64;
        for row in rows.iter_mut() {
            if row.data_subject_id.as_deref() == Some(data_subject_id) {
                row.data_subject_id = Some(pseudonym.to_string());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.retention_until.is_none_or(|t| t >= now));
        Ok((before - rows.len()) as u64)
    }

    async fn rows_eligible_for_archival(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<ArchivableRow>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| r.archived_at.is_none() && r.started_at < older_than)
            .take(limit)
            .map(|r| ArchivableRow { operation_id: r.operation_id.clone(), record: r.clone() })
            .collect())
    }

    async fn mark_archived(&self, operation_id: &str, archived_at: DateTime<Utc>, s3_key: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.operation_id == operation_id) {
            row.archived_at = Some(archived_at);
            row.archived_s3_key = Some(s3_key.to_string());
        }
        Ok(())
    }

    async fn delete_archived_before(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<ArchivableRow>> {
        let mut rows = self.rows.lock().unwrap();
        let victims: Vec<ArchivableRow> = rows
            .iter()
            .filter(|r| r.archived_at.is_some_and(|t| t < older_than))
            .take(limit)
            .map(|r| ArchivableRow { operation_id: r.operation_id.clone(), record: r.clone() })
            .collect();
        let victim_ids: Vec<&str> = victims.iter().map(|v| v.operation_id.as_str()).collect();
        rows.retain(|r| !victim_ids.contains(&r.operation_id.as_str()));
        Ok(victims)
    }

    async fn insert_access_audit(&self, audit: &TraceAccessAudit) -> Result<()> {
        self.audit.lock().unwrap().push(audit.clone());
        Ok(())
    }

    async fn query_access_audit(
        &self,
        data_subject_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<TraceAccessAudit>> {
        let audit = self.audit.lock().unwrap();
        Ok(audit
            .iter()
            .filter(|a| a.accessed_at >= since && data_subject_id.is_none_or(|s| a.data_subject_id.as_deref() == Some(s)))
            .cloned()
            .collect())
    }

    async fn query_pii_detections(&self, correlation_id: &str, since: DateTime<Utc>) -> Result<Vec<PiiDetectionRecord>> {
        let pii = self.pii.lock().unwrap();
        Ok(pii
            .iter()
            .filter(|p| p.correlation_id == correlation_id && p.detected_at >= since)
            .map(|p| PiiDetectionRecord {
                correlation_id: p.correlation_id.clone(),
                operation_id: p.operation_id.clone(),
                data_subject_id: p.data_subject_id.clone(),
                detected_at: p.detected_at,
                detection: p.detection.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AccessType;

    fn sample_record(operation_id: &str, correlation_id: &str, data_subject_id: &str) -> ActionExecution {
        ActionExecution {
            operation_id: operation_id.to_string(),
            correlation_id: correlation_id.to_string(),
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
            request_url: "store://b/x/y/request.json".to_string(),
            response_url: "store://b/x/y/response.json".to_string(),
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

    #[tokio::test]
    async fn insert_then_find_by_data_subject() {
        let storage = InMemoryStorage::new();
        storage.insert(&sample_record("op-1", "wf-1", "user-42")).await.unwrap();
        let found = storage
            .find_by_selector(&TraceSelector { data_subject_id: Some("user-42".to_string()), correlation_id: None })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_operation_id() {
        let storage = InMemoryStorage::new();
        let record = sample_record("op-1", "wf-1", "user-1");
        storage.insert(&record).await.unwrap();
        storage.insert(&record).await.unwrap();
        let found = storage
            .find_by_selector(&TraceSelector { correlation_id: Some("wf-1".to_string()), data_subject_id: None })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn delete_by_selector_requires_a_selector() {
        let storage = InMemoryStorage::new();
        let err = storage.delete_by_selector(&TraceSelector::default()).await.unwrap_err();
        assert!(matches!(err, Error::ErasureSelectorRequired));
    }

    #[tokio::test]
    async fn erase_removes_matching_rows_only() {
        let storage = InMemoryStorage::new();
        storage.insert(&sample_record("op-1", "wf-1", "user-42")).await.unwrap();
        storage.insert(&sample_record("op-2", "wf-2", "user-99")).await.unwrap();
        let deleted = storage
            .delete_by_selector(&TraceSelector { data_subject_id: Some("user-42".to_string()), correlation_id: None })
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        let remaining = storage
            .find_by_selector(&TraceSelector { correlation_id: Some("wf-2".to_string()), data_subject_id: None })
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn access_audit_roundtrip() {
        let storage = InMemoryStorage::new();
        storage
            .insert_access_audit(&TraceAccessAudit {
                accessed_at: Utc::now(),
                user_id: "admin".to_string(),
                user_email: None,
                user_ip: None,
                access_type: AccessType::Delete,
                resource_type: "action_execution".to_string(),
                correlation_id: None,
                operation_id: None,
                data_subject_id: Some("user-42".to_string()),
                query_parameters: None,
                results_count: Some(1),
                purpose: Some("erasure".to_string()),
                legal_basis: None,
            })
            .await
            .unwrap();
        let rows = storage
            .query_access_audit(Some("user-42"), Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn query_pii_detections_scopes_to_correlation_id_and_window() {
        use crate::pii::{PiiDetection, PiiLocation};

        let storage = InMemoryStorage::new();
        let detection = PiiDetection {
            location: PiiLocation::Request,
            pii_type: "email",
            pattern_matched: "a@b.com".to_string(),
            confidence: 0.95,
        };
        storage.insert_pii_detections("wf-1", "op-1", Some("user-1"), &[detection.clone()]).await.unwrap();
        storage.insert_pii_detections("wf-2", "op-2", Some("user-2"), &[detection]).await.unwrap();

        let found = storage
            .query_pii_detections("wf-1", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].operation_id, "op-1");

        let too_old = storage.query_pii_detections("wf-1", Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        assert!(too_old.is_empty());
    }

    #[tokio::test]
    async fn delete_pii_by_selector_scopes_to_the_matching_subject_only() {
        use crate::pii::{PiiDetection, PiiLocation};

        let storage = InMemoryStorage::new();
        let detection = PiiDetection {
            location: PiiLocation::Request,
            pii_type: "email",
            pattern_matched: "a@b.com".to_string(),
            confidence: 0.95,
        };
        storage.insert_pii_detections("wf-1", "op-1", Some("user-42"), &[detection.clone()]).await.unwrap();
        storage.insert_pii_detections("wf-2", "op-2", Some("user-99"), &[detection]).await.unwrap();

        let deleted = storage
            .delete_pii_by_selector(&TraceSelector { data_subject_id: Some("user-42".to_string()), correlation_id: None })
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = storage.query_pii_detections("wf-2", Utc::now() - chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
