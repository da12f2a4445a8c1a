//! Archival manager (C11).
//!
//! Caller-driven, not self-scheduled: a host wires `sweep`/`delete_expired`
//! to its own scheduler (cron, a background worker, a CLI invocation).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ArchivalConfig;
use crate::error::Result;
use crate::objectstore::PayloadStore;
use crate::storage::ActionExecutionStorage;

/// Outcome of one [`sweep`] invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub archived: usize,
    pub failed: usize,
    pub dry_run: bool,
}

/// Condensed JSON manifest uploaded alongside the archived row.
#[derive(Debug, Serialize)]
struct ArchiveManifest<'a> {
    operation_id: &'a str,
    correlation_id: &'a str,
    action_type: &'a str,
    object_type: &'a str,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    action_status: &'a str,
    request_url: &'a str,
    response_url: &'a str,
    data_subject_id: Option<&'a str>,
}

fn date_path(at: DateTime<Utc>) -> String {
    at.format("%Y/%m/%d").to_string()
}

/// Archive rows older than `archive_after_days` with `archived_at IS NULL`,
/// in batches of `batch_size`. Failures on individual rows are logged and
/// skipped; the sweep continues. `dry_run` logs intent without uploading or
/// mutating anything.
pub async fn sweep(
    storage: &dyn ActionExecutionStorage,
    objects: &PayloadStore,
    config: &ArchivalConfig,
    dry_run: bool,
) -> Result<SweepReport> {
    let older_than = Utc::now() - chrono::Duration::days(config.archive_after_days as i64);
    let candidates = storage.rows_eligible_for_archival(older_than, config.batch_size).await?;

    let mut report = SweepReport { candidates: candidates.len(), dry_run, ..Default::default() };

    for candidate in candidates {
        let record = &candidate.record;

        if dry_run {
            tracing::info!(operation_id = %candidate.operation_id, "dry run: would archive row");
            report.archived += 1;
            continue;
        }

        let manifest = ArchiveManifest {
            operation_id: &record.operation_id,
            correlation_id: &record.correlation_id,
            action_type: &record.action_type,
            object_type: &record.object_type,
            started_at: record.started_at,
            completed_at: record.completed_at,
            action_status: &record.action_status,
            request_url: &record.request_url,
            response_url: &record.response_url,
            data_subject_id: record.data_subject_id.as_deref(),
        };

        let body = match serde_json::to_vec(&manifest) {
            Ok(bytes) => bytes::Bytes::from(bytes),
            Err(e) => {
                tracing::error!(operation_id = %candidate.operation_id, error = %e, "failed to marshal archive manifest");
                report.failed += 1;
                continue;
            }
        };

        let upload = objects
            .put_archived(
                &config.archived_prefix,
                &date_path(record.started_at),
                &record.operation_id,
                &record.correlation_id,
                &config.cold_storage_class,
                body,
            )
            .await;

        let key = match upload {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(operation_id = %candidate.operation_id, error = %e, "archive upload failed");
                report.failed += 1;
                continue;
            }
        };

        if let Err(e) = storage.mark_archived(&candidate.operation_id, Utc::now(), &key).await {
            tracing::error!(operation_id = %candidate.operation_id, error = %e, "failed to mark row archived");
            report.failed += 1;
            continue;
        }

        report.archived += 1;
    }

    Ok(report)
}

/// Delete rows archived more than `delete_after_days` ago: removes the
/// object-store blob and the relational row together.
pub async fn delete_archived(
    storage: &dyn ActionExecutionStorage,
    objects: &PayloadStore,
    config: &ArchivalConfig,
) -> Result<usize> {
    let older_than = Utc::now() - chrono::Duration::days(config.delete_after_days as i64);
    let victims = storage.delete_archived_before(older_than, config.batch_size).await?;

    let mut deleted = 0usize;
    for victim in victims {
        if let Some(ref key) = victim.record.archived_s3_key {
            if let Err(e) = objects.delete_archived(key).await {
                tracing::error!(operation_id = %victim.operation_id, error = %e, "failed to delete archived blob");
                continue;
            }
        }
        deleted += 1;
    }
    Ok(deleted)
}

/// Initiate a cold-tier restore for one operation. Returns once the request
/// has been accepted by the store, not once the data is hot again.
pub async fn restore(storage: &dyn ActionExecutionStorage, objects: &PayloadStore, operation_id: &str) -> Result<()> {
    let Some(row) = storage.find_by_operation_id(operation_id).await? else {
        return Err(crate::error::Error::NotFound(format!("no row for operation_id {operation_id}")));
    };

    let Some(ref key) = row.archived_s3_key else {
        return Err(crate::error::Error::NotFound(format!("operation_id {operation_id} has not been archived")));
    };

    objects.restore(key).await?;
    tracing::info!(operation_id, key = %key, "restore request accepted for cold-tier object");
    Ok(())
}
