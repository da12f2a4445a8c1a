//! Asynchronous exporter (C7).
//!
//! A bounded queue feeds a fixed worker pool; each worker batches by count
//! or time, then per record: writes the relational row (C8) first, then
//! uploads any carried payload bytes to the object store (C9). The row's
//! `request_url`/`response_url` columns already hold the locator the upload
//! will land at, since that key layout is deterministic — the relational
//! insert does not wait on the upload to know where the bytes will be.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::ExporterConfig;
use crate::objectstore::PayloadStore;
use crate::record::ActionExecution;
use crate::storage::ActionExecutionStorage;

/// A record plus whatever payload bytes still need to reach the object
/// store. `None` means nothing to upload (redacted, not traced, or the
/// deployment carries no object store at all).
pub struct ExportItem {
    pub record: ActionExecution,
    pub request_payload: Option<Bytes>,
    pub response_payload: Option<Bytes>,
}

impl ExportItem {
    pub fn new(record: ActionExecution) -> Self {
        Self { record, request_payload: None, response_payload: None }
    }
}

/// Shared counters a health check and metrics sink read from.
#[derive(Default)]
struct ExporterMetrics {
    queued: AtomicU64,
    dropped: AtomicU64,
    exported: AtomicU64,
    last_export_millis: AtomicU64,
}

impl ExporterMetrics {
    fn note_export(&self, count: u64) {
        self.exported.fetch_add(count, Ordering::Relaxed);
        self.last_export_millis.store(now_millis(), Ordering::Relaxed);
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Outcome of a health check (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExporterHealth {
    pub healthy: bool,
    pub queue_depth: usize,
    pub drop_rate: f64,
}

/// Producer-facing handle. Cheap to clone; every clone shares the same
/// queue and counters.
#[derive(Clone)]
pub struct ExportQueue {
    sender: mpsc::Sender<ExportItem>,
    metrics: Arc<ExporterMetrics>,
}

impl ExportQueue {
    /// Enqueue a record for export. When the queue is full the record is
    /// dropped (not the oldest queued one) and the drop counter increments.
    /// Returns `true` if the record was accepted.
    pub fn enqueue(&self, item: ExportItem) -> bool {
        match self.sender.try_send(item) {
            Ok(()) => {
                self.metrics.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn health(&self) -> ExporterHealth {
        let queued = self.metrics.queued.load(Ordering::Relaxed);
        let dropped = self.metrics.dropped.load(Ordering::Relaxed);
        let exported = self.metrics.exported.load(Ordering::Relaxed);
        let last_export = self.metrics.last_export_millis.load(Ordering::Relaxed);
        let queue_depth = self.sender.max_capacity() - self.sender.capacity();

        let drop_rate = if queued > 0 { dropped as f64 / queued as f64 } else { 0.0 };
        let progressing = queue_depth <= 100 || exported > 0;
        let recent = if exported > 0 { now_millis().saturating_sub(last_export) <= 30_000 } else { true };

        ExporterHealth { healthy: progressing && drop_rate <= 0.05 && recent, queue_depth, drop_rate }
    }
}

/// Owns the worker tasks and the shutdown signal; dropping this without
/// calling [`Exporter::shutdown`] leaves workers running until the process
/// exits, matching an explicit-shutdown contract rather than drop-based one.
pub struct Exporter {
    queue: ExportQueue,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<Notify>,
}

impl Exporter {
    pub fn spawn(config: &ExporterConfig, storage: Arc<dyn ActionExecutionStorage>) -> Self {
        Self::spawn_with_objects(config, storage, None)
    }

    /// Spawn with an object store so workers can upload the payload bytes
    /// carried alongside each record after the relational insert succeeds.
    pub fn spawn_with_objects(
        config: &ExporterConfig,
        storage: Arc<dyn ActionExecutionStorage>,
        objects: Option<PayloadStore>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let metrics = Arc::new(ExporterMetrics::default());
        let shutdown = Arc::new(Notify::new());
        let receiver = Arc::new(Mutex::new(receiver));
        let objects = objects.map(Arc::new);

        let workers = (0..config.worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    receiver.clone(),
                    storage.clone(),
                    objects.clone(),
                    metrics.clone(),
                    config.batch_size,
                    Duration::from_secs(config.flush_period_secs),
                    shutdown.clone(),
                ))
            })
            .collect();

        Self { queue: ExportQueue { sender, metrics }, workers, shutdown }
    }

    pub fn queue(&self) -> ExportQueue {
        self.queue.clone()
    }

    pub fn health(&self) -> ExporterHealth {
        self.queue.health()
    }

    /// Signal workers to stop accepting new batches and wait up to
    /// `deadline` for them to drain in-flight work.
    pub async fn shutdown(self, deadline: Duration) {
        self.shutdown.notify_waiters();
        let joined = futures::future::join_all(self.workers);
        let _ = tokio::time::timeout(deadline, joined).await;
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ExportItem>>>,
    storage: Arc<dyn ActionExecutionStorage>,
    objects: Option<Arc<PayloadStore>>,
    metrics: Arc<ExporterMetrics>,
    batch_size: usize,
    flush_period: Duration,
    shutdown: Arc<Notify>,
) {
    loop {
        let mut batch = Vec::with_capacity(batch_size);
        let deadline = Instant::now() + flush_period;

        loop {
            if batch.len() >= batch_size {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let mut guard = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    // Drain whatever is already queued, best-effort, then exit.
                    while let Ok(item) = guard.try_recv() {
                        batch.push(item);
                    }
                    drop(guard);
                    if !batch.is_empty() {
                        process_batch(worker_id, &storage, &objects, &metrics, std::mem::take(&mut batch)).await;
                    }
                    return;
                }
                received = tokio::time::timeout(remaining, guard.recv()) => {
                    match received {
                        Ok(Some(item)) => batch.push(item),
                        Ok(None) => {
                            drop(guard);
                            if !batch.is_empty() {
                                process_batch(worker_id, &storage, &objects, &metrics, std::mem::take(&mut batch)).await;
                            }
                            return;
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        if !batch.is_empty() {
            process_batch(worker_id, &storage, &objects, &metrics, batch).await;
        }
    }
}

async fn process_batch(
    worker_id: usize,
    storage: &Arc<dyn ActionExecutionStorage>,
    objects: &Option<Arc<PayloadStore>>,
    metrics: &Arc<ExporterMetrics>,
    batch: Vec<ExportItem>,
) {
    let count = batch.len() as u64;
    for item in &batch {
        if let Err(e) = storage.insert(&item.record).await {
            tracing::error!(worker_id, operation_id = %item.record.operation_id, error = %e, "relational write failed");
            continue;
        }

        let Some(objects) = objects else { continue };
        if let Some(bytes) = &item.request_payload {
            if let Err(e) =
                objects.put_hot(&item.record.correlation_id, &item.record.operation_id, crate::objectstore::REQUEST_BLOB_NAME, bytes.clone()).await
            {
                tracing::error!(worker_id, operation_id = %item.record.operation_id, error = %e, "request payload upload failed");
            }
        }
        if let Some(bytes) = &item.response_payload {
            if let Err(e) = objects
                .put_hot(&item.record.correlation_id, &item.record.operation_id, crate::objectstore::RESPONSE_BLOB_NAME, bytes.clone())
                .await
            {
                tracing::error!(worker_id, operation_id = %item.record.operation_id, error = %e, "response payload upload failed");
            }
        }
    }
    metrics.note_export(count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStorage;
    use chrono::Utc;

    fn sample_record(operation_id: &str) -> ActionExecution {
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
            request_url: "store://b/wf-1/op/request.json".to_string(),
            response_url: "store://b/wf-1/op/response.json".to_string(),
            request_size_bytes: 0,
            response_size_bytes: 0,
            client_ip: None,
            user_agent: None,
            metadata: None,
            trace_id: None,
            span_id: None,
            data_subject_id: None,
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
    async fn enqueued_records_reach_storage() {
        let storage = Arc::new(InMemoryStorage::new());
        let config = ExporterConfig { queue_capacity: 16, worker_count: 2, batch_size: 4, flush_period_secs: 1 };
        let exporter = Exporter::spawn(&config, storage.clone());
        let queue = exporter.queue();

        for i in 0..4 {
            assert!(queue.enqueue(ExportItem::new(sample_record(&format!("op-{i}")))));
        }

        exporter.shutdown(Duration::from_secs(2)).await;

        let found = storage
            .find_by_selector(&crate::storage::TraceSelector {
                correlation_id: Some("wf-1".to_string()),
                data_subject_id: None,
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 4);
    }

    #[tokio::test]
    async fn full_queue_drops_new_records_and_counts_them() {
        let storage = Arc::new(InMemoryStorage::new());
        let config = ExporterConfig { queue_capacity: 1, worker_count: 0, batch_size: 100, flush_period_secs: 60 };
        // worker_count is clamped to at least 1 in spawn(), so the single
        // worker may drain the one slot before the second try_send; retry
        // until we observe a drop to keep this test free of timing flakes.
        let exporter = Exporter::spawn(&config, storage.clone());
        let queue = exporter.queue();
        let mut observed_drop = false;
        for i in 0..50 {
            if !queue.enqueue(ExportItem::new(sample_record(&format!("op-{i}")))) {
                observed_drop = true;
                break;
            }
        }
        assert!(observed_drop, "expected at least one drop under a capacity-1 queue");
        exporter.shutdown(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn payload_bytes_upload_after_relational_insert_succeeds() {
        use object_store::memory::InMemory;

        let storage = Arc::new(InMemoryStorage::new());
        let objects = PayloadStore::new(Arc::new(InMemory::new()), "traces");
        let config = ExporterConfig { queue_capacity: 16, worker_count: 1, batch_size: 1, flush_period_secs: 1 };
        let exporter = Exporter::spawn_with_objects(&config, storage.clone(), Some(objects));
        let queue = exporter.queue();

        let mut record = sample_record("op-payload");
        record.request_url = "store://traces/wf-1/op-payload/request.json".to_string();
        let mut item = ExportItem::new(record);
        item.request_payload = Some(Bytes::from_static(b"{\"hello\":true}"));
        assert!(queue.enqueue(item));

        exporter.shutdown(Duration::from_secs(2)).await;

        let found = storage
            .find_by_selector(&crate::storage::TraceSelector {
                correlation_id: Some("wf-1".to_string()),
                data_subject_id: None,
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].request_url, "store://traces/wf-1/op-payload/request.json");
    }

    #[test]
    fn health_is_healthy_with_no_traffic() {
        let (sender, _receiver) = mpsc::channel(10_000);
        let queue = ExportQueue { sender, metrics: Arc::new(ExporterMetrics::default()) };
        let health = queue.health();
        assert!(health.healthy);
        assert_eq!(health.queue_depth, 0);
    }
}
