//! # semtrace-core
//!
//! Action-tracing middleware for HTTP services: capture semantic actions,
//! redact credentials and PII, sample at the tail, and write to a
//! relational store and an object store for compliant long-term retention.
//!
//! ## Example
//!
//! ```rust,no_run
//! use semtrace_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<()> {
//! let config = TracerConfig::load()?;
//! let storage: Arc<dyn ActionExecutionStorage> = Arc::new(InMemoryStorage::new());
//! let exporter = Exporter::spawn(&config.exporter, storage.clone());
//! let tracer = Arc::new(Tracer::new(config, exporter.queue(), storage, None, noop()));
//!
//! let app = Router::new().layer(axum::middleware::from_fn_with_state(tracer, trace_middleware));
//! # Ok(())
//! # }
//! ```
//!
//! With an object store, both the exporter and the tracer share one handle
//! so the row the exporter inserts and the blob it later uploads agree on
//! where the payload lives:
//!
//! ```rust,no_run
//! use semtrace_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(backend: Arc<dyn object_store::ObjectStore>) -> Result<()> {
//! let config = TracerConfig::load()?;
//! let storage: Arc<dyn ActionExecutionStorage> = Arc::new(InMemoryStorage::new());
//! let objects = PayloadStore::new(backend, "traces");
//! let exporter = Exporter::spawn_with_objects(&config.exporter, storage.clone(), Some(objects.clone()));
//! let tracer = Arc::new(Tracer::new(config, exporter.queue(), storage, Some(objects), noop()));
//!
//! let app = Router::new().layer(axum::middleware::from_fn_with_state(tracer, trace_middleware));
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod admin;
pub mod archival;
pub mod compliance;
pub mod config;
pub mod database;
pub mod error;
pub mod exporter;
pub mod ids;
pub mod metrics;
pub mod middleware;
pub mod objectstore;
pub mod pii;
pub mod policy;
pub mod record;
pub mod sampler;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::action::{parse_action, ParsedAction};
    pub use crate::archival::{self, SweepReport};
    pub use crate::compliance::{self, ErasureCertificate};
    pub use crate::config::{
        ArchivalConfig, ComplianceConfig, DataRegion, DatabaseConfig, ExporterConfig, PiiConfig, PolicyConfig,
        SamplingConfig, ServiceConfig, TracerConfig,
    };
    pub use crate::error::{Error, ErrorResponse, Result};
    pub use crate::exporter::{ExportItem, ExportQueue, Exporter, ExporterHealth};
    pub use crate::ids::{resolve_correlation_id, CorrelationId, OperationId};
    pub use crate::metrics::{metric_labels, metric_names, noop, MetricsSink, SharedMetrics};
    pub use crate::middleware::{trace_middleware, Tracer};
    pub use crate::objectstore::{LifecycleRule, PayloadStore};
    pub use crate::pii::{detect, redact, PiiDetection, PiiLocation};
    pub use crate::policy::{evaluate as evaluate_policy, PolicyDecision};
    pub use crate::record::{ActionExecution, ActionStatus, AssemblyInput, PayloadLocator};
    pub use crate::sampler::{evaluate as evaluate_sampling, SampleDecision, SampleReason};
    pub use crate::storage::memory::InMemoryStorage;
    pub use crate::storage::{AccessType, ActionExecutionStorage, PiiDetectionRecord, TraceAccessAudit, TraceSelector};

    #[cfg(feature = "postgres")]
    pub use crate::database::create_pool;
    #[cfg(feature = "postgres")]
    pub use crate::storage::postgres::PostgresStorage;

    pub use axum::Router;
}
