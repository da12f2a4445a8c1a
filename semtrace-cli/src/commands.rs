//! Subcommand implementations (§4.15): each loads configuration, builds the
//! relational/object-store capabilities, and runs one caller-driven
//! operation that the core library deliberately does not self-schedule.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use semtrace_core::prelude::*;

/// Outcome of a subcommand, distinguishing "everything succeeded" from
/// "ran to completion but some records were skipped" (exit code 2).
pub enum Outcome {
    Clean(String),
    Partial(String),
}

pub fn load_config(path: Option<&str>) -> Result<TracerConfig> {
    let config = match path {
        Some(path) => TracerConfig::load_from(path).with_context(|| format!("loading config from {path}"))?,
        None => TracerConfig::load().context("loading config")?,
    };
    if config.database.is_none() {
        bail!("no [database] section in config: the CLI needs a relational store to operate on");
    }
    Ok(config)
}

pub async fn connect_storage(config: &TracerConfig) -> Result<Arc<dyn ActionExecutionStorage>> {
    let db_config = config.database.as_ref().expect("validated by load_config");
    let pool = create_pool(db_config).await.context("connecting to relational store")?;
    let storage = PostgresStorage::new(pool);
    storage.initialize().await.context("initializing relational schema")?;
    Ok(Arc::new(storage))
}

/// Parse `--object-store-url` into a [`PayloadStore`]. `None` is valid: a
/// deployment that never set `policy.store_payloads` has nothing to sweep.
pub fn connect_objects(url: Option<&str>) -> Result<Option<PayloadStore>> {
    let Some(url) = url else { return Ok(None) };
    let parsed = url::Url::parse(url).with_context(|| format!("parsing object store URL {url}"))?;
    let bucket = parsed.host_str().unwrap_or("traces").to_string();
    let (store, _path) = object_store::parse_url(&parsed).with_context(|| format!("building object store client for {url}"))?;
    Ok(Some(PayloadStore::new(Arc::from(store), bucket)))
}

pub async fn archive_sweep(
    storage: &dyn ActionExecutionStorage,
    objects: Option<&PayloadStore>,
    config: &TracerConfig,
    dry_run: bool,
) -> Result<Outcome> {
    let Some(objects) = objects else {
        bail!("archive-sweep requires --object-store-url");
    };
    let report = archival::sweep(storage, objects, &config.archival, dry_run).await.context("archive sweep")?;
    let summary = format!(
        "{} candidates, {} archived, {} failed (dry_run={})",
        report.candidates, report.archived, report.failed, report.dry_run
    );
    if report.failed > 0 {
        Ok(Outcome::Partial(summary))
    } else {
        Ok(Outcome::Clean(summary))
    }
}

pub async fn retention_sweep(
    storage: &dyn ActionExecutionStorage,
    objects: Option<&PayloadStore>,
    config: &TracerConfig,
) -> Result<Outcome> {
    let expired = compliance::delete_expired_traces(storage).await.context("retention sweep: expired rows")?;

    let archived_deleted = match objects {
        Some(objects) => archival::delete_archived(storage, objects, &config.archival)
            .await
            .context("retention sweep: archived rows")?,
        None => 0,
    };

    Ok(Outcome::Clean(format!(
        "{expired} expired row(s) deleted, {archived_deleted} archived row(s) past deletion age"
    )))
}

pub async fn erase(
    storage: &dyn ActionExecutionStorage,
    objects: Option<&PayloadStore>,
    data_subject_id: Option<String>,
    correlation_id: Option<String>,
    user_id: &str,
    purpose: &str,
) -> Result<Outcome> {
    let selector = TraceSelector { data_subject_id, correlation_id };

    let certificate = match objects {
        Some(objects) => compliance::erase_traces(storage, objects, selector, user_id, purpose).await.context("erase")?,
        None => {
            let (deleted_actions, deleted_pii) = compliance::erase_traces_without_object_store(storage, selector, user_id, purpose)
                .await
                .context("erase")?;
            ErasureCertificate {
                certificate_id: format!("cert-{}", uuid::Uuid::new_v4().simple()),
                deleted_actions,
                deleted_pii,
                locators_deleted: 0,
            }
        }
    };

    Ok(Outcome::Clean(format!(
        "certificate {}: {} action row(s), {} pii row(s), {} object(s) deleted",
        certificate.certificate_id, certificate.deleted_actions, certificate.deleted_pii, certificate.locators_deleted
    )))
}
