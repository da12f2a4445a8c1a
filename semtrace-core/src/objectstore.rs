//! Object-store writer (C9).
//!
//! Payload bytes are uploaded under a deterministic key layout and the
//! resulting `store://` locator is embedded in the relational row; the
//! relational layer never sees raw bytes.

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as StorePath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};

use crate::config::ArchivalConfig;
use crate::error::{Error, Result};

pub const REQUEST_BLOB_NAME: &str = "request.json";
pub const RESPONSE_BLOB_NAME: &str = "response.json";
pub const LOGS_BLOB_NAME: &str = "logs.txt";

/// Content type inferred from the bytes, used for the upload's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Octet,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Octet => "application/octet-stream",
        }
    }

    pub fn infer(bytes: &[u8]) -> Self {
        if serde_json::from_slice::<serde_json::Value>(bytes).is_ok() {
            Self::Json
        } else {
            Self::Octet
        }
    }
}

/// Thin, non-retrying wrapper around an [`ObjectStore`] implementation.
/// Retry policy belongs to the caller, per the hot-path contract. Cheap to
/// clone: the middleware and the exporter each hold a handle to the same
/// backing store.
#[derive(Clone)]
pub struct PayloadStore {
    inner: Arc<dyn ObjectStore>,
    bucket: String,
}

impl PayloadStore {
    pub fn new(inner: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self { inner, bucket: bucket.into() }
    }

    fn hot_path(&self, correlation_id: &str, operation_id: &str, name: &str) -> StorePath {
        StorePath::from(format!("{correlation_id}/{operation_id}/{name}"))
    }

    /// Compute the `store://` locator a hot-path blob will have, without
    /// uploading anything. The key layout is deterministic, so a caller can
    /// record the locator in a relational row before the bytes are written.
    pub(crate) fn hot_locator(&self, correlation_id: &str, operation_id: &str, name: &str) -> String {
        format!("store://{}/{}/{}/{}", self.bucket, correlation_id, operation_id, name)
    }

    /// Upload a hot-path payload blob and return its `store://` locator.
    /// Tags the upload with its inferred content type (§4.9).
    pub async fn put_hot(
        &self,
        correlation_id: &str,
        operation_id: &str,
        name: &str,
        bytes: Bytes,
    ) -> Result<String> {
        let path = self.hot_path(correlation_id, operation_id, name);
        let content_type = ContentType::infer(&bytes);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.as_str().into());
        let opts = PutOptions { attributes, ..Default::default() };
        self.inner
            .put_opts(&path, PutPayload::from_bytes(bytes), opts)
            .await
            .map_err(|e| Error::ObjectStore(Box::new(e)))?;
        Ok(self.hot_locator(correlation_id, operation_id, name))
    }

    pub async fn get_hot(&self, correlation_id: &str, operation_id: &str, name: &str) -> Result<Bytes> {
        let path = self.hot_path(correlation_id, operation_id, name);
        let result = self.inner.get(&path).await.map_err(|e| Error::ObjectStore(Box::new(e)))?;
        result.bytes().await.map_err(|e| Error::ObjectStore(Box::new(e)))
    }

    pub async fn delete_hot(&self, correlation_id: &str, operation_id: &str, name: &str) -> Result<()> {
        let path = self.hot_path(correlation_id, operation_id, name);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::ObjectStore(Box::new(e))),
        }
    }

    /// Delete by a previously recorded `store://` locator, parsing out the
    /// key relative to this store's bucket. No-op on the redaction sentinel
    /// or a locator for a different bucket; returns whether a delete was
    /// actually issued, so callers can count real deletions rather than
    /// attempts against fields that were never uploaded.
    pub async fn delete_locator(&self, locator: &str) -> Result<bool> {
        let Some(key) = self.key_from_locator(locator) else {
            return Ok(false);
        };
        let path = StorePath::from(key);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(true),
            Err(e) => Err(Error::ObjectStore(Box::new(e))),
        }
    }

    fn key_from_locator(&self, locator: &str) -> Option<String> {
        let prefix = format!("store://{}/", self.bucket);
        locator.strip_prefix(&prefix).map(str::to_string)
    }

    /// Confirm a cold-tier object exists and can accept a restore request.
    /// The `object_store` crate has no backend-agnostic restore API (cloud
    /// providers expose this as a side channel outside normal object PUT/GET);
    /// this does the one thing that is portable across backends and lets the
    /// caller report "restore accepted" without claiming the data is hot.
    pub async fn restore(&self, s3_key: &str) -> Result<()> {
        let Some(key) = self.key_from_locator(s3_key) else {
            return Err(Error::NotFound(format!("locator not owned by bucket {}: {s3_key}", self.bucket)));
        };
        let path = StorePath::from(key);
        self.inner.head(&path).await.map_err(|e| Error::ObjectStore(Box::new(e)))?;
        Ok(())
    }

    /// Upload a condensed archival manifest to
    /// `<archived-prefix>/YYYY/MM/DD/<operation_id>.json`, tagged with the
    /// cold-tier storage class and the identifiers it was archived under
    /// (§4.11 point 3).
    pub async fn put_archived(
        &self,
        archived_prefix: &str,
        date_path: &str,
        operation_id: &str,
        correlation_id: &str,
        cold_storage_class: &str,
        manifest: Bytes,
    ) -> Result<String> {
        let key = format!("{archived_prefix}/{date_path}/{operation_id}.json");
        let path = StorePath::from(key.clone());
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, ContentType::Json.as_str().into());
        attributes.insert(
            Attribute::Metadata(Cow::Borrowed("storage-class")),
            cold_storage_class.to_string().into(),
        );
        attributes.insert(Attribute::Metadata(Cow::Borrowed("operation-id")), operation_id.to_string().into());
        attributes.insert(Attribute::Metadata(Cow::Borrowed("correlation-id")), correlation_id.to_string().into());
        let opts = PutOptions { attributes, ..Default::default() };
        self.inner
            .put_opts(&path, PutPayload::from_bytes(manifest), opts)
            .await
            .map_err(|e| Error::ObjectStore(Box::new(e)))?;
        Ok(format!("store://{}/{}", self.bucket, key))
    }

    pub async fn delete_archived(&self, s3_key: &str) -> Result<()> {
        let Some(key) = self.key_from_locator(s3_key) else {
            return Ok(());
        };
        let path = StorePath::from(key);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::ObjectStore(Box::new(e))),
        }
    }

    /// Compute the lifecycle policy this bucket should carry for `config`,
    /// without applying it. `object_store` has no backend-agnostic lifecycle
    /// API (S3/GCS/Azure each expose it as a side channel outside normal
    /// PUT/GET, the same gap [`Self::restore`] works around), so this is a
    /// one-time, operator-driven setup step: call it once per environment
    /// and apply the returned rules through the backend's own provisioning
    /// path (`aws s3api put-bucket-lifecycle-configuration`, Terraform, a
    /// console click-through).
    pub fn lifecycle_policy(&self, config: &ArchivalConfig) -> Vec<LifecycleRule> {
        vec![
            LifecycleRule {
                prefix: String::new(),
                transition_to_cold_after_days: Some(config.archive_after_days),
                expire_after_days: config.delete_after_days,
            },
            LifecycleRule {
                prefix: format!("{}/", config.archived_prefix),
                transition_to_cold_after_days: None,
                expire_after_days: config.delete_after_days.saturating_sub(config.archive_after_days),
            },
        ]
    }
}

/// One rule in a bucket's lifecycle policy (§4.11): transition or expire
/// objects under `prefix` after the given age.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LifecycleRule {
    pub prefix: String,
    pub transition_to_cold_after_days: Option<u32>,
    pub expire_after_days: u32,
}
