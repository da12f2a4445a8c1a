//! Layered configuration (A1).
//!
//! `TracerConfig` is assembled the same way as the surrounding framework
//! assembles its own configuration: defaults, then a TOML file, then
//! environment variables (prefixed `SEMTRACE_`), each layer overriding the
//! last. Once built, the config is immutable and `Clone + Send + Sync`.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration for the tracing subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    pub service: ServiceConfig,
    pub policy: PolicyConfig,
    pub compliance: ComplianceConfig,
    pub pii: PiiConfig,
    pub sampling: SamplingConfig,
    pub exporter: ExporterConfig,
    pub archival: ArchivalConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            policy: PolicyConfig::default(),
            compliance: ComplianceConfig::default(),
            pii: PiiConfig::default(),
            sampling: SamplingConfig::default(),
            exporter: ExporterConfig::default(),
            archival: ArchivalConfig::default(),
            database: None,
        }
    }
}

/// Connection settings for the relational store (C8). Absent when a host
/// supplies its own already-connected pool instead of letting the library
/// build one from a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_db_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_db_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_connection_timeout_secs() -> u64 {
    5
}
fn default_db_max_retries() -> u32 {
    3
}
fn default_db_retry_delay_secs() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_id")]
    pub service_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { service_id: default_service_id(), enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub exclude_action_types: Vec<String>,
    #[serde(default)]
    pub exclude_object_types: Vec<String>,
    #[serde(default = "default_false")]
    pub store_payloads: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            exclude_action_types: Vec::new(),
            exclude_object_types: Vec::new(),
            store_payloads: false,
        }
    }
}

/// Closed set of data regions recognised by the compliance layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataRegion {
    Us,
    Eu,
    Apac,
}

impl DataRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Eu => "eu",
            Self::Apac => "apac",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    #[serde(default = "default_data_region")]
    pub data_region: DataRegion,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_legal_basis")]
    pub legal_basis: String,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            data_region: default_data_region(),
            retention_days: default_retention_days(),
            legal_basis: default_legal_basis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiConfig {
    #[serde(default = "default_false")]
    pub enable_pii: bool,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self { enable_pii: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub deterministic_sampling: bool,
    #[serde(default = "default_base_rate")]
    pub base_rate: f64,
    #[serde(default)]
    pub head_sampling_rate: Option<f64>,
    #[serde(default = "default_true")]
    pub always_sample_errors: bool,
    #[serde(default = "default_true")]
    pub always_sample_slow: bool,
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
    #[serde(default)]
    pub always_keep_action_types: Vec<String>,
    #[serde(default)]
    pub always_keep_object_types: Vec<String>,
    #[serde(default)]
    pub always_keep_statuses: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            deterministic_sampling: true,
            base_rate: default_base_rate(),
            head_sampling_rate: None,
            always_sample_errors: true,
            always_sample_slow: true,
            slow_threshold_ms: default_slow_threshold_ms(),
            always_keep_action_types: Vec::new(),
            always_keep_object_types: Vec::new(),
            always_keep_statuses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_period_secs")]
    pub flush_period_secs: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            flush_period_secs: default_flush_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalConfig {
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: u32,
    #[serde(default = "default_delete_after_days")]
    pub delete_after_days: u32,
    #[serde(default = "default_archival_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_archived_prefix")]
    pub archived_prefix: String,
    #[serde(default = "default_storage_class")]
    pub cold_storage_class: String,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            archive_after_days: default_archive_after_days(),
            delete_after_days: default_delete_after_days(),
            batch_size: default_archival_batch_size(),
            archived_prefix: default_archived_prefix(),
            cold_storage_class: default_storage_class(),
        }
    }
}

fn default_service_id() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "semtrace".to_string())
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_data_region() -> DataRegion {
    DataRegion::Us
}
fn default_retention_days() -> u32 {
    0
}
fn default_legal_basis() -> String {
    "legitimate_interest".to_string()
}
fn default_base_rate() -> f64 {
    0.1
}
fn default_slow_threshold_ms() -> u64 {
    1000
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_worker_count() -> usize {
    4
}
fn default_batch_size() -> usize {
    100
}
fn default_flush_period_secs() -> u64 {
    5
}
fn default_archive_after_days() -> u32 {
    90
}
fn default_delete_after_days() -> u32 {
    365
}
fn default_archival_batch_size() -> usize {
    1000
}
fn default_archived_prefix() -> String {
    "archived".to_string()
}
fn default_storage_class() -> String {
    "glacier".to_string()
}

impl TracerConfig {
    /// Load configuration from all sources, highest priority last:
    /// defaults -> `./config.toml` -> XDG config dir -> `/etc` -> env.
    ///
    /// Environment variables use the `SEMTRACE_` prefix, e.g.
    /// `SEMTRACE_POLICY.STORE_PAYLOADS=true`.
    pub fn load() -> Result<Self> {
        let service_name = default_service_id();
        Self::load_for_service(&service_name)
    }

    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        let mut figment = Figment::new().merge(Serialized::defaults(TracerConfig::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!(path = %path.display(), "loading tracer configuration");
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("SEMTRACE_").split("_"));

        figment.extract().map_err(|e| Error::Config(Box::new(e)))
    }

    pub fn load_from(path: &str) -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(TracerConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SEMTRACE_").split("_"))
            .extract()
            .map_err(|e| Error::Config(Box::new(e)))
    }

    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        paths.push(PathBuf::from("config.toml"));

        let xdg_dirs = xdg::BaseDirectories::with_prefix("semtrace");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/semtrace").join(service_name).join("config.toml"));
        paths
    }
}
