/*!
Observability infrastructure for Docvault.

This module provides:
- Structured logging setup (`tracing-subscriber`, human-readable or JSON)
- Prometheus metrics for backups, recoveries and retention (feature `metrics`)

The engine calls the `record_*` hooks unconditionally; without the `metrics`
feature they do nothing.
*/

use crate::metadata::BackupKind;
use crate::{Result, VaultError};
use std::time::Duration;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

#[cfg(feature = "metrics")]
use prometheus::{
    core::Collector, Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

/// Default filter directive when `RUST_LOG` is unset
pub const DEFAULT_LOG_DIRECTIVE: &str = "docvault=info";

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<std::result::Result<VaultMetrics, String>> = OnceLock::new();

/// Metrics collection for Docvault operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct VaultMetrics {
    pub backups_total: CounterVec,
    pub backups_failed_total: CounterVec,
    pub backup_duration_seconds: Histogram,
    pub backup_size_bytes: Histogram,

    pub recoveries_total: Counter,
    pub recoveries_failed_total: Counter,
    pub documents_restored_total: Counter,

    pub retention_deleted_total: Counter,
    pub retention_failures_total: Counter,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
fn register<M: Collector + Clone + 'static>(registry: &Registry, metric: M) -> Result<M> {
    registry
        .register(Box::new(metric.clone()))
        .map_err(|e| VaultError::config(format!("Failed to register metric: {e}")))?;
    Ok(metric)
}

#[cfg(feature = "metrics")]
fn metric_error(e: prometheus::Error) -> VaultError {
    VaultError::config(format!("Failed to create metric: {e}"))
}

#[cfg(feature = "metrics")]
impl VaultMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let backups_total = register(
            &registry,
            CounterVec::new(
                Opts::new("docvault_backups_total", "Backups attempted, by kind"),
                &["kind"],
            )
            .map_err(metric_error)?,
        )?;
        let backups_failed_total = register(
            &registry,
            CounterVec::new(
                Opts::new("docvault_backups_failed_total", "Backups that failed, by kind"),
                &["kind"],
            )
            .map_err(metric_error)?,
        )?;
        let backup_duration_seconds = register(
            &registry,
            Histogram::with_opts(HistogramOpts::new(
                "docvault_backup_duration_seconds",
                "Duration of successful backups in seconds",
            ))
            .map_err(metric_error)?,
        )?;
        let backup_size_bytes = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("docvault_backup_size_bytes", "Stored size of snapshot blobs")
                    .buckets(prometheus::exponential_buckets(1024.0, 4.0, 10).map_err(metric_error)?),
            )
            .map_err(metric_error)?,
        )?;

        let recoveries_total = register(
            &registry,
            Counter::new("docvault_recoveries_total", "Recoveries attempted").map_err(metric_error)?,
        )?;
        let recoveries_failed_total = register(
            &registry,
            Counter::new("docvault_recoveries_failed_total", "Recoveries aborted before replay")
                .map_err(metric_error)?,
        )?;
        let documents_restored_total = register(
            &registry,
            Counter::new("docvault_documents_restored_total", "Documents written back by recoveries")
                .map_err(metric_error)?,
        )?;

        let retention_deleted_total = register(
            &registry,
            Counter::new("docvault_retention_deleted_total", "Backups deleted by retention")
                .map_err(metric_error)?,
        )?;
        let retention_failures_total = register(
            &registry,
            Counter::new(
                "docvault_retention_failures_total",
                "Expired backups whose blob could not be deleted",
            )
            .map_err(metric_error)?,
        )?;

        Ok(Self {
            backups_total,
            backups_failed_total,
            backup_duration_seconds,
            backup_size_bytes,
            recoveries_total,
            recoveries_failed_total,
            documents_restored_total,
            retention_deleted_total,
            retention_failures_total,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` if the metrics could not be created.
    pub fn global() -> Option<&'static VaultMetrics> {
        METRICS
            .get_or_init(|| Self::new().map_err(|e| e.to_string()))
            .as_ref()
            .ok()
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| VaultError::config(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| VaultError::config(format!("Failed to convert metrics to string: {e}")))
    }
}

pub(crate) fn record_backup(kind: BackupKind, success: bool, duration: Duration, size_bytes: u64) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = VaultMetrics::global() {
        metrics.backups_total.with_label_values(&[kind.as_str()]).inc();
        if success {
            metrics.backup_duration_seconds.observe(duration.as_secs_f64());
            metrics.backup_size_bytes.observe(size_bytes as f64);
        } else {
            metrics.backups_failed_total.with_label_values(&[kind.as_str()]).inc();
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (kind, success, duration, size_bytes);
}

pub(crate) fn record_recovery(aborted: bool, documents_restored: usize) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = VaultMetrics::global() {
        metrics.recoveries_total.inc();
        if aborted {
            metrics.recoveries_failed_total.inc();
        }
        metrics.documents_restored_total.inc_by(documents_restored as f64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (aborted, documents_restored);
}

pub(crate) fn record_retention(deleted: usize, failed: usize) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = VaultMetrics::global() {
        metrics.retention_deleted_total.inc_by(deleted as f64);
        metrics.retention_failures_total.inc_by(failed as f64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (deleted, failed);
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `default_directive`.
///
/// # Arguments
/// * `json` - Emit one JSON object per event instead of human-readable lines
/// * `default_directive` - Filter used when `RUST_LOG` is unset, e.g. `docvault=debug`
pub fn init_observability_with(json: bool, default_directive: &str) -> Result<()> {
    #[cfg(feature = "metrics")]
    VaultMetrics::global();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            VaultError::config(format!("Invalid log directive '{default_directive}': {e}"))
        })?,
    };

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_target(false));

    let subscriber = TracingRegistry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer);

    set_global_default(subscriber).map_err(|e| {
        VaultError::config(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Docvault observability initialized");
    Ok(())
}

/// Initialize observability with the default filter
pub fn init_observability(json: bool) -> Result<()> {
    init_observability_with(json, DEFAULT_LOG_DIRECTIVE)
}
