//! Prometheus recorder for the stream metrics.
//!
//! `census-stream` records through the `metrics` facade. Installing the
//! recorder here makes those metrics collectable; [`render_metrics`] returns
//! them in the Prometheus text format for whatever endpoint the application
//! exposes.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether to install the recorder.
    pub enabled: bool,

    /// Histogram buckets for handler fan-out duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 1ms .. 10s
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

fn builder(config: &MetricsConfig) -> TelemetryResult<PrometheusBuilder> {
    let builder = PrometheusBuilder::new();
    if config.duration_buckets.is_empty() {
        return Ok(builder);
    }
    builder
        .set_buckets_for_metric(
            Matcher::Full(census_stream::metrics::HANDLER_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Installs the global Prometheus recorder and describes the stream metrics.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the buckets are invalid or a
/// recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let handle = builder(config)?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    census_stream::metrics::describe_metrics();

    Ok(())
}

/// Returns the global metrics handle if initialized.
pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

#[cfg(test)]
mod tests {
    use census_stream::metrics as stream;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.duration_buckets.len(), 12);
    }

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_stream_metrics_render() {
        let recorder = builder(&MetricsConfig::default()).unwrap().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            stream::describe_metrics();
            stream::record_reconnect();
            stream::record_reconnect();
            stream::record_duplicate("PlayerLogin");
        });

        let rendered = handle.render();
        assert!(rendered.contains("# TYPE census_stream_reconnects_total counter"));
        assert!(rendered.contains("census_stream_reconnects_total 2"));
        assert!(rendered
            .contains(r#"census_stream_duplicates_suppressed_total{payload_type="PlayerLogin"} 1"#));
    }
}
