//! Metrics recorder initialization.

use {
    crate::error::{Error, Result},
    tracing::info,
};

/// Handle to the installed recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    ///
    /// Without the `prometheus` feature this is always empty.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle.render()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,
    /// Global labels to add to all metrics
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system.
///
/// Call once at startup. With the `prometheus` feature this installs the
/// Prometheus recorder globally; otherwise the facade macros stay no-ops.
///
/// # Errors
///
/// Returns an error if a global label key is not a valid Prometheus label
/// name, or if the recorder cannot be installed (for example when a
/// recorder is already installed).
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    for (key, _) in &config.global_labels {
        check_label_key(key)?;
    }

    if !config.enabled {
        info!("metrics collection is disabled");
        #[cfg(feature = "prometheus")]
        {
            let handle = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
            return Ok(MetricsHandle {
                prometheus_handle: handle.handle(),
            });
        }
        #[cfg(not(feature = "prometheus"))]
        return Ok(MetricsHandle {});
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        info!("prometheus metrics recorder installed");
        Ok(MetricsHandle {
            prometheus_handle: handle,
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        let _ = config;
        info!("metrics feature not enabled at compile time");
        Ok(MetricsHandle {})
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use {
        crate::buckets,
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(crate::lanes::WAIT_DURATION_SECONDS.to_string()),
            &buckets::LANE_WAIT,
        )
        .map_err(|source| Error::Buckets {
            metric: crate::lanes::WAIT_DURATION_SECONDS,
            source,
        })?
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            &buckets::TASK_DURATION,
        )
        .map_err(|source| Error::Buckets {
            metric: "*_duration_seconds",
            source,
        })?
        .set_buckets_for_metric(Matcher::Suffix("_depth".to_string()), &buckets::QUEUE_SIZE)
        .map_err(|source| Error::Buckets {
            metric: "*_depth",
            source,
        })?;

    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    // Installs globally without spawning an HTTP listener; the handle renders
    // on demand.
    builder.install_recorder().map_err(Error::Install)
}

/// Prometheus label names: `[a-zA-Z_][a-zA-Z0-9_]*`, with `__` reserved.
fn check_label_key(key: &str) -> Result<()> {
    let invalid = |reason: &'static str| {
        Err(Error::InvalidGlobalLabel {
            key: key.to_string(),
            reason,
        })
    };
    let mut chars = key.chars();
    match chars.next() {
        None => return invalid("empty"),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return invalid("must start with a letter or underscore");
        },
        Some(_) => {},
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return invalid("only letters, digits and underscores are allowed");
    }
    if key.starts_with("__") {
        return invalid("the __ prefix is reserved");
    }
    Ok(())
}
