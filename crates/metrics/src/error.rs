#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid global metric label \"{key}\": {reason}")]
    InvalidGlobalLabel { key: String, reason: &'static str },

    #[cfg(feature = "prometheus")]
    #[error("histogram buckets for {metric}")]
    Buckets {
        metric: &'static str,
        #[source]
        source: metrics_exporter_prometheus::BuildError,
    },

    #[cfg(feature = "prometheus")]
    #[error("failed to install prometheus recorder")]
    Install(#[source] metrics_exporter_prometheus::BuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
