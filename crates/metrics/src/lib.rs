//! Metrics for the gatehouse scheduling core.
//!
//! All crates record through the `metrics` facade macros re-exported here.
//! With no recorder installed the macros are no-ops. When the `prometheus`
//! feature is enabled, [`init_metrics`] installs a Prometheus recorder whose
//! handle renders the text exposition format.
//!
//! ```rust,ignore
//! use gatehouse_metrics::{counter, labels, lanes};
//!
//! counter!(lanes::TASKS_STARTED_TOTAL, labels::LANE => "main").increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
