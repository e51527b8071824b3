//! Configuration loading, validation and env substitution.
//!
//! Config files: `gatehouse.toml`, `gatehouse.yaml`, or `gatehouse.json`
//! Searched in `./` then `~/.config/gatehouse/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod limits;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    limits::{
        resolve_agent_max_concurrent, resolve_cron_max_concurrent_runs,
        resolve_nested_max_concurrent, resolve_subagent_max_concurrent,
    },
    loader::{
        config_dir, discover_and_load, find_or_default_config_path, load_config,
        write_default_config,
    },
    schema::{
        AgentsConfig, ChatConfig, CronConfig, GatehouseConfig, LanesConfig, MaintenanceConfig,
        MetricsConfig, QueueConfig, QueueDedupe, QueueDropPolicy, QueueMode,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
