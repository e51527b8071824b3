//! Effective concurrency limits derived from the config.

use crate::schema::GatehouseConfig;

pub const DEFAULT_AGENT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_SUBAGENT_MAX_CONCURRENT: usize = 8;
pub const DEFAULT_NESTED_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_CRON_MAX_CONCURRENT_RUNS: usize = 1;

fn at_least_one(value: Option<usize>, default: usize) -> usize {
    value.unwrap_or(default).max(1)
}

/// Limit for the `main` lane.
#[must_use]
pub fn resolve_agent_max_concurrent(config: &GatehouseConfig) -> usize {
    at_least_one(config.agents.max_concurrent, DEFAULT_AGENT_MAX_CONCURRENT)
}

/// Limit for the `subagent` lane.
#[must_use]
pub fn resolve_subagent_max_concurrent(config: &GatehouseConfig) -> usize {
    at_least_one(
        config.agents.subagents.max_concurrent,
        DEFAULT_SUBAGENT_MAX_CONCURRENT,
    )
}

/// Limit for the `nested` lane: `nested_max_concurrent`, then
/// `sessions.max_concurrent`.
#[must_use]
pub fn resolve_nested_max_concurrent(config: &GatehouseConfig) -> usize {
    at_least_one(
        config
            .agents
            .nested_max_concurrent
            .or(config.agents.sessions.max_concurrent),
        DEFAULT_NESTED_MAX_CONCURRENT,
    )
}

/// Limit for the `cron` lane.
#[must_use]
pub fn resolve_cron_max_concurrent_runs(config: &GatehouseConfig) -> usize {
    at_least_one(
        config.cron.max_concurrent_runs,
        DEFAULT_CRON_MAX_CONCURRENT_RUNS,
    )
}
