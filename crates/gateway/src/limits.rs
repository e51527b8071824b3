//! Lane limits from config.

use std::time::Duration;

use {
    gatehouse_common::SharedClock,
    gatehouse_config::{
        GatehouseConfig, LanesConfig, resolve_agent_max_concurrent,
        resolve_cron_max_concurrent_runs, resolve_nested_max_concurrent,
        resolve_subagent_max_concurrent,
    },
    gatehouse_lanes::{CommandLane, CommandQueue, CommandQueueConfig, DEFAULT_WAIT_POLL_INTERVAL},
    serde::Serialize,
    tracing::info,
};

/// Concurrency applied to each system lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneLimits {
    pub main: usize,
    pub cron: usize,
    pub subagent: usize,
    pub nested: usize,
}

impl LaneLimits {
    #[must_use]
    pub fn from_config(config: &GatehouseConfig) -> Self {
        Self {
            main: resolve_agent_max_concurrent(config),
            cron: resolve_cron_max_concurrent_runs(config),
            subagent: resolve_subagent_max_concurrent(config),
            nested: resolve_nested_max_concurrent(config),
        }
    }
}

/// Scheduler settings from the `[lanes]` table.
#[must_use]
pub fn command_queue_config(lanes: &LanesConfig) -> CommandQueueConfig {
    CommandQueueConfig {
        task_timeout: Duration::from_secs(lanes.task_timeout_secs),
        lane_idle_ttl: Duration::from_secs(lanes.idle_ttl_secs),
        max_lanes: lanes.max_lanes,
        default_warn_after: Duration::from_millis(lanes.warn_after_ms),
        wait_poll_interval: DEFAULT_WAIT_POLL_INTERVAL,
    }
}

/// Build a scheduler for `config` with its system lane limits applied.
pub fn build_command_queue(config: &GatehouseConfig, clock: SharedClock) -> CommandQueue {
    let queue = CommandQueue::with_config(command_queue_config(&config.lanes), clock);
    apply_gateway_lane_concurrency(config, &queue);
    queue
}

/// Set the concurrency of the four system lanes from config. Safe to call
/// again after a config reload.
pub fn apply_gateway_lane_concurrency(config: &GatehouseConfig, queue: &CommandQueue) -> LaneLimits {
    let limits = LaneLimits::from_config(config);
    queue.set_concurrency(CommandLane::Cron, limits.cron);
    queue.set_concurrency(CommandLane::Main, limits.main);
    queue.set_concurrency(CommandLane::Subagent, limits.subagent);
    queue.set_concurrency(CommandLane::Nested, limits.nested);
    info!(
        main = limits.main,
        cron = limits.cron,
        subagent = limits.subagent,
        nested = limits.nested,
        "lane concurrency applied"
    );
    limits
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, gatehouse_common::system_clock, rstest::rstest};

    #[test]
    fn defaults_apply_to_system_lanes() {
        let queue = CommandQueue::new();
        let limits = apply_gateway_lane_concurrency(&GatehouseConfig::default(), &queue);
        assert_eq!(limits, LaneLimits {
            main: 4,
            cron: 1,
            subagent: 8,
            nested: 4,
        });
        for lane in CommandLane::ALL {
            assert!(queue.lane_snapshot(lane).unwrap().system);
        }
        assert_eq!(queue.lane_snapshot("subagent").unwrap().max_concurrent, 8);
    }

    #[test]
    fn configured_values_and_clamping() {
        let mut config = GatehouseConfig::default();
        config.agents.max_concurrent = Some(2);
        config.agents.sessions.max_concurrent = Some(6);
        config.cron.max_concurrent_runs = Some(0);

        let queue = build_command_queue(&config, system_clock());
        assert_eq!(queue.lane_snapshot("main").unwrap().max_concurrent, 2);
        assert_eq!(queue.lane_snapshot("nested").unwrap().max_concurrent, 6);
        assert_eq!(queue.lane_snapshot("cron").unwrap().max_concurrent, 1);
    }

    #[test]
    fn lanes_table_maps_to_scheduler_config() {
        let lanes = LanesConfig {
            task_timeout_secs: 5,
            idle_ttl_secs: 60,
            max_lanes: 10,
            warn_after_ms: 100,
        };
        let cfg = command_queue_config(&lanes);
        assert_eq!(cfg.task_timeout, Duration::from_secs(5));
        assert_eq!(cfg.lane_idle_ttl, Duration::from_secs(60));
        assert_eq!(cfg.max_lanes, 10);
        assert_eq!(cfg.default_warn_after, Duration::from_millis(100));
    }

    #[rstest]
    #[case(None, None, 4)]
    #[case(None, Some(6), 6)]
    #[case(Some(3), Some(6), 3)]
    #[case(Some(0), None, 1)]
    fn nested_limit_precedence(
        #[case] nested: Option<usize>,
        #[case] sessions: Option<usize>,
        #[case] expected: usize,
    ) {
        let mut config = GatehouseConfig::default();
        config.agents.nested_max_concurrent = nested;
        config.agents.sessions.max_concurrent = sessions;
        assert_eq!(LaneLimits::from_config(&config).nested, expected);
    }
}
