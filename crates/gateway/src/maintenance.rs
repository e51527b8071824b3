//! Periodic housekeeping for lanes and followup queues.
//!
//! Nothing in the scheduling core schedules its own cleanup. The gateway
//! runs [`run_maintenance_sweep`] on a timer instead.

use std::{sync::Arc, time::Duration};

use {
    gatehouse_auto_reply::queue::FollowupQueues,
    gatehouse_common::parse_duration,
    gatehouse_config::MaintenanceConfig,
    gatehouse_lanes::CommandQueue,
    serde::Serialize,
    tokio::{task::JoinHandle, time::MissedTickBehavior},
    tracing::{debug, info},
};

use crate::{
    error::{Error, Result},
    gateway::Gateway,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckQueue {
    pub key: String,
    pub cleared: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub idle_lanes_removed: usize,
    pub lanes_evicted: usize,
    pub stuck_queues: Vec<StuckQueue>,
}

impl MaintenanceReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.idle_lanes_removed == 0 && self.lanes_evicted == 0 && self.stuck_queues.is_empty()
    }
}

/// Remove idle lanes, trim the lane count, and force-clear followup queues
/// stuck draining for longer than `stuck_after`.
pub fn run_maintenance_sweep(
    queue: &CommandQueue,
    followups: &FollowupQueues,
    stuck_after: Duration,
) -> MaintenanceReport {
    let idle_lanes_removed = queue.cleanup_idle_lanes();
    let lanes_evicted = queue.evict_excess_lanes();
    let stuck_queues = followups
        .keys()
        .into_iter()
        .filter_map(|key| {
            let cleared = followups.force_clear_stuck(&key, stuck_after);
            (cleared.count() > 0).then(|| StuckQueue {
                key,
                cleared: cleared.count(),
            })
        })
        .collect();

    let report = MaintenanceReport {
        idle_lanes_removed,
        lanes_evicted,
        stuck_queues,
    };
    if report.is_noop() {
        debug!("maintenance sweep: nothing to do");
    } else {
        info!(
            idle_lanes_removed = report.idle_lanes_removed,
            lanes_evicted = report.lanes_evicted,
            stuck_queues = report.stuck_queues.len(),
            "maintenance sweep"
        );
    }
    report
}

/// Sweep interval from config, or `None` when maintenance is disabled.
pub fn maintenance_interval(config: &MaintenanceConfig) -> Result<Option<Duration>> {
    if !config.enabled {
        return Ok(None);
    }
    let every = parse_duration(&config.every).map_err(|source| Error::InvalidInterval {
        value: config.every.clone(),
        source,
    })?;
    Ok(Some(every.max(Duration::from_secs(1))))
}

/// Run the sweep every `every` until the returned task is aborted. The first
/// sweep happens one interval after start.
pub fn spawn_maintenance(gateway: Arc<Gateway>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            gateway.maintenance_sweep();
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        gatehouse_auto_reply::queue::{
            FollowupDrainer, FollowupRun, QueueSettings, RunContext, run_followup_fn,
        },
        gatehouse_common::ManualClock,
        gatehouse_lanes::CommandQueueConfig,
    };

    fn item(prompt: &str) -> FollowupRun {
        FollowupRun::new(prompt, RunContext::default())
    }

    #[tokio::test]
    async fn sweep_removes_idle_lanes() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let queue = CommandQueue::with_config(
            CommandQueueConfig {
                lane_idle_ttl: Duration::from_secs(60),
                ..Default::default()
            },
            clock.clone(),
        );
        queue.enqueue("session:old", || async { Ok(()) }).await.unwrap();
        queue.set_concurrency("main", 2);
        clock.advance(Duration::from_secs(120));

        let report = run_maintenance_sweep(&queue, &FollowupQueues::new(clock), Duration::from_secs(60));
        assert_eq!(report.idle_lanes_removed, 1);
        assert!(queue.lane_snapshot("session:old").is_none());
        assert!(queue.lane_snapshot("main").is_some());
        assert!(report.stuck_queues.is_empty());
    }

    #[tokio::test]
    async fn sweep_clears_stuck_followup_queues() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let followups = FollowupQueues::new(clock.clone());
        let settings = QueueSettings::default();
        followups.enqueue_followup("stuck", item("a"), &settings);
        followups.enqueue_followup("healthy", item("b"), &settings);
        // Armed but never polled: the queue stays marked draining.
        let drainer = FollowupDrainer::new(followups.clone());
        let _handle = drainer.schedule_drain("stuck", run_followup_fn(|_| async { Ok(()) }));

        clock.advance(Duration::from_secs(300));
        let report = run_maintenance_sweep(&CommandQueue::new(), &followups, Duration::from_secs(60));

        assert_eq!(report.stuck_queues, vec![StuckQueue {
            key: "stuck".into(),
            cleared: 1,
        }]);
        assert_eq!(followups.keys(), vec!["healthy".to_string()]);
    }

    #[test]
    fn interval_from_config() {
        let mut config = MaintenanceConfig::default();
        assert_eq!(maintenance_interval(&config).unwrap(), Some(Duration::from_secs(60)));

        config.every = "250ms".into();
        assert_eq!(maintenance_interval(&config).unwrap(), Some(Duration::from_secs(1)));

        config.every = "soon".into();
        assert!(matches!(
            maintenance_interval(&config),
            Err(Error::InvalidInterval { .. })
        ));

        config.enabled = false;
        assert_eq!(maintenance_interval(&config).unwrap(), None);
    }
}
