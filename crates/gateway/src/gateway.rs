use std::{sync::Arc, time::Duration};

use {
    gatehouse_auto_reply::queue::{FollowupQueues, QueueDiagnostics},
    gatehouse_common::{SharedClock, system_clock},
    gatehouse_config::GatehouseConfig,
    gatehouse_lanes::{CommandQueue, LaneSnapshot, LaneStats},
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{
    dispatcher::{DispatchOutcome, Dispatcher},
    limits::{LaneLimits, apply_gateway_lane_concurrency, build_command_queue},
    maintenance::{MaintenanceReport, run_maintenance_sweep},
    runner::{AgentRunner, InboundMessage},
};

/// Queue state for status endpoints and debugging.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub lanes: LaneStats,
    pub lane_snapshots: Vec<LaneSnapshot>,
    /// Queued plus running lane tasks.
    pub lane_tasks: usize,
    pub active_runs: usize,
    pub followups: Vec<QueueDiagnostics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    /// Every task running at shutdown finished within the grace period.
    pub drained: bool,
    /// Followups still queued and now abandoned.
    pub abandoned_followups: usize,
}

/// The scheduling core assembled from config: one lane scheduler, one
/// followup store, one dispatcher.
pub struct Gateway {
    config: GatehouseConfig,
    queue: CommandQueue,
    dispatcher: Dispatcher,
    limits: LaneLimits,
}

impl Gateway {
    pub fn new(config: GatehouseConfig, runner: Arc<dyn AgentRunner>) -> Self {
        Self::with_clock(config, runner, system_clock())
    }

    pub fn with_clock(config: GatehouseConfig, runner: Arc<dyn AgentRunner>, clock: SharedClock) -> Self {
        let queue = build_command_queue(&config, Arc::clone(&clock));
        let limits = LaneLimits::from_config(&config);
        let followups = FollowupQueues::new(clock);
        let dispatcher = Dispatcher::new(
            queue.clone(),
            followups,
            runner,
            config.chat.queue.clone(),
        );
        Self {
            config,
            queue,
            dispatcher,
            limits,
        }
    }

    pub fn config(&self) -> &GatehouseConfig {
        &self.config
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn followups(&self) -> &FollowupQueues {
        self.dispatcher.followups()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn limits(&self) -> LaneLimits {
        self.limits
    }

    pub fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        self.dispatcher.dispatch(message)
    }

    /// Re-apply lane limits, e.g. after the config file changed.
    pub fn apply_lane_limits(&mut self, config: &GatehouseConfig) -> LaneLimits {
        self.limits = apply_gateway_lane_concurrency(config, &self.queue);
        self.limits
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            lanes: self.queue.lane_stats(),
            lane_snapshots: self.queue.lane_snapshots(),
            lane_tasks: self.queue.total_queue_size(),
            active_runs: self.dispatcher.active_runs(),
            followups: self.followups().diagnostics(),
        }
    }

    pub fn maintenance_sweep(&self) -> MaintenanceReport {
        run_maintenance_sweep(
            &self.queue,
            self.followups(),
            Duration::from_secs(self.config.maintenance.stuck_queue_secs),
        )
    }

    /// Wait up to `grace` for running lane tasks. Queued followups are not
    /// delivered.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        info!(
            grace_ms = grace.as_millis() as u64,
            active = self.queue.active_task_count(),
            "gateway shutting down"
        );
        let status = self.queue.wait_for_active_tasks(grace).await;
        let abandoned_followups = self.followups().total_depth();
        if abandoned_followups > 0 {
            warn!(abandoned_followups, "followups still queued at shutdown");
        }
        if !status.drained {
            warn!("shutdown grace period elapsed with tasks still running");
        }
        ShutdownReport {
            drained: status.drained,
            abandoned_followups,
        }
    }
}
