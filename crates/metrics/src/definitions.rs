//! Metric name and label definitions.
//!
//! Every metric the scheduling core emits is named here so dashboards and the
//! code agree on one spelling.

/// Command lane scheduler metrics
pub mod lanes {
    /// Total number of tasks enqueued on any lane
    pub const TASKS_ENQUEUED_TOTAL: &str = "gatehouse_lane_tasks_enqueued_total";
    /// Total number of tasks that started executing
    pub const TASKS_STARTED_TOTAL: &str = "gatehouse_lane_tasks_started_total";
    /// Total number of tasks that finished (success or failure)
    pub const TASKS_COMPLETED_TOTAL: &str = "gatehouse_lane_tasks_completed_total";
    /// Total number of tasks whose own work returned an error
    pub const TASK_ERRORS_TOTAL: &str = "gatehouse_lane_task_errors_total";
    /// Total number of tasks released by the hard timeout
    pub const TASK_TIMEOUTS_TOTAL: &str = "gatehouse_lane_task_timeouts_total";
    /// Total number of queued tasks rejected by a lane clear
    pub const TASKS_CLEARED_TOTAL: &str = "gatehouse_lane_tasks_cleared_total";
    /// Completions ignored because the lane was reset after the task started
    pub const STALE_COMPLETIONS_TOTAL: &str = "gatehouse_lane_stale_completions_total";
    /// Time a task spent queued before it started, in seconds
    pub const WAIT_DURATION_SECONDS: &str = "gatehouse_lane_wait_duration_seconds";
    /// Task execution time, in seconds
    pub const TASK_DURATION_SECONDS: &str = "gatehouse_lane_task_duration_seconds";
    /// Queued plus active tasks per lane
    pub const QUEUE_DEPTH: &str = "gatehouse_lane_queue_depth";
    /// Number of lanes currently registered
    pub const REGISTERED: &str = "gatehouse_lanes_registered";
    /// Number of lane resets performed
    pub const RESETS_TOTAL: &str = "gatehouse_lane_resets_total";
    /// Idle lanes removed by TTL cleanup or eviction
    pub const LANES_REMOVED_TOTAL: &str = "gatehouse_lanes_removed_total";
}

/// Followup queue and drain engine metrics
pub mod followup {
    /// Total number of followups accepted into a queue
    pub const ENQUEUED_TOTAL: &str = "gatehouse_followup_enqueued_total";
    /// Followups rejected or evicted by the drop policy
    pub const DROPPED_TOTAL: &str = "gatehouse_followup_dropped_total";
    /// Followups skipped as duplicates
    pub const DEDUPED_TOTAL: &str = "gatehouse_followup_deduped_total";
    /// Callback invocations made by the drain engine
    pub const DELIVERIES_TOTAL: &str = "gatehouse_followup_deliveries_total";
    /// Callback invocations that failed
    pub const DELIVERY_FAILURES_TOTAL: &str = "gatehouse_followup_delivery_failures_total";
    /// Queues discarded after exhausting retries
    pub const RETRIES_EXHAUSTED_TOTAL: &str = "gatehouse_followup_retries_exhausted_total";
    /// Drain cycles stopped by the wall-clock ceiling
    pub const DRAIN_TIMEOUTS_TOTAL: &str = "gatehouse_followup_drain_timeouts_total";
    /// Queues force-cleared while stuck draining
    pub const STUCK_CLEARED_TOTAL: &str = "gatehouse_followup_stuck_cleared_total";
    /// Items per queue at enqueue time
    pub const QUEUE_DEPTH: &str = "gatehouse_followup_queue_depth";
}

/// Inbound dispatch metrics
pub mod dispatch {
    /// Inbound messages evaluated by the queue policy
    pub const MESSAGES_TOTAL: &str = "gatehouse_dispatch_messages_total";
    /// Agent runs that failed
    pub const RUN_FAILURES_TOTAL: &str = "gatehouse_dispatch_run_failures_total";
    /// End-to-end agent run duration, in seconds
    pub const RUN_DURATION_SECONDS: &str = "gatehouse_dispatch_run_duration_seconds";
}

/// Common label keys
pub mod labels {
    pub const LANE: &str = "lane";
    pub const CHANNEL: &str = "channel";
    pub const MODE: &str = "mode";
    pub const POLICY: &str = "policy";
    pub const ACTION: &str = "action";
    pub const REASON: &str = "reason";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Lane wait buckets (in seconds)
    /// Covers 1ms to 10 minutes
    pub static LANE_WAIT: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 15.0, 30.0, 60.0, 300.0, 600.0,
        ]
    });

    /// Task / agent run duration buckets (in seconds)
    /// Covers 10ms to 10 minutes (the hard task ceiling)
    pub static TASK_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ]
    });

    /// Queue size buckets
    /// Covers 1 to 10000
    pub static QUEUE_SIZE: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 10000.0,
        ]
    });
}
