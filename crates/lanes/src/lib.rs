//! Lane scheduler.
//!
//! Work is grouped into named lanes. Each lane runs its tasks in FIFO order
//! with at most `max_concurrent` in flight. Every started task is bounded by
//! a hard timeout, so a hung task frees its slot instead of blocking the lane
//! forever. A reset bumps each lane's generation and forgets running tasks;
//! completions that arrive afterwards are ignored.

pub mod error;
pub mod lane;
mod scheduler;
mod state;
pub mod task;

pub use {
    error::{Error, Result},
    lane::{CommandLane, is_system_lane, normalize_lane, session_lane},
    scheduler::{
        CommandQueue, CommandQueueConfig, DEFAULT_LANE_IDLE_TTL, DEFAULT_MAX_LANES,
        DEFAULT_TASK_TIMEOUT, DEFAULT_WAIT_POLL_INTERVAL, DEFAULT_WARN_AFTER, DrainStatus,
    },
    state::{LaneSnapshot, LaneStats},
    task::{EnqueueOptions, OnWaitFn, TaskHandle, TaskId},
};
