pub mod drain;
pub mod helpers;
pub mod lane;
pub mod settings;
pub mod store;
pub mod types;

pub use {
    drain::{
        COLLECT_TITLE, DrainConfig, DrainEnd, DrainHandle, DrainReport, FollowupDrainer,
        MAX_DRAIN_RETRIES, RunFollowupFn, run_followup_fn,
    },
    lane::{followup_lane, lane_dispatched},
    settings::{QueueOverrides, QueueSettings, resolve_queue_settings},
    store::{ClearedQueue, EnqueueOutcome, FollowupQueues, QueueDiagnostics},
    types::{FollowupRun, OriginRoute, RunContext, is_routable_channel},
};
