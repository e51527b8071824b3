//! Admission control for inbound messages.
//!
//! A message that arrives while its session is busy is either dropped,
//! run anyway, or parked in a per-session followup queue (see
//! [`resolve_active_run_queue_action`]). Parked messages are delivered later
//! by a drain loop that debounces, batches and retries them.

pub mod error;
pub mod policy;
pub mod queue;

pub use {
    error::{Error, Result},
    policy::{ActiveRunQueueAction, QueueDecisionInput, resolve_active_run_queue_action},
};
