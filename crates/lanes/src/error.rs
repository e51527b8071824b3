use thiserror::Error;

use crate::task::TaskId;

#[derive(Debug, Error)]
pub enum Error {
    /// The task was still queued when its lane was cleared.
    #[error("command lane \"{lane}\" was cleared before the task started")]
    LaneCleared { lane: String },

    /// The task outlived the hard per-task ceiling. Its work may still be
    /// running; the scheduler no longer observes it.
    #[error("task {task_id} in lane \"{lane}\" timed out after {timeout_ms}ms")]
    LaneTimeout {
        lane: String,
        task_id: TaskId,
        timeout_ms: u64,
    },

    /// The task panicked or its settlement was dropped.
    #[error("task in lane \"{lane}\" aborted: {reason}")]
    TaskAborted { lane: String, reason: String },

    /// The task's own failure, passed through unchanged.
    #[error(transparent)]
    Task(anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn lane_cleared(lane: impl Into<String>) -> Self {
        Self::LaneCleared { lane: lane.into() }
    }

    #[must_use]
    pub fn aborted(lane: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskAborted {
            lane: lane.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_lane_cleared(&self) -> bool {
        matches!(self, Self::LaneCleared { .. })
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::LaneTimeout { .. })
    }

    /// The task's own error as is; scheduler failures wrapped.
    #[must_use]
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            Self::Task(err) => err,
            other => anyhow::Error::new(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
