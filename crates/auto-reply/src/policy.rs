use {gatehouse_config::QueueMode, serde::Serialize};

/// What to do with a message that arrives for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveRunQueueAction {
    RunNow,
    EnqueueFollowup,
    Drop,
}

impl ActiveRunQueueAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunNow => "run-now",
            Self::EnqueueFollowup => "enqueue-followup",
            Self::Drop => "drop",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueDecisionInput {
    /// An agent run is in progress for the session.
    pub is_active: bool,
    pub has_queued_followups: bool,
    /// Low-priority periodic trigger rather than a user message.
    pub is_heartbeat: bool,
    pub should_followup: bool,
    pub queue_mode: QueueMode,
}

/// Decide between running now, queueing a followup, or dropping.
///
/// Heartbeats never pile up behind real work: while the session is busy
/// they are dropped.
#[must_use]
pub fn resolve_active_run_queue_action(input: &QueueDecisionInput) -> ActiveRunQueueAction {
    if !input.is_active && !input.has_queued_followups {
        return ActiveRunQueueAction::RunNow;
    }
    if input.is_heartbeat {
        return ActiveRunQueueAction::Drop;
    }
    if input.should_followup || input.queue_mode == QueueMode::Steer {
        return ActiveRunQueueAction::EnqueueFollowup;
    }
    ActiveRunQueueAction::RunNow
}
