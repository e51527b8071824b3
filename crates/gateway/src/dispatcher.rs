//! Inbound dispatch.
//!
//! Every message for a session goes through [`Dispatcher::dispatch`], which
//! consults the queue policy and then either starts an agent run, parks the
//! message as a followup, or drops it. Runs execute on the session's own
//! lane (`session:<key>`, one at a time) and, nested inside that, on the
//! shared `main` lane that caps agent concurrency across sessions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use {
    gatehouse_auto_reply::{
        ActiveRunQueueAction, QueueDecisionInput,
        queue::{
            DrainHandle, EnqueueOutcome, FollowupDrainer, FollowupQueues, QueueSettings,
            RunFollowupFn, followup_lane, lane_dispatched, resolve_queue_settings,
            run_followup_fn,
        },
        resolve_active_run_queue_action,
    },
    gatehouse_config::{QueueConfig, QueueMode},
    gatehouse_lanes::{CommandLane, CommandQueue, Error as LaneError, TaskHandle, session_lane},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use gatehouse_metrics::{counter, dispatch as dispatch_metrics, histogram, labels};

use crate::runner::{AgentRequest, AgentRunner, InboundMessage};

// ── Active runs ─────────────────────────────────────────────────────────────

/// Sessions with an agent run started or in flight.
#[derive(Clone, Default)]
struct ActiveRuns(Arc<Mutex<HashMap<String, usize>>>);

impl ActiveRuns {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, session_key: &str) -> ActiveRunGuard {
        *self.lock().entry(session_key.to_string()).or_default() += 1;
        ActiveRunGuard {
            runs: self.clone(),
            session_key: session_key.to_string(),
        }
    }

    fn is_active(&self, session_key: &str) -> bool {
        self.lock().contains_key(session_key)
    }

    fn total(&self) -> usize {
        self.lock().values().sum()
    }
}

/// Marks a session active until dropped.
struct ActiveRunGuard {
    runs: ActiveRuns,
    session_key: String,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        let mut runs = self.runs.lock();
        if let Some(count) = runs.get_mut(&self.session_key) {
            *count -= 1;
            if *count == 0 {
                runs.remove(&self.session_key);
            }
        }
    }
}

// ── Outcome ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Heartbeat while the session was busy.
    Heartbeat,
    /// The followup queue is full and rejects new items.
    QueueFull,
}

/// What [`Dispatcher::dispatch`] did with a message.
pub enum DispatchOutcome {
    /// An agent run was scheduled; the handle resolves when it finishes.
    Started(TaskHandle<()>),
    /// Parked as a followup. `drain` is set when this message armed a new
    /// drain loop, which only happens while the session is idle; otherwise
    /// the drain starts when the active run ends.
    Queued {
        depth: usize,
        drain: Option<DrainHandle>,
    },
    /// Already queued under the same message id.
    Duplicate,
    Dropped(DropReason),
}

impl DispatchOutcome {
    #[must_use]
    pub fn action(&self) -> ActiveRunQueueAction {
        match self {
            Self::Started(_) => ActiveRunQueueAction::RunNow,
            Self::Queued { .. } | Self::Duplicate => ActiveRunQueueAction::EnqueueFollowup,
            Self::Dropped(_) => ActiveRunQueueAction::Drop,
        }
    }
}

impl std::fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started(handle) => f.debug_tuple("Started").field(&handle.lane()).finish(),
            Self::Queued { depth, drain } => f
                .debug_struct("Queued")
                .field("depth", depth)
                .field("armed", &drain.is_some())
                .finish(),
            Self::Duplicate => f.write_str("Duplicate"),
            Self::Dropped(reason) => f.debug_tuple("Dropped").field(reason).finish(),
        }
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────────────

/// Routes inbound messages to agent runs. Cloning shares all state.
#[derive(Clone)]
pub struct Dispatcher {
    queue: CommandQueue,
    drainer: FollowupDrainer,
    runner: Arc<dyn AgentRunner>,
    queue_config: Arc<QueueConfig>,
    active: ActiveRuns,
}

impl Dispatcher {
    pub fn new(
        queue: CommandQueue,
        followups: FollowupQueues,
        runner: Arc<dyn AgentRunner>,
        queue_config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            drainer: FollowupDrainer::new(followups),
            runner,
            queue_config: Arc::new(queue_config),
            active: ActiveRuns::default(),
        }
    }

    pub fn followups(&self) -> &FollowupQueues {
        self.drainer.queues()
    }

    pub fn is_active(&self, session_key: &str) -> bool {
        self.active.is_active(session_key)
    }

    /// Runs scheduled or in flight, across sessions.
    pub fn active_runs(&self) -> usize {
        self.active.total()
    }

    /// Effective queue settings for a message.
    pub fn queue_settings(&self, message: &InboundMessage) -> QueueSettings {
        resolve_queue_settings(
            &self.queue_config,
            message.origin.channel.as_deref(),
            &message.overrides,
        )
    }

    /// Decide what to do with `message` and do it. Must be called from
    /// within a tokio runtime.
    pub fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        let settings = self.queue_settings(&message);
        let key = message.session_key.as_str();
        let input = QueueDecisionInput {
            is_active: self.active.is_active(key),
            has_queued_followups: self.followups().has_pending(key),
            is_heartbeat: message.is_heartbeat,
            should_followup: matches!(settings.mode, QueueMode::Followup | QueueMode::Collect),
            queue_mode: settings.mode,
        };
        let action = resolve_active_run_queue_action(&input);
        debug!(
            session_key = key,
            action = action.as_str(),
            mode = %settings.mode,
            is_active = input.is_active,
            has_queued = input.has_queued_followups,
            "dispatching inbound message"
        );
        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::MESSAGES_TOTAL, labels::ACTION => action.as_str()).increment(1);

        match action {
            ActiveRunQueueAction::RunNow => DispatchOutcome::Started(self.run_now(message)),
            ActiveRunQueueAction::EnqueueFollowup => self.enqueue_followup(message, &settings),
            ActiveRunQueueAction::Drop => {
                info!(session_key = key, "heartbeat dropped; session busy");
                DispatchOutcome::Dropped(DropReason::Heartbeat)
            },
        }
    }

    fn run_now(&self, message: InboundMessage) -> TaskHandle<()> {
        let request = AgentRequest::direct(&message);
        let session_key = message.session_key.clone();
        let guard = self.active.begin(&session_key);
        let this = self.clone();
        self.queue
            .enqueue(session_lane(&session_key), move || async move {
                let result = this.run_on_main(request).await;
                // Followups that arrived during the run start draining only
                // once the session is idle again.
                drop(guard);
                this.arm_drain(&session_key);
                result
            })
    }

    /// Start draining `session_key`'s followups unless the session is busy
    /// or a drain loop is already running.
    fn arm_drain(&self, session_key: &str) -> Option<DrainHandle> {
        if self.active.is_active(session_key) || !self.followups().has_pending(session_key) {
            return None;
        }
        self.drainer
            .schedule_drain(session_key, self.followup_runner(session_key))
    }

    fn enqueue_followup(&self, message: InboundMessage, settings: &QueueSettings) -> DispatchOutcome {
        let key = message.session_key.clone();
        match self
            .followups()
            .enqueue_followup(&key, message.into_followup(), settings)
        {
            EnqueueOutcome::Queued { depth } => {
                // A busy session arms its drain when the run ends; checked
                // after the enqueue so a run finishing concurrently is seen.
                let drain = self.arm_drain(&key);
                DispatchOutcome::Queued { depth, drain }
            },
            EnqueueOutcome::Duplicate => DispatchOutcome::Duplicate,
            EnqueueOutcome::Dropped => {
                warn!(session_key = %key, cap = settings.cap, "followup queue full; message dropped");
                DispatchOutcome::Dropped(DropReason::QueueFull)
            },
        }
    }

    /// Drain callback: each delivery runs on the followup's session lane,
    /// then on `main`. The session counts as active while it runs, so new
    /// messages queue behind the drain loop already in progress.
    fn followup_runner(&self, session_key: &str) -> RunFollowupFn {
        let this = self.clone();
        let session_key = session_key.to_string();
        let deliver = run_followup_fn(move |item| {
            let this = this.clone();
            let request = AgentRequest::from_followup(&session_key, item);
            async move {
                let _guard = this.active.begin(&request.session_key);
                this.run_on_main(request).await
            }
        });
        lane_dispatched(self.queue.clone(), followup_lane, deliver)
    }

    async fn run_on_main(&self, request: AgentRequest) -> anyhow::Result<()> {
        let runner = Arc::clone(&self.runner);
        let session_key = request.session_key.clone();
        let followup = request.followup;
        let started = Instant::now();

        let result = self
            .queue
            .enqueue(CommandLane::Main, move || async move { runner.run(request).await })
            .await
            .map_err(LaneError::into_anyhow);

        #[cfg(feature = "metrics")]
        histogram!(dispatch_metrics::RUN_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        match &result {
            Ok(()) => debug!(
                session_key = %session_key,
                followup,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "agent run finished"
            ),
            Err(err) => {
                warn!(session_key = %session_key, followup, error = %err, "agent run failed");
                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::RUN_FAILURES_TOTAL).increment(1);
            },
        }
        result
    }
}
