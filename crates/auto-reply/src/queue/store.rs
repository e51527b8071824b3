//! Per-key followup queues.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use {
    gatehouse_common::{SharedClock, system_clock},
    gatehouse_config::{QueueDedupe, QueueMode},
    serde::Serialize,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use gatehouse_metrics::{counter, followup as followup_metrics, gauge, labels};

use crate::{
    error::Error,
    queue::{
        helpers::{QueueState, apply_queue_drop_policy},
        settings::QueueSettings,
        types::{FollowupRun, RunContext},
    },
};

/// One conversation's pending followups.
#[derive(Debug)]
pub(crate) struct FollowupQueue {
    /// Unique per store. A drain loop holding an older id knows its queue
    /// was cleared or replaced.
    pub id: u64,
    pub state: QueueState<FollowupRun>,
    pub mode: QueueMode,
    pub debounce_ms: u64,
    pub dedupe: QueueDedupe,
    pub draining: bool,
    pub last_enqueued_at_ms: u64,
    /// Last time the drain loop was armed or settled a delivery.
    pub drain_progress_at_ms: u64,
    pub last_run: Option<RunContext>,
    pub retry_count: u32,
}

impl FollowupQueue {
    fn new(id: u64, settings: &QueueSettings) -> Self {
        Self {
            id,
            state: QueueState::new(settings.cap, settings.drop_policy),
            mode: settings.mode,
            debounce_ms: settings.debounce_ms,
            dedupe: settings.dedupe,
            draining: false,
            last_enqueued_at_ms: 0,
            drain_progress_at_ms: 0,
            last_run: None,
            retry_count: 0,
        }
    }

    fn apply_settings(&mut self, settings: &QueueSettings) {
        self.mode = settings.mode;
        self.debounce_ms = settings.debounce_ms;
        self.dedupe = settings.dedupe;
        self.state.cap = settings.cap.max(1);
        self.state.drop_policy = settings.drop_policy;
    }

    fn is_duplicate(&self, run: &FollowupRun) -> bool {
        match self.dedupe {
            QueueDedupe::MessageId => run.message_id.as_ref().is_some_and(|id| {
                self.state
                    .items
                    .iter()
                    .any(|item| item.message_id.as_ref() == Some(id))
            }),
            QueueDedupe::Prompt => self.state.items.iter().any(|item| item.prompt == run.prompt),
            QueueDedupe::None => false,
        }
    }
}

/// Result of [`FollowupQueues::enqueue_followup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { depth: usize },
    /// Already queued under the same message id (or prompt).
    Duplicate,
    /// Rejected by the `new` drop policy.
    Dropped,
}

impl EnqueueOutcome {
    #[must_use]
    pub fn accepted(self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Per-key snapshot for debugging stuck messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDiagnostics {
    pub key: String,
    pub depth: usize,
    pub dropped_count: usize,
    pub draining: bool,
    pub retry_count: u32,
    pub last_enqueued_at: u64,
    pub mode: QueueMode,
}

/// Items removed by [`FollowupQueues::force_clear_stuck`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearedQueue {
    pub items: Vec<FollowupRun>,
    pub dropped_count: usize,
}

impl ClearedQueue {
    #[must_use]
    pub fn count(&self) -> usize {
        self.items.len() + self.dropped_count
    }
}

#[derive(Default)]
pub(crate) struct QueuesInner {
    pub queues: HashMap<String, FollowupQueue>,
    next_id: u64,
}

impl QueuesInner {
    /// The queue for `key`, only if it is still the instance `id`.
    pub fn current(&mut self, key: &str, id: u64) -> Option<&mut FollowupQueue> {
        self.queues.get_mut(key).filter(|q| q.id == id)
    }
}

/// Followup queues keyed by routing key. Cloning shares the same queues.
#[derive(Clone)]
pub struct FollowupQueues {
    inner: Arc<Mutex<QueuesInner>>,
    clock: SharedClock,
}

impl Default for FollowupQueues {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

impl FollowupQueues {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueuesInner::default())),
            clock,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, QueuesInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Queue a followup for `key`, creating the queue on first use and
    /// refreshing its settings from `settings`.
    pub fn enqueue_followup(
        &self,
        key: &str,
        mut run: FollowupRun,
        settings: &QueueSettings,
    ) -> EnqueueOutcome {
        let now_ms = self.now_ms();
        let outcome = {
            let mut inner = self.lock();
            let next_id = inner.next_id + 1;
            let queue = inner.queues.entry(key.to_string()).or_insert_with(|| {
                debug!(key, mode = %settings.mode, "followup queue created");
                FollowupQueue::new(next_id, settings)
            });
            let created = queue.id == next_id;
            queue.apply_settings(settings);

            let outcome = if queue.is_duplicate(&run) {
                EnqueueOutcome::Duplicate
            } else if !apply_queue_drop_policy(&mut queue.state, |item: &FollowupRun| {
                item.summary_line
                    .clone()
                    .unwrap_or_else(|| item.prompt.clone())
            }) {
                EnqueueOutcome::Dropped
            } else {
                run.enqueued_at_ms = now_ms;
                queue.last_enqueued_at_ms = now_ms;
                queue.last_run = Some(run.run.clone());
                queue.state.items.push_back(run);
                EnqueueOutcome::Queued {
                    depth: queue.state.items.len(),
                }
            };
            if created {
                inner.next_id = next_id;
            }
            outcome
        };

        match outcome {
            EnqueueOutcome::Queued { depth } => {
                debug!(key, depth, "followup queued");
                #[cfg(feature = "metrics")]
                {
                    counter!(followup_metrics::ENQUEUED_TOTAL, labels::MODE => settings.mode.as_str())
                        .increment(1);
                    gauge!(followup_metrics::QUEUE_DEPTH).set(self.total_depth() as f64);
                }
            },
            EnqueueOutcome::Duplicate => {
                debug!(key, "duplicate followup ignored");
                #[cfg(feature = "metrics")]
                counter!(followup_metrics::DEDUPED_TOTAL).increment(1);
            },
            EnqueueOutcome::Dropped => {
                debug!(key, cap = settings.cap, "followup queue full; message dropped");
                #[cfg(feature = "metrics")]
                counter!(followup_metrics::DROPPED_TOTAL, labels::POLICY => settings.drop_policy.as_str())
                    .increment(1);
            },
        }
        outcome
    }

    /// Items waiting in `key`'s queue. Items being delivered are not counted.
    pub fn depth(&self, key: &str) -> usize {
        self.lock()
            .queues
            .get(key)
            .map_or(0, |q| q.state.items.len())
    }

    pub fn total_depth(&self) -> usize {
        self.lock()
            .queues
            .values()
            .map(|q| q.state.items.len())
            .sum()
    }

    /// Whether `key` has queued items or a pending overflow summary.
    pub fn has_pending(&self, key: &str) -> bool {
        self.lock()
            .queues
            .get(key)
            .is_some_and(|q| !q.state.is_empty())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().queues.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Discard `key`'s queue. A running drain loop notices and stops.
    /// Returns items plus dropped count.
    pub fn clear(&self, key: &str) -> usize {
        let cleared = self
            .lock()
            .queues
            .remove(key)
            .map_or(0, |mut q| q.state.clear());
        if cleared > 0 {
            debug!(key, cleared, "followup queue cleared");
        }
        cleared
    }

    pub fn diagnostics(&self) -> Vec<QueueDiagnostics> {
        let mut out: Vec<QueueDiagnostics> = self
            .lock()
            .queues
            .iter()
            .map(|(key, q)| QueueDiagnostics {
                key: key.clone(),
                depth: q.state.items.len(),
                dropped_count: q.state.dropped_count,
                draining: q.draining,
                retry_count: q.retry_count,
                last_enqueued_at: q.last_enqueued_at_ms,
                mode: q.mode,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Discard `key`'s queue if it has been draining for longer than
    /// `max_draining` without progress, measured from the later of its last
    /// enqueue and the last drain arm or settled delivery. Returns what was
    /// removed; empty when the queue is healthy or absent.
    pub fn force_clear_stuck(&self, key: &str, max_draining: Duration) -> ClearedQueue {
        let now_ms = self.now_ms();
        let max_ms = u64::try_from(max_draining.as_millis()).unwrap_or(u64::MAX);
        let (cleared, draining_ms) = {
            let mut inner = self.lock();
            let Some(queue) = inner.queues.get(key) else {
                return ClearedQueue::default();
            };
            let since_ms = queue.last_enqueued_at_ms.max(queue.drain_progress_at_ms);
            let draining_ms = now_ms.saturating_sub(since_ms);
            if !queue.draining || since_ms == 0 || draining_ms <= max_ms {
                return ClearedQueue::default();
            }
            let Some(mut queue) = inner.queues.remove(key) else {
                return ClearedQueue::default();
            };
            let cleared = ClearedQueue {
                items: queue.state.items.drain(..).collect(),
                dropped_count: queue.state.dropped_count,
            };
            (cleared, draining_ms)
        };

        let err = Error::StuckDrain {
            key: key.to_string(),
            draining_ms,
            cleared: cleared.count(),
        };
        warn!(key, draining_ms, cleared = cleared.count(), error = %err, "force clearing stuck followup queue");
        #[cfg(feature = "metrics")]
        counter!(followup_metrics::STUCK_CLEARED_TOTAL).increment(1);
        cleared
    }
}
