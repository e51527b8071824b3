//! The command queue: named lanes, each a FIFO with a concurrency cap.

use std::{
    collections::HashSet,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    gatehouse_common::{SharedClock, system_clock},
    tokio::time::Instant,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use gatehouse_metrics::{counter, gauge, histogram, labels, lanes as lane_metrics};

use crate::{
    error::Error,
    lane::{CommandLane, is_probe_lane, normalize_lane},
    state::{LaneRegistry, LaneSnapshot, LaneStats},
    task::{self, EnqueueOptions, QueueEntry, Settlement, StartTicket, TaskHandle, TaskId},
};

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_LANE_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_LANES: usize = 1000;
pub const DEFAULT_WARN_AFTER: Duration = Duration::from_millis(2_000);
pub const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Entries claimed by one pump pass, with the queue depth left behind each.
type ReadyBatch = Vec<(QueueEntry, StartTicket, usize)>;

#[derive(Debug, Clone)]
pub struct CommandQueueConfig {
    /// Hard ceiling on a single task's run time.
    pub task_timeout: Duration,
    /// Idle non-system lanes older than this are removed by cleanup.
    pub lane_idle_ttl: Duration,
    /// Eviction trims idle lanes down to this count.
    pub max_lanes: usize,
    /// Wait time after which a dequeue logs a warning.
    pub default_warn_after: Duration,
    pub wait_poll_interval: Duration,
}

impl Default for CommandQueueConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            lane_idle_ttl: DEFAULT_LANE_IDLE_TTL,
            max_lanes: DEFAULT_MAX_LANES,
            default_warn_after: DEFAULT_WARN_AFTER,
            wait_poll_interval: DEFAULT_WAIT_POLL_INTERVAL,
        }
    }
}

/// Result of [`CommandQueue::wait_for_active_tasks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainStatus {
    pub drained: bool,
}

struct Shared {
    lanes: Mutex<LaneRegistry>,
    next_task_id: AtomicU64,
    clock: SharedClock,
    config: CommandQueueConfig,
}

/// Process-wide lane scheduler. Cloning shares the same lanes.
#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<Shared>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("config", &self.shared.config)
            .field("lanes", &self.lock().len())
            .finish()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::with_config(CommandQueueConfig::default(), system_clock())
    }

    pub fn with_config(config: CommandQueueConfig, clock: SharedClock) -> Self {
        Self {
            shared: Arc::new(Shared {
                lanes: Mutex::new(LaneRegistry::default()),
                next_task_id: AtomicU64::new(1),
                clock,
                config,
            }),
        }
    }

    pub fn config(&self) -> &CommandQueueConfig {
        &self.shared.config
    }

    fn lock(&self) -> MutexGuard<'_, LaneRegistry> {
        self.shared
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    // ── Configuration ───────────────────────────────────────────────────────

    /// Set a lane's concurrency cap, creating the lane if needed. Values
    /// below one are clamped to one. Raising the cap starts queued work.
    pub fn set_concurrency(&self, lane: impl AsRef<str>, max_concurrent: usize) {
        let lane = normalize_lane(lane.as_ref()).to_string();
        let max_concurrent = max_concurrent.max(1);
        {
            let now_ms = self.now_ms();
            let mut lanes = self.lock();
            lanes.get_or_create(&lane, now_ms).max_concurrent = max_concurrent;
            #[cfg(feature = "metrics")]
            gauge!(lane_metrics::REGISTERED).set(lanes.len() as f64);
        }
        debug!(lane = %lane, max_concurrent, "lane concurrency set");
        self.pump(&lane);
    }

    // ── Enqueue ─────────────────────────────────────────────────────────────

    /// Append a task to a lane. The entry is queued before this returns.
    pub fn enqueue<T, F, Fut>(&self, lane: impl AsRef<str>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.enqueue_with(lane, task, EnqueueOptions::default())
    }

    pub fn enqueue_main<T, F, Fut>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.enqueue(CommandLane::Main, task)
    }

    pub fn enqueue_with<T, F, Fut>(
        &self,
        lane: impl AsRef<str>,
        task: F,
        options: EnqueueOptions,
    ) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let lane = normalize_lane(lane.as_ref()).to_string();
        let (pending, handle) = task::pending(&lane, task);
        let entry = QueueEntry {
            task: pending,
            enqueued_at: Instant::now(),
            warn_after: options
                .warn_after
                .unwrap_or(self.shared.config.default_warn_after),
            on_wait: options.on_wait,
        };

        let (queued, active) = {
            let now_ms = self.now_ms();
            let mut lanes = self.lock();
            let state = lanes.get_or_create(&lane, now_ms);
            state.queue.push_back(entry);
            state.last_activity_at_ms = now_ms;
            (state.queue.len(), state.active())
        };
        debug!(lane = %lane, queued, active, "lane enqueue");
        #[cfg(feature = "metrics")]
        {
            let label = metric_lane(&lane);
            counter!(lane_metrics::TASKS_ENQUEUED_TOTAL, labels::LANE => label.clone())
                .increment(1);
            gauge!(lane_metrics::QUEUE_DEPTH, labels::LANE => label).set(queued as f64);
        }

        self.pump(&lane);
        handle
    }

    // ── Pump and completion ─────────────────────────────────────────────────

    /// Start queued entries while the lane has free slots. Slots are taken
    /// under the lock; callbacks and task starts happen after it is released.
    ///
    /// One call owns the lane's pump at a time. A call that finds the pump
    /// owned returns at once; the owner re-checks the lane after each batch
    /// of starts, so work enqueued from inside a start is picked up in order.
    fn pump(&self, lane: &str) {
        let mut owner = false;
        loop {
            let ready = self.take_ready(lane, &mut owner);
            if ready.is_empty() {
                return;
            }
            self.start_ready(ready);
        }
    }

    /// Claim free slots for the next batch. Returns an empty batch (and
    /// gives up ownership) when there is nothing to start.
    fn take_ready(&self, lane: &str, owner: &mut bool) -> ReadyBatch {
        let mut ready = Vec::new();
        let now_ms = self.now_ms();
        let mut lanes = self.lock();
        let Some(state) = lanes.get_mut(lane) else {
            return ready;
        };
        if !*owner {
            if state.pumping {
                return ready;
            }
            state.pumping = true;
            *owner = true;
        }
        while state.has_capacity() {
            let Some(entry) = state.queue.pop_front() else {
                break;
            };
            let task_id = self.shared.next_task_id.fetch_add(1, Ordering::Relaxed);
            state.active_task_ids.insert(task_id);
            state.last_activity_at_ms = now_ms;
            let ticket = StartTicket {
                lane: state.lane.clone(),
                task_id,
                generation: state.generation,
                timeout: self.shared.config.task_timeout,
                queue: self.clone(),
            };
            ready.push((entry, ticket, state.queue.len()));
        }
        if ready.is_empty() {
            state.pumping = false;
        }
        ready
    }

    fn start_ready(&self, ready: ReadyBatch) {
        for (entry, ticket, queued_ahead) in ready {
            let waited = entry.enqueued_at.elapsed();
            if waited >= entry.warn_after {
                warn!(
                    lane = %ticket.lane,
                    waited_ms = waited.as_millis() as u64,
                    queued_ahead,
                    "lane wait exceeded"
                );
                if let Some(on_wait) = entry.on_wait {
                    on_wait(waited, queued_ahead);
                }
            }
            debug!(
                lane = %ticket.lane,
                task_id = ticket.task_id,
                waited_ms = waited.as_millis() as u64,
                queued_ahead,
                "lane dequeue"
            );
            #[cfg(feature = "metrics")]
            {
                let label = metric_lane(&ticket.lane);
                counter!(lane_metrics::TASKS_STARTED_TOTAL, labels::LANE => label.clone())
                    .increment(1);
                histogram!(lane_metrics::WAIT_DURATION_SECONDS, labels::LANE => label.clone())
                    .record(waited.as_secs_f64());
                gauge!(lane_metrics::QUEUE_DEPTH, labels::LANE => label).set(queued_ahead as f64);
            }
            entry.task.start(ticket);
        }
    }

    /// Release a slot when the task's generation is still current, then pump.
    pub(crate) fn finish(&self, ticket: &StartTicket, settlement: Settlement, elapsed: Duration) {
        let released = {
            let now_ms = self.now_ms();
            let mut lanes = self.lock();
            match lanes.get_mut(&ticket.lane) {
                Some(state) if state.generation == ticket.generation => {
                    state.active_task_ids.remove(&ticket.task_id);
                    state.last_activity_at_ms = now_ms;
                    true
                },
                _ => false,
            }
        };

        let lane = ticket.lane.as_str();
        let duration_ms = elapsed.as_millis() as u64;
        match &settlement {
            Settlement::Succeeded => {
                debug!(lane, task_id = ticket.task_id, duration_ms, "lane task done");
            },
            Settlement::Failed(err) if is_probe_lane(lane) => {
                debug!(lane, task_id = ticket.task_id, duration_ms, error = %err, "lane task error");
            },
            Settlement::Failed(err) => {
                error!(lane, task_id = ticket.task_id, duration_ms, error = %err, "lane task error");
            },
            Settlement::Aborted(reason) => {
                error!(lane, task_id = ticket.task_id, reason = %reason, "lane task aborted");
            },
            Settlement::TimedOut => {
                error!(
                    lane,
                    task_id = ticket.task_id,
                    timeout_ms = ticket.timeout.as_millis() as u64,
                    "lane task timed out; releasing its slot"
                );
            },
        }

        #[cfg(feature = "metrics")]
        {
            let label = metric_lane(lane);
            let name = match settlement {
                Settlement::Succeeded => lane_metrics::TASKS_COMPLETED_TOTAL,
                Settlement::Failed(_) | Settlement::Aborted(_) => lane_metrics::TASK_ERRORS_TOTAL,
                Settlement::TimedOut => lane_metrics::TASK_TIMEOUTS_TOTAL,
            };
            counter!(name, labels::LANE => label.clone()).increment(1);
            histogram!(lane_metrics::TASK_DURATION_SECONDS, labels::LANE => label)
                .record(elapsed.as_secs_f64());
        }

        if !released {
            debug!(
                lane,
                task_id = ticket.task_id,
                generation = ticket.generation,
                "ignoring completion from before a lane reset"
            );
            #[cfg(feature = "metrics")]
            counter!(lane_metrics::STALE_COMPLETIONS_TOTAL, labels::LANE => metric_lane(lane))
                .increment(1);
            return;
        }
        self.pump(lane);
    }

    // ── Clearing and reset ──────────────────────────────────────────────────

    /// Reject every queued entry in a lane. Running tasks are untouched.
    /// Returns the number of entries removed.
    pub fn clear_lane(&self, lane: impl AsRef<str>) -> usize {
        let lane = normalize_lane(lane.as_ref());
        let removed: Vec<QueueEntry> = {
            let mut lanes = self.lock();
            match lanes.get_mut(lane) {
                Some(state) => state.queue.drain(..).collect(),
                None => return 0,
            }
        };
        let count = removed.len();
        for entry in removed {
            entry.task.reject(Error::lane_cleared(lane));
        }
        if count > 0 {
            info!(lane, removed = count, "lane cleared");
            #[cfg(feature = "metrics")]
            {
                counter!(lane_metrics::TASKS_CLEARED_TOTAL, labels::LANE => metric_lane(lane))
                    .increment(count as u64);
                gauge!(lane_metrics::QUEUE_DEPTH, labels::LANE => metric_lane(lane)).set(0.0);
            }
        }
        count
    }

    /// Forget all running tasks after an in-process restart. Every lane's
    /// generation is bumped and its active set emptied; queued entries are
    /// kept and start immediately. Completions from the old generation are
    /// ignored.
    pub fn reset_all(&self) {
        let (to_pump, total) = {
            let mut lanes = self.lock();
            let mut to_pump = Vec::new();
            for state in lanes.iter_mut() {
                state.generation += 1;
                state.active_task_ids.clear();
                state.pumping = false;
                if !state.queue.is_empty() {
                    to_pump.push(state.lane.clone());
                }
            }
            (to_pump, lanes.len())
        };
        info!(lanes = total, with_queued = to_pump.len(), "command lanes reset");
        #[cfg(feature = "metrics")]
        counter!(lane_metrics::RESETS_TOTAL).increment(1);
        for lane in to_pump {
            self.pump(&lane);
        }
    }

    // ── Waiting ─────────────────────────────────────────────────────────────

    /// Wait until every task active at call time has completed. Tasks that
    /// start later are not waited for.
    pub async fn wait_for_active_tasks(&self, timeout: Duration) -> DrainStatus {
        let deadline = Instant::now() + timeout;
        let tracked: HashSet<TaskId> = {
            let lanes = self.lock();
            lanes
                .iter()
                .flat_map(|s| s.active_task_ids.iter().copied())
                .collect()
        };
        if tracked.is_empty() {
            return DrainStatus { drained: true };
        }
        debug!(tasks = tracked.len(), "waiting for active lane tasks");

        loop {
            let pending = {
                let lanes = self.lock();
                lanes
                    .iter()
                    .flat_map(|s| s.active_task_ids.iter())
                    .filter(|id| tracked.contains(id))
                    .count()
            };
            if pending == 0 {
                return DrainStatus { drained: true };
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(pending, "timed out waiting for active lane tasks");
                return DrainStatus { drained: false };
            }
            let nap = self
                .shared
                .config
                .wait_poll_interval
                .min(deadline.saturating_duration_since(now));
            tokio::time::sleep(nap).await;
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Queued plus active entries in one lane; zero for unknown lanes.
    pub fn queue_size(&self, lane: impl AsRef<str>) -> usize {
        let lane = normalize_lane(lane.as_ref());
        self.lock()
            .get(lane)
            .map_or(0, |s| s.queue.len() + s.active())
    }

    pub fn total_queue_size(&self) -> usize {
        self.lock()
            .iter()
            .map(|s| s.queue.len() + s.active())
            .sum()
    }

    pub fn active_task_count(&self) -> usize {
        self.lock().iter().map(|s| s.active()).sum()
    }

    pub fn lane_snapshot(&self, lane: impl AsRef<str>) -> Option<LaneSnapshot> {
        let lane = normalize_lane(lane.as_ref());
        self.lock().get(lane).map(|s| s.snapshot())
    }

    /// All lanes, sorted by name.
    pub fn lane_snapshots(&self) -> Vec<LaneSnapshot> {
        let mut snapshots: Vec<LaneSnapshot> = self.lock().iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.lane.cmp(&b.lane));
        snapshots
    }

    pub fn lane_stats(&self) -> LaneStats {
        self.lock().stats()
    }

    // ── Maintenance ─────────────────────────────────────────────────────────

    /// Remove a non-system lane if it has nothing queued or running.
    pub fn remove_lane(&self, lane: impl AsRef<str>) -> bool {
        let lane = normalize_lane(lane.as_ref());
        let removed = self.lock().remove_if_idle(lane);
        if removed {
            debug!(lane, "lane removed");
            #[cfg(feature = "metrics")]
            counter!(lane_metrics::LANES_REMOVED_TOTAL, labels::REASON => "explicit").increment(1);
        }
        removed
    }

    /// Remove idle non-system lanes untouched for longer than the idle TTL.
    pub fn cleanup_idle_lanes(&self) -> usize {
        let now_ms = self.now_ms();
        let ttl_ms = self.shared.config.lane_idle_ttl.as_millis() as u64;
        let (removed, remaining) = {
            let mut lanes = self.lock();
            let removed = lanes.remove_stale(now_ms, ttl_ms);
            (removed, lanes.len())
        };
        if !removed.is_empty() {
            info!(removed = removed.len(), remaining, "idle lanes cleaned up");
            #[cfg(feature = "metrics")]
            {
                counter!(lane_metrics::LANES_REMOVED_TOTAL, labels::REASON => "idle")
                    .increment(removed.len() as u64);
                gauge!(lane_metrics::REGISTERED).set(remaining as f64);
            }
        }
        removed.len()
    }

    /// Evict least recently active idle lanes above the lane limit.
    pub fn evict_excess_lanes(&self) -> usize {
        let max_lanes = self.shared.config.max_lanes;
        let (evicted, remaining) = {
            let mut lanes = self.lock();
            let evicted = lanes.evict_excess(max_lanes);
            (evicted, lanes.len())
        };
        if !evicted.is_empty() {
            warn!(
                evicted = evicted.len(),
                remaining, max_lanes, "lane count over limit; evicted idle lanes"
            );
            #[cfg(feature = "metrics")]
            {
                counter!(lane_metrics::LANES_REMOVED_TOTAL, labels::REASON => "evicted")
                    .increment(evicted.len() as u64);
                gauge!(lane_metrics::REGISTERED).set(remaining as f64);
            }
        }
        evicted.len()
    }
}

/// Collapse per-session lanes into one label value.
#[cfg(feature = "metrics")]
fn metric_lane(lane: &str) -> String {
    match lane.split_once(':') {
        Some((prefix, _)) => prefix.to_string(),
        None => lane.to_string(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use {
        super::*,
        gatehouse_common::ManualClock,
        tokio::sync::oneshot,
    };

    fn queue_with(config: CommandQueueConfig) -> (CommandQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (CommandQueue::with_config(config, clock.clone()), clock)
    }

    /// A task that blocks until the returned sender fires.
    fn gated(value: u32) -> (oneshot::Sender<()>, impl FnOnce() -> GatedFut + Send + 'static) {
        let (tx, rx) = oneshot::channel::<()>();
        (tx, move || {
            Box::pin(async move {
                let _ = rx.await;
                Ok(value)
            }) as GatedFut
        })
    }

    type GatedFut = std::pin::Pin<Box<dyn Future<Output = anyhow::Result<u32>> + Send>>;

    #[tokio::test]
    async fn runs_task_and_returns_value() {
        let queue = CommandQueue::new();
        let value = queue.enqueue_main(|| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(queue.queue_size("main"), 0);
    }

    #[tokio::test]
    async fn task_error_passes_through() {
        let queue = CommandQueue::new();
        let err = queue
            .enqueue::<(), _, _>("cron", || async { Err(anyhow::anyhow!("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Task(_)));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(queue.active_task_count(), 0);
    }

    #[tokio::test]
    async fn blank_lane_is_main() {
        let queue = CommandQueue::new();
        let (release, task) = gated(1);
        let handle = queue.enqueue("   ", task);
        assert_eq!(handle.lane(), "main");
        assert_eq!(queue.queue_size("main"), 1);
        release.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_cap() {
        let queue = CommandQueue::new();
        queue.set_concurrency("main", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                queue.enqueue_main(move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        assert_eq!(queue.lane_snapshot("main").unwrap().active, 2);
        assert_eq!(queue.queue_size("main"), 6);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.total_queue_size(), 0);
    }

    #[tokio::test]
    async fn tasks_start_in_enqueue_order() {
        for concurrency in [1, 3] {
            let queue = CommandQueue::new();
            queue.set_concurrency("session:a", concurrency);
            let order = Arc::new(Mutex::new(Vec::new()));
            let handles: Vec<_> = (0..5)
                .map(|i| {
                    let order = Arc::clone(&order);
                    queue.enqueue("session:a", move || {
                        order.lock().unwrap().push(i);
                        async move { Ok(i) }
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }
            assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        }
    }

    #[tokio::test]
    async fn enqueue_from_inside_a_start_keeps_lane_order() {
        let queue = CommandQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release, blocker) = gated(0);
        let blocker = queue.enqueue("work", blocker);

        let nested = queue.clone();
        let order_a = Arc::clone(&order);
        let order_x = Arc::clone(&order);
        let inner = Arc::new(Mutex::new(None));
        let inner_slot = Arc::clone(&inner);
        let a = queue.enqueue("work", move || {
            order_a.lock().unwrap().push("a");
            let x = nested.enqueue("work", move || {
                order_x.lock().unwrap().push("x");
                async { Ok(()) }
            });
            *inner_slot.lock().unwrap() = Some(x);
            async { Ok(()) }
        });
        let order_b = Arc::clone(&order);
        let b = queue.enqueue("work", move || {
            order_b.lock().unwrap().push("b");
            async { Ok(()) }
        });

        // Room for the blocker, a, b and one more: x must still start after b.
        queue.set_concurrency("work", 4);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "x"]);

        a.await.unwrap();
        b.await.unwrap();
        let x = inner.lock().unwrap().take().unwrap();
        x.await.unwrap();
        release.send(()).unwrap();
        assert_eq!(blocker.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_releases_a_held_pump() {
        let queue = CommandQueue::new();
        let (release, blocker) = gated(1);
        let blocker = queue.enqueue("work", blocker);
        queue
            .lock()
            .get_mut("work")
            .expect("lane exists")
            .pumping = true;

        let queued = queue.enqueue("work", || async { Ok(2) });
        assert_eq!(queue.queue_size("work"), 2);

        queue.reset_all();
        assert_eq!(queued.await.unwrap(), 2);
        release.send(()).unwrap();
        assert_eq!(blocker.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn raising_concurrency_starts_queued_work() {
        let queue = CommandQueue::new();
        let (release_a, a) = gated(1);
        let (release_b, b) = gated(2);
        let ha = queue.enqueue("subagent", a);
        let hb = queue.enqueue("subagent", b);
        assert_eq!(queue.lane_snapshot("subagent").unwrap().active, 1);

        queue.set_concurrency("subagent", 2);
        assert_eq!(queue.lane_snapshot("subagent").unwrap().active, 2);

        release_a.send(()).unwrap();
        release_b.send(()).unwrap();
        assert_eq!(ha.await.unwrap(), 1);
        assert_eq!(hb.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn zero_concurrency_clamps_to_one() {
        let queue = CommandQueue::new();
        queue.set_concurrency("nested", 0);
        assert_eq!(queue.lane_snapshot("nested").unwrap().max_concurrent, 1);
    }

    #[tokio::test]
    async fn clear_lane_rejects_only_queued_entries() {
        let queue = CommandQueue::new();
        let (release, running) = gated(1);
        let running = queue.enqueue_main(running);
        let queued_a = queue.enqueue_main(|| async { Ok(2) });
        let queued_b = queue.enqueue_main(|| async { Ok(3) });

        assert_eq!(queue.clear_lane("main"), 2);
        assert!(queued_a.await.unwrap_err().is_lane_cleared());
        assert!(queued_b.await.unwrap_err().is_lane_cleared());
        assert_eq!(queue.active_task_count(), 1);

        release.send(()).unwrap();
        assert_eq!(running.await.unwrap(), 1);
        assert_eq!(queue.clear_lane("main"), 0);
        assert_eq!(queue.clear_lane("never-created"), 0);
    }

    #[tokio::test]
    async fn reset_ignores_completions_from_old_generation() {
        let queue = CommandQueue::new();
        let (release_old, old) = gated(1);
        let old = queue.enqueue_main(old);
        assert_eq!(queue.active_task_count(), 1);

        queue.reset_all();
        let snap = queue.lane_snapshot("main").unwrap();
        assert_eq!(snap.active, 0);
        assert_eq!(snap.generation, 1);

        let (release_new, new) = gated(2);
        let new = queue.enqueue_main(new);
        let third = queue.enqueue_main(|| async { Ok(3) });
        assert_eq!(queue.lane_snapshot("main").unwrap().active, 1);

        // The old task still settles its caller but must not free the slot
        // now held by the new one.
        release_old.send(()).unwrap();
        assert_eq!(old.await.unwrap(), 1);
        let snap = queue.lane_snapshot("main").unwrap();
        assert_eq!(snap.active, 1);
        assert_eq!(snap.queued, 1);

        release_new.send(()).unwrap();
        assert_eq!(new.await.unwrap(), 2);
        assert_eq!(third.await.unwrap(), 3);
        assert_eq!(queue.total_queue_size(), 0);
    }

    #[tokio::test]
    async fn reset_starts_queued_entries() {
        let queue = CommandQueue::new();
        let (_hold, stuck) = gated(1);
        let _stuck = queue.enqueue_main(stuck);
        let waiting = queue.enqueue_main(|| async { Ok(2) });
        assert_eq!(queue.lane_snapshot("main").unwrap().queued, 1);

        queue.reset_all();
        assert_eq!(waiting.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_settles_caller_and_frees_slot() {
        let (queue, _clock) = queue_with(CommandQueueConfig {
            task_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        let hung = queue.enqueue_main(|| std::future::pending::<anyhow::Result<()>>());
        let next = queue.enqueue_main(|| async { Ok("next") });

        let err = hung.await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, Error::LaneTimeout { timeout_ms: 50, .. }));
        assert_eq!(next.await.unwrap(), "next");
        assert_eq!(queue.active_task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_finish_after_timeout_is_not_observed() {
        let (queue, _clock) = queue_with(CommandQueueConfig {
            task_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        let runs = Arc::new(AtomicUsize::new(0));
        let slow = queue.enqueue_main(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });
        let counted = {
            let runs = Arc::clone(&runs);
            queue.enqueue_main(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        assert!(slow.await.unwrap_err().is_timeout());
        counted.await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.active_task_count(), 0);
        assert_eq!(queue.queue_size("main"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn on_wait_fires_after_threshold() {
        let queue = CommandQueue::new();
        let (release, blocker) = gated(1);
        let blocker = queue.enqueue_main(blocker);
        let seen = Arc::new(Mutex::new(None));
        let waiter = {
            let seen = Arc::clone(&seen);
            queue.enqueue_with(
                "main",
                || async { Ok(2) },
                EnqueueOptions::default()
                    .warn_after(Duration::from_millis(10))
                    .on_wait(move |waited, ahead| {
                        *seen.lock().unwrap() = Some((waited, ahead));
                    }),
            )
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        release.send(()).unwrap();
        blocker.await.unwrap();
        waiter.await.unwrap();

        let (waited, ahead) = seen.lock().unwrap().unwrap();
        assert!(waited >= Duration::from_millis(10));
        assert_eq!(ahead, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn on_wait_skipped_for_fast_starts() {
        let queue = CommandQueue::new();
        let called = Arc::new(AtomicUsize::new(0));
        let handle = {
            let called = Arc::clone(&called);
            queue.enqueue_with(
                "main",
                || async { Ok(()) },
                EnqueueOptions::default().on_wait(move |_, _| {
                    called.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        handle.await.unwrap();
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ignores_tasks_started_later() {
        let queue = CommandQueue::new();
        queue.set_concurrency("main", 2);
        let (release, first) = gated(1);
        let first = queue.enqueue_main(first);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_active_tasks(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        let (_hold, later) = gated(2);
        let _later = queue.enqueue_main(later);

        release.send(()).unwrap();
        first.await.unwrap();
        let status = waiter.await.unwrap();
        assert!(status.drained);
        assert_eq!(queue.active_task_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_on_hung_task() {
        let queue = CommandQueue::new();
        let (_hold, hung) = gated(1);
        let _hung = queue.enqueue_main(hung);
        let status = queue.wait_for_active_tasks(Duration::from_secs(1)).await;
        assert!(!status.drained);
    }

    #[tokio::test]
    async fn wait_with_nothing_active_is_drained() {
        let queue = CommandQueue::new();
        assert!(queue.wait_for_active_tasks(Duration::ZERO).await.drained);
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_idle_lanes() {
        let (queue, clock) = queue_with(CommandQueueConfig::default());
        queue.set_concurrency("main", 1);
        queue.set_concurrency("session:old", 1);
        let (_hold, busy) = gated(1);
        let _busy = queue.enqueue("session:busy", busy);

        clock.advance(Duration::from_secs(31 * 60));
        queue.set_concurrency("session:fresh", 1);

        assert_eq!(queue.cleanup_idle_lanes(), 1);
        assert!(queue.lane_snapshot("session:old").is_none());
        assert!(queue.lane_snapshot("main").is_some());
        assert!(queue.lane_snapshot("session:busy").is_some());
        assert!(queue.lane_snapshot("session:fresh").is_some());
    }

    #[tokio::test]
    async fn eviction_trims_oldest_idle_lanes() {
        let (queue, clock) = queue_with(CommandQueueConfig {
            max_lanes: 3,
            ..Default::default()
        });
        for lane in ["main", "session:a", "session:b", "session:c", "session:d"] {
            queue.set_concurrency(lane, 1);
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(queue.evict_excess_lanes(), 2);
        let lanes: Vec<String> = queue.lane_snapshots().into_iter().map(|s| s.lane).collect();
        assert_eq!(lanes, vec!["main", "session:c", "session:d"]);
        assert_eq!(queue.evict_excess_lanes(), 0);
    }

    #[tokio::test]
    async fn remove_lane_rules() {
        let queue = CommandQueue::new();
        queue.set_concurrency("cron", 1);
        queue.set_concurrency("session:idle", 1);
        let (release, busy) = gated(1);
        let busy = queue.enqueue("session:busy", busy);

        assert!(!queue.remove_lane("cron"));
        assert!(!queue.remove_lane("session:busy"));
        assert!(queue.remove_lane("session:idle"));
        assert!(!queue.remove_lane("session:missing"));

        release.send(()).unwrap();
        busy.await.unwrap();
    }

    #[tokio::test]
    async fn stats_and_sizes() {
        let queue = CommandQueue::new();
        queue.set_concurrency("cron", 1);
        let (release, busy) = gated(1);
        let busy = queue.enqueue("session:x", busy);
        let queued = queue.enqueue("session:x", || async { Ok(2) });

        assert_eq!(queue.queue_size("session:x"), 2);
        assert_eq!(queue.queue_size("unknown"), 0);
        assert_eq!(queue.total_queue_size(), 2);
        assert_eq!(queue.lane_stats(), LaneStats {
            total_lanes: 2,
            idle_lanes: 1,
            busy_lanes: 1,
            system_lanes: 1,
        });

        release.send(()).unwrap();
        busy.await.unwrap();
        queued.await.unwrap();
        assert_eq!(queue.lane_stats().busy_lanes, 0);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let queue = CommandQueue::new();
        queue.set_concurrency("main", 4);
        let json = serde_json::to_value(queue.lane_snapshot("main").unwrap()).unwrap();
        assert_eq!(json["maxConcurrent"], 4);
        assert_eq!(json["system"], true);
    }
}
