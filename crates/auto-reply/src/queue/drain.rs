//! Followup drain engine.
//!
//! One drain loop runs per queue key. Each cycle waits out the debounce
//! window, then hands queued items to the injected runner according to the
//! queue mode. Items are taken out of the queue before the runner is awaited
//! and put back at the front if it fails, so arrivals during the run never
//! interleave with the batch in flight.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use {
    futures::future::{BoxFuture, FutureExt},
    gatehouse_config::QueueMode,
    tokio::{task::JoinHandle, time::Instant},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use gatehouse_metrics::{counter, followup as followup_metrics, gauge};

use crate::{
    error::Error,
    queue::{
        helpers::{
            DestinationKey, build_collect_prompt, clear_queue_summary_state, debounce_remaining,
            has_cross_channel_items, preview_queue_summary_prompt,
        },
        store::{FollowupQueue, FollowupQueues},
        types::{FollowupRun, OriginRoute, RunContext, is_routable_channel},
    },
};

pub const MAX_DRAIN_RETRIES: u32 = 3;
pub const DRAIN_CYCLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const COLLECT_TITLE: &str = "[Queued messages while agent was busy]";

/// Delivers one (possibly merged) followup to the agent.
pub type RunFollowupFn =
    Arc<dyn Fn(FollowupRun) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`RunFollowupFn`].
pub fn run_followup_fn<F, Fut>(f: F) -> RunFollowupFn
where
    F: Fn(FollowupRun) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |item| f(item).boxed())
}

#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Consecutive failures after which a queue is discarded.
    pub max_retries: u32,
    /// Wall-clock ceiling for one drain cycle.
    pub cycle_timeout: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_DRAIN_RETRIES,
            cycle_timeout: DRAIN_CYCLE_TIMEOUT,
        }
    }
}

/// How a drain loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainEnd {
    /// Everything was delivered.
    Exhausted,
    /// The runner kept failing; remaining items were discarded.
    RetriesExhausted { discarded: usize },
    /// The queue was cleared or replaced while the loop ran.
    Cleared,
    /// The loop task panicked or was cancelled.
    Aborted,
}

#[derive(Debug)]
pub struct DrainReport {
    pub key: String,
    /// Successful runner invocations.
    pub delivered: usize,
    pub cycles: u32,
    pub failures: Vec<Error>,
    pub end: DrainEnd,
}

impl DrainReport {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            delivered: 0,
            cycles: 0,
            failures: Vec::new(),
            end: DrainEnd::Exhausted,
        }
    }
}

/// Resolves with the loop's report once the queue goes idle.
#[must_use = "the loop runs regardless; await the handle to observe its report"]
pub struct DrainHandle {
    key: String,
    join: JoinHandle<DrainReport>,
}

impl DrainHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Future for DrainHandle {
    type Output = DrainReport;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.join).poll(cx) {
            Poll::Ready(Ok(report)) => Poll::Ready(report),
            Poll::Ready(Err(_)) => {
                let mut report = DrainReport::new(&this.key);
                report.end = DrainEnd::Aborted;
                Poll::Ready(report)
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

enum CycleEnd {
    Idle,
    Gone,
    Paused,
    Failed(anyhow::Error),
}

/// Work taken out of a queue for one runner call.
struct Delivery {
    run: FollowupRun,
    /// Restored to the front of the queue on failure.
    taken: Vec<FollowupRun>,
    /// Previewed summary as (dropped count, lines), consumed on success.
    summary: Option<(usize, usize)>,
}

impl Delivery {
    fn single(item: FollowupRun) -> Self {
        Self {
            run: item.clone(),
            taken: vec![item],
            summary: None,
        }
    }
}

enum Step {
    Deliver(Delivery),
    Idle,
    Gone,
}

/// Routing identity of a followup for collect-mode batching.
fn destination_key(item: &FollowupRun) -> DestinationKey {
    let origin = &item.origin;
    if origin.is_empty() {
        return DestinationKey::Unkeyed;
    }
    let (Some(channel), Some(to)) = (origin.channel.as_deref(), origin.to.as_deref()) else {
        return DestinationKey::Cross;
    };
    if !is_routable_channel(Some(channel)) || to.is_empty() {
        return DestinationKey::Cross;
    }
    DestinationKey::Key(
        [
            channel,
            to,
            origin.account_id.as_deref().unwrap_or(""),
            origin.thread_id.as_deref().unwrap_or(""),
        ]
        .join("|"),
    )
}

/// First present value of each route field across the batch.
fn merged_origin(items: &[FollowupRun]) -> OriginRoute {
    OriginRoute {
        channel: items.iter().find_map(|i| i.origin.channel.clone()),
        to: items.iter().find_map(|i| i.origin.to.clone()),
        account_id: items.iter().find_map(|i| i.origin.account_id.clone()),
        thread_id: items.iter().find_map(|i| i.origin.thread_id.clone()),
    }
}

fn render_queued(item: &FollowupRun, idx: usize) -> String {
    format!("---\nQueued #{}\n{}", idx + 1, item.prompt)
        .trim()
        .to_string()
}

fn synthetic(prompt: String, run: RunContext, origin: OriginRoute, now_ms: u64) -> FollowupRun {
    FollowupRun {
        prompt,
        message_id: None,
        summary_line: None,
        enqueued_at_ms: now_ms,
        origin,
        run,
    }
}

fn summary_taken(queue: &FollowupQueue) -> (usize, usize) {
    (queue.state.dropped_count, queue.state.summary_lines.len())
}

/// Decide the next runner call for a queue and take its items out.
fn plan_step(queue: &mut FollowupQueue, force_individual: &mut bool, now_ms: u64) -> Step {
    if queue.state.is_empty() {
        return Step::Idle;
    }

    if queue.mode == QueueMode::Collect {
        if !*force_individual && has_cross_channel_items(&queue.state.items, destination_key) {
            // Stays on for the rest of this cycle.
            *force_individual = true;
        }
        if *force_individual {
            if let Some(item) = queue.state.items.pop_front() {
                return Step::Deliver(Delivery::single(item));
            }
        }

        let summary = preview_queue_summary_prompt(&queue.state, "message");
        let taken_summary = summary.as_ref().map(|_| summary_taken(queue));
        let items: Vec<FollowupRun> = queue.state.items.drain(..).collect();
        let Some(run) = items
            .last()
            .map(|i| i.run.clone())
            .or_else(|| queue.last_run.clone())
        else {
            warn!(mode = %queue.mode, "overflow summary has no run context; discarding it");
            clear_queue_summary_state(&mut queue.state);
            return Step::Idle;
        };
        let prompt = build_collect_prompt(COLLECT_TITLE, &items, summary.as_deref(), render_queued);
        return Step::Deliver(Delivery {
            run: synthetic(prompt, run, merged_origin(&items), now_ms),
            taken: items,
            summary: taken_summary,
        });
    }

    if let Some(prompt) = preview_queue_summary_prompt(&queue.state, "message") {
        match queue.last_run.clone() {
            Some(run) => {
                return Step::Deliver(Delivery {
                    run: synthetic(prompt, run, OriginRoute::default(), now_ms),
                    taken: Vec::new(),
                    summary: Some(summary_taken(queue)),
                });
            },
            None => {
                warn!(mode = %queue.mode, "overflow summary has no run context; discarding it");
                clear_queue_summary_state(&mut queue.state);
            },
        }
    }

    match queue.state.items.pop_front() {
        Some(item) => Step::Deliver(Delivery::single(item)),
        None => Step::Idle,
    }
}

/// Arms and runs drain loops over a [`FollowupQueues`] store.
#[derive(Clone)]
pub struct FollowupDrainer {
    queues: FollowupQueues,
    config: DrainConfig,
}

impl FollowupDrainer {
    pub fn new(queues: FollowupQueues) -> Self {
        Self::with_config(queues, DrainConfig::default())
    }

    pub fn with_config(queues: FollowupQueues, config: DrainConfig) -> Self {
        Self { queues, config }
    }

    pub fn queues(&self) -> &FollowupQueues {
        &self.queues
    }

    /// Start a drain loop for `key` unless one is already running or the
    /// key has no queue.
    pub fn schedule_drain(&self, key: &str, run_followup: RunFollowupFn) -> Option<DrainHandle> {
        let now_ms = self.queues.now_ms();
        let id = {
            let mut inner = self.queues.lock();
            let queue = inner.queues.get_mut(key)?;
            if queue.draining {
                return None;
            }
            queue.draining = true;
            queue.drain_progress_at_ms = now_ms;
            queue.id
        };
        debug!(key, "followup drain armed");
        let drainer = self.clone();
        let owned_key = key.to_string();
        let join = tokio::spawn(async move { drainer.drain_loop(owned_key, id, run_followup).await });
        Some(DrainHandle {
            key: key.to_string(),
            join,
        })
    }

    async fn drain_loop(self, key: String, id: u64, run: RunFollowupFn) -> DrainReport {
        let mut report = DrainReport::new(&key);
        loop {
            report.cycles += 1;
            let end = self.drain_cycle(&key, id, &run, &mut report).await;
            if matches!(end, CycleEnd::Paused) {
                tokio::task::yield_now().await;
            }

            let now_ms = self.queues.now_ms();
            let mut failure = None;
            let mut exhausted = None;
            let finished = {
                let mut inner = self.queues.lock();
                match inner.current(&key, id) {
                    None => None,
                    Some(queue) => {
                        if let CycleEnd::Failed(source) = end {
                            // The debounce window doubles as retry backoff.
                            queue.last_enqueued_at_ms = now_ms;
                            queue.retry_count += 1;
                            failure = Some(Error::DrainCallback {
                                key: key.clone(),
                                attempt: queue.retry_count,
                                source,
                            });
                            if queue.retry_count >= self.config.max_retries {
                                exhausted = Some((queue.retry_count, queue.state.clear()));
                                queue.retry_count = 0;
                            }
                        }
                        let finished = queue.state.is_empty();
                        if finished {
                            inner.queues.remove(&key);
                        }
                        Some(finished)
                    },
                }
            };

            if let Some(err) = failure {
                error!(key = %key, error = %err, "followup queue drain failed");
                #[cfg(feature = "metrics")]
                counter!(followup_metrics::DELIVERY_FAILURES_TOTAL).increment(1);
                report.failures.push(err);
            }
            if let Some((retries, discarded)) = exhausted {
                let err = Error::RetriesExhausted {
                    key: key.clone(),
                    retries,
                    discarded,
                };
                error!(key = %key, retries, discarded, "{err}");
                #[cfg(feature = "metrics")]
                counter!(followup_metrics::RETRIES_EXHAUSTED_TOTAL).increment(1);
                report.failures.push(err);
                report.end = DrainEnd::RetriesExhausted { discarded };
            }

            match finished {
                None => {
                    debug!(key = %key, "followup queue cleared during drain");
                    report.end = DrainEnd::Cleared;
                    return report;
                },
                Some(true) => {
                    info!(
                        key = %key,
                        delivered = report.delivered,
                        cycles = report.cycles,
                        "followup queue drained"
                    );
                    #[cfg(feature = "metrics")]
                    gauge!(followup_metrics::QUEUE_DEPTH).set(self.queues.total_depth() as f64);
                    return report;
                },
                Some(false) => {},
            }
        }
    }

    async fn drain_cycle(
        &self,
        key: &str,
        id: u64,
        run: &RunFollowupFn,
        report: &mut DrainReport,
    ) -> CycleEnd {
        let started = Instant::now();
        let mut force_individual = false;

        loop {
            if !self.wait_for_debounce(key, id).await {
                return CycleEnd::Gone;
            }

            let now_ms = self.queues.now_ms();
            let step = {
                let mut inner = self.queues.lock();
                match inner.current(key, id) {
                    Some(queue) => plan_step(queue, &mut force_individual, now_ms),
                    None => Step::Gone,
                }
            };
            let delivery = match step {
                Step::Deliver(delivery) => delivery,
                Step::Idle => return CycleEnd::Idle,
                Step::Gone => return CycleEnd::Gone,
            };

            debug!(key, items = delivery.taken.len(), "delivering followup");
            let result = run(delivery.run).await;

            let settled_at_ms = self.queues.now_ms();
            let settled = {
                let mut inner = self.queues.lock();
                inner.current(key, id).map(|queue| {
                    queue.drain_progress_at_ms = settled_at_ms;
                    match result {
                        Ok(()) => {
                            queue.retry_count = 0;
                            if let Some((dropped, lines)) = delivery.summary {
                                queue.state.consume_summary(dropped, lines);
                            }
                            Ok(())
                        },
                        Err(err) => {
                            for item in delivery.taken.into_iter().rev() {
                                queue.state.items.push_front(item);
                            }
                            Err(err)
                        },
                    }
                })
            };
            match settled {
                None => return CycleEnd::Gone,
                Some(Err(err)) => return CycleEnd::Failed(err),
                Some(Ok(())) => {
                    report.delivered += 1;
                    #[cfg(feature = "metrics")]
                    counter!(followup_metrics::DELIVERIES_TOTAL).increment(1);
                },
            }

            let elapsed = started.elapsed();
            if elapsed > self.config.cycle_timeout {
                warn!(
                    key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "followup drain cycle timeout, pausing"
                );
                #[cfg(feature = "metrics")]
                counter!(followup_metrics::DRAIN_TIMEOUTS_TOTAL).increment(1);
                return CycleEnd::Paused;
            }
        }
    }

    /// Sleep until the debounce window since the last enqueue has passed.
    /// Returns `false` if the queue disappeared meanwhile.
    async fn wait_for_debounce(&self, key: &str, id: u64) -> bool {
        loop {
            let now_ms = self.queues.now_ms();
            let remaining = {
                let mut inner = self.queues.lock();
                let Some(queue) = inner.current(key, id) else {
                    return false;
                };
                debounce_remaining(queue.debounce_ms, queue.last_enqueued_at_ms, now_ms)
            };
            match remaining {
                Some(wait) => tokio::time::sleep(wait).await,
                None => return true,
            }
        }
    }
}
