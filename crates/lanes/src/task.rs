//! Queued and running tasks.
//!
//! A queued task is type-erased behind [`PendingTask`] so one lane can hold
//! tasks with different result types. Each started task is watched by a
//! single driver that decides its [`Settlement`] exactly once, settles the
//! caller, and reports back to the scheduler.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{sync::oneshot, time::Instant};

use crate::{
    error::{Error, Result},
    scheduler::CommandQueue,
};

pub type TaskId = u64;

/// Called when a task starts after waiting at least `warn_after`. Receives
/// the wait time and how many entries were still queued behind it.
pub type OnWaitFn = Box<dyn FnOnce(Duration, usize) + Send>;

/// Per-enqueue options.
#[derive(Default)]
pub struct EnqueueOptions {
    pub warn_after: Option<Duration>,
    pub on_wait: Option<OnWaitFn>,
}

impl EnqueueOptions {
    #[must_use]
    pub fn warn_after(mut self, warn_after: Duration) -> Self {
        self.warn_after = Some(warn_after);
        self
    }

    #[must_use]
    pub fn on_wait(mut self, on_wait: impl FnOnce(Duration, usize) + Send + 'static) -> Self {
        self.on_wait = Some(Box::new(on_wait));
        self
    }
}

impl std::fmt::Debug for EnqueueOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueueOptions")
            .field("warn_after", &self.warn_after)
            .field("on_wait", &self.on_wait.is_some())
            .finish()
    }
}

/// Resolves once the task settles, is cleared, or times out.
///
/// Dropping the handle does not cancel the task.
#[must_use = "the task runs regardless, but its result is lost if the handle is dropped"]
pub struct TaskHandle<T> {
    lane: String,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn lane(&self) -> &str {
        &self.lane
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::aborted(
                this.lane.as_str(),
                "scheduler dropped the task before it settled",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// How a started task left its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settlement {
    Succeeded,
    Failed(String),
    Aborted(String),
    TimedOut,
}

/// Everything the driver needs to report a settlement.
pub(crate) struct StartTicket {
    pub lane: String,
    pub task_id: TaskId,
    pub generation: u64,
    pub timeout: Duration,
    pub queue: CommandQueue,
}

pub(crate) trait PendingTask: Send {
    fn start(self: Box<Self>, ticket: StartTicket);
    fn reject(self: Box<Self>, err: Error);
}

pub(crate) struct QueueEntry {
    pub task: Box<dyn PendingTask>,
    pub enqueued_at: Instant,
    pub warn_after: Duration,
    pub on_wait: Option<OnWaitFn>,
}

struct TypedTask<T, F> {
    task: F,
    tx: oneshot::Sender<Result<T>>,
}

pub(crate) fn pending<T, F, Fut>(lane: &str, task: F) -> (Box<dyn PendingTask>, TaskHandle<T>)
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let handle = TaskHandle {
        lane: lane.to_string(),
        rx,
    };
    (Box::new(TypedTask { task, tx }), handle)
}

impl<T, F, Fut> PendingTask for TypedTask<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    fn start(self: Box<Self>, ticket: StartTicket) {
        let TypedTask { task, tx } = *self;
        // Build the future here so tasks begin in the order the lane hands
        // out slots.
        let fut = task();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut work = tokio::spawn(fut);
            let outcome = match tokio::time::timeout(ticket.timeout, &mut work).await {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(err))) => Err(Error::Task(err)),
                Ok(Err(join_err)) => Err(Error::aborted(ticket.lane.as_str(), join_err.to_string())),
                Err(_) => Err(Error::LaneTimeout {
                    lane: ticket.lane.clone(),
                    task_id: ticket.task_id,
                    timeout_ms: u64::try_from(ticket.timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };
            // On timeout the work is detached, not cancelled. Whatever it does
            // later is never observed here.
            let settlement = match &outcome {
                Ok(_) => Settlement::Succeeded,
                Err(Error::Task(err)) => Settlement::Failed(format!("{err:#}")),
                Err(Error::LaneTimeout { .. }) => Settlement::TimedOut,
                Err(other) => Settlement::Aborted(other.to_string()),
            };
            ticket.queue.finish(&ticket, settlement, started.elapsed());
            let _ = tx.send(outcome);
        });
    }

    fn reject(self: Box<Self>, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}
