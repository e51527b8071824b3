//! Running followups through the command lanes.

use std::sync::Arc;

use {
    futures::FutureExt,
    gatehouse_lanes::{CommandQueue, Error as LaneError, session_lane},
};

use crate::queue::{drain::RunFollowupFn, types::FollowupRun};

/// The session lane for a followup's run. Blank or missing keys share
/// `session:main`, the same lane a direct run for that key uses, so a
/// followup never occupies the `main` lane it is about to wait on.
#[must_use]
pub fn followup_lane(item: &FollowupRun) -> String {
    session_lane(item.run.session_key.as_deref().unwrap_or_default())
}

/// Wrap `run` so each delivery is enqueued on the lane chosen by `lane_for`
/// and awaited there. Runner errors come back unwrapped; lane failures
/// (clear, timeout) are reported as is.
pub fn lane_dispatched<L>(queue: CommandQueue, lane_for: L, run: RunFollowupFn) -> RunFollowupFn
where
    L: Fn(&FollowupRun) -> String + Send + Sync + 'static,
{
    Arc::new(move |item| {
        let lane = lane_for(&item);
        let run = Arc::clone(&run);
        let handle = queue.enqueue(lane, move || run(item));
        async move { handle.await.map_err(LaneError::into_anyhow) }.boxed()
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::queue::{drain::run_followup_fn, types::RunContext},
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    fn item(session_key: Option<&str>) -> FollowupRun {
        FollowupRun::new("hi", RunContext {
            session_key: session_key.map(Into::into),
            ..Default::default()
        })
    }

    #[test]
    fn lane_follows_session_key() {
        assert_eq!(followup_lane(&item(Some("abc"))), "session:abc");
        assert_eq!(followup_lane(&item(Some("  "))), "session:main");
        assert_eq!(followup_lane(&item(Some(""))), "session:main");
        assert_eq!(followup_lane(&item(None)), "session:main");
    }

    #[tokio::test(start_paused = true)]
    async fn blank_session_does_not_wait_on_its_own_main_slot() {
        let queue = CommandQueue::new();
        queue.set_concurrency("main", 1);
        let nested = queue.clone();
        let inner = run_followup_fn(move |_| {
            let nested = nested.clone();
            async move {
                nested
                    .enqueue_main(|| async { Ok(()) })
                    .await
                    .map_err(LaneError::into_anyhow)
            }
        });
        let run = lane_dispatched(queue.clone(), followup_lane, inner);

        tokio::time::timeout(std::time::Duration::from_secs(5), run(item(Some(""))))
            .await
            .expect("followup must not deadlock on the main lane")
            .unwrap();
        assert!(queue.lane_snapshot("session:main").is_some());
    }

    #[tokio::test]
    async fn runs_on_the_chosen_lane() {
        let queue = CommandQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let inner = run_followup_fn(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        let run = lane_dispatched(queue.clone(), followup_lane, inner);

        run(item(Some("abc"))).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(queue.lane_snapshot("session:abc").is_some());
    }

    #[tokio::test]
    async fn runner_errors_pass_through() {
        let queue = CommandQueue::new();
        let inner = run_followup_fn(|_| async { anyhow::bail!("model overloaded") });
        let run = lane_dispatched(queue, followup_lane, inner);

        let err = run(item(None)).await.unwrap_err();
        assert_eq!(err.to_string(), "model overloaded");
    }
}
