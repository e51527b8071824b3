//! Queue building blocks shared by the followup store and drain engine.
//!
//! Everything here is synchronous and free of I/O.

use std::{collections::VecDeque, time::Duration};

use gatehouse_config::QueueDropPolicy;

pub const DEFAULT_ELIDE_LIMIT: usize = 140;
pub const DEFAULT_SUMMARY_LIMIT: usize = 160;

// ── Text ────────────────────────────────────────────────────────────────────

/// Shorten `text` to at most `limit` characters, ending in `…` when cut.
#[must_use]
pub fn elide_queue_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit.saturating_sub(1)).collect();
    format!("{}…", head.trim_end())
}

/// Collapse whitespace to single spaces, then elide.
#[must_use]
pub fn build_queue_summary_line(text: &str, limit: usize) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    elide_queue_text(&cleaned, limit)
}

// ── Capacity ────────────────────────────────────────────────────────────────

/// Items plus overflow bookkeeping for one queue.
#[derive(Debug, Clone)]
pub struct QueueState<T> {
    pub items: VecDeque<T>,
    pub cap: usize,
    pub drop_policy: QueueDropPolicy,
    pub dropped_count: usize,
    pub summary_lines: Vec<String>,
}

impl<T> QueueState<T> {
    pub fn new(cap: usize, drop_policy: QueueDropPolicy) -> Self {
        Self {
            items: VecDeque::new(),
            cap: cap.max(1),
            drop_policy,
            dropped_count: 0,
            summary_lines: Vec::new(),
        }
    }

    /// Whether an overflow summary is waiting to be delivered.
    pub fn has_pending_summary(&self) -> bool {
        self.dropped_count > 0
    }

    /// No items and nothing left to summarize.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.dropped_count == 0
    }

    /// Forget all items and summary state. Returns items plus dropped count.
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len() + self.dropped_count;
        self.items.clear();
        clear_queue_summary_state(self);
        cleared
    }

    /// Remove a previously previewed summary: `dropped` from the count and
    /// the first `lines` summary lines. Anything dropped since the preview
    /// stays pending.
    pub fn consume_summary(&mut self, dropped: usize, lines: usize) {
        self.dropped_count = self.dropped_count.saturating_sub(dropped);
        let lines = lines.min(self.summary_lines.len());
        self.summary_lines.drain(..lines);
    }
}

/// Make room for one more item. Returns `false` when the incoming item must
/// be rejected (`new` policy at capacity).
pub fn apply_queue_drop_policy<T>(queue: &mut QueueState<T>, summarize: impl Fn(&T) -> String) -> bool {
    let cap = queue.cap.max(1);
    if queue.items.len() < cap {
        return true;
    }
    if queue.drop_policy == QueueDropPolicy::New {
        return false;
    }

    let drop_count = queue.items.len() - cap + 1;
    let dropped: Vec<T> = queue.items.drain(..drop_count).collect();
    if queue.drop_policy == QueueDropPolicy::Summarize {
        for item in &dropped {
            queue.dropped_count += 1;
            queue.summary_lines.push(build_queue_summary_line(
                &summarize(item),
                DEFAULT_SUMMARY_LIMIT,
            ));
        }
        // Keep at most `cap` lines; the count still reflects every drop.
        if queue.summary_lines.len() > cap {
            let excess = queue.summary_lines.len() - cap;
            queue.summary_lines.drain(..excess);
        }
    }
    true
}

// ── Prompts ─────────────────────────────────────────────────────────────────

fn summary_prompt(dropped_count: usize, summary_lines: &[String], noun: &str) -> Option<String> {
    if dropped_count == 0 {
        return None;
    }
    let plural = if dropped_count == 1 {
        ""
    } else {
        "s"
    };
    let mut lines = vec![format!(
        "[Queue overflow] Dropped {dropped_count} {noun}{plural} due to cap."
    )];
    if !summary_lines.is_empty() {
        lines.push("Summary:".to_string());
        lines.extend(summary_lines.iter().map(|line| format!("- {line}")));
    }
    Some(lines.join("\n"))
}

/// Render the overflow summary without changing the queue.
#[must_use]
pub fn preview_queue_summary_prompt<T>(state: &QueueState<T>, noun: &str) -> Option<String> {
    summary_prompt(state.dropped_count, &state.summary_lines, noun)
}

/// Render the overflow summary and reset the summary state.
pub fn build_queue_summary_prompt<T>(state: &mut QueueState<T>, noun: &str) -> Option<String> {
    let prompt = preview_queue_summary_prompt(state, noun);
    clear_queue_summary_state(state);
    prompt
}

pub fn clear_queue_summary_state<T>(state: &mut QueueState<T>) {
    state.dropped_count = 0;
    state.summary_lines.clear();
}

/// Title, optional summary, then one rendered block per item, separated by
/// blank lines.
pub fn build_collect_prompt<'a, T: 'a>(
    title: &str,
    items: impl IntoIterator<Item = &'a T>,
    summary: Option<&str>,
    render_item: impl Fn(&T, usize) -> String,
) -> String {
    let mut blocks = vec![title.to_string()];
    if let Some(summary) = summary {
        blocks.push(summary.to_string());
    }
    blocks.extend(
        items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| render_item(item, idx)),
    );
    blocks.join("\n\n")
}

// ── Routing ─────────────────────────────────────────────────────────────────

/// Where an item would be delivered, for cross-destination detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationKey {
    /// The item carries no route.
    Unkeyed,
    /// The item cannot be merged with anything else.
    Cross,
    Key(String),
}

/// True when the items cannot share one delivery: any item is `Cross`,
/// keyed and unkeyed items are mixed, or more than one key appears.
pub fn has_cross_channel_items<'a, T: 'a>(
    items: impl IntoIterator<Item = &'a T>,
    resolve: impl Fn(&T) -> DestinationKey,
) -> bool {
    let mut first_key: Option<String> = None;
    let mut saw_unkeyed = false;
    for item in items {
        match resolve(item) {
            DestinationKey::Cross => return true,
            DestinationKey::Unkeyed => saw_unkeyed = true,
            DestinationKey::Key(key) => match &first_key {
                Some(existing) if *existing != key => return true,
                Some(_) => {},
                None => first_key = Some(key),
            },
        }
        if saw_unkeyed && first_key.is_some() {
            return true;
        }
    }
    false
}

// ── Debounce ────────────────────────────────────────────────────────────────

/// Time left in the debounce window, or `None` once it has elapsed.
#[must_use]
pub fn debounce_remaining(debounce_ms: u64, last_enqueued_at_ms: u64, now_ms: u64) -> Option<Duration> {
    if debounce_ms == 0 {
        return None;
    }
    let since = now_ms.saturating_sub(last_enqueued_at_ms);
    (since < debounce_ms).then(|| Duration::from_millis(debounce_ms - since))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn state(items: &[u32], cap: usize, drop_policy: QueueDropPolicy) -> QueueState<u32> {
        let mut s = QueueState::new(cap, drop_policy);
        s.items.extend(items.iter().copied());
        s
    }

    #[rstest]
    #[case("hello", 10, "hello")]
    #[case("hello world", 5, "hell…")]
    #[case("hello world", 8, "hello w…")]
    #[case("hello", 1, "…")]
    #[case("hello", 5, "hello")]
    fn elides(#[case] text: &str, #[case] limit: usize, #[case] expected: &str) {
        assert_eq!(elide_queue_text(text, limit), expected);
    }

    #[test]
    fn elide_counts_characters() {
        assert_eq!(elide_queue_text("héllo wörld", 6), "héllo…");
    }

    #[test]
    fn summary_line_collapses_whitespace() {
        assert_eq!(
            build_queue_summary_line("  hello \n\t world  ", DEFAULT_SUMMARY_LIMIT),
            "hello world"
        );
        let long = build_queue_summary_line(&"a".repeat(200), 10);
        assert_eq!(long.chars().count(), 10);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn drop_policy_under_cap_accepts() {
        let mut q = state(&[1], 2, QueueDropPolicy::Old);
        assert!(apply_queue_drop_policy(&mut q, |i| i.to_string()));
        assert_eq!(q.items, [1]);
    }

    #[test]
    fn drop_policy_new_rejects_at_cap() {
        let mut q = state(&[1, 2], 2, QueueDropPolicy::New);
        assert!(!apply_queue_drop_policy(&mut q, |i| i.to_string()));
        assert_eq!(q.items, [1, 2]);
    }

    #[test]
    fn drop_policy_old_evicts_front() {
        let mut q = state(&[1, 2], 2, QueueDropPolicy::Old);
        assert!(apply_queue_drop_policy(&mut q, |i| i.to_string()));
        assert_eq!(q.items, [2]);
        assert_eq!(q.dropped_count, 0);
        assert!(q.summary_lines.is_empty());
    }

    #[test]
    fn drop_policy_summarize_then_push() {
        let mut q = state(&[1, 2], 2, QueueDropPolicy::Summarize);
        assert!(apply_queue_drop_policy(&mut q, |i| format!("summary({i})")));
        q.items.push_back(3);
        assert_eq!(q.items, [2, 3]);
        assert_eq!(q.dropped_count, 1);
        assert_eq!(q.summary_lines, vec!["summary(1)".to_string()]);
    }

    #[test]
    fn drop_policy_evicts_down_after_cap_shrinks() {
        let mut q = state(&[1, 2, 3, 4], 2, QueueDropPolicy::Summarize);
        assert!(apply_queue_drop_policy(&mut q, |i| i.to_string()));
        assert_eq!(q.items, [4]);
        assert_eq!(q.dropped_count, 3);
        assert_eq!(q.summary_lines, vec!["2", "3"]);
    }

    #[test]
    fn summary_prompt_absent_without_drops() {
        let mut q = state(&[], 10, QueueDropPolicy::Summarize);
        assert!(build_queue_summary_prompt(&mut q, "message").is_none());
    }

    #[test]
    fn summary_prompt_resets_state() {
        let mut q = state(&[], 10, QueueDropPolicy::Summarize);
        q.dropped_count = 2;
        q.summary_lines = vec!["line 1".into(), "line 2".into()];

        let preview = preview_queue_summary_prompt(&q, "message").unwrap();
        assert_eq!(q.dropped_count, 2);

        let prompt = build_queue_summary_prompt(&mut q, "message").unwrap();
        assert_eq!(prompt, preview);
        assert_eq!(
            prompt,
            "[Queue overflow] Dropped 2 messages due to cap.\nSummary:\n- line 1\n- line 2"
        );
        assert_eq!(q.dropped_count, 0);
        assert!(q.summary_lines.is_empty());
    }

    #[test]
    fn summary_prompt_singular() {
        let mut q = state(&[], 10, QueueDropPolicy::Summarize);
        q.dropped_count = 1;
        assert_eq!(
            preview_queue_summary_prompt(&q, "message").unwrap(),
            "[Queue overflow] Dropped 1 message due to cap."
        );
    }

    #[test]
    fn consume_summary_keeps_newer_drops() {
        let mut q = state(&[], 10, QueueDropPolicy::Summarize);
        q.dropped_count = 3;
        q.summary_lines = vec!["a".into(), "b".into(), "c".into()];
        q.consume_summary(2, 2);
        assert_eq!(q.dropped_count, 1);
        assert_eq!(q.summary_lines, vec!["c"]);
    }

    #[test]
    fn collect_prompt_layout() {
        let items = ["a", "b"];
        let prompt = build_collect_prompt("Title", &items, Some("Summary text"), |item, idx| {
            format!("{idx}: {item}")
        });
        assert_eq!(prompt, "Title\n\nSummary text\n\n0: a\n\n1: b");

        let empty: [&str; 0] = [];
        assert_eq!(build_collect_prompt("Title", &empty, None, |i, _| i.to_string()), "Title");
    }

    fn keyed(k: &str) -> DestinationKey {
        DestinationKey::Key(k.to_string())
    }

    #[test]
    fn cross_channel_detection() {
        let same = [keyed("a"), keyed("a")];
        assert!(!has_cross_channel_items(&same, Clone::clone));

        let different = [keyed("a"), keyed("b")];
        assert!(has_cross_channel_items(&different, Clone::clone));

        let cross = [DestinationKey::Cross];
        assert!(has_cross_channel_items(&cross, Clone::clone));

        let mixed = [keyed("a"), DestinationKey::Unkeyed];
        assert!(has_cross_channel_items(&mixed, Clone::clone));

        let unkeyed = [DestinationKey::Unkeyed, DestinationKey::Unkeyed];
        assert!(!has_cross_channel_items(&unkeyed, Clone::clone));

        let none: [DestinationKey; 0] = [];
        assert!(!has_cross_channel_items(&none, Clone::clone));
    }

    #[test]
    fn debounce_window() {
        assert_eq!(debounce_remaining(0, 1_000, 1_000), None);
        assert_eq!(
            debounce_remaining(100, 1_000, 1_050),
            Some(Duration::from_millis(50))
        );
        assert_eq!(debounce_remaining(100, 1_000, 1_100), None);
        assert_eq!(debounce_remaining(100, 2_000, 1_000), Some(Duration::from_millis(100)));
    }
}
