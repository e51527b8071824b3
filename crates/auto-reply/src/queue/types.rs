use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Channels that exist only inside the gateway and cannot receive a routed
/// reply.
const INTERNAL_CHANNELS: &[&str] = &["webchat"];

/// Whether a reply can be routed back to `channel`.
#[must_use]
pub fn is_routable_channel(channel: Option<&str>) -> bool {
    match channel.map(str::trim) {
        Some(c) if !c.is_empty() => !INTERNAL_CHANNELS.contains(&c.to_ascii_lowercase().as_str()),
        _ => false,
    }
}

/// Where a queued message came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginRoute {
    pub channel: Option<String>,
    pub to: Option<String>,
    pub account_id: Option<String>,
    pub thread_id: Option<String>,
}

impl OriginRoute {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channel.is_none()
            && self.to.is_none()
            && self.account_id.is_none()
            && self.thread_id.is_none()
    }
}

/// Opaque parameters for the agent run a followup will trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunContext {
    pub session_id: String,
    pub session_key: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub workspace_dir: Option<PathBuf>,
    /// Caller-defined payload carried through untouched.
    pub extra: serde_json::Value,
}

/// A message waiting for the active run to finish, or a merged batch of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowupRun {
    pub prompt: String,
    #[serde(default)]
    pub message_id: Option<String>,
    /// Short form used when the item is dropped by the summarize policy.
    #[serde(default)]
    pub summary_line: Option<String>,
    /// Stamped by the store on enqueue.
    #[serde(default)]
    pub enqueued_at_ms: u64,
    #[serde(default)]
    pub origin: OriginRoute,
    pub run: RunContext,
}

impl FollowupRun {
    pub fn new(prompt: impl Into<String>, run: RunContext) -> Self {
        Self {
            prompt: prompt.into(),
            message_id: None,
            summary_line: None,
            enqueued_at_ms: 0,
            origin: OriginRoute::default(),
            run,
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_summary_line(mut self, line: impl Into<String>) -> Self {
        self.summary_line = Some(line.into());
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: OriginRoute) -> Self {
        self.origin = origin;
        self
    }
}
