//! The agent execution seam.
//!
//! The gateway decides *when* an agent runs; an [`AgentRunner`] does the
//! running. A `Noop` implementation lets the gateway run standalone.

use {
    async_trait::async_trait,
    gatehouse_auto_reply::queue::{FollowupRun, OriginRoute, QueueOverrides, RunContext},
    serde::{Deserialize, Serialize},
    tracing::debug,
};

/// A message received from a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InboundMessage {
    pub session_key: String,
    pub text: String,
    pub message_id: Option<String>,
    pub origin: OriginRoute,
    /// Periodic wake-up rather than a user message.
    pub is_heartbeat: bool,
    /// Per-session queue settings, e.g. from a `/queue` command.
    pub overrides: QueueOverrides,
    pub run: RunContext,
}

impl InboundMessage {
    pub fn new(session_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>, to: impl Into<String>) -> Self {
        self.origin.channel = Some(channel.into());
        self.origin.to = Some(to.into());
        self
    }

    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn heartbeat(mut self) -> Self {
        self.is_heartbeat = true;
        self
    }

    /// Run context bound to this message's session.
    pub(crate) fn run_context(&self) -> RunContext {
        RunContext {
            session_key: Some(self.session_key.clone()),
            ..self.run.clone()
        }
    }

    pub(crate) fn into_followup(self) -> FollowupRun {
        let run = self.run_context();
        let mut followup = FollowupRun::new(self.text, run).with_origin(self.origin);
        followup.message_id = self.message_id;
        followup
    }
}

/// One agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub session_key: String,
    pub prompt: String,
    pub origin: OriginRoute,
    pub run: RunContext,
    /// Delivered by the followup drain rather than directly.
    pub followup: bool,
}

impl AgentRequest {
    pub(crate) fn direct(message: &InboundMessage) -> Self {
        Self {
            session_key: message.session_key.clone(),
            prompt: message.text.clone(),
            origin: message.origin.clone(),
            run: message.run_context(),
            followup: false,
        }
    }

    pub(crate) fn from_followup(session_key: &str, item: FollowupRun) -> Self {
        Self {
            session_key: session_key.to_string(),
            prompt: item.prompt,
            origin: item.origin,
            run: item.run,
            followup: true,
        }
    }
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run the agent to completion for one prompt.
    async fn run(&self, request: AgentRequest) -> anyhow::Result<()>;
}

pub struct NoopAgentRunner;

#[async_trait]
impl AgentRunner for NoopAgentRunner {
    async fn run(&self, request: AgentRequest) -> anyhow::Result<()> {
        debug!(
            session_key = %request.session_key,
            followup = request.followup,
            "no agent runner configured; dropping prompt"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn followup_carries_session_key_and_route() {
        let message = InboundMessage::new("chat-1", "hello")
            .with_channel("telegram", "42")
            .with_message_id("m1");
        let followup = message.into_followup();
        assert_eq!(followup.prompt, "hello");
        assert_eq!(followup.message_id.as_deref(), Some("m1"));
        assert_eq!(followup.run.session_key.as_deref(), Some("chat-1"));
        assert_eq!(followup.origin.to.as_deref(), Some("42"));
    }

    #[test]
    fn run_is_bound_to_message_session() {
        let mut message = InboundMessage::new("chat-1", "hello");
        message.run.session_key = Some("other".into());
        message.run.model = Some("m".into());
        let request = AgentRequest::direct(&message);
        assert_eq!(request.run.session_key.as_deref(), Some("chat-1"));
        assert_eq!(request.run.model.as_deref(), Some("m"));
        assert!(!request.followup);
    }
}
