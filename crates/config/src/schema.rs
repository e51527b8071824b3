/// Config schema types (agents, cron, chat queue, lanes, maintenance, metrics).
use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatehouseConfig {
    pub agents: AgentsConfig,
    pub cron: CronConfig,
    pub chat: ChatConfig,
    pub lanes: LanesConfig,
    pub maintenance: MaintenanceConfig,
    pub metrics: MetricsConfig,
}

/// Agent concurrency limits. Unset values fall back to built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Concurrent runs in the `main` lane. Default 4.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    pub subagents: SubagentsConfig,
    /// Concurrent runs in the `nested` lane. Takes precedence over
    /// `sessions.max_concurrent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested_max_concurrent: Option<usize>,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentsConfig {
    /// Concurrent runs in the `subagent` lane. Default 8.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Fallback for the `nested` lane. Default 4.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// Concurrent runs in the `cron` lane. Default 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_runs: Option<usize>,
}

/// Chat configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// How to handle messages that arrive while an agent run is active.
    pub queue: QueueConfig,
}

/// Followup queue settings. Unset values use the built-in defaults
/// (collect, 1000 ms, cap 20, summarize).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<QueueMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop: Option<QueueDropPolicy>,
    pub dedupe: QueueDedupe,
    /// Per-channel mode overrides, keyed by channel id (e.g. "telegram").
    pub by_channel: HashMap<String, QueueMode>,
    /// Per-channel debounce overrides in milliseconds.
    pub debounce_ms_by_channel: HashMap<String, u64>,
}

/// Behaviour when a message arrives during an active run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Replay queued messages one by one after the current run.
    Followup,
    /// Merge queued messages into a single prompt after the current run.
    #[default]
    Collect,
    /// Treat queued messages as live input for the running agent.
    #[serde(alias = "queue", alias = "queued")]
    Steer,
}

impl QueueMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Followup => "followup",
            Self::Collect => "collect",
            Self::Steer => "steer",
        }
    }
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "followup" | "follow-up" => Ok(Self::Followup),
            "collect" => Ok(Self::Collect),
            "steer" | "queue" | "queued" => Ok(Self::Steer),
            other => Err(format!("unknown queue mode: {other}")),
        }
    }
}

/// What to do when a followup queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDropPolicy {
    /// Evict the oldest items.
    #[serde(alias = "drop-old")]
    Old,
    /// Reject the incoming item.
    #[serde(alias = "drop-new")]
    New,
    /// Evict the oldest items and keep a one-line summary of each.
    #[default]
    #[serde(alias = "summary")]
    Summarize,
}

impl QueueDropPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Old => "old",
            Self::New => "new",
            Self::Summarize => "summarize",
        }
    }
}

impl fmt::Display for QueueDropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueDropPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "old" | "drop-old" => Ok(Self::Old),
            "new" | "drop-new" => Ok(Self::New),
            "summarize" | "summary" => Ok(Self::Summarize),
            other => Err(format!("unknown queue drop policy: {other}")),
        }
    }
}

/// How duplicate followups are detected on enqueue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueDedupe {
    /// Same message id as a queued item.
    #[default]
    MessageId,
    /// Same prompt text as a queued item.
    Prompt,
    None,
}

/// Lane scheduler limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanesConfig {
    /// Hard ceiling on a single task. Default 600.
    pub task_timeout_secs: u64,
    /// Idle non-system lanes are removed after this long. Default 1800.
    pub idle_ttl_secs: u64,
    /// Idle lanes beyond this count are evicted. Default 1000.
    pub max_lanes: usize,
    /// Queue wait that triggers a warning. Default 2000.
    pub warn_after_ms: u64,
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 600,
            idle_ttl_secs: 1800,
            max_lanes: 1000,
            warn_after_ms: 2000,
        }
    }
}

/// Periodic maintenance sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    /// Interval between sweeps (e.g. "60s", "5m"). Defaults to "60s".
    pub every: String,
    /// Followup queues draining longer than this are force-cleared.
    pub stuck_queue_secs: u64,
    /// How long shutdown waits for running tasks.
    pub shutdown_grace_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every: "60s".into(),
            stuck_queue_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

/// Metrics and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled.
    pub enabled: bool,
    /// Additional labels to add to all metrics.
    pub labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            labels: HashMap::new(),
        }
    }
}
