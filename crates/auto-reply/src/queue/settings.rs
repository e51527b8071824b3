use {
    gatehouse_config::{QueueConfig, QueueDedupe, QueueDropPolicy, QueueMode},
    serde::{Deserialize, Serialize},
};

pub const DEFAULT_QUEUE_MODE: QueueMode = QueueMode::Collect;
pub const DEFAULT_QUEUE_DEBOUNCE_MS: u64 = 1000;
pub const DEFAULT_QUEUE_CAP: usize = 20;
pub const DEFAULT_QUEUE_DROP: QueueDropPolicy = QueueDropPolicy::Summarize;

/// Effective settings for one followup queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSettings {
    pub mode: QueueMode,
    pub debounce_ms: u64,
    pub cap: usize,
    pub drop_policy: QueueDropPolicy,
    pub dedupe: QueueDedupe,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            mode: DEFAULT_QUEUE_MODE,
            debounce_ms: DEFAULT_QUEUE_DEBOUNCE_MS,
            cap: DEFAULT_QUEUE_CAP,
            drop_policy: DEFAULT_QUEUE_DROP,
            dedupe: QueueDedupe::default(),
        }
    }
}

/// Per-session overrides, e.g. set by a chat command and stored with the
/// session. They win over channel and global config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueOverrides {
    pub mode: Option<QueueMode>,
    pub debounce_ms: Option<u64>,
    pub cap: Option<usize>,
    pub drop_policy: Option<QueueDropPolicy>,
}

impl QueueOverrides {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn channel_key(channel: Option<&str>) -> Option<String> {
    channel
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
}

/// Resolve queue settings for a message on `channel`.
///
/// Mode: override, then per-channel config, then global config, then
/// `collect`. Debounce follows the same order. Cap and drop policy come from
/// the override or global config.
#[must_use]
pub fn resolve_queue_settings(
    config: &QueueConfig,
    channel: Option<&str>,
    overrides: &QueueOverrides,
) -> QueueSettings {
    let channel = channel_key(channel);
    let channel = channel.as_deref();

    let mode = overrides
        .mode
        .or_else(|| channel.and_then(|c| config.by_channel.get(c).copied()))
        .or(config.mode)
        .unwrap_or(DEFAULT_QUEUE_MODE);

    let debounce_ms = overrides
        .debounce_ms
        .or_else(|| channel.and_then(|c| config.debounce_ms_by_channel.get(c).copied()))
        .or(config.debounce_ms)
        .unwrap_or(DEFAULT_QUEUE_DEBOUNCE_MS);

    let cap = overrides
        .cap
        .or(config.cap)
        .unwrap_or(DEFAULT_QUEUE_CAP)
        .max(1);

    let drop_policy = overrides
        .drop_policy
        .or(config.drop)
        .unwrap_or(DEFAULT_QUEUE_DROP);

    QueueSettings {
        mode,
        debounce_ms,
        cap,
        drop_policy,
        dedupe: config.dedupe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> QueueConfig {
        let mut cfg = QueueConfig {
            mode: Some(QueueMode::Followup),
            debounce_ms: Some(500),
            cap: Some(10),
            drop: Some(QueueDropPolicy::Old),
            ..Default::default()
        };
        cfg.by_channel.insert("telegram".into(), QueueMode::Steer);
        cfg.debounce_ms_by_channel.insert("telegram".into(), 2500);
        cfg
    }

    #[test]
    fn defaults_without_config() {
        let settings = resolve_queue_settings(&QueueConfig::default(), None, &QueueOverrides::default());
        assert_eq!(settings, QueueSettings::default());
        assert_eq!(settings.mode, QueueMode::Collect);
        assert_eq!(settings.debounce_ms, 1000);
        assert_eq!(settings.cap, 20);
        assert_eq!(settings.drop_policy, QueueDropPolicy::Summarize);
    }

    #[test]
    fn global_config_applies() {
        let settings = resolve_queue_settings(&config(), Some("discord"), &QueueOverrides::default());
        assert_eq!(settings.mode, QueueMode::Followup);
        assert_eq!(settings.debounce_ms, 500);
        assert_eq!(settings.cap, 10);
        assert_eq!(settings.drop_policy, QueueDropPolicy::Old);
    }

    #[test]
    fn channel_config_beats_global() {
        let settings = resolve_queue_settings(&config(), Some(" Telegram "), &QueueOverrides::default());
        assert_eq!(settings.mode, QueueMode::Steer);
        assert_eq!(settings.debounce_ms, 2500);
    }

    #[test]
    fn overrides_beat_everything() {
        let overrides = QueueOverrides {
            mode: Some(QueueMode::Collect),
            debounce_ms: Some(0),
            cap: Some(0),
            drop_policy: Some(QueueDropPolicy::New),
        };
        let settings = resolve_queue_settings(&config(), Some("telegram"), &overrides);
        assert_eq!(settings.mode, QueueMode::Collect);
        assert_eq!(settings.debounce_ms, 0);
        assert_eq!(settings.cap, 1);
        assert_eq!(settings.drop_policy, QueueDropPolicy::New);
        assert!(!overrides.is_empty());
        assert!(QueueOverrides::default().is_empty());
    }
}
