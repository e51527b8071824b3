//! Default configuration template with all options documented.
//!
//! Written by `gatehouse config init`. Every option is listed; values left
//! commented out use the built-in default.

/// Generate the default config template.
#[must_use]
pub fn default_config_template() -> String {
    r##"# Gatehouse Configuration
# =======================
# Uncomment and modify settings as needed.
# Changes require a restart to take effect.
#
# Environment variable substitution is supported: ${ENV_VAR}

# ══════════════════════════════════════════════════════════════════════════════
# AGENT CONCURRENCY
# ══════════════════════════════════════════════════════════════════════════════

[agents]
# max_concurrent = 4              # Concurrent runs in the "main" lane
# nested_max_concurrent = 4       # Concurrent agent-to-agent sends ("nested" lane)

[agents.subagents]
# max_concurrent = 8              # Concurrent sub-agent runs ("subagent" lane)

[agents.sessions]
# max_concurrent = 4              # Fallback for the "nested" lane

[cron]
# max_concurrent_runs = 1         # Concurrent scheduled jobs ("cron" lane)

# ══════════════════════════════════════════════════════════════════════════════
# FOLLOWUP QUEUE
# ══════════════════════════════════════════════════════════════════════════════
# Messages that arrive while an agent run is active are queued per session.

[chat.queue]
# mode = "collect"                # "followup", "collect" or "steer"
# debounce_ms = 1000              # Quiet period before a queued batch is drained
# cap = 20                        # Max queued messages per session
# drop = "summarize"              # At capacity: "old", "new" or "summarize"
dedupe = "message-id"             # "message-id", "prompt" or "none"

[chat.queue.by_channel]
# telegram = "followup"           # Per-channel mode overrides

[chat.queue.debounce_ms_by_channel]
# whatsapp = 2500                 # Per-channel debounce overrides

# ══════════════════════════════════════════════════════════════════════════════
# LANES
# ══════════════════════════════════════════════════════════════════════════════

[lanes]
task_timeout_secs = 600           # Hard ceiling on a single task
idle_ttl_secs = 1800              # Idle session lanes are removed after this
max_lanes = 1000                  # Idle lanes beyond this count are evicted
warn_after_ms = 2000              # Queue wait that triggers a warning

# ══════════════════════════════════════════════════════════════════════════════
# MAINTENANCE
# ══════════════════════════════════════════════════════════════════════════════

[maintenance]
enabled = true
every = "60s"                     # Sweep interval ("30s", "5m", "1h")
stuck_queue_secs = 60             # Force-clear queues draining longer than this
shutdown_grace_secs = 30          # How long shutdown waits for running tasks

# ══════════════════════════════════════════════════════════════════════════════
# METRICS
# ══════════════════════════════════════════════════════════════════════════════

[metrics]
enabled = true

[metrics.labels]
# instance = "gatehouse-1"
"##
    .to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{schema::GatehouseConfig, validate::validate_toml_str},
    };

    #[test]
    fn template_parses_to_defaults() {
        let cfg: GatehouseConfig = toml::from_str(&default_config_template()).unwrap();
        assert!(cfg.agents.max_concurrent.is_none());
        assert_eq!(cfg.lanes.task_timeout_secs, 600);
        assert_eq!(cfg.maintenance.every, "60s");
    }

    #[test]
    fn template_has_no_diagnostics() {
        let result = validate_toml_str(&default_config_template());
        assert!(
            result.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            result.diagnostics
        );
    }
}
