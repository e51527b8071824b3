//! Well-known lane names.

use std::fmt;

/// The four system lanes. They are created on demand like any other lane but
/// are never removed by idle cleanup or eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandLane {
    /// Interactive agent runs.
    Main,
    /// Scheduled jobs.
    Cron,
    /// Spawned sub-agents.
    Subagent,
    /// Agent-to-agent sends nested inside another run.
    Nested,
}

impl CommandLane {
    pub const ALL: &'static [CommandLane] = &[Self::Main, Self::Cron, Self::Subagent, Self::Nested];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Cron => "cron",
            Self::Subagent => "subagent",
            Self::Nested => "nested",
        }
    }
}

impl fmt::Display for CommandLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for CommandLane {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Trim a lane name; blank names resolve to the main lane.
#[must_use]
pub fn normalize_lane(lane: &str) -> &str {
    let trimmed = lane.trim();
    if trimmed.is_empty() {
        CommandLane::Main.as_str()
    } else {
        trimmed
    }
}

#[must_use]
pub fn is_system_lane(lane: &str) -> bool {
    CommandLane::ALL.iter().any(|l| l.as_str() == lane)
}

/// Per-session lane that serializes runs for one conversation.
#[must_use]
pub fn session_lane(session_key: &str) -> String {
    let key = session_key.trim();
    if key.is_empty() {
        format!("session:{}", CommandLane::Main)
    } else {
        format!("session:{key}")
    }
}

/// Probe lanes exist to test credentials or sessions; their failures are
/// expected and not worth an error log.
pub(crate) fn is_probe_lane(lane: &str) -> bool {
    lane.starts_with("auth-probe:") || lane.starts_with("session:probe-")
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("main", "main")]
    #[case("  cron  ", "cron")]
    #[case("", "main")]
    #[case("   ", "main")]
    #[case("session:abc", "session:abc")]
    fn normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_lane(input), expected);
    }

    #[test]
    fn system_lanes() {
        for lane in CommandLane::ALL {
            assert!(is_system_lane(lane.as_str()));
        }
        assert!(!is_system_lane("session:main"));
        assert!(!is_system_lane("Main"));
    }

    #[test]
    fn session_lane_names() {
        assert_eq!(session_lane("abc"), "session:abc");
        assert_eq!(session_lane("  "), "session:main");
    }

    #[test]
    fn probe_lanes() {
        assert!(is_probe_lane("auth-probe:openai"));
        assert!(is_probe_lane("session:probe-1"));
        assert!(!is_probe_lane("session:abc"));
    }
}
