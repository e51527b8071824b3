//! Configuration validation engine.
//!
//! Validates TOML configuration files against the known schema, detects
//! unknown/misspelled fields, and reports values that will be clamped or
//! are likely mistakes.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::schema::GatehouseConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value"
    pub category: &'static str,
    /// Dotted path, e.g. "chat.queue.cap"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// A map with dynamic keys (channel ids, metric labels).
    Map(Box<KnownKeys>),
    /// Scalar value; stop recursion.
    Leaf,
}

/// Build the full schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    let max_concurrent = || Struct(HashMap::from([("max_concurrent", Leaf)]));

    Struct(HashMap::from([
        (
            "agents",
            Struct(HashMap::from([
                ("max_concurrent", Leaf),
                ("subagents", max_concurrent()),
                ("nested_max_concurrent", Leaf),
                ("sessions", max_concurrent()),
            ])),
        ),
        (
            "cron",
            Struct(HashMap::from([("max_concurrent_runs", Leaf)])),
        ),
        (
            "chat",
            Struct(HashMap::from([(
                "queue",
                Struct(HashMap::from([
                    ("mode", Leaf),
                    ("debounce_ms", Leaf),
                    ("cap", Leaf),
                    ("drop", Leaf),
                    ("dedupe", Leaf),
                    ("by_channel", Map(Box::new(Leaf))),
                    ("debounce_ms_by_channel", Map(Box::new(Leaf))),
                ])),
            )])),
        ),
        (
            "lanes",
            Struct(HashMap::from([
                ("task_timeout_secs", Leaf),
                ("idle_ttl_secs", Leaf),
                ("max_lanes", Leaf),
                ("warn_after_ms", Leaf),
            ])),
        ),
        (
            "maintenance",
            Struct(HashMap::from([
                ("enabled", Leaf),
                ("every", Leaf),
                ("stuck_queue_secs", Leaf),
                ("shutdown_grace_secs", Leaf),
            ])),
        ),
        (
            "metrics",
            Struct(HashMap::from([
                ("enabled", Leaf),
                ("labels", Map(Box::new(Leaf))),
            ])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Find the best match for `needle` among `candidates`. Returns `Some(best)`
/// if the distance is <= `max_distance`.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
///
/// Only TOML files get unknown-field checks; other formats are type-checked
/// through the loader.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|ext| ext == "toml");

    if !is_toml {
        let mut diagnostics = Vec::new();
        match crate::loader::load_config(actual_path) {
            Ok(config) => check_semantic_warnings(&config, &mut diagnostics),
            Err(e) => diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "type-error",
                path: String::new(),
                message: format!("{e:#}"),
            }),
        }
        return ValidationResult {
            diagnostics,
            config_path,
        };
    }

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let mut result = validate_toml_str(&crate::env_subst::substitute_env(&content));
            result.config_path = config_path;
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path,
        },
    }
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    let schema = build_schema_map();
    check_unknown_fields(&toml_value, &schema, "", &mut diagnostics);

    // 3. Types, then semantic checks on the parsed config
    match toml::from_str::<GatehouseConfig>(toml_str) {
        Ok(config) => check_semantic_warnings(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Walk the TOML value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, schema) {
        (toml::Value::Table(table), KnownKeys::Struct(fields)) => {
            let known_keys: Vec<&str> = fields.keys().copied().collect();
            for (key, child_value) in table {
                let path = join_path(prefix, key);
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child_value, child_schema, &path, diagnostics);
                } else {
                    let level = if prefix.is_empty() {
                        "at top level "
                    } else {
                        ""
                    };
                    let msg = match suggest(key, &known_keys, 3) {
                        Some(s) => format!("unknown field {level}(did you mean \"{s}\"?)"),
                        None => format!("unknown field {level}"),
                    };
                    diagnostics.push(Diagnostic {
                        severity: Severity::Error,
                        category: "unknown-field",
                        path,
                        message: msg.trim().to_string(),
                    });
                }
            }
        },
        (toml::Value::Table(table), KnownKeys::Map(value_schema)) => {
            for (key, child_value) in table {
                check_unknown_fields(
                    child_value,
                    value_schema,
                    &join_path(prefix, key),
                    diagnostics,
                );
            }
        },
        // Leaf or type mismatch: type errors are caught later.
        _ => {},
    }
}

/// Run semantic checks on a successfully parsed config.
fn check_semantic_warnings(config: &GatehouseConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut warn = |path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "value",
            path: path.to_string(),
            message,
        });
    };

    for (path, value) in [
        ("agents.max_concurrent", config.agents.max_concurrent),
        (
            "agents.subagents.max_concurrent",
            config.agents.subagents.max_concurrent,
        ),
        (
            "agents.nested_max_concurrent",
            config.agents.nested_max_concurrent,
        ),
        (
            "agents.sessions.max_concurrent",
            config.agents.sessions.max_concurrent,
        ),
        ("cron.max_concurrent_runs", config.cron.max_concurrent_runs),
        ("chat.queue.cap", config.chat.queue.cap),
    ] {
        if value == Some(0) {
            warn(path, "0 is treated as 1".into());
        }
    }

    if config.lanes.max_lanes == 0 {
        warn(
            "lanes.max_lanes",
            "every idle session lane will be evicted on each sweep".into(),
        );
    }

    if config.maintenance.enabled && config.maintenance.stuck_queue_secs < 30 {
        warn(
            "maintenance.stuck_queue_secs",
            "shorter than the 30s drain cycle ceiling; healthy drains may be cleared".into(),
        );
    }

    if config.lanes.task_timeout_secs == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "value",
            path: "lanes.task_timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if let Err(e) = gatehouse_common::parse_duration(&config.maintenance.every) {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "value",
            path: "maintenance.every".into(),
            message: e.to_string(),
        });
    }

    if !config.maintenance.enabled {
        diagnostics.push(Diagnostic {
            severity: Severity::Info,
            category: "value",
            path: "maintenance.enabled".into(),
            message: "idle lanes and stuck queues will not be cleaned up".into(),
        });
    }
}
