use std::path::{Path, PathBuf};

use {
    anyhow::Result,
    clap::Subcommand,
    gatehouse_config::{
        GatehouseConfig, Severity, ValidationResult, discover_and_load,
        find_or_default_config_path, load_config, validate, write_default_config,
    },
    gatehouse_gateway::LaneLimits,
    serde_json::json,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the resolved configuration and the lane limits derived from it.
    Show,
    /// Write a documented default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

pub fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => show(config_path),
        ConfigAction::Init { force } => init(config_path, force),
        ConfigAction::Check { verbose } => check(config_path, verbose),
    }
}

/// Load from an explicit path (failing loudly), or discover one.
pub fn resolve_config(config_path: Option<&Path>) -> Result<GatehouseConfig> {
    match config_path {
        Some(path) => load_config(path),
        None => Ok(discover_and_load()),
    }
}

fn show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let limits = LaneLimits::from_config(&config);
    let out = json!({
        "config": config,
        "laneLimits": limits,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path: PathBuf = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(find_or_default_config_path);
    write_default_config(&path, force)?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}

// ── Check ───────────────────────────────────────────────────────────────────

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(config_path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let lines = render_diagnostics(&result, verbose);
    for line in &lines {
        eprintln!("  {line}");
    }
    if !lines.is_empty() {
        eprintln!();
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        anyhow::bail!("config has {errors} error(s)");
    }
    Ok(())
}

fn render_diagnostics(result: &ValidationResult, verbose: bool) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| {
            let (color, label) = match d.severity {
                Severity::Error => (RED, "error"),
                Severity::Warning => (YELLOW, "warning"),
                Severity::Info => (CYAN, "info"),
            };
            if d.path.is_empty() {
                format!("{BOLD}{color}{label}{RESET} {}", d.message)
            } else {
                format!("{BOLD}{color}{label}{RESET} {}: {}", d.path, d.message)
            }
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatehouse.toml");
        std::fs::write(&path, "[agents]\nmax_concurrent = 7\n").unwrap();

        let config = resolve_config(Some(&path)).unwrap();
        assert_eq!(LaneLimits::from_config(&config).main, 7);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gatehouse.toml");

        init(Some(&path), false).unwrap();
        assert!(path.exists());
        assert!(init(Some(&path), false).is_err());
        init(Some(&path), true).unwrap();
        assert!(resolve_config(Some(&path)).is_ok());
    }

    #[test]
    fn check_fails_on_errors_and_hides_info_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatehouse.toml");
        std::fs::write(&path, "[chat.queue]\ncap = \"lots\"\n").unwrap();
        assert!(check(Some(&path), false).is_err());

        std::fs::write(&path, "[lanes]\nmax_lane = 10\n").unwrap();
        let result = validate::validate(Some(&path));
        let lines = render_diagnostics(&result, false);
        assert!(lines.iter().any(|l| l.contains("lanes.max_lane")));
        assert!(!lines.iter().any(|l| l.contains("info")));
    }
}
