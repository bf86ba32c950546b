use anyhow::{Result, bail};

use parley_config::{ParleyConfig, Severity, ValidationResult};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn check(config: &ParleyConfig) -> Result<()> {
    match parley_config::find_config_file() {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let result = config.validate();
    for line in report(&result) {
        eprintln!("{line}");
    }

    let errors = result.of(Severity::Error).count();
    if errors > 0 {
        bail!("configuration has {errors} error(s)");
    }
    Ok(())
}

fn report(result: &ValidationResult) -> Vec<String> {
    let mut lines: Vec<String> = result
        .diagnostics
        .iter()
        .map(|d| {
            let color = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
            };
            format!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message)
        })
        .collect();

    let errors = result.of(Severity::Error).count();
    let warnings = result.of(Severity::Warning).count();
    if errors == 0 && warnings == 0 {
        lines.push("No issues found.".into());
    } else {
        lines.push(String::new());
        lines.push(format!("{errors} error(s), {warnings} warning(s)"));
    }
    lines
}
