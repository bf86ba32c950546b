//! Semantic validation of a loaded configuration.

use std::str::FromStr;

use crate::{
    error::{Error, Result},
    schema::ParleyConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "wechat.token"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Diagnostics of the given severity.
    pub fn of(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }

    /// Convert into an error when any diagnostic is an error.
    pub fn into_result(self) -> Result<()> {
        if !self.has_errors() {
            return Ok(());
        }
        Err(Error::Invalid {
            diagnostics: self
                .of(Severity::Error)
                .map(ToString::to_string)
                .collect(),
        })
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

impl ParleyConfig {
    /// Check required credentials and parseable values.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.wechat.token_str().trim().is_empty() {
            result.push(Severity::Error, "wechat.token", "token is required");
        }
        if chrono_tz::Tz::from_str(&self.app.timezone).is_err() {
            result.push(
                Severity::Error,
                "app.timezone",
                format!("unknown time zone '{}'", self.app.timezone),
            );
        }
        if parley_cron::parse_schedule(&self.jiadan.sync_cron).is_err() {
            result.push(
                Severity::Error,
                "jiadan.sync_cron",
                format!("invalid cron expression '{}'", self.jiadan.sync_cron),
            );
        }
        if self.jiadan.max_sync_count == 0 {
            result.push(
                Severity::Warning,
                "jiadan.max_sync_count",
                "0 posts per sync, syncs will send nothing",
            );
        }
        if self.app.admin.is_empty() {
            result.push(
                Severity::Warning,
                "app.admin",
                "no admin configured, admin commands are disabled",
            );
        }
        if self.automation.server.trim().is_empty() {
            result.push(
                Severity::Warning,
                "automation.server",
                "no automation backend configured, forwarding is disabled",
            );
        }
        for (path, url) in [
            ("automation.server", self.automation.server.trim()),
            ("wechat.sub_url", self.wechat.sub_url.as_str()),
        ] {
            if path == "automation.server" && url.is_empty() {
                continue;
            }
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                result.push(Severity::Error, path, format!("'{url}' is not a ws(s) URL"));
            }
        }

        result
    }
}
