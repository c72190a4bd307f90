//! Settings validation, run before a request reaches the process pool.

use super::{PermissionMode, Settings};

/// Outcome of validating request settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate request settings and the model identifier.
#[must_use]
pub fn validate_settings(model: &str, settings: &Settings) -> ValidationReport {
    let mut report = ValidationReport::default();

    if model.trim().is_empty() {
        report.errors.push("model identifier must not be empty".to_string());
    }
    if settings.timeout_secs == Some(0) {
        report.errors.push("timeout_secs must be greater than zero".to_string());
    }
    if settings.kill_grace_ms == Some(0) {
        report.errors.push("kill_grace_ms must be greater than zero".to_string());
    }
    if settings.max_turns == Some(0) {
        report.errors.push("max_turns must be greater than zero".to_string());
    }
    if settings
        .resume
        .as_deref()
        .is_some_and(|id| id.trim().is_empty())
    {
        report.errors.push("resume session id must not be empty".to_string());
    }
    if let Some(dir) = &settings.working_dir {
        if !dir.is_dir() {
            report
                .errors
                .push(format!("working directory does not exist: {}", dir.display()));
        }
    }
    for dir in &settings.add_dirs {
        if !dir.is_dir() {
            report
                .warnings
                .push(format!("additional directory does not exist: {}", dir.display()));
        }
    }

    for tool in &settings.allowed_tools {
        if settings.disallowed_tools.contains(tool) {
            report.warnings.push(format!(
                "tool {tool} is both allowed and disallowed; the deny list wins"
            ));
        }
    }
    if settings.permission_mode == Some(PermissionMode::BypassPermissions) {
        report
            .warnings
            .push("bypassPermissions lets the CLI run every tool without approval".to_string());
    }

    report
}

/// Validate a concurrency limit from configuration.
#[must_use]
pub fn validate_concurrency(limit: Option<usize>) -> Option<String> {
    (limit == Some(0)).then(|| "max_concurrent_processes must be at least 1".to_string())
}
