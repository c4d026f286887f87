use std::path::PathBuf;
use thiserror::Error;

/// Format a YAML error for user-friendly display, including the field path
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum ControlError {
    /// The manifest does not match the expected structure.
    #[error("Schema error in '{path}': {message}")]
    Schema { path: PathBuf, message: String },

    #[error("Failed to parse manifest '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Manifest not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Semantically invalid manifest content.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service {service}: executable does not exist: {path}")]
    ExecutableNotFound { service: String, path: PathBuf },

    #[error("Service {service}: not executable: {path}")]
    ExecutableNotExecutable { service: String, path: PathBuf },

    #[error("Service {service}: working directory does not exist: {path}")]
    WorkingDirectoryNotFound { service: String, path: PathBuf },

    #[error("Group cycle detected: {}", .0.join(" -> "))]
    CyclicGroup(Vec<String>),

    #[error("Service {service}: invalid calendar expression '{expression}'")]
    InvalidCalendar { service: String, expression: String },

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// A supervisor command failed with an exit status that is not a known state code.
    #[error("Supervisor command `{command}` failed{}{}",
        .code.map(|c| format!(" with exit code {}", c)).unwrap_or_default(),
        if .stderr.is_empty() { String::new() } else { format!(": {}", .stderr) })]
    Supervisor {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A start/stop did not reach the requested state after the settle delay.
    #[error("Failed to {action} {unit}\n{status}")]
    TransitionFailed {
        action: &'static str,
        unit: String,
        status: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;
