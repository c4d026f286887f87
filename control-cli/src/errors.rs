use std::path::PathBuf;
use thiserror::Error;

use control_core::errors::ControlError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("No control.yaml found in {0} or any parent directory")]
    ManifestNotFound(PathBuf),

    #[error("Failed to {action} {failed} of {total} services")]
    BatchFailed {
        action: &'static str,
        failed: usize,
        total: usize,
    },

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Failed to serialize output: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
