use crate::errors::{CliError, Result};
use control_core::Config;
use std::path::{Path, PathBuf};

/// Resolve the manifest path from the CLI option or by searching upwards from `cwd`
pub fn resolve_manifest_path(option: Option<&Path>, cwd: &Path) -> Result<PathBuf> {
    match option {
        Some(path) => Ok(cwd.join(path)),
        None => Config::find_manifest(cwd).ok_or_else(|| CliError::ManifestNotFound(cwd.to_path_buf())),
    }
}
