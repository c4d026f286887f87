//! Executables and scripts on disk for resolution tests

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Creates files with chosen permissions below a base directory
#[derive(Clone)]
pub struct FakeExecutables {
    base_dir: PathBuf,
}

impl FakeExecutables {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Canonical path, as the resolver reports it
    pub fn canonical(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        path.canonicalize().unwrap_or(path)
    }

    fn write(&self, name: &str, content: &str, mode: u32) -> std::io::Result<PathBuf> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))?;
        Ok(path)
    }

    /// An executable shell script
    pub fn script(&self, name: &str, body: &str) -> std::io::Result<PathBuf> {
        self.write(name, &format!("#!/bin/sh\n{}\n", body), 0o755)
    }

    /// A regular file without the executable bit
    pub fn plain_file(&self, name: &str) -> std::io::Result<PathBuf> {
        self.write(name, "", 0o644)
    }

    pub fn dir(&self, name: &str) -> std::io::Result<PathBuf> {
        let path = self.path(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests;
