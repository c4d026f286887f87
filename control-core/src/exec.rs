//! Executable resolution
//!
//! A service declares its command in one of three forms:
//! - `run`: a command line tokenized with POSIX shell rules
//! - `shell`: a script handed to `/bin/sh -c`
//! - `cmd` + `args`: an explicit argument vector
//!
//! [`Resolver`] turns the tokenized argv into one whose first element is an
//! absolute path to an existing executable file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use nix::unistd::{AccessFlags, access};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::errors::ControlError;

/// Shell used for the `shell` form
pub const SHELL: &str = "/bin/sh";

/// Script extensions that get an interpreter prepended when the script itself
/// is not executable.
const INTERPRETERS: &[(&str, &str)] = &[
    (".js", "node"),
    (".mjs", "node"),
    (".py", "python"),
    (".sh", "sh"),
];

/// The declared command form of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    Run(String),
    Shell(String),
    Cmd { cmd: String, args: Vec<String> },
}

impl CommandSource {
    /// Build the command source from the manifest fields.
    ///
    /// Exactly one of `run`, `shell` or `cmd` must be present.
    pub fn from_fields(
        run: Option<String>,
        shell: Option<String>,
        cmd: Option<String>,
        args: Option<Vec<String>>,
    ) -> std::result::Result<Self, String> {
        if args.is_some() && cmd.is_none() {
            return Err("`args` is only valid together with `cmd`".to_string());
        }

        match (run, shell, cmd) {
            (Some(run), None, None) => Ok(CommandSource::Run(run)),
            (None, Some(shell), None) => Ok(CommandSource::Shell(shell)),
            (None, None, Some(cmd)) => Ok(CommandSource::Cmd {
                cmd,
                args: args.unwrap_or_default(),
            }),
            (run, shell, cmd) => {
                let given = [run.is_some(), shell.is_some(), cmd.is_some()]
                    .into_iter()
                    .filter(|present| *present)
                    .count();
                Err(format!(
                    "exactly one of `run`, `shell` or `cmd` must be given (found {})",
                    given
                ))
            }
        }
    }

    /// Split the source into its initial argument vector.
    pub fn tokenize(&self) -> std::result::Result<Vec<String>, String> {
        let args = match self {
            CommandSource::Run(line) => shlex::split(line)
                .ok_or_else(|| format!("cannot tokenize `run` command: {}", line))?,
            CommandSource::Shell(script) => {
                vec![SHELL.to_string(), "-c".to_string(), script.clone()]
            }
            CommandSource::Cmd { cmd, args } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(cmd.clone());
                argv.extend(args.iter().cloned());
                argv
            }
        };

        match args.first() {
            Some(first) if !first.is_empty() => Ok(args),
            _ => Err("command is empty".to_string()),
        }
    }
}

/// A resolved executable: argv, working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Executable {
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    pub cwd: PathBuf,
}

/// Resolution failure for a single service.
///
/// Kept on the service so that one broken service does not prevent the rest
/// of the manifest from loading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("executable does not exist: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("not executable: {}", .0.display())]
    ExecutableNotExecutable(PathBuf),

    #[error("working directory does not exist: {}", .0.display())]
    WorkingDirectoryNotFound(PathBuf),
}

impl ResolveError {
    /// Attach the service name, producing the crate-level error.
    pub fn for_service(&self, service: &str) -> ControlError {
        let service = service.to_string();
        match self.clone() {
            ResolveError::ExecutableNotFound(path) => {
                ControlError::ExecutableNotFound { service, path }
            }
            ResolveError::ExecutableNotExecutable(path) => {
                ControlError::ExecutableNotExecutable { service, path }
            }
            ResolveError::WorkingDirectoryNotFound(path) => {
                ControlError::WorkingDirectoryNotFound { service, path }
            }
        }
    }
}

/// Resolves argument vectors against a working directory and a search path.
#[derive(Debug, Clone)]
pub struct Resolver {
    search_path: Option<OsString>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Resolver {
    /// Resolver using the process `PATH`
    pub fn from_env() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
        }
    }

    /// Resolver using an explicit search path (`:`-separated like `PATH`)
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    /// Determine the working directory for a service.
    ///
    /// Relative `cwd` values are taken relative to `base` (the manifest directory).
    pub fn working_dir(
        &self,
        cwd: Option<&str>,
        base: &Path,
    ) -> std::result::Result<PathBuf, ResolveError> {
        match cwd {
            None => Ok(base.to_path_buf()),
            Some(dir) => {
                let joined = base.join(dir);
                match joined.canonicalize() {
                    Ok(path) if path.is_dir() => Ok(path),
                    _ => Err(ResolveError::WorkingDirectoryNotFound(joined)),
                }
            }
        }
    }

    /// Resolve `args[0]` to an absolute, existing, executable path.
    pub fn resolve(
        &self,
        mut args: Vec<String>,
        cwd: &Path,
    ) -> std::result::Result<Vec<String>, ResolveError> {
        if !is_executable(&cwd.join(&args[0]))
            && let Some(interpreter) = interpreter_for(&args[0])
        {
            debug!("Prepending interpreter '{}' for script {}", interpreter, args[0]);
            let script = absolute(&cwd.join(&args[0]));
            args[0] = path_to_string(script);
            args.insert(0, interpreter.to_string());
        }

        if !cwd.join(&args[0]).is_file() && !args[0].contains('/') {
            match which::which_in(&args[0], self.search_path.as_ref(), cwd) {
                Ok(found) => {
                    trace!("Found {} on search path at {:?}", args[0], found);
                    args[0] = path_to_string(found);
                }
                Err(e) => trace!("Search path lookup for {} failed: {}", args[0], e),
            }
        }

        let resolved = absolute(&cwd.join(&args[0]));
        if !resolved.is_file() {
            return Err(ResolveError::ExecutableNotFound(resolved));
        }
        if !is_executable(&resolved) {
            return Err(ResolveError::ExecutableNotExecutable(resolved));
        }

        args[0] = path_to_string(resolved);
        Ok(args)
    }
}

fn interpreter_for(program: &str) -> Option<&'static str> {
    INTERPRETERS
        .iter()
        .find(|(ext, _)| program.ends_with(ext))
        .map(|(_, interpreter)| *interpreter)
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

/// Canonical path when it exists, the joined path otherwise.
fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn path_to_string(path: PathBuf) -> String {
    path.into_os_string()
        .into_string()
        .unwrap_or_else(|os| os.to_string_lossy().into_owned())
}
