//! systemd backend
//!
//! Drives `systemctl`, `journalctl` and `systemd-analyze`, and manages unit
//! files in the unit directory. Mutating commands are prefixed with `sudo -n`
//! when not running as root. State queries run unprivileged.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};

use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, geteuid};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, trace};

use super::{ActiveState, EnabledState, LogTail, Supervisor};
use crate::errors::{ControlError, Result};
use crate::units::{CalendarValidator, UnitKind};

/// Standard directory for administrator supplied unit files
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// `systemctl is-active` exit code for an inactive or failed unit
const IS_ACTIVE_INACTIVE: i32 = 3;
/// `systemctl is-active` / `is-enabled` exit code for an unknown unit
const NO_SUCH_UNIT: i32 = 4;
/// `systemctl is-enabled` exit code for a disabled unit
const IS_ENABLED_DISABLED: i32 = 1;

#[derive(Debug, Clone)]
pub struct Systemctl {
    unit_dir: PathBuf,
    elevate: bool,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new()
    }
}

impl Systemctl {
    pub fn new() -> Self {
        Self {
            unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
            elevate: !geteuid().is_root(),
        }
    }

    pub fn with_unit_dir(mut self, unit_dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = unit_dir.into();
        self
    }

    /// Force `sudo -n` on or off for mutating commands.
    pub fn with_elevation(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    pub fn unit_dir(&self) -> &Path {
        &self.unit_dir
    }

    fn unit_path(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(unit)
    }

    /// Build a command, prefixed with `sudo -n` when elevated.
    fn command(&self, program: &str, args: &[&str], elevated: bool) -> Command {
        let mut cmd = if elevated && self.elevate {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args).stdin(Stdio::null());
        cmd
    }

    async fn output(&self, program: &str, args: &[&str], elevated: bool) -> Result<Output> {
        trace!("Running {} {}", program, args.join(" "));
        Ok(self
            .command(program, args, elevated)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?)
    }

    /// Run a mutating command and fail on any non-zero exit.
    async fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let output = self.output(program, args, true).await?;
        check(program, args, &output)
    }

    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        self.run("systemctl", args).await
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn supervisor_error(program: &str, args: &[&str], status: ExitStatus, stderr: &[u8]) -> ControlError {
    ControlError::Supervisor {
        command: command_line(program, args),
        code: status.code(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}

fn check(program: &str, args: &[&str], output: &Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(supervisor_error(program, args, output.status, &output.stderr))
    }
}

/// Parse the major version from `systemctl --version` output.
///
/// The first line looks like `systemd 252 (252.22-1~deb12u1)`.
pub fn parse_manager_version(output: &str) -> Option<u32> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// Runs `systemd-analyze calendar` synchronously, since synthesis is not async.
/// The call blocks the current runtime worker until the check returns.
impl CalendarValidator for Systemctl {
    fn validate_calendar_expression(&self, expression: &str) -> Result<bool> {
        let status = std::process::Command::new("systemd-analyze")
            .arg("calendar")
            .arg(expression)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        debug!("Calendar expression '{}' valid: {}", expression, status.success());
        Ok(status.success())
    }
}

impl Supervisor for Systemctl {
    type Tail = JournalTail;

    async fn write_unit(&self, unit: &str, content: &str) -> Result<()> {
        let path = self.unit_path(unit);
        debug!("Writing unit {}", path.display());
        if !self.elevate {
            tokio::fs::write(&path, content).await?;
            return Ok(());
        }

        let target = path.to_string_lossy();
        let args = [target.as_ref()];
        let mut child = self
            .command("tee", &args, true)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;
        check("tee", &args, &output)
    }

    async fn read_unit(&self, unit: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.unit_path(unit)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_unit(&self, unit: &str) -> Result<()> {
        let path = self.unit_path(unit);
        debug!("Deleting unit {}", path.display());
        if self.elevate {
            let target = path.to_string_lossy();
            return self.run("rm", &["-f", target.as_ref()]).await;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_all_unit_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.unit_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && UnitKind::of(name).is_some()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn reload_units(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"]).await
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        self.systemctl(&["enable", unit]).await
    }

    async fn disable(&self, unit: &str) -> Result<()> {
        self.systemctl(&["disable", unit]).await
    }

    async fn start(&self, unit: &str) -> Result<()> {
        self.systemctl(&["start", unit]).await
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.systemctl(&["stop", unit]).await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.systemctl(&["restart", unit]).await
    }

    async fn reload(&self, unit: &str) -> Result<()> {
        self.systemctl(&["reload", unit]).await
    }

    async fn is_enabled(&self, unit: &str) -> Result<EnabledState> {
        let args = ["is-enabled", unit];
        let output = self.output("systemctl", &args, false).await?;
        match output.status.code() {
            Some(0) => Ok(EnabledState::Enabled),
            Some(IS_ENABLED_DISABLED) => Ok(EnabledState::Disabled),
            Some(NO_SUCH_UNIT) => Ok(EnabledState::Unknown),
            _ => Err(supervisor_error("systemctl", &args, output.status, &output.stderr)),
        }
    }

    async fn is_active(&self, unit: &str) -> Result<ActiveState> {
        let args = ["is-active", unit];
        let output = self.output("systemctl", &args, false).await?;
        match output.status.code() {
            Some(0) => Ok(ActiveState::Active),
            Some(IS_ACTIVE_INACTIVE) => {
                if String::from_utf8_lossy(&output.stdout).trim() == "failed" {
                    Ok(ActiveState::Failed)
                } else {
                    Ok(ActiveState::Inactive)
                }
            }
            Some(NO_SUCH_UNIT) => Ok(ActiveState::Unknown),
            _ => Err(supervisor_error("systemctl", &args, output.status, &output.stderr)),
        }
    }

    async fn status_text(&self, unit: &str) -> Result<String> {
        // Non-zero exit only reports the unit state, the text is what matters.
        let output = self
            .output(
                "systemctl",
                &["--no-pager", "--no-ask-password", "status", unit],
                false,
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn tail_logs(&self, unit: &str, follow: bool) -> Result<JournalTail> {
        let mut args = vec!["--no-pager"];
        if follow {
            args.push("-f");
        }
        args.extend(["-u", unit]);
        let child = self
            .command("journalctl", &args, true)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(JournalTail {
            command: command_line("journalctl", &args),
            child,
            terminated: false,
        })
    }

    async fn manager_version(&self) -> Result<Option<u32>> {
        let output = self.output("systemctl", &["--version"], false).await?;
        let version = parse_manager_version(&String::from_utf8_lossy(&output.stdout));
        debug!("systemd version: {:?}", version);
        Ok(version)
    }
}

/// A `journalctl` child writing to our stdout
#[derive(Debug)]
pub struct JournalTail {
    command: String,
    child: Child,
    terminated: bool,
}

impl LogTail for JournalTail {
    async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        if status.success() || self.terminated {
            Ok(())
        } else {
            Err(ControlError::Supervisor {
                command: self.command.clone(),
                code: status.code(),
                stderr: String::new(),
            })
        }
    }

    fn terminate(&mut self) -> Result<()> {
        self.terminated = true;
        // SIGTERM rather than SIGKILL so that sudo relays it to journalctl
        if let Some(pid) = self.child.id() {
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
