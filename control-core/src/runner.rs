//! Run a service in the foreground, outside the supervisor.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{Service, SysEnvPolicy};
use crate::errors::{ControlError, Result};
use crate::exec::Executable;

/// Build the command for an executable, stdio inherited.
pub fn command(exec: &Executable, policy: SysEnvPolicy) -> Result<Command> {
    let (program, args) = exec
        .args
        .split_first()
        .ok_or_else(|| ControlError::Config("command is empty".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&exec.cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if policy == SysEnvPolicy::Clear {
        cmd.env_clear();
    }
    cmd.envs(&exec.env);
    Ok(cmd)
}

/// Shell style exit code: the exit status, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Run the service until it exits and return its exit code.
///
/// Ctrl-C is forwarded to the child as SIGTERM; the child decides when to exit.
pub async fn run_foreground(service: &Service, policy: SysEnvPolicy) -> Result<i32> {
    let exec = service.executable()?;
    info!("Running {}: {}", service.name, exec.args.join(" "));
    let mut child = command(exec, policy)?.spawn()?;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                debug!("{} exited with {}", service.name, status);
                return Ok(exit_code(status));
            }
            interrupted = tokio::signal::ctrl_c() => {
                interrupted?;
                if let Some(pid) = child.id() {
                    debug!("Forwarding SIGTERM to {}", pid);
                    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)?;
                }
            }
        }
    }
}
