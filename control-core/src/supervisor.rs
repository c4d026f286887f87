//! The supervisor seam
//!
//! Everything the engine asks of the OS service manager goes through
//! [`Supervisor`]. State queries return [`ActiveState`] / [`EnabledState`]
//! values; only unexpected failures are errors.

pub mod systemctl;

use std::fmt;

use crate::errors::Result;
use crate::units::CalendarValidator;

pub use systemctl::Systemctl;

/// Whether a unit is running, as reported by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    Active,
    Inactive,
    /// Stopped after a failure
    Failed,
    Unknown,
}

impl ActiveState {
    pub fn is_running(self) -> bool {
        matches!(self, ActiveState::Active)
    }
}

impl fmt::Display for ActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActiveState::Active => "active",
            ActiveState::Inactive => "inactive",
            ActiveState::Failed => "failed",
            ActiveState::Unknown => "unknown",
        })
    }
}

/// Whether a unit is enabled, as reported by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnabledState {
    Enabled,
    Disabled,
    Unknown,
}

impl EnabledState {
    pub fn is_enabled(self) -> bool {
        matches!(self, EnabledState::Enabled)
    }
}

impl fmt::Display for EnabledState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnabledState::Enabled => "enabled",
            EnabledState::Disabled => "disabled",
            EnabledState::Unknown => "unknown",
        })
    }
}

/// A running log tail
#[allow(async_fn_in_trait)]
pub trait LogTail {
    /// Wait for the tail to end on its own.
    async fn wait(&mut self) -> Result<()>;

    /// Ask the tail to end. Does not wait.
    fn terminate(&mut self) -> Result<()>;
}

/// Operations consumed from the OS service manager, addressed by unit file name
#[allow(async_fn_in_trait)]
pub trait Supervisor: CalendarValidator {
    type Tail: LogTail;

    async fn write_unit(&self, unit: &str, content: &str) -> Result<()>;

    /// Current unit file content, `None` if not installed
    async fn read_unit(&self, unit: &str) -> Result<Option<String>>;

    /// Remove a unit file. Missing files are not an error.
    async fn delete_unit(&self, unit: &str) -> Result<()>;

    /// `.service` and `.timer` unit file names in the unit directory, sorted
    async fn list_all_unit_names(&self) -> Result<Vec<String>>;

    async fn reload_units(&self) -> Result<()>;

    async fn enable(&self, unit: &str) -> Result<()>;
    async fn disable(&self, unit: &str) -> Result<()>;
    async fn start(&self, unit: &str) -> Result<()>;
    async fn stop(&self, unit: &str) -> Result<()>;
    async fn restart(&self, unit: &str) -> Result<()>;
    async fn reload(&self, unit: &str) -> Result<()>;

    async fn is_enabled(&self, unit: &str) -> Result<EnabledState>;
    async fn is_active(&self, unit: &str) -> Result<ActiveState>;

    /// Human readable status, shown when a transition fails
    async fn status_text(&self, unit: &str) -> Result<String>;

    /// Print logs of a unit to stdout. With `follow`, keep streaming until terminated.
    async fn tail_logs(&self, unit: &str, follow: bool) -> Result<Self::Tail>;

    /// Major version of the service manager, if it can be determined
    async fn manager_version(&self) -> Result<Option<u32>>;
}
