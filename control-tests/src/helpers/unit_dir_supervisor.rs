//! A supervisor that manages real unit files without systemd
//!
//! Unit files go through the systemd backend's own file handling, pointed at
//! a temporary directory. Enable and run state is simulated in memory and
//! every state-changing call is recorded.

use control_core::errors::{ControlError, Result};
use control_core::supervisor::{ActiveState, EnabledState, LogTail, Supervisor, Systemctl};
use control_core::units::CalendarValidator;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct UnitDirSupervisor {
    files: Systemctl,
    version: Option<u32>,
    enabled: Mutex<HashSet<String>>,
    active: Mutex<HashSet<String>>,
    rejected_calendars: Mutex<HashSet<String>>,
    /// Units whose state queries fail with an unrecognised answer
    broken: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    writes: AtomicUsize,
    reloads: AtomicUsize,
}

impl UnitDirSupervisor {
    pub fn new(unit_dir: &Path) -> Self {
        Self {
            files: Systemctl::new()
                .with_unit_dir(unit_dir)
                .with_elevation(false),
            version: Some(252),
            enabled: Mutex::new(HashSet::new()),
            active: Mutex::new(HashSet::new()),
            rejected_calendars: Mutex::new(HashSet::new()),
            broken: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
        }
    }

    /// Report this service manager version
    pub fn with_version(mut self, version: Option<u32>) -> Self {
        self.version = version;
        self
    }

    pub fn reject_calendar(&self, expression: &str) {
        self.rejected_calendars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(expression.to_string());
    }

    /// Make `is-enabled` and `is-active` fail for a unit
    pub fn break_queries(&self, unit: &str) {
        self.broken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(unit.to_string());
    }

    fn check_query(&self, query: &str, unit: &str) -> Result<()> {
        if self
            .broken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(unit)
        {
            return Err(ControlError::Supervisor {
                command: format!("systemctl {} {}", query, unit),
                code: Some(4),
                stderr: "unrecognised state".to_string(),
            });
        }
        Ok(())
    }

    pub fn unit_dir(&self) -> &Path {
        self.files.unit_dir()
    }

    /// Content of a unit file, if present
    pub fn unit(&self, unit: &str) -> Option<String> {
        std::fs::read_to_string(self.unit_dir().join(unit)).ok()
    }

    /// Names of all files in the unit directory, sorted
    pub fn unit_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.unit_dir())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn reset_counters(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.writes.store(0, Ordering::SeqCst);
        self.reloads.store(0, Ordering::SeqCst);
    }

    pub fn is_unit_enabled(&self, unit: &str) -> bool {
        self.enabled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(unit)
    }

    pub fn is_unit_active(&self, unit: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(unit)
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn require_unit(&self, action: &str, unit: &str) -> Result<()> {
        if self.unit_dir().join(unit).is_file() {
            Ok(())
        } else {
            Err(ControlError::Supervisor {
                command: format!("systemctl {} {}", action, unit),
                code: Some(5),
                stderr: format!("Unit {} not found.", unit),
            })
        }
    }

    fn set(&self, set: &Mutex<HashSet<String>>, unit: &str, present: bool) {
        let mut set = set.lock().unwrap_or_else(|e| e.into_inner());
        if present {
            set.insert(unit.to_string());
        } else {
            set.remove(unit);
        }
    }
}

impl CalendarValidator for UnitDirSupervisor {
    fn validate_calendar_expression(&self, expression: &str) -> Result<bool> {
        Ok(!self
            .rejected_calendars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(expression))
    }
}

/// A log tail that has already ended
pub struct FinishedTail;

impl LogTail for FinishedTail {
    async fn wait(&mut self) -> Result<()> {
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Supervisor for UnitDirSupervisor {
    type Tail = FinishedTail;

    async fn write_unit(&self, unit: &str, content: &str) -> Result<()> {
        self.record(format!("write {}", unit));
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files.write_unit(unit, content).await
    }

    async fn read_unit(&self, unit: &str) -> Result<Option<String>> {
        self.files.read_unit(unit).await
    }

    async fn delete_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("delete {}", unit));
        self.set(&self.enabled, unit, false);
        self.set(&self.active, unit, false);
        self.files.delete_unit(unit).await
    }

    async fn list_all_unit_names(&self) -> Result<Vec<String>> {
        self.files.list_all_unit_names().await
    }

    async fn reload_units(&self) -> Result<()> {
        self.record("daemon-reload".to_string());
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        self.record(format!("enable {}", unit));
        self.require_unit("enable", unit)?;
        self.set(&self.enabled, unit, true);
        Ok(())
    }

    async fn disable(&self, unit: &str) -> Result<()> {
        self.record(format!("disable {}", unit));
        self.set(&self.enabled, unit, false);
        Ok(())
    }

    async fn start(&self, unit: &str) -> Result<()> {
        self.record(format!("start {}", unit));
        self.require_unit("start", unit)?;
        self.set(&self.active, unit, true);
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.record(format!("stop {}", unit));
        self.set(&self.active, unit, false);
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.record(format!("restart {}", unit));
        self.require_unit("restart", unit)?;
        self.set(&self.active, unit, true);
        Ok(())
    }

    async fn reload(&self, unit: &str) -> Result<()> {
        self.record(format!("reload {}", unit));
        self.require_unit("reload", unit)
    }

    async fn is_enabled(&self, unit: &str) -> Result<EnabledState> {
        self.check_query("is-enabled", unit)?;
        if self.is_unit_enabled(unit) {
            Ok(EnabledState::Enabled)
        } else if self.unit_dir().join(unit).is_file() {
            Ok(EnabledState::Disabled)
        } else {
            Ok(EnabledState::Unknown)
        }
    }

    async fn is_active(&self, unit: &str) -> Result<ActiveState> {
        self.check_query("is-active", unit)?;
        if self.is_unit_active(unit) {
            Ok(ActiveState::Active)
        } else if self.unit_dir().join(unit).is_file() {
            Ok(ActiveState::Inactive)
        } else {
            Ok(ActiveState::Unknown)
        }
    }

    async fn status_text(&self, unit: &str) -> Result<String> {
        let state = self.is_active(unit).await?;
        Ok(format!("{} - {}\n", unit, state))
    }

    async fn tail_logs(&self, unit: &str, follow: bool) -> Result<FinishedTail> {
        self.record(format!("journal {} {}", unit, follow));
        Ok(FinishedTail)
    }

    async fn manager_version(&self) -> Result<Option<u32>> {
        Ok(self.version)
    }
}

#[cfg(test)]
mod tests;
