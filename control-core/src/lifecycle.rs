//! Lifecycle state machine
//!
//! Idempotent install / enable / start operations layered on a [`Supervisor`].
//! No state is kept locally: every decision is made from what the supervisor
//! reports and what is on disk in its unit directory.
//!
//! ```text
//! not installed ──install──▶ installed ──enable──▶ enabled
//!       ▲                        │ ▲                  │
//!       └───────uninstall────────┘ └─────disable──────┘
//!
//!                 stopped ◀──stop── running ◀──start── stopped
//! ```

use std::time::Duration;

use futures::future::{join_all, select_all};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{Config, Service};
use crate::errors::{ControlError, Result};
use crate::supervisor::{ActiveState, LogTail, Supervisor};
use crate::units::{UnitFiles, UnitKind, UnitSynthesizer, is_owned_by, unit_name};

/// Wait between a start/stop and the follow-up state check
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Whether an operation had to act
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Performed,
    /// Already in the requested state
    Unchanged,
}

impl Transition {
    pub fn performed(self) -> bool {
        matches!(self, Transition::Performed)
    }
}

/// Enable state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enablement {
    Enabled,
    Disabled,
    /// Plain services have nothing to enable
    Static,
}

impl Enablement {
    /// Static services count as enabled: there is nothing left to do.
    pub fn is_enabled(self) -> bool {
        !matches!(self, Enablement::Disabled)
    }
}

/// Outcome of [`Lifecycle::install`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Unit files that were (re)written
    pub written: Vec<String>,
    /// Stale unit files that were removed
    pub removed: Vec<String>,
    pub enabled: Transition,
}

impl InstallReport {
    pub fn changed(&self) -> bool {
        !self.written.is_empty() || !self.removed.is_empty() || self.enabled.performed()
    }
}

/// State of one service as seen by the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub enabled: Enablement,
    pub active: ActiveState,
}

/// Result of running an operation over several services.
///
/// Failures do not stop the batch.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub completed: Vec<(String, T)>,
    pub failures: Vec<(String, ControlError)>,
}

impl<T> BatchReport<T> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

pub struct Lifecycle<'a, S: Supervisor> {
    config: &'a Config,
    supervisor: &'a S,
    settle: Duration,
    manager_version: OnceCell<Option<u32>>,
}

impl<'a, S: Supervisor> Lifecycle<'a, S> {
    pub fn new(config: &'a Config, supervisor: &'a S) -> Self {
        Self {
            config,
            supervisor,
            settle: DEFAULT_SETTLE_DELAY,
            manager_version: OnceCell::new(),
        }
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    fn unit(&self, service: &Service, kind: UnitKind) -> String {
        unit_name(self.config, service, kind)
    }

    /// Unit that `enable`/`disable` act on, `None` for plain services.
    fn enable_target(&self, service: &Service) -> Option<(String, UnitKind)> {
        if service.is_daemon() {
            Some((self.unit(service, UnitKind::Service), UnitKind::Service))
        } else if service.has_timer() {
            Some((self.unit(service, UnitKind::Timer), UnitKind::Timer))
        } else {
            None
        }
    }

    /// Synthesize the units of a service for the running service manager.
    pub async fn synthesize(&self, service: &Service) -> Result<UnitFiles> {
        let version = *self
            .manager_version
            .get_or_try_init(|| self.supervisor.manager_version())
            .await?;
        UnitSynthesizer::new(self.config, self.supervisor)
            .with_manager_version(version)
            .synthesize(service)
    }

    /// Run `op` for every service, collecting all results and all failures.
    pub async fn for_each<T>(
        &self,
        services: &[&Service],
        mut op: impl AsyncFnMut(&Self, &Service) -> Result<T>,
    ) -> BatchReport<T> {
        let mut report = BatchReport::default();
        for &service in services {
            match op(self, service).await {
                Ok(value) => report.completed.push((service.name.clone(), value)),
                Err(e) => {
                    debug!("Operation on {} failed: {}", service.name, e);
                    report.failures.push((service.name.clone(), e));
                }
            }
        }
        report
    }

    // ========================================================================
    // Install / uninstall
    // ========================================================================

    /// Write a unit unless the installed content is identical. Returns whether it wrote.
    async fn write_if_changed(&self, unit: &str, content: &str) -> Result<bool> {
        if self.supervisor.read_unit(unit).await?.as_deref() == Some(content) {
            debug!("Unit {} is up to date", unit);
            return Ok(false);
        }
        info!("Updating {}", unit);
        self.supervisor.write_unit(unit, content).await?;
        Ok(true)
    }

    /// Stop and disable, ignoring failures.
    async fn quiesce(&self, unit: &str) {
        if let Err(e) = self.supervisor.stop(unit).await {
            debug!("Ignoring failure to stop {}: {}", unit, e);
        }
        if let Err(e) = self.supervisor.disable(unit).await {
            debug!("Ignoring failure to disable {}: {}", unit, e);
        }
    }

    pub async fn install(&self, service: &Service) -> Result<InstallReport> {
        let units = self.synthesize(service).await?;
        let mut written = Vec::new();
        let mut removed = Vec::new();

        let service_unit = self.unit(service, UnitKind::Service);
        if self.write_if_changed(&service_unit, &units.service).await? {
            written.push(service_unit);
        }

        let timer_unit = self.unit(service, UnitKind::Timer);
        match &units.timer {
            Some(content) => {
                if self.write_if_changed(&timer_unit, content).await? {
                    written.push(timer_unit);
                }
            }
            None => {
                // The service lost its schedule since the last install
                if let Some(existing) = self.supervisor.read_unit(&timer_unit).await?
                    && is_owned_by(&existing, &self.config.path)
                {
                    info!("Removing stale {}", timer_unit);
                    self.quiesce(&timer_unit).await;
                    self.supervisor.delete_unit(&timer_unit).await?;
                    removed.push(timer_unit);
                }
            }
        }

        // Unchanged files may still be missing from the manager's index if an
        // earlier reload failed
        self.supervisor.reload_units().await?;
        let enabled = self.enable(service).await?;

        Ok(InstallReport {
            written,
            removed,
            enabled,
        })
    }

    /// Stop, disable and delete the units of a service. Safe on services that
    /// were never installed.
    pub async fn uninstall(&self, service: &Service) -> Result<Transition> {
        let mut removed = false;
        for kind in [UnitKind::Timer, UnitKind::Service] {
            let unit = self.unit(service, kind);
            if self.supervisor.read_unit(&unit).await?.is_none() {
                continue;
            }
            info!("Removing {}", unit);
            self.quiesce(&unit).await;
            self.supervisor.delete_unit(&unit).await?;
            removed = true;
        }

        if removed {
            self.supervisor.reload_units().await?;
            Ok(Transition::Performed)
        } else {
            Ok(Transition::Unchanged)
        }
    }

    /// Remove every unit in the unit directory that was generated from this
    /// manifest, declared or not. Timers go first. Returns the removed unit names.
    pub async fn uninstall_all(&self) -> Result<Vec<String>> {
        let mut owned = Vec::new();
        for unit in self.supervisor.list_all_unit_names().await? {
            match self.supervisor.read_unit(&unit).await {
                Ok(Some(content)) if is_owned_by(&content, &self.config.path) => owned.push(unit),
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable unit {}: {}", unit, e),
            }
        }
        owned.sort_by_key(|unit| UnitKind::of(unit) != Some(UnitKind::Timer));

        for unit in &owned {
            info!("Removing {}", unit);
            self.quiesce(unit).await;
            self.supervisor.delete_unit(unit).await?;
        }
        if !owned.is_empty() {
            self.supervisor.reload_units().await?;
        }
        Ok(owned)
    }

    // ========================================================================
    // Start / stop
    // ========================================================================

    pub async fn is_started(&self, service: &Service) -> Result<bool> {
        Ok(self.active_state(service).await?.is_running())
    }

    pub async fn active_state(&self, service: &Service) -> Result<ActiveState> {
        self.supervisor
            .is_active(&self.unit(service, UnitKind::Service))
            .await
    }

    pub async fn start(&self, service: &Service) -> Result<Transition> {
        let unit = self.unit(service, UnitKind::Service);
        if self.supervisor.is_active(&unit).await?.is_running() {
            return Ok(Transition::Unchanged);
        }

        info!("Starting {}", unit);
        self.supervisor.start(&unit).await?;
        tokio::time::sleep(self.settle).await;

        // One-shot services may already have finished, only a failure counts
        let state = self.supervisor.is_active(&unit).await?;
        let started = if service.is_daemon() {
            state.is_running()
        } else {
            state != ActiveState::Failed
        };
        if !started {
            return Err(self.transition_failed("start", unit).await);
        }
        Ok(Transition::Performed)
    }

    pub async fn stop(&self, service: &Service) -> Result<Transition> {
        let unit = self.unit(service, UnitKind::Service);
        if !self.supervisor.is_active(&unit).await?.is_running() {
            return Ok(Transition::Unchanged);
        }

        info!("Stopping {}", unit);
        self.supervisor.stop(&unit).await?;
        tokio::time::sleep(self.settle).await;

        if self.supervisor.is_active(&unit).await?.is_running() {
            return Err(self.transition_failed("stop", unit).await);
        }
        Ok(Transition::Performed)
    }

    async fn transition_failed(&self, action: &'static str, unit: String) -> ControlError {
        let status = match self.supervisor.status_text(&unit).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Could not query status of {}: {}", unit, e);
                String::new()
            }
        };
        ControlError::TransitionFailed {
            action,
            unit,
            status,
        }
    }

    pub async fn restart(&self, service: &Service) -> Result<Transition> {
        let unit = self.unit(service, UnitKind::Service);
        info!("Restarting {}", unit);
        self.supervisor.restart(&unit).await?;
        Ok(Transition::Performed)
    }

    pub async fn reload(&self, service: &Service) -> Result<Transition> {
        let unit = self.unit(service, UnitKind::Service);
        info!("Reloading {}", unit);
        self.supervisor.reload(&unit).await?;
        Ok(Transition::Performed)
    }

    // ========================================================================
    // Enable / disable
    // ========================================================================

    pub async fn is_enabled(&self, service: &Service) -> Result<Enablement> {
        match self.enable_target(service) {
            None => Ok(Enablement::Static),
            Some((unit, _)) => Ok(if self.supervisor.is_enabled(&unit).await?.is_enabled() {
                Enablement::Enabled
            } else {
                Enablement::Disabled
            }),
        }
    }

    /// Daemons enable their service unit. Scheduled services enable and start
    /// their timer.
    pub async fn enable(&self, service: &Service) -> Result<Transition> {
        let Some((unit, kind)) = self.enable_target(service) else {
            return Ok(Transition::Unchanged);
        };
        if self.supervisor.is_enabled(&unit).await?.is_enabled() {
            return Ok(Transition::Unchanged);
        }

        info!("Enabling {}", unit);
        self.supervisor.enable(&unit).await?;
        if kind == UnitKind::Timer {
            self.supervisor.start(&unit).await?;
        }
        Ok(Transition::Performed)
    }

    pub async fn disable(&self, service: &Service) -> Result<Transition> {
        let Some((unit, kind)) = self.enable_target(service) else {
            return Ok(Transition::Unchanged);
        };
        if !self.supervisor.is_enabled(&unit).await?.is_enabled() {
            return Ok(Transition::Unchanged);
        }

        info!("Disabling {}", unit);
        if kind == UnitKind::Timer {
            self.supervisor.stop(&unit).await?;
        }
        self.supervisor.disable(&unit).await?;
        Ok(Transition::Performed)
    }

    // ========================================================================
    // Status and logs
    // ========================================================================

    pub async fn status(&self, service: &Service) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            name: service.name.clone(),
            enabled: self.is_enabled(service).await?,
            active: self.active_state(service).await?,
        })
    }

    /// The supervisor's own status report for the service unit
    pub async fn full_status(&self, service: &Service) -> Result<String> {
        self.supervisor
            .status_text(&self.unit(service, UnitKind::Service))
            .await
    }

    /// Print the logs of each service, one after another.
    pub async fn show_logs(&self, services: &[&Service]) -> Result<()> {
        for service in services {
            let mut tail = self
                .supervisor
                .tail_logs(&self.unit(service, UnitKind::Service), false)
                .await?;
            tail.wait().await?;
        }
        Ok(())
    }

    /// Follow the logs of all services at once. Ends when the first tail ends,
    /// terminating and reaping the others.
    pub async fn follow_logs(&self, services: &[&Service]) -> Result<()> {
        let mut tails = Vec::with_capacity(services.len());
        for service in services {
            let unit = self.unit(service, UnitKind::Service);
            match self.supervisor.tail_logs(&unit, true).await {
                Ok(tail) => tails.push(tail),
                Err(e) => {
                    stop_tails(&mut tails, None).await;
                    return Err(e);
                }
            }
        }
        if tails.is_empty() {
            return Ok(());
        }

        let (first, index) = {
            let waits = tails.iter_mut().map(|tail| Box::pin(tail.wait()));
            let (result, index, _pending) = select_all(waits).await;
            (result, index)
        };
        debug!("Log tail {} ended, stopping the others", index);
        stop_tails(&mut tails, Some(index)).await;
        first
    }
}

/// Terminate and reap every tail except `skip`.
async fn stop_tails<T: LogTail>(tails: &mut [T], skip: Option<usize>) {
    for (i, tail) in tails.iter_mut().enumerate() {
        if Some(i) != skip
            && let Err(e) = tail.terminate()
        {
            debug!("Failed to terminate log tail: {}", e);
        }
    }
    let waits = tails
        .iter_mut()
        .enumerate()
        .filter(|(i, _)| Some(*i) != skip)
        .map(|(_, tail)| tail.wait());
    for result in join_all(waits).await {
        if let Err(e) = result {
            debug!("Log tail ended with error: {}", e);
        }
    }
}
