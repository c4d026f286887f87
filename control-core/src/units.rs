//! Unit file synthesis
//!
//! Every service produces a `.service` unit. Periodic and cron services with a
//! schedule also produce a `.timer` unit. Both carry an ownership line naming
//! the manifest, which is how `uninstall_all` finds units of a manifest that
//! are no longer declared.
//!
//! Output is deterministic so that installed units can be compared byte for
//! byte against freshly synthesized ones.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use crate::config::{Config, Service, ServiceKind};
use crate::errors::{ControlError, Result};

/// First line of every generated unit
pub const GENERATED_BY: &str = "# created by control";

/// Prefix of the ownership line, followed by the manifest path
pub const OWNERSHIP_PREFIX: &str = "# control.yaml=";

/// Oldest systemd release that understands `StartLimitIntervalSec=`
pub const START_LIMIT_INTERVAL_SEC_SINCE: u32 = 245;

/// Restart delay of daemon units, in seconds
pub const DAEMON_RESTART_SEC: u32 = 10;

const DEFAULT_USER: &str = "root";

/// The ownership line for a manifest path
pub fn ownership_marker(manifest: &Path) -> String {
    format!("{}{}", OWNERSHIP_PREFIX, manifest.display())
}

/// Whether unit text carries the exact ownership line of `manifest`.
pub fn is_owned_by(content: &str, manifest: &Path) -> bool {
    let marker = ownership_marker(manifest);
    content.lines().any(|line| line == marker)
}

/// The two unit kinds a service can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Service,
    Timer,
}

impl UnitKind {
    pub fn suffix(self) -> &'static str {
        match self {
            UnitKind::Service => "service",
            UnitKind::Timer => "timer",
        }
    }

    /// Kind of a unit file name, by suffix.
    pub fn of(unit: &str) -> Option<UnitKind> {
        if unit.ends_with(".service") {
            Some(UnitKind::Service)
        } else if unit.ends_with(".timer") {
            Some(UnitKind::Timer)
        } else {
            None
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// `{config.name}-{service.name}`
pub fn unit_stem(config: &Config, service: &Service) -> String {
    format!("{}-{}", config.name, service.name)
}

/// `{config.name}-{service.name}.service` or `.timer`
pub fn unit_name(config: &Config, service: &Service, kind: UnitKind) -> String {
    format!("{}.{}", unit_stem(config, service), kind.suffix())
}

/// Checks calendar expressions before they are written to a timer.
pub trait CalendarValidator {
    /// `Ok(false)` for an expression the supervisor rejects. `Err` only when the
    /// check itself could not run.
    fn validate_calendar_expression(&self, expression: &str) -> Result<bool>;
}

/// Synthesized unit text for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFiles {
    pub service: String,
    pub timer: Option<String>,
}

/// Builds unit text for the services of one manifest.
pub struct UnitSynthesizer<'a, V: CalendarValidator + ?Sized> {
    config: &'a Config,
    validator: &'a V,
    manager_version: Option<u32>,
}

impl<'a, V: CalendarValidator + ?Sized> UnitSynthesizer<'a, V> {
    pub fn new(config: &'a Config, validator: &'a V) -> Self {
        Self {
            config,
            validator,
            manager_version: None,
        }
    }

    /// Target a specific systemd release. Unknown releases are treated as current.
    pub fn with_manager_version(mut self, version: Option<u32>) -> Self {
        self.manager_version = version;
        self
    }

    pub fn synthesize(&self, service: &Service) -> Result<UnitFiles> {
        Ok(UnitFiles {
            service: self.service_unit(service)?,
            timer: self.timer_unit(service)?,
        })
    }

    pub fn service_unit(&self, service: &Service) -> Result<String> {
        let exec = service.executable()?;
        let stem = unit_stem(self.config, service);

        let mut unit = UnitWriter::new(&self.config.path);
        unit.section("Unit")
            .directive("Description", &stem)
            .directive("After", "syslog.target network.target");
        match self.manager_version {
            Some(v) if v < START_LIMIT_INTERVAL_SEC_SINCE => {
                unit.directive("StartLimitInterval", "0");
            }
            _ => {
                unit.directive("StartLimitIntervalSec", "0");
            }
        }

        unit.section("Service").directive("Type", "simple");
        if service.is_daemon() {
            unit.directive("Restart", "on-failure")
                .directive("RestartSec", &DAEMON_RESTART_SEC.to_string());
        } else {
            unit.directive("Restart", "no");
        }
        unit.directive("StandardOutput", "journal")
            .directive("StandardError", "journal")
            .directive("SyslogIdentifier", service.syslog.as_deref().unwrap_or(&stem))
            .directive("User", service.user.as_deref().unwrap_or(DEFAULT_USER))
            .directive("ExecStart", &exec_start(&service.name, &exec.args)?)
            .directive(
                "WorkingDirectory",
                &escape_specifiers(&exec.cwd.display().to_string()),
            );
        for (key, value) in &exec.env {
            unit.directive("Environment", &environment_assignment(key, value));
        }
        for (key, value) in service.limits.directives() {
            unit.directive(key, value);
        }
        if let Some(extra) = &service.systemd {
            unit.raw(extra);
        }

        if service.is_daemon() {
            unit.section("Install").directive("WantedBy", "multi-user.target");
        }

        Ok(unit.finish())
    }

    /// Timer unit text, `None` when the service has no schedule.
    pub fn timer_unit(&self, service: &Service) -> Result<Option<String>> {
        if !service.has_timer() {
            return Ok(None);
        }

        let mut unit = UnitWriter::new(&self.config.path);
        unit.section("Unit")
            .directive("Description", &unit_stem(self.config, service));
        unit.section("Timer");

        let random_delay = match &service.kind {
            ServiceKind::Periodic(schedule) => {
                if let Some(interval) = &schedule.interval {
                    unit.directive(
                        "OnActiveSec",
                        schedule.first_interval.as_deref().unwrap_or(interval),
                    )
                    .directive("OnUnitActiveSec", interval);
                }
                schedule.random_delay.as_deref()
            }
            ServiceKind::Cron(schedule) => {
                for expression in &schedule.expressions {
                    if !self.validator.validate_calendar_expression(expression)? {
                        return Err(ControlError::InvalidCalendar {
                            service: service.name.clone(),
                            expression: expression.clone(),
                        });
                    }
                    unit.directive("OnCalendar", expression);
                }
                schedule.random_delay.as_deref()
            }
            ServiceKind::Plain | ServiceKind::Daemon => None,
        };
        if let Some(delay) = random_delay {
            unit.directive("RandomizedDelaySec", delay);
        }
        if let Some(extra) = &service.systemd_timer {
            unit.raw(extra);
        }

        unit.section("Install").directive("WantedBy", "timers.target");
        Ok(Some(unit.finish()))
    }
}

/// Line oriented unit text builder
struct UnitWriter {
    out: String,
}

impl UnitWriter {
    fn new(manifest: &Path) -> Self {
        let mut out = String::new();
        out.push_str(GENERATED_BY);
        out.push('\n');
        out.push_str(&ownership_marker(manifest));
        out.push_str("\n\n");
        Self { out }
    }

    /// Start a section, separated from the previous one by a blank line.
    fn section(&mut self, name: &str) -> &mut Self {
        if !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
        self.out.push('[');
        self.out.push_str(name);
        self.out.push_str("]\n");
        self
    }

    fn directive(&mut self, key: &str, value: &str) -> &mut Self {
        self.out.push_str(key);
        self.out.push('=');
        self.out.push_str(value);
        self.out.push('\n');
        self
    }

    /// Append passthrough text verbatim, newline terminated.
    fn raw(&mut self, text: &str) -> &mut Self {
        self.out.push_str(text);
        if !text.ends_with('\n') {
            self.out.push('\n');
        }
        self
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Quote every argument for the shell, then escape systemd specifiers and
/// variable expansion.
fn exec_start(service: &str, args: &[String]) -> Result<String> {
    let quoted = args
        .iter()
        .map(|arg| {
            shlex::try_quote(arg).map_err(|e| {
                ControlError::Config(format!("service '{}': cannot quote {:?}: {}", service, arg, e))
            })
        })
        .collect::<Result<Vec<Cow<'_, str>>>>()?;
    Ok(escape_specifiers(&quoted.join(" ")).replace('$', "$$"))
}

/// `Environment=` value, double-quoted when it would otherwise be split.
fn environment_assignment(key: &str, value: &str) -> String {
    let assignment = escape_specifiers(&format!("{}={}", key, value));
    let needs_quotes = assignment
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\'));
    if needs_quotes {
        format!(
            "\"{}\"",
            assignment.replace('\\', "\\\\").replace('"', "\\\"")
        )
    } else {
        assignment
    }
}

fn escape_specifiers(text: &str) -> String {
    text.replace('%', "%%")
}

#[cfg(test)]
mod tests;
