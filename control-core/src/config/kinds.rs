//! Service kinds and the `type` discriminator registry
//!
//! The `type` key of a service selects a [`KindDecoder`] from a
//! [`KindRegistry`]. The registry is passed in through
//! [`LoadOptions`](super::LoadOptions), so embedders can add discriminators
//! without touching global state.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

/// What kind of unit a service produces and how it is enabled
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceKind {
    /// No `type`: a one-shot service that is only started manually
    #[default]
    Plain,
    /// Long running, restarted on failure and enabled at boot
    Daemon,
    /// Triggered by a monotonic timer
    Periodic(PeriodicSchedule),
    /// Triggered by calendar expressions
    Cron(CronSchedule),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodicSchedule {
    pub interval: Option<String>,
    pub first_interval: Option<String>,
    pub random_delay: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronSchedule {
    pub expressions: Vec<String>,
    pub random_delay: Option<String>,
}

impl ServiceKind {
    /// The `type` discriminator, `None` for plain services
    pub fn name(&self) -> Option<&'static str> {
        match self {
            ServiceKind::Plain => None,
            ServiceKind::Daemon => Some("daemon"),
            ServiceKind::Periodic(_) => Some("periodic"),
            ServiceKind::Cron(_) => Some("cron"),
        }
    }

    pub fn is_daemon(&self) -> bool {
        matches!(self, ServiceKind::Daemon)
    }

    /// Whether a timer unit is synthesized for this kind.
    ///
    /// Periodic services need an `interval`, cron services at least one
    /// expression. Otherwise the service behaves like a plain one.
    pub fn has_timer(&self) -> bool {
        match self {
            ServiceKind::Periodic(schedule) => schedule.interval.is_some(),
            ServiceKind::Cron(schedule) => !schedule.expressions.is_empty(),
            ServiceKind::Plain | ServiceKind::Daemon => false,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("plain"))
    }
}

/// Schedule related values of a service declaration, already coerced to strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleFields {
    pub interval: Option<String>,
    pub first_interval: Option<String>,
    pub random_delay: Option<String>,
    pub cron: Option<Vec<String>>,
}

impl ScheduleFields {
    /// Names of the schedule keys that were given
    pub fn present_keys(&self) -> Vec<&'static str> {
        [
            ("interval", self.interval.is_some()),
            ("first_interval", self.first_interval.is_some()),
            ("random_delay", self.random_delay.is_some()),
            ("cron", self.cron.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| *present)
        .map(|(key, _)| key)
        .collect()
    }
}

/// Decodes the schedule fields of one `type` discriminator into a [`ServiceKind`].
pub trait KindDecoder: Send + Sync {
    /// Schedule keys this kind reads. Other schedule keys are reported as ignored.
    fn schedule_keys(&self) -> &'static [&'static str];

    fn decode(&self, fields: ScheduleFields) -> std::result::Result<ServiceKind, String>;
}

struct DaemonKind;

impl KindDecoder for DaemonKind {
    fn schedule_keys(&self) -> &'static [&'static str] {
        &[]
    }

    fn decode(&self, _fields: ScheduleFields) -> std::result::Result<ServiceKind, String> {
        Ok(ServiceKind::Daemon)
    }
}

struct PeriodicKind;

impl KindDecoder for PeriodicKind {
    fn schedule_keys(&self) -> &'static [&'static str] {
        &["interval", "first_interval", "random_delay"]
    }

    fn decode(&self, fields: ScheduleFields) -> std::result::Result<ServiceKind, String> {
        Ok(ServiceKind::Periodic(PeriodicSchedule {
            interval: fields.interval,
            first_interval: fields.first_interval,
            random_delay: fields.random_delay,
        }))
    }
}

struct CronKind;

impl KindDecoder for CronKind {
    fn schedule_keys(&self) -> &'static [&'static str] {
        &["cron", "random_delay"]
    }

    fn decode(&self, fields: ScheduleFields) -> std::result::Result<ServiceKind, String> {
        let expressions = fields.cron.unwrap_or_default();
        if let Some(blank) = expressions.iter().find(|e| e.trim().is_empty()) {
            return Err(format!("empty cron expression '{}'", blank));
        }
        Ok(ServiceKind::Cron(CronSchedule {
            expressions,
            random_delay: fields.random_delay,
        }))
    }
}

/// Maps `type` discriminators to their decoders
#[derive(Clone)]
pub struct KindRegistry {
    decoders: IndexMap<String, Arc<dyn KindDecoder>>,
}

impl KindRegistry {
    /// A registry with no discriminators at all
    pub fn empty() -> Self {
        Self {
            decoders: IndexMap::new(),
        }
    }

    /// Register (or replace) a discriminator.
    pub fn register(&mut self, name: impl Into<String>, decoder: Arc<dyn KindDecoder>) {
        self.decoders.insert(name.into(), decoder);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, name: impl Into<String>, decoder: Arc<dyn KindDecoder>) -> Self {
        self.register(name, decoder);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn KindDecoder>> {
        self.decoders.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::empty()
            .with("daemon", Arc::new(DaemonKind))
            .with("periodic", Arc::new(PeriodicKind))
            .with("cron", Arc::new(CronKind))
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}
