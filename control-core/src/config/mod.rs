//! Manifest model for control
//!
//! This module provides:
//! - `Config` - the loaded `control.yaml` manifest
//! - `Service` - one declared service with its resolved executable
//! - `LoadOptions` - strictness, kind registry and executable resolver used while loading
//!
//! Loading is a single pass: structural checks on the top level, `{name}`
//! substitution, typed decoding per service, executable resolution per service
//! and finally group validation.

mod groups;
mod kinds;
mod resources;
mod scalar;
mod substitute;

pub use kinds::{
    CronSchedule, KindDecoder, KindRegistry, PeriodicSchedule, ScheduleFields,
    ServiceKind,
};
pub use resources::{ResourceLimits, SysEnvPolicy};
pub use scalar::{OneOrMany, Scalar};
pub use substitute::{substitute_str, substitute_value};

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::errors::{ControlError, Result};
use crate::exec::{CommandSource, Executable, ResolveError, Resolver};

/// The only accepted value of the top-level `version` key
pub const MANIFEST_VERSION: &str = "https://github.com/mo22/control";

/// Selector matching every service
pub const ALL: &str = "all";

/// Default manifest file names, in lookup order
pub const MANIFEST_FILE_NAMES: &[&str] = &["control.yaml", "control.yml"];

const SERVICE_KEYS: &[&str] = &[
    "run",
    "shell",
    "cmd",
    "args",
    "env",
    "cwd",
    "user",
    "type",
    "systemd",
    "systemd_timer",
    "interval",
    "first_interval",
    "random_delay",
    "cron",
    "max_cpu",
    "max_memory",
    "max_time",
    "nofile",
    "syslog",
];

// ============================================================================
// Warnings and load options
// ============================================================================

/// A non-fatal finding collected while loading a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A `{name}` placeholder without a matching `env` entry
    UnknownVariable { name: String, location: String },
    /// A key that is not part of the manifest format
    UnknownKey { key: String, location: String },
    /// A schedule key that the service's kind does not use
    IgnoredKey {
        key: String,
        service: String,
        kind: String,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::UnknownVariable { name, location } => {
                write!(f, "unknown variable '{{{}}}' in {}", name, location)
            }
            ConfigWarning::UnknownKey { key, location } => {
                write!(f, "unknown key '{}' in {}", key, location)
            }
            ConfigWarning::IgnoredKey { key, service, kind } => write!(
                f,
                "key '{}' is ignored for service '{}' of type {}",
                key, service, kind
            ),
        }
    }
}

/// Knobs for [`Config::load_with`]
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Turn unknown keys into schema errors instead of warnings
    pub deny_unknown_keys: bool,
    /// Decoders for the `type` discriminator
    pub kinds: KindRegistry,
    /// Executable lookup used for every service
    pub resolver: Resolver,
}

impl LoadOptions {
    pub fn strict() -> Self {
        Self {
            deny_unknown_keys: true,
            ..Default::default()
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// One declared service.
///
/// The executable is resolved while loading. A failure is stored instead of
/// aborting the load, and is reported by every operation that needs the argv.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub kind: ServiceKind,
    pub exec: std::result::Result<Executable, ResolveError>,
    pub user: Option<String>,
    pub limits: ResourceLimits,
    pub systemd: Option<String>,
    pub systemd_timer: Option<String>,
    pub syslog: Option<String>,
}

impl Service {
    /// The resolved executable, or the resolution error for this service.
    pub fn executable(&self) -> Result<&Executable> {
        self.exec.as_ref().map_err(|e| e.for_service(&self.name))
    }

    pub fn is_daemon(&self) -> bool {
        self.kind.is_daemon()
    }

    pub fn has_timer(&self) -> bool {
        self.kind.has_timer()
    }
}

impl Serialize for Service {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        if let Some(kind) = self.kind.name() {
            map.serialize_entry("type", kind)?;
        }
        match &self.kind {
            ServiceKind::Periodic(schedule) => {
                if let Some(v) = &schedule.interval {
                    map.serialize_entry("interval", v)?;
                }
                if let Some(v) = &schedule.first_interval {
                    map.serialize_entry("first_interval", v)?;
                }
                if let Some(v) = &schedule.random_delay {
                    map.serialize_entry("random_delay", v)?;
                }
            }
            ServiceKind::Cron(schedule) => {
                if !schedule.expressions.is_empty() {
                    map.serialize_entry("cron", &schedule.expressions)?;
                }
                if let Some(v) = &schedule.random_delay {
                    map.serialize_entry("random_delay", v)?;
                }
            }
            ServiceKind::Plain | ServiceKind::Daemon => {}
        }
        match &self.exec {
            Ok(exec) => {
                map.serialize_entry("args", &exec.args)?;
                if !exec.env.is_empty() {
                    map.serialize_entry("env", &exec.env)?;
                }
                map.serialize_entry("cwd", &exec.cwd)?;
            }
            Err(e) => map.serialize_entry("error", &e.to_string())?,
        }
        if let Some(user) = &self.user {
            map.serialize_entry("user", user)?;
        }
        for (key, value) in [
            ("max_cpu", &self.limits.max_cpu),
            ("max_memory", &self.limits.max_memory),
            ("max_time", &self.limits.max_time),
            ("nofile", &self.limits.nofile),
        ] {
            if let Some(value) = value {
                map.serialize_entry(key, value)?;
            }
        }
        for (key, value) in [
            ("systemd", &self.systemd),
            ("systemd_timer", &self.systemd_timer),
            ("syslog", &self.syslog),
        ] {
            if let Some(value) = value {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// `syslog: false` and `syslog: true` are accepted and mean "default identifier".
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SyslogSetting {
    Flag(bool),
    Identifier(String),
}

/// A service declaration as written, after substitution
#[derive(Debug, Deserialize)]
struct RawService {
    run: Option<String>,
    shell: Option<String>,
    cmd: Option<String>,
    args: Option<Vec<Scalar>>,
    #[serde(default)]
    env: IndexMap<String, Scalar>,
    cwd: Option<String>,
    user: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    systemd: Option<String>,
    systemd_timer: Option<String>,
    interval: Option<Scalar>,
    first_interval: Option<Scalar>,
    random_delay: Option<Scalar>,
    cron: Option<OneOrMany>,
    #[serde(flatten)]
    limits: ResourceLimits,
    syslog: Option<SyslogSetting>,
}

impl RawService {
    fn into_service(
        self,
        name: &str,
        manifest_path: &Path,
        base: &Path,
        options: &LoadOptions,
        warnings: &mut Vec<ConfigWarning>,
    ) -> Result<Service> {
        let schedule = ScheduleFields {
            interval: self.interval.map(Scalar::into_inner),
            first_interval: self.first_interval.map(Scalar::into_inner),
            random_delay: self.random_delay.map(Scalar::into_inner),
            cron: self.cron.map(OneOrMany::into_vec),
        };
        let kind = decode_kind(
            name,
            self.kind.as_deref(),
            schedule,
            manifest_path,
            options,
            warnings,
        )?;

        let source = CommandSource::from_fields(
            self.run,
            self.shell,
            self.cmd,
            self.args
                .map(|args| args.into_iter().map(Scalar::into_inner).collect()),
        )
        .map_err(|e| ControlError::Config(format!("service '{}': {}", name, e)))?;
        let args = source
            .tokenize()
            .map_err(|e| ControlError::Config(format!("service '{}': {}", name, e)))?;

        let env: IndexMap<String, String> = self
            .env
            .into_iter()
            .map(|(k, v)| (k, v.into_inner()))
            .collect();

        let exec = options
            .resolver
            .working_dir(self.cwd.as_deref(), base)
            .and_then(|cwd| {
                let args = options.resolver.resolve(args, &cwd)?;
                Ok(Executable { args, env, cwd })
            });
        if let Err(e) = &exec {
            warn!("Service '{}': {}", name, e);
        }

        Ok(Service {
            name: name.to_string(),
            kind,
            exec,
            user: self.user,
            limits: self.limits,
            systemd: self.systemd,
            systemd_timer: self.systemd_timer,
            syslog: match self.syslog {
                Some(SyslogSetting::Identifier(id)) => Some(id),
                Some(SyslogSetting::Flag(_)) | None => None,
            },
        })
    }
}

fn decode_kind(
    service: &str,
    discriminator: Option<&str>,
    fields: ScheduleFields,
    manifest_path: &Path,
    options: &LoadOptions,
    warnings: &mut Vec<ConfigWarning>,
) -> Result<ServiceKind> {
    let (kind_name, used_keys, decoder) = match discriminator {
        None => ("plain", &[][..], None),
        Some(t) => {
            let decoder = options.kinds.get(t).ok_or_else(|| ControlError::Schema {
                path: manifest_path.to_path_buf(),
                message: format!(
                    "service '{}': unknown type '{}' (expected one of: {})",
                    service,
                    t,
                    options.kinds.names().collect::<Vec<_>>().join(", ")
                ),
            })?;
            (t, decoder.schedule_keys(), Some(decoder))
        }
    };

    for key in fields.present_keys() {
        if !used_keys.contains(&key) {
            warn!(
                "Service '{}': key '{}' is ignored for type {}",
                service, key, kind_name
            );
            warnings.push(ConfigWarning::IgnoredKey {
                key: key.to_string(),
                service: service.to_string(),
                kind: kind_name.to_string(),
            });
        }
    }

    match decoder {
        None => Ok(ServiceKind::Plain),
        Some(decoder) => decoder.decode(fields).map_err(|message| ControlError::Schema {
            path: manifest_path.to_path_buf(),
            message: format!("service '{}': {}", service, message),
        }),
    }
}

/// Validate a service, group or manifest name used in unit names.
fn validate_name(what: &str, name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err(format!("{} name cannot be empty", what));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(format!(
            "{} name '{}' contains invalid characters. Only letters, digits, '_', '-', '.' and ':' are allowed.",
            what, name
        ));
    }
    Ok(())
}

// ============================================================================
// Config
// ============================================================================

/// A loaded manifest
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub name: String,
    pub version: String,
    /// Absolute path of the manifest, embedded in every unit as ownership marker
    pub path: PathBuf,
    pub services: IndexMap<String, Service>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub groups: IndexMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(skip)]
    pub warnings: Vec<ConfigWarning>,
}

impl Config {
    /// Maximum manifest size (10 MiB)
    pub const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

    /// Load a manifest with default options.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, &LoadOptions::default())
    }

    /// Load a manifest.
    ///
    /// Only reads the filesystem: the manifest itself and the paths touched by
    /// executable resolution.
    pub fn load_with(path: &Path, options: &LoadOptions) -> Result<Self> {
        // Check file size before reading to prevent OOM
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ControlError::ConfigNotFound(path.to_path_buf())
            } else {
                ControlError::Io(e)
            }
        })?;
        if metadata.len() > Self::MAX_CONFIG_FILE_SIZE {
            return Err(ControlError::Config(format!(
                "Manifest '{}' is too large ({} bytes, max {} bytes)",
                path.display(),
                metadata.len(),
                Self::MAX_CONFIG_FILE_SIZE,
            )));
        }

        let path = path.canonicalize()?;
        let contents = std::fs::read_to_string(&path)?;
        Self::from_yaml_str(&contents, &path, options)
    }

    /// Parse manifest text that was read from `path`.
    ///
    /// `path` should be absolute. Its parent directory is the default working
    /// directory of every service.
    pub fn from_yaml_str(contents: &str, path: &Path, options: &LoadOptions) -> Result<Self> {
        let schema = |message: String| ControlError::Schema {
            path: path.to_path_buf(),
            message,
        };
        let base = path.parent().unwrap_or(Path::new("/")).to_path_buf();
        let mut warnings = Vec::new();

        // Step 1: Parse the whole document to a raw Value
        let de = serde_yaml::Deserializer::from_str(contents);
        let mut root: Value =
            serde_path_to_error::deserialize(de).map_err(|e| ControlError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        let root_map = root
            .as_mapping_mut()
            .ok_or_else(|| schema("manifest must be a YAML mapping".to_string()))?;

        // Step 2: Required identity keys
        let name = match root_map.remove("name") {
            Some(Value::String(name)) => name,
            Some(_) => return Err(schema("`name` must be a string".to_string())),
            None => return Err(schema("missing required key `name`".to_string())),
        };
        validate_name("Manifest", &name).map_err(&schema)?;

        let version = match root_map.remove("version") {
            Some(Value::String(version)) => version,
            Some(_) => return Err(schema("`version` must be a string".to_string())),
            None => return Err(schema("missing required key `version`".to_string())),
        };
        if version != MANIFEST_VERSION {
            return Err(schema(format!(
                "unsupported version '{}' (expected '{}')",
                version, MANIFEST_VERSION
            )));
        }

        // Step 3: Manifest variables
        let env: IndexMap<String, String> = match root_map.remove("env") {
            None | Some(Value::Null) => IndexMap::new(),
            Some(value) => decode_section::<IndexMap<String, Scalar>>(value, "env")
                .map_err(&schema)?
                .into_iter()
                .map(|(k, v)| (k, v.into_inner()))
                .collect(),
        };

        // Step 4: Raw services and groups, checked for shape only
        let mut services_value = match root_map.remove("services") {
            None | Some(Value::Null) => Value::Mapping(Mapping::new()),
            Some(value @ Value::Mapping(_)) => value,
            Some(_) => return Err(schema("`services` must be a mapping".to_string())),
        };
        let mut groups_value = match root_map.remove("groups") {
            None | Some(Value::Null) => Value::Mapping(Mapping::new()),
            Some(value @ Value::Mapping(_)) => value,
            Some(_) => return Err(schema("`groups` must be a mapping".to_string())),
        };

        for key in root_map.keys() {
            report_unknown_key(key, "top level", path, options, &mut warnings)?;
        }

        // Step 5: Substitute {name} placeholders before anything looks at the values
        substitute_value(&mut services_value, &env, "services", &mut warnings);
        substitute_value(&mut groups_value, &env, "groups", &mut warnings);

        let groups: IndexMap<String, Vec<String>> =
            decode_section(groups_value, "groups").map_err(&schema)?;
        for group in groups.keys() {
            validate_name("Group", group).map_err(&schema)?;
            if group == ALL {
                return Err(schema(format!("'{}' is reserved and cannot name a group", ALL)));
            }
        }

        // Step 6: Decode and resolve every service
        let services_map = match services_value {
            Value::Mapping(map) => map,
            _ => Mapping::new(),
        };
        let mut services = IndexMap::with_capacity(services_map.len());
        for (key, value) in services_map {
            let service_name = key
                .as_str()
                .ok_or_else(|| schema("service names must be strings".to_string()))?
                .to_string();
            validate_name("Service", &service_name).map_err(&schema)?;
            if service_name == ALL {
                return Err(schema(format!("'{}' is reserved and cannot name a service", ALL)));
            }

            let mapping = value.as_mapping().ok_or_else(|| {
                schema(format!("service '{}' must be a mapping", service_name))
            })?;
            let location = format!("service '{}'", service_name);
            for key in mapping.keys() {
                let known = key.as_str().is_some_and(|k| SERVICE_KEYS.contains(&k));
                if !known {
                    report_unknown_key(key, &location, path, options, &mut warnings)?;
                }
            }

            let raw: RawService = serde_path_to_error::deserialize(value).map_err(|e| {
                schema(format!(
                    "service '{}' at {}: {}",
                    service_name,
                    e.path(),
                    e.inner()
                ))
            })?;
            let service = raw.into_service(&service_name, path, &base, options, &mut warnings)?;
            debug!("Loaded service '{}' ({})", service_name, service.kind);
            services.insert(service_name, service);
        }

        let config = Config {
            name,
            version,
            path: path.to_path_buf(),
            services,
            groups,
            env,
            warnings,
        };

        // Step 7: Group membership must be acyclic
        config.validate_groups()?;

        Ok(config)
    }

    /// Directory containing the manifest
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    /// Find the manifest in `start` or one of its parent directories.
    pub fn find_manifest(start: &Path) -> Option<PathBuf> {
        start.ancestors().find_map(|dir| {
            MANIFEST_FILE_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
    }
}

fn decode_section<T: serde::de::DeserializeOwned>(
    value: Value,
    section: &str,
) -> std::result::Result<T, String> {
    serde_path_to_error::deserialize(value).map_err(|e| {
        let at = e.path().to_string();
        if at.is_empty() || at == "." {
            format!("{}: {}", section, e.inner())
        } else {
            format!("{}.{}: {}", section, at, e.inner())
        }
    })
}

fn report_unknown_key(
    key: &Value,
    location: &str,
    path: &Path,
    options: &LoadOptions,
    warnings: &mut Vec<ConfigWarning>,
) -> Result<()> {
    let key = match key.as_str() {
        Some(k) => k.to_string(),
        None => format!("{:?}", key),
    };
    if options.deny_unknown_keys {
        return Err(ControlError::Schema {
            path: path.to_path_buf(),
            message: format!("unknown key '{}' in {}", key, location),
        });
    }
    warn!("Unknown key '{}' in {}", key, location);
    warnings.push(ConfigWarning::UnknownKey {
        key,
        location: location.to_string(),
    });
    Ok(())
}
