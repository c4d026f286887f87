//! Resource limits and system environment policy configuration

use serde::{Deserialize, Deserializer};

use super::scalar::Scalar;

/// Resource limits for a service unit.
///
/// Values are opaque: they are written in the supervisor's own syntax and not
/// interpreted here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct ResourceLimits {
    /// CPU quota (e.g., "50%")
    #[serde(default, deserialize_with = "optional_scalar", skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<String>,
    /// Memory ceiling (e.g., "512M", "1G")
    #[serde(default, deserialize_with = "optional_scalar", skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<String>,
    /// Maximum runtime (e.g., "3600", "1h")
    #[serde(default, deserialize_with = "optional_scalar", skip_serializing_if = "Option::is_none")]
    pub max_time: Option<String>,
    /// Maximum number of open file descriptors
    #[serde(default, deserialize_with = "optional_scalar", skip_serializing_if = "Option::is_none")]
    pub nofile: Option<String>,
}

impl ResourceLimits {
    /// Unit directives for the limits that are set, in a fixed order.
    pub fn directives(&self) -> Vec<(&'static str, &str)> {
        [
            ("CPUQuota", &self.max_cpu),
            ("MemoryMax", &self.max_memory),
            ("RuntimeMaxSec", &self.max_time),
            ("LimitNOFILE", &self.nofile),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }
}

fn optional_scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_inner))
}

/// System environment inheritance policy for foreground runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SysEnvPolicy {
    /// Start from an empty environment, only pass the service's own variables
    Clear,
    /// Inherit the environment of the invoking process
    #[default]
    Inherit,
}
