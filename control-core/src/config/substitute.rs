//! `{name}` placeholder substitution
//!
//! Runs once over the raw `services` and `groups` trees, before they are
//! decoded. Only string values are rewritten, mapping keys are left alone.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde_yaml::Value;
use tracing::warn;

use super::ConfigWarning;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.-]*)\}").unwrap());

/// Replace every known `{name}` in `input`.
///
/// Unknown names are left literal and recorded as a warning, once per occurrence.
pub fn substitute_str(
    input: &str,
    env: &IndexMap<String, String>,
    location: &str,
    warnings: &mut Vec<ConfigWarning>,
) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            match env.get(name) {
                Some(value) => value.clone(),
                None => {
                    warn!("Unknown variable '{{{}}}' in {}", name, location);
                    warnings.push(ConfigWarning::UnknownVariable {
                        name: name.to_string(),
                        location: location.to_string(),
                    });
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Recursively substitute placeholders in all string values of `value`.
pub fn substitute_value(
    value: &mut Value,
    env: &IndexMap<String, String>,
    location: &str,
    warnings: &mut Vec<ConfigWarning>,
) {
    match value {
        Value::String(s) => {
            if PLACEHOLDER.is_match(s) {
                *s = substitute_str(s, env, location, warnings);
            }
        }
        Value::Sequence(seq) => {
            for (i, item) in seq.iter_mut().enumerate() {
                substitute_value(item, env, &format!("{}[{}]", location, i), warnings);
            }
        }
        Value::Mapping(map) => {
            for (key, item) in map.iter_mut() {
                let child = match key.as_str() {
                    Some(k) => format!("{}.{}", location, k),
                    None => format!("{}.{:?}", location, key),
                };
                substitute_value(item, env, &child, warnings);
            }
        }
        Value::Tagged(tagged) => substitute_value(&mut tagged.value, env, location, warnings),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
