//! Lenient scalar values
//!
//! Manifest authors write `port: 8080` as often as `port: "8080"`. These
//! wrappers accept strings, numbers and booleans and coerce them to strings.

use serde::{Deserialize, Deserializer, Serialize};

/// A scalar coerced to its string form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Scalar(pub String);

impl Scalar {
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            String(String),
            Int(i64),
            Uint(u64),
            Float(f64),
            Bool(bool),
        }

        Ok(Scalar(match Raw::deserialize(deserializer).map_err(|_| {
            serde::de::Error::custom("expected a string, number or boolean")
        })? {
            Raw::String(s) => s,
            Raw::Int(i) => i.to_string(),
            Raw::Uint(u) => u.to_string(),
            Raw::Float(f) => f.to_string(),
            Raw::Bool(b) => b.to_string(),
        }))
    }
}

/// A single value or a list of values.
///
/// Used for `cron`, which accepts one expression or several.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.into_inner()],
            OneOrMany::Many(v) => v.into_iter().map(Scalar::into_inner).collect(),
        }
    }
}
