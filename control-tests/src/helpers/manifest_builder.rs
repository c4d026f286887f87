//! Programmatic manifest creation with builder pattern

use control_core::config::{Config, LoadOptions, MANIFEST_VERSION};
use control_core::errors::Result;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Builder for `control.yaml` files
pub struct TestManifestBuilder {
    name: String,
    env: Mapping,
    services: Mapping,
    groups: Mapping,
    extra: Mapping,
}

impl TestManifestBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            env: Mapping::new(),
            services: Mapping::new(),
            groups: Mapping::new(),
            extra: Mapping::new(),
        }
    }

    /// Add a manifest variable for `{name}` substitution
    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn add_service(mut self, name: &str, service: TestServiceBuilder) -> Self {
        self.services.insert(name.into(), Value::Mapping(service.build()));
        self
    }

    pub fn add_group(mut self, name: &str, members: &[&str]) -> Self {
        let members = members.iter().map(|m| Value::from(*m)).collect();
        self.groups.insert(name.into(), Value::Sequence(members));
        self
    }

    /// Set an arbitrary top-level key, e.g. to exercise unknown-key handling
    pub fn with_top_level(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn to_yaml(&self) -> String {
        let mut root = Mapping::new();
        root.insert("name".into(), self.name.as_str().into());
        root.insert("version".into(), MANIFEST_VERSION.into());
        if !self.env.is_empty() {
            root.insert("env".into(), Value::Mapping(self.env.clone()));
        }
        root.insert("services".into(), Value::Mapping(self.services.clone()));
        if !self.groups.is_empty() {
            root.insert("groups".into(), Value::Mapping(self.groups.clone()));
        }
        for (key, value) in &self.extra {
            root.insert(key.clone(), value.clone());
        }
        // Serializing a plain Mapping cannot fail
        serde_yaml::to_string(&Value::Mapping(root)).unwrap_or_default()
    }

    /// Write `control.yaml` into `dir` and return its path
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join("control.yaml");
        std::fs::write(&path, self.to_yaml())?;
        Ok(path)
    }

    /// Write the manifest into `dir` and load it with default options
    pub fn load_from(&self, dir: &Path) -> Result<Config> {
        self.load_with(dir, &LoadOptions::default())
    }

    pub fn load_with(&self, dir: &Path, options: &LoadOptions) -> Result<Config> {
        let path = self.write_to(dir)?;
        Config::load_with(&path, options)
    }
}

/// Builder for a single service entry
#[derive(Default)]
pub struct TestServiceBuilder {
    fields: Mapping,
}

impl TestServiceBuilder {
    /// A service started from a `run` command line
    pub fn run(command: &str) -> Self {
        Self::default().with("run", command)
    }

    /// A service started as `/bin/sh -c <script>`
    pub fn shell(script: &str) -> Self {
        Self::default().with("shell", script)
    }

    /// A service started from an explicit argv
    pub fn cmd(program: &str, args: &[&str]) -> Self {
        let args = args.iter().map(|a| Value::from(*a)).collect();
        Self::default()
            .with("cmd", program)
            .with("args", Value::Sequence(args))
    }

    pub fn daemon(self) -> Self {
        self.with("type", "daemon")
    }

    pub fn periodic(self, interval: &str) -> Self {
        self.with("type", "periodic").with("interval", interval)
    }

    pub fn cron(self, expression: &str) -> Self {
        self.with("type", "cron").with("cron", expression)
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        let env = self
            .fields
            .entry("env".into())
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if let Value::Mapping(env) = env {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_cwd(self, cwd: &str) -> Self {
        self.with("cwd", cwd)
    }

    pub fn with_user(self, user: &str) -> Self {
        self.with("user", user)
    }

    /// Set any key of the service entry
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Mapping {
        self.fields
    }
}

#[cfg(test)]
mod tests;
