//! Selector resolution
//!
//! A selector is `all`, a service name or a group name. Groups may list other
//! groups. Results have list semantics: a service reachable twice is returned
//! twice, in the order it was reached.

use tracing::trace;

use super::{ALL, Config, Service};
use crate::errors::{ControlError, Result};

impl Config {
    /// Look up a single service by name.
    pub fn service(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .ok_or_else(|| ControlError::ServiceNotFound(name.to_string()))
    }

    /// Resolve selectors left to right and concatenate the results.
    ///
    /// Unknown selectors resolve to nothing. Duplicates are kept.
    pub fn resolve<S: AsRef<str>>(&self, selectors: &[S]) -> Result<Vec<&Service>> {
        let mut out = Vec::new();
        let mut visiting = Vec::new();
        for selector in selectors {
            self.expand(selector.as_ref(), &mut visiting, &mut out)?;
        }
        Ok(out)
    }

    pub fn resolve_one(&self, selector: &str) -> Result<Vec<&Service>> {
        self.resolve(&[selector])
    }

    fn expand<'a>(
        &'a self,
        selector: &str,
        visiting: &mut Vec<String>,
        out: &mut Vec<&'a Service>,
    ) -> Result<()> {
        if selector == ALL {
            out.extend(self.services.values());
            return Ok(());
        }
        if let Some(service) = self.services.get(selector) {
            out.push(service);
            return Ok(());
        }
        let Some((group, members)) = self.groups.get_key_value(selector) else {
            trace!("Selector '{}' matches nothing", selector);
            return Ok(());
        };

        if let Some(pos) = visiting.iter().position(|g| g == group) {
            let mut cycle = visiting[pos..].to_vec();
            cycle.push(group.clone());
            return Err(ControlError::CyclicGroup(cycle));
        }

        visiting.push(group.clone());
        for member in members {
            self.expand(member, visiting, out)?;
        }
        visiting.pop();
        Ok(())
    }

    /// Fail with [`ControlError::CyclicGroup`] if any group reaches itself.
    pub(crate) fn validate_groups(&self) -> Result<()> {
        for group in self.groups.keys() {
            self.resolve_one(group)?;
        }
        Ok(())
    }
}
