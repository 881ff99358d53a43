//! Process-wide settings threaded through a launch.
//!
//! Settings are the second lookup source for `${name}` placeholders and the
//! origin of the `launcher.` / `runtime.` overrides copied into the
//! configuration. They are an explicit value, never global state.

use crate::core::interpolate::Resolver;
use crate::core::keys::{env_var_to_key, is_copied_setting};
use crate::core::properties::Properties;
use crate::error::ConfigError;

/// Process-wide key/value settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSettings {
    values: Properties,
}

impl ProcessSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings seeded from the current process environment.
    pub fn from_process() -> Self {
        // Variables that are not valid UTF-8 are skipped.
        Self::from_vars(std::env::vars_os().filter_map(|(name, value)| {
            Some((name.into_string().ok()?, value.into_string().ok()?))
        }))
    }

    /// Every variable is kept under its own name. `LAUNCHER_*` and `RUNTIME_*`
    /// variables are also exposed under their dotted lowercase key.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut values = Properties::new();
        let mut mapped = Vec::new();
        for (name, value) in vars {
            if let Some(key) = env_var_to_key(&name) {
                mapped.push((key, value.clone()));
            }
            values.insert(name, value);
        }
        values.extend(mapped);
        Self { values }
    }

    /// Apply one `key=value` definition. The value is resolved against the
    /// settings defined so far.
    pub fn define(&mut self, definition: &str) -> Result<(), ConfigError> {
        let (key, value) = definition
            .split_once('=')
            .map(|(key, value)| (key.trim(), value))
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| ConfigError::InvalidDefinition {
                definition: definition.to_string(),
            })?;
        let resolved = Resolver::new(None, &self.values).resolve(value, key)?;
        self.values.insert(key.to_string(), resolved);
        Ok(())
    }

    /// Merge raw properties, resolving each value against the settings only.
    pub fn merge(&mut self, raw: &Properties) -> Result<(), ConfigError> {
        for (key, value) in raw {
            let resolved = Resolver::new(None, &self.values).resolve(value, key)?;
            self.values.insert(key.clone(), resolved);
        }
        Ok(())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn as_properties(&self) -> &Properties {
        &self.values
    }

    /// Entries copied into the configuration (`launcher.` and `runtime.` keys).
    pub fn copied_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter(|(key, _)| is_copied_setting(key))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn prefixed_env_vars_are_mapped() {
        let settings = ProcessSettings::from_vars(vars(&[
            ("HOME", "/home/ops"),
            ("LAUNCHER_SHUTDOWN_HOOK", "false"),
        ]));
        assert_eq!(settings.get("HOME"), Some("/home/ops"));
        assert_eq!(settings.get("LAUNCHER_SHUTDOWN_HOOK"), Some("false"));
        assert_eq!(settings.get("launcher.shutdown.hook"), Some("false"));
    }

    #[test]
    fn define_resolves_against_earlier_settings() {
        let mut settings = ProcessSettings::from_vars(vars(&[("HOME", "/home/ops")]));
        settings
            .define("runtime.storage=${HOME}/cache")
            .expect("define");
        assert_eq!(settings.get("runtime.storage"), Some("/home/ops/cache"));
    }

    #[test]
    fn define_without_key_is_rejected() {
        let mut settings = ProcessSettings::new();
        assert!(matches!(
            settings.define("novalue"),
            Err(ConfigError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            settings.define("=x"),
            Err(ConfigError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn copied_entries_only_include_recognized_prefixes() {
        let mut settings = ProcessSettings::new();
        settings.set("launcher.auto.deploy.dir", "mods");
        settings.set("runtime.storage", "cache");
        settings.set("PATH", "/bin");
        let copied: Vec<_> = settings.copied_entries().collect();
        assert_eq!(
            copied,
            vec![("launcher.auto.deploy.dir", "mods"), ("runtime.storage", "cache")]
        );
    }
}
