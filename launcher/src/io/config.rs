//! Launch configuration assembled from properties files, settings and
//! command-line overrides.

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::interpolate::resolve_all;
use crate::core::keys::{DEPLOY_DIR, RUNTIME_STORAGE};
use crate::core::properties::{Properties, parse_properties};
use crate::error::{ConfigError, PropertiesKind};
use crate::io::environment::LaunchEnvironment;
use crate::io::settings::ProcessSettings;

/// Resolved configuration of one launch. Built once, then read-only.
///
/// Enumerates in lexicographic key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConfigurationSet(Properties);

impl ConfigurationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Properties> for ConfigurationSet {
    fn from(props: Properties) -> Self {
        Self(props)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigurationSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Explicit launch arguments. They beat every file and setting value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub deploy_dir: Option<String>,
    pub storage_dir: Option<String>,
}

/// Read and parse one properties file. A missing file yields `None`.
fn read_properties(
    env: &dyn LaunchEnvironment,
    kind: PropertiesKind,
    settings: &ProcessSettings,
) -> Result<Option<Properties>, ConfigError> {
    let Some(text) = env.read_properties(kind, settings)? else {
        return Ok(None);
    };
    parse_properties(&text)
        .map(Some)
        .map_err(|err| ConfigError::Syntax {
            kind,
            line: err.line,
            reason: err.reason,
        })
}

/// Merge the system properties file into the process-wide settings.
///
/// Each value is resolved against the settings only. A missing file is
/// logged and skipped.
pub fn load_system_properties(
    env: &dyn LaunchEnvironment,
    settings: &mut ProcessSettings,
) -> Result<(), ConfigError> {
    match read_properties(env, PropertiesKind::System, settings)? {
        Some(raw) => {
            debug!(entries = raw.len(), "merging system properties");
            settings.merge(&raw)
        }
        None => {
            warn!("no system properties found");
            Ok(())
        }
    }
}

/// Build the configuration of a launch.
///
/// Precedence, highest first: `options`, settings with a copied prefix,
/// configuration file values. A missing configuration file is logged and
/// treated as empty.
#[instrument(skip_all)]
pub fn load_configuration(
    env: &dyn LaunchEnvironment,
    settings: &ProcessSettings,
    options: &LaunchOptions,
) -> Result<ConfigurationSet, ConfigError> {
    let resolved = match read_properties(env, PropertiesKind::Config, settings)? {
        Some(raw) => resolve_all(&raw, settings.as_properties())?,
        None => {
            warn!("no config properties found; using defaults");
            Properties::new()
        }
    };

    let mut config = ConfigurationSet::from(resolved);
    for (key, value) in settings.copied_entries() {
        config.insert(key, value);
    }
    if let Some(dir) = &options.deploy_dir {
        config.insert(DEPLOY_DIR, dir.as_str());
    }
    if let Some(dir) = &options.storage_dir {
        config.insert(RUNTIME_STORAGE, dir.as_str());
    }
    debug!(entries = config.len(), "configuration loaded");
    Ok(config)
}
