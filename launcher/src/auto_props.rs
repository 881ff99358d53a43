//! Install and start modules listed in `launcher.auto.install[.N]` and
//! `launcher.auto.start[.N]` configuration keys.

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::core::keys::{AUTO_INSTALL, AUTO_START};
use crate::core::locations::split_locations;
use crate::core::types::{ModuleFailure, ModuleOperation, StartTier};
use crate::io::config::ConfigurationSet;
use crate::runtime::{Runtime, RuntimeError};

/// What one auto-properties pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoInstallReport {
    /// Locations installed (or already installed) in the install pass, with their tier.
    pub installed: Vec<(String, StartTier)>,
    pub started: Vec<String>,
    pub failures: Vec<ModuleFailure>,
}

impl AutoInstallReport {
    fn fail(&mut self, location: &str, operation: ModuleOperation, err: &RuntimeError) {
        error!(location, operation = %operation, err = %err, "auto-properties operation failed");
        self.failures.push(ModuleFailure {
            location: location.to_string(),
            operation,
            message: err.to_string(),
        });
    }
}

/// An auto-property key, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoKey {
    Install,
    Start,
}

fn classify(lower_key: &str) -> Option<AutoKey> {
    if lower_key.starts_with(AUTO_START) {
        Some(AutoKey::Start)
    } else if lower_key.starts_with(AUTO_INSTALL) {
        Some(AutoKey::Install)
    } else {
        None
    }
}

/// Tier encoded in the key's `.N` suffix. The bare prefix, or a suffix that
/// is not a tier, yields `default`.
fn key_tier(lower_key: &str, default: StartTier) -> StartTier {
    if lower_key == AUTO_INSTALL || lower_key == AUTO_START {
        return default;
    }
    let suffix = lower_key.rsplit('.').next().unwrap_or_default();
    suffix.parse().unwrap_or_else(|_| {
        warn!(key = lower_key, default, "invalid auto-property tier suffix; using default");
        default
    })
}

/// Install every listed location, then start every auto-start location.
///
/// Runs after auto-deploy. Re-installing a location returns its existing
/// record, so modules already deployed are only assigned a tier.
#[instrument(skip_all)]
pub fn install_from_properties(
    config: &ConfigurationSet,
    runtime: &dyn Runtime,
) -> AutoInstallReport {
    let mut report = AutoInstallReport::default();
    let default_tier = runtime.initial_start_tier();
    let mut start_lists = Vec::new();

    for (key, value) in config.iter() {
        let lower_key = key.to_ascii_lowercase();
        let Some(kind) = classify(&lower_key) else {
            continue;
        };
        let tier = key_tier(&lower_key, default_tier);
        for location in split_locations(value) {
            let record = match runtime.install(&location, None) {
                Ok(record) => record,
                Err(err) => {
                    report.fail(&location, ModuleOperation::Install, &err);
                    continue;
                }
            };
            match runtime.set_start_tier(&record, tier) {
                Ok(()) => report.installed.push((location, tier)),
                Err(err) => report.fail(&location, ModuleOperation::AssignTier, &err),
            }
        }
        if kind == AutoKey::Start {
            start_lists.push(value);
        }
    }

    for location in start_lists.into_iter().flat_map(split_locations) {
        let result = runtime
            .install(&location, None)
            .map_err(|err| (ModuleOperation::Install, err))
            .and_then(|record| {
                runtime
                    .start_module(&record)
                    .map_err(|err| (ModuleOperation::Start, err))
            });
        match result {
            Ok(()) => report.started.push(location),
            Err((operation, err)) => report.fail(&location, operation, &err),
        }
    }

    info!(
        installed = report.installed.len(),
        started = report.started.len(),
        failures = report.failures.len(),
        "auto-properties processed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RuntimeCall, ScriptedRuntime};

    fn config(entries: &[(&str, &str)]) -> ConfigurationSet {
        entries.iter().copied().collect()
    }

    #[test]
    fn install_pass_completes_before_start_pass() {
        let runtime = ScriptedRuntime::new();
        let report = install_from_properties(
            &config(&[
                ("launcher.auto.start.2", "file:s.jar"),
                ("launcher.auto.install.3", "file:i.jar"),
            ]),
            &runtime,
        );

        assert_eq!(
            report.installed,
            vec![("file:i.jar".to_string(), 3), ("file:s.jar".to_string(), 2)]
        );
        assert_eq!(report.started, vec!["file:s.jar"]);
        let calls = runtime.module_calls();
        let last_tier = calls
            .iter()
            .rposition(|call| matches!(call, RuntimeCall::SetTier(..)))
            .expect("tier call");
        let first_start = calls
            .iter()
            .position(|call| matches!(call, RuntimeCall::StartModule(_)))
            .expect("start call");
        assert!(last_tier < first_start);
    }

    #[test]
    fn keys_match_case_insensitively_with_default_tier() {
        let runtime = ScriptedRuntime::new();
        let report = install_from_properties(
            &config(&[("Launcher.Auto.Install", "\"dir with space/a.jar\" b.jar")]),
            &runtime,
        );
        let default = runtime.initial_start_tier();
        assert_eq!(
            report.installed,
            vec![
                ("dir with space/a.jar".to_string(), default),
                ("b.jar".to_string(), default)
            ]
        );
        assert!(report.started.is_empty());
    }

    #[test]
    fn malformed_suffix_uses_default_tier() {
        let runtime = ScriptedRuntime::new();
        let report = install_from_properties(
            &config(&[("launcher.auto.start.first", "a.jar")]),
            &runtime,
        );
        assert_eq!(
            report.installed,
            vec![("a.jar".to_string(), runtime.initial_start_tier())]
        );
        assert_eq!(report.started, vec!["a.jar"]);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn failures_are_reported_and_processing_continues() {
        let runtime = ScriptedRuntime::new().fail_on(ModuleOperation::Install, "bad.jar");
        let report = install_from_properties(
            &config(&[("launcher.auto.install.1", "good.jar bad.jar other.jar")]),
            &runtime,
        );
        assert_eq!(report.installed.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].location, "bad.jar");
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        let runtime = ScriptedRuntime::new();
        let report = install_from_properties(
            &config(&[("launcher.auto.deploy.dir", "x.jar"), ("other", "y.jar")]),
            &runtime,
        );
        assert_eq!(report, AutoInstallReport::default());
        assert!(runtime.module_calls().is_empty());
    }
}
