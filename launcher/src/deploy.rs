//! Auto-deploy: reconcile a deploy directory against the installed modules.
//!
//! One pass over the directory listing installs new packages (or updates
//! existing ones in place), then modules no longer listed are uninstalled,
//! then the resulting start candidates are started. Per-module failures are
//! collected in the [`DeployReport`]; they never abort the batch.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::actions::{DeployAction, DeployActions};
use crate::core::keys::{DEPLOY_ACTION, DEPLOY_DIR, DEPLOY_START_TIER};
use crate::core::types::{ModuleFailure, ModuleOperation, ModuleRecord, ModuleState, StartTier};
use crate::io::config::ConfigurationSet;
use crate::io::source::ModuleSource;
use crate::runtime::{Runtime, RuntimeError};

/// What one reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub actions: DeployActions,
    /// Directory scanned; `None` when no action was enabled.
    pub directory: Option<String>,
    pub installed: Vec<String>,
    pub updated: Vec<String>,
    pub uninstalled: Vec<String>,
    pub started: Vec<String>,
    pub failures: Vec<ModuleFailure>,
}

impl DeployReport {
    fn fail(&mut self, location: &str, operation: ModuleOperation, err: &RuntimeError) {
        error!(location, operation = %operation, err = %err, "auto-deploy operation failed");
        self.failures.push(ModuleFailure {
            location: location.to_string(),
            operation,
            message: err.to_string(),
        });
    }
}

/// Reconcile the configured deploy directory against `runtime`.
///
/// `default_dir` is scanned when the configuration names no directory.
#[instrument(skip_all, fields(default_dir = %default_dir))]
pub fn reconcile(
    config: &ConfigurationSet,
    runtime: &dyn Runtime,
    default_dir: &str,
    source: &dyn ModuleSource,
) -> DeployReport {
    let actions = DeployActions::parse(config.get(DEPLOY_ACTION).unwrap_or_default());
    let mut report = DeployReport {
        actions,
        ..DeployReport::default()
    };
    if actions.is_empty() {
        debug!("no auto-deploy actions configured");
        return report;
    }

    let directory = config.get(DEPLOY_DIR).unwrap_or(default_dir).to_string();
    let tier = deploy_tier(config, runtime);

    let mut remaining: BTreeMap<String, ModuleRecord> = runtime
        .installed()
        .into_iter()
        .map(|record| (record.location.clone(), record))
        .collect();

    let mut desired = source.list(&directory);
    desired.sort();
    desired.dedup();
    debug!(dir = %directory, count = desired.len(), tier, "reconciling deploy directory");

    let mut candidates = Vec::new();
    for location in &desired {
        let existing = remaining.remove(location);
        let applied =
            apply_install_or_update(location, existing, actions, runtime, source, &mut report);
        let Some(record) = applied else {
            continue;
        };
        if !record.is_startable() {
            continue;
        }
        match runtime.set_start_tier(&record, tier) {
            Ok(()) => candidates.push(record),
            Err(err) => report.fail(location, ModuleOperation::AssignTier, &err),
        }
    }

    if actions.contains(DeployAction::Uninstall) {
        for record in remaining.values().filter(|record| !record.id.is_bootstrap()) {
            match runtime.uninstall(record) {
                Ok(()) => report.uninstalled.push(record.location.clone()),
                Err(err) => report.fail(&record.location, ModuleOperation::Uninstall, &err),
            }
        }
    }

    if actions.contains(DeployAction::Start) {
        for record in candidates.iter().filter(|record| record.state != ModuleState::Active) {
            match runtime.start_module(record) {
                Ok(()) => report.started.push(record.location.clone()),
                Err(err) => report.fail(&record.location, ModuleOperation::Start, &err),
            }
        }
    }

    info!(
        dir = %directory,
        installed = report.installed.len(),
        updated = report.updated.len(),
        uninstalled = report.uninstalled.len(),
        started = report.started.len(),
        failures = report.failures.len(),
        "auto-deploy complete"
    );
    report.directory = Some(directory);
    report
}

/// Install a new location or update an existing one. Returns the live
/// record, or `None` when there is nothing to start.
fn apply_install_or_update(
    location: &str,
    existing: Option<ModuleRecord>,
    actions: DeployActions,
    runtime: &dyn Runtime,
    source: &dyn ModuleSource,
    report: &mut DeployReport,
) -> Option<ModuleRecord> {
    match existing {
        None if actions.contains(DeployAction::Install) => {
            let stream = match source.open(location) {
                Ok(stream) => stream,
                Err(err) => {
                    report.fail(location, ModuleOperation::Open, &err);
                    return None;
                }
            };
            match runtime.install(location, Some(stream)) {
                Ok(record) => {
                    report.installed.push(location.to_string());
                    Some(record)
                }
                Err(err) => {
                    report.fail(location, ModuleOperation::Install, &err);
                    None
                }
            }
        }
        None => None,
        Some(record) if actions.contains(DeployAction::Update) => match runtime.update(&record) {
            Ok(()) => {
                report.updated.push(location.to_string());
                Some(record)
            }
            Err(err) => {
                report.fail(location, ModuleOperation::Update, &err);
                None
            }
        },
        Some(record) => Some(record),
    }
}

/// Tier for deployed modules: the configured value, else the runtime default.
fn deploy_tier(config: &ConfigurationSet, runtime: &dyn Runtime) -> StartTier {
    let default = runtime.initial_start_tier();
    match config.get(DEPLOY_START_TIER) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = raw, default, "ignoring malformed deploy start tier");
            default
        }),
        None => default,
    }
}
