//! Bookkeeping runtime.
//!
//! [`RegistryRuntime`] tracks module records, tiers and the runtime's
//! running/stopped state. It never loads module code: installing a module
//! records its location (after reading its package to check it is there).

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::core::keys::{RUNTIME_INITIAL_TIER, RUNTIME_STORAGE};
use crate::core::types::{ModuleId, ModuleRecord, ModuleState, StartTier, StopReason};
use crate::io::config::ConfigurationSet;
use crate::runtime::{ModuleStream, Runtime, RuntimeError, RuntimeFactory};

/// Location recorded for the bootstrap module.
pub const BOOTSTRAP_LOCATION: &str = "system:bootstrap";

const DEFAULT_INITIAL_TIER: StartTier = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Initialized,
    Running,
    Stopped(StopReason),
}

#[derive(Debug)]
struct Entry {
    record: ModuleRecord,
    tier: StartTier,
}

#[derive(Debug)]
struct Registry {
    phase: Phase,
    next_id: u64,
    modules: BTreeMap<ModuleId, Entry>,
}

impl Registry {
    fn find(&self, location: &str) -> Option<&Entry> {
        self.modules
            .values()
            .find(|entry| entry.record.location == location)
    }

    fn entry_mut(&mut self, module: &ModuleRecord) -> Result<&mut Entry, RuntimeError> {
        self.modules
            .get_mut(&module.id)
            .ok_or_else(|| RuntimeError::module(&module.location, "module is not installed"))
    }
}

/// In-process runtime that records module operations.
#[derive(Debug)]
pub struct RegistryRuntime {
    registry: Mutex<Registry>,
    changed: Condvar,
    initial_tier: StartTier,
    storage: Option<PathBuf>,
}

impl RegistryRuntime {
    pub fn new(initial_tier: StartTier, storage: Option<PathBuf>) -> Self {
        Self {
            registry: Mutex::new(Registry {
                phase: Phase::Created,
                next_id: 1,
                modules: BTreeMap::new(),
            }),
            changed: Condvar::new(),
            initial_tier,
            storage,
        }
    }

    /// Runtime configured from `runtime.startlevel.module` and `runtime.storage`.
    pub fn from_config(config: &ConfigurationSet) -> Self {
        let initial_tier = match config.get(RUNTIME_INITIAL_TIER) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = raw, "ignoring malformed initial start tier");
                DEFAULT_INITIAL_TIER
            }),
            None => DEFAULT_INITIAL_TIER,
        };
        let storage = config.get(RUNTIME_STORAGE).map(PathBuf::from);
        Self::new(initial_tier, storage)
    }

    /// Stop the runtime, asking its supervisor to start it again.
    pub fn request_update(&self) {
        self.finish(StopReason::StopForUpdate);
    }

    /// Tier currently assigned to a module.
    pub fn tier(&self, id: ModuleId) -> Option<StartTier> {
        self.registry().modules.get(&id).map(|entry| entry.tier)
    }

    pub fn is_running(&self) -> bool {
        self.registry().phase == Phase::Running
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, reason: StopReason) {
        let mut registry = self.registry();
        if registry.phase == Phase::Running {
            info!(reason = %reason, "runtime stopping");
            registry.phase = Phase::Stopped(reason);
            self.changed.notify_all();
        }
    }
}

/// Check a stream-less location is readable. `file:` URLs and plain paths are
/// supported.
fn check_location(location: &str) -> Result<(), RuntimeError> {
    let path = match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|()| RuntimeError::module(location, "not a local file path"))?,
        Ok(url) if url.scheme().len() > 1 => {
            return Err(RuntimeError::module(
                location,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        _ => PathBuf::from(location),
    };
    std::fs::metadata(&path)
        .map(|_| ())
        .map_err(|source| RuntimeError::Open {
            location: location.to_string(),
            source,
        })
}

impl Runtime for RegistryRuntime {
    fn init(&self) -> Result<(), RuntimeError> {
        if let Some(storage) = &self.storage {
            std::fs::create_dir_all(storage).map_err(|err| {
                RuntimeError::Lifecycle(format!("create storage {}: {err}", storage.display()))
            })?;
        }
        let mut registry = self.registry();
        registry.modules.entry(ModuleId::BOOTSTRAP).or_insert(Entry {
            record: ModuleRecord {
                id: ModuleId::BOOTSTRAP,
                location: BOOTSTRAP_LOCATION.to_string(),
                fragment: false,
                state: ModuleState::Active,
            },
            tier: 0,
        });
        if registry.phase == Phase::Created {
            registry.phase = Phase::Initialized;
        }
        debug!("runtime initialized");
        Ok(())
    }

    fn start(&self) -> Result<(), RuntimeError> {
        let mut registry = self.registry();
        match registry.phase {
            Phase::Created => Err(RuntimeError::Lifecycle(
                "runtime must be initialized before it starts".to_string(),
            )),
            Phase::Running => Ok(()),
            Phase::Initialized | Phase::Stopped(_) => {
                registry.phase = Phase::Running;
                info!(modules = registry.modules.len(), "runtime running");
                Ok(())
            }
        }
    }

    fn stop(&self) -> Result<(), RuntimeError> {
        self.finish(StopReason::Stopped);
        Ok(())
    }

    fn wait_for_stop(&self, timeout: Option<Duration>) -> Result<StopReason, RuntimeError> {
        let registry = self.registry();
        let running = |registry: &mut Registry| registry.phase == Phase::Running;
        let registry = match timeout {
            None => self
                .changed
                .wait_while(registry, running)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            Some(timeout) => {
                let (registry, result) = self
                    .changed
                    .wait_timeout_while(registry, timeout, running)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if result.timed_out() {
                    return Ok(StopReason::TimedOut);
                }
                registry
            }
        };
        Ok(match registry.phase {
            Phase::Stopped(reason) => reason,
            _ => StopReason::Stopped,
        })
    }

    fn install(
        &self,
        location: &str,
        stream: Option<ModuleStream>,
    ) -> Result<ModuleRecord, RuntimeError> {
        if let Some(entry) = self.registry().find(location) {
            return Ok(entry.record.clone());
        }

        match stream {
            Some(mut stream) => {
                let mut package = Vec::new();
                stream
                    .read_to_end(&mut package)
                    .map_err(|source| RuntimeError::Open {
                        location: location.to_string(),
                        source,
                    })?;
                debug!(location, bytes = package.len(), "read module package");
            }
            None => check_location(location)?,
        }

        let mut registry = self.registry();
        if let Some(entry) = registry.find(location) {
            return Ok(entry.record.clone());
        }
        let record = ModuleRecord {
            id: ModuleId(registry.next_id),
            location: location.to_string(),
            fragment: false,
            state: ModuleState::Installed,
        };
        registry.next_id += 1;
        registry.modules.insert(
            record.id,
            Entry {
                record: record.clone(),
                tier: self.initial_tier,
            },
        );
        info!(location, id = record.id.0, "module installed");
        Ok(record)
    }

    fn update(&self, module: &ModuleRecord) -> Result<(), RuntimeError> {
        let mut registry = self.registry();
        let entry = registry.entry_mut(module)?;
        if entry.record.state == ModuleState::Installed {
            entry.record.state = ModuleState::Resolved;
        }
        info!(location = %module.location, "module updated");
        Ok(())
    }

    fn uninstall(&self, module: &ModuleRecord) -> Result<(), RuntimeError> {
        if module.id.is_bootstrap() {
            return Err(RuntimeError::module(
                &module.location,
                "the bootstrap module cannot be uninstalled",
            ));
        }
        let mut registry = self.registry();
        registry.entry_mut(module)?;
        registry.modules.remove(&module.id);
        info!(location = %module.location, "module uninstalled");
        Ok(())
    }

    fn start_module(&self, module: &ModuleRecord) -> Result<(), RuntimeError> {
        let mut registry = self.registry();
        let entry = registry.entry_mut(module)?;
        if entry.record.fragment {
            return Err(RuntimeError::module(
                &module.location,
                "fragments cannot be started",
            ));
        }
        entry.record.state = ModuleState::Active;
        info!(location = %module.location, tier = entry.tier, "module started");
        Ok(())
    }

    fn installed(&self) -> Vec<ModuleRecord> {
        self.registry()
            .modules
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }

    fn set_start_tier(&self, module: &ModuleRecord, tier: StartTier) -> Result<(), RuntimeError> {
        let mut registry = self.registry();
        registry.entry_mut(module)?.tier = tier;
        debug!(location = %module.location, tier, "start tier assigned");
        Ok(())
    }

    fn initial_start_tier(&self) -> StartTier {
        self.initial_tier
    }
}

/// Creates a [`RegistryRuntime`] per launch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryRuntimeFactory;

impl RuntimeFactory for RegistryRuntimeFactory {
    fn create(&self, configuration: &ConfigurationSet) -> Result<Arc<dyn Runtime>, RuntimeError> {
        Ok(Arc::new(RegistryRuntime::from_config(configuration)))
    }
}
