//! Runtime abstraction: the module container the launcher drives.
//!
//! The [`Runtime`] trait decouples the launcher from the container that
//! actually loads module code. The launcher only installs, updates,
//! uninstalls and starts modules, assigns start tiers, and drives the
//! runtime's own start/stop lifecycle. Tests use scripted runtimes.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::types::{ModuleRecord, StartTier, StopReason};
use crate::io::config::ConfigurationSet;

/// Byte stream of a module package. Dropping it closes the underlying resource.
pub type ModuleStream = Box<dyn Read + Send>;

/// Failure reported by a runtime or a module source.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unable to open stream for {location}")]
    Open {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{location}: {reason}")]
    Module { location: String, reason: String },

    #[error("{0}")]
    Lifecycle(String),

    #[error("interrupted while waiting for the runtime to stop")]
    Interrupted,
}

impl RuntimeError {
    pub fn module(location: impl Into<String>, reason: impl Into<String>) -> Self {
        RuntimeError::Module {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// A module container instance.
///
/// Implementations are shared between the supervisor, its polling worker and
/// the shutdown hook, so every method takes `&self`.
pub trait Runtime: Send + Sync {
    /// Prepare the runtime (storage, bootstrap module) without starting it.
    fn init(&self) -> Result<(), RuntimeError>;

    fn start(&self) -> Result<(), RuntimeError>;

    /// Request a stop. Returns once the request is accepted, not when the
    /// runtime has quiesced; use [`Runtime::wait_for_stop`] for that.
    fn stop(&self) -> Result<(), RuntimeError>;

    /// Block until the runtime is no longer running. `None` waits forever.
    fn wait_for_stop(&self, timeout: Option<Duration>) -> Result<StopReason, RuntimeError>;

    /// Install a module. Installing an already-installed location returns
    /// the existing record. Without a stream the runtime reads the location
    /// itself.
    fn install(
        &self,
        location: &str,
        stream: Option<ModuleStream>,
    ) -> Result<ModuleRecord, RuntimeError>;

    fn update(&self, module: &ModuleRecord) -> Result<(), RuntimeError>;

    fn uninstall(&self, module: &ModuleRecord) -> Result<(), RuntimeError>;

    fn start_module(&self, module: &ModuleRecord) -> Result<(), RuntimeError>;

    /// Every installed module, including the bootstrap module.
    fn installed(&self) -> Vec<ModuleRecord>;

    fn set_start_tier(&self, module: &ModuleRecord, tier: StartTier) -> Result<(), RuntimeError>;

    /// Tier assigned to modules installed without an explicit tier.
    fn initial_start_tier(&self) -> StartTier;
}

/// Creates the runtime for one launch from its resolved configuration.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, configuration: &ConfigurationSet) -> Result<Arc<dyn Runtime>, RuntimeError>;
}
