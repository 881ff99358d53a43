//! Shared types exchanged between the launcher and a module runtime.
//!
//! These are plain values: they carry no runtime references and can be
//! compared, cloned and serialized freely.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority tier a module is started in.
pub type StartTier = u32;

/// Runtime-assigned module identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

impl ModuleId {
    /// The runtime's own bootstrap module. Never deployed, never uninstalled.
    pub const BOOTSTRAP: ModuleId = ModuleId(0);

    pub fn is_bootstrap(self) -> bool {
        self == Self::BOOTSTRAP
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an installed module as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Installed,
    Resolved,
    Active,
}

/// One installed module, keyed by its location.
///
/// A location is never reused for two different modules; installing the same
/// location twice yields the same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub location: String,
    /// Attach-only modules are never started on their own.
    pub fragment: bool,
    pub state: ModuleState,
}

impl ModuleRecord {
    pub fn is_startable(&self) -> bool {
        !self.fragment
    }
}

/// Why the runtime stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Terminal stop requested by an operator or a module.
    Stopped,
    /// The runtime asks to be started again (e.g. after updating itself).
    StopForUpdate,
    /// The runtime stopped because of an internal error.
    Error,
    /// `wait_for_stop` returned because its timeout elapsed.
    TimedOut,
}

impl StopReason {
    pub fn wants_restart(self) -> bool {
        self == StopReason::StopForUpdate
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::Stopped => "stopped",
            StopReason::StopForUpdate => "stop_for_update",
            StopReason::Error => "error",
            StopReason::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// Module operation names, used when reporting per-module failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleOperation {
    Open,
    Install,
    Update,
    Uninstall,
    Start,
    AssignTier,
}

impl fmt::Display for ModuleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ModuleOperation::Open => "open",
            ModuleOperation::Install => "install",
            ModuleOperation::Update => "update",
            ModuleOperation::Uninstall => "uninstall",
            ModuleOperation::Start => "start",
            ModuleOperation::AssignTier => "assign tier",
        };
        f.write_str(label)
    }
}

/// A reported, non-fatal failure of one module operation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub location: String,
    pub operation: ModuleOperation,
    pub message: String,
}
