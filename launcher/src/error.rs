//! Error taxonomy for a launch.
//!
//! Configuration and lifecycle failures abort the launch that produced them.
//! Per-module failures never appear here: batch operations report them in
//! their own reports (see [`crate::core::types::ModuleFailure`]).

use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::RuntimeError;
use crate::supervisor::SupervisorState;

/// Which properties file a configuration error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertiesKind {
    System,
    Config,
}

impl std::fmt::Display for PropertiesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertiesKind::System => f.write_str("system"),
            PropertiesKind::Config => f.write_str("config"),
        }
    }
}

/// Malformed or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("recursive variable reference: {variable}")]
    RecursiveReference { variable: String },

    #[error("malformed {kind} properties location '{location}': {reason}")]
    MalformedLocation {
        kind: PropertiesKind,
        location: String,
        reason: String,
    },

    #[error("unable to read {kind} properties from {}", path.display())]
    Unreadable {
        kind: PropertiesKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} properties location '{location}' not found")]
    NotFound {
        kind: PropertiesKind,
        location: String,
    },

    #[error("invalid {kind} properties at line {line}: {reason}")]
    Syntax {
        kind: PropertiesKind,
        line: usize,
        reason: String,
    },

    #[error("invalid definition '{definition}' (expected key=value)")]
    InvalidDefinition { definition: String },
}

/// Failure of a launch or of the supervisor's lifecycle.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("runtime failed to {stage}")]
    Lifecycle {
        stage: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("interrupted while waiting for the runtime to shut down")]
    InterruptedWait,

    #[error("cannot {action} while supervisor is {state}")]
    InvalidState {
        action: &'static str,
        state: SupervisorState,
    },
}
