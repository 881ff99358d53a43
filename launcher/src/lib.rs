//! Launcher for a dynamic module runtime.
//!
//! Resolves launch configuration, reconciles a deploy directory of module
//! packages against what a runtime has installed, and supervises the
//! runtime's start/stop/restart lifecycle.
//!
//! Text handling lives in [`core`] and never touches the filesystem or the
//! process environment; [`io`] reads properties files, process settings and
//! module packages from disk or from an exploded archive. [`deploy`],
//! [`auto_props`] and [`supervisor`] drive a [`runtime::Runtime`] using both,
//! and [`registry`] is the bookkeeping runtime behind the command-line binary.

pub mod auto_props;
pub mod core;
pub mod deploy;
pub mod error;
pub mod exit_codes;
pub mod hooks;
pub mod io;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
