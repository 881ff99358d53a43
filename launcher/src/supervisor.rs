//! Lifecycle supervision of one runtime launch.
//!
//! A [`Supervisor`] moves through
//! `Created -> Initialized -> Started -> (Restarting) -> Stopping -> Stopped`:
//!
//! - [`Supervisor::launch`] loads settings and configuration, creates the
//!   runtime, registers the exit hook, initializes the runtime and runs
//!   auto-deploy and auto-properties on the caller's thread.
//! - [`Supervisor::start`] starts the runtime and hands it to a background
//!   worker that waits for the runtime to stop and restarts it whenever the
//!   stop was a stop-for-update.
//! - [`Supervisor::shutdown`] closes the worker's restart gate, stops the
//!   runtime, waits for it and for the worker, and releases the hook and the
//!   published runtime. It runs at most once.

use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::auto_props::{AutoInstallReport, install_from_properties};
use crate::core::keys::SHUTDOWN_HOOK;
use crate::core::types::StopReason;
use crate::deploy::{DeployReport, reconcile};
use crate::error::LaunchError;
use crate::hooks::{ExitHooks, HookId};
use crate::io::config::{ConfigurationSet, LaunchOptions, load_configuration, load_system_properties};
use crate::io::environment::LaunchEnvironment;
use crate::io::settings::ProcessSettings;
use crate::runtime::{Runtime, RuntimeError, RuntimeFactory};

/// Name under which the supervisor registers its exit hook.
pub const HOOK_NAME: &str = "launcher-shutdown";

const WORKER_NAME: &str = "launcher-poll";

/// Lifecycle position of a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Created,
    Initialized,
    Started,
    Restarting,
    Stopping,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SupervisorState::Created => "created",
            SupervisorState::Initialized => "initialized",
            SupervisorState::Started => "started",
            SupervisorState::Restarting => "restarting",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The single published runtime reference. Readers see either no runtime or
/// the current one.
#[derive(Default)]
struct RuntimeSlot(RwLock<Option<Arc<dyn Runtime>>>);

impl RuntimeSlot {
    fn publish(&self, runtime: Arc<dyn Runtime>) {
        *self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(runtime);
    }

    fn current(&self) -> Option<Arc<dyn Runtime>> {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn clear(&self) {
        *self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Cancellation gate for restarts. A restart runs while holding the gate,
/// so closing it waits for an in-flight restart to finish.
struct RestartGate {
    open: Mutex<bool>,
}

impl RestartGate {
    fn new() -> Self {
        Self {
            open: Mutex::new(true),
        }
    }

    /// Run `restart` unless the gate is closed. Returns whether it ran.
    fn run_if_open<R>(&self, restart: impl FnOnce() -> R) -> Option<R> {
        let open = lock(&self.open);
        if *open { Some(restart()) } else { None }
    }

    fn close(&self) {
        *lock(&self.open) = false;
    }
}

/// State shared with the poll worker.
struct Shared {
    state: Mutex<SupervisorState>,
    slot: Arc<RuntimeSlot>,
    gate: RestartGate,
    hook: Mutex<Option<HookId>>,
    hooks: Arc<dyn ExitHooks>,
}

impl Shared {
    fn state(&self) -> SupervisorState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SupervisorState) {
        let mut current = lock(&self.state);
        let previous = std::mem::replace(&mut *current, state);
        debug!(from = %previous, to = %state, "supervisor state change");
    }

    /// Deregister the exit hook if this launch still holds it. Safe to call
    /// from the worker and from shutdown; only the first call deregisters.
    fn release_hook(&self) {
        if let Some(id) = lock(&self.hook).take() {
            if !self.hooks.deregister(id) {
                debug!(id = id.0, "exit hook already removed");
            }
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<Result<StopReason, RuntimeError>>,
}

/// Supervises one launch of a runtime.
pub struct Supervisor {
    environment: Arc<dyn LaunchEnvironment>,
    settings: ProcessSettings,
    factory: Box<dyn RuntimeFactory>,
    shared: Arc<Shared>,
    worker: Option<Worker>,
    outcome: Option<StopReason>,
    configuration: Option<ConfigurationSet>,
    deploy_report: Option<DeployReport>,
    auto_install_report: Option<AutoInstallReport>,
}

impl Supervisor {
    pub fn new(
        environment: Arc<dyn LaunchEnvironment>,
        settings: ProcessSettings,
        factory: Box<dyn RuntimeFactory>,
        hooks: Arc<dyn ExitHooks>,
    ) -> Self {
        Self {
            environment,
            settings,
            factory,
            shared: Arc::new(Shared {
                state: Mutex::new(SupervisorState::Created),
                slot: Arc::new(RuntimeSlot::default()),
                gate: RestartGate::new(),
                hook: Mutex::new(None),
                hooks,
            }),
            worker: None,
            outcome: None,
            configuration: None,
            deploy_report: None,
            auto_install_report: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.state()
    }

    /// Configuration of this launch, once [`Supervisor::launch`] built it.
    pub fn configuration(&self) -> Option<&ConfigurationSet> {
        self.configuration.as_ref()
    }

    /// Process-wide settings, including merged system properties.
    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    pub fn deploy_report(&self) -> Option<&DeployReport> {
        self.deploy_report.as_ref()
    }

    pub fn auto_install_report(&self) -> Option<&AutoInstallReport> {
        self.auto_install_report.as_ref()
    }

    /// The published runtime, if one is live.
    pub fn runtime(&self) -> Option<Arc<dyn Runtime>> {
        self.shared.slot.current()
    }

    fn require_state(&self, expected: SupervisorState, action: &'static str) -> Result<(), LaunchError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(LaunchError::InvalidState { action, state })
        }
    }

    /// Build the configuration, create and initialize the runtime and run
    /// the one-shot module installation.
    #[instrument(skip_all)]
    pub fn launch(&mut self, options: &LaunchOptions) -> Result<(), LaunchError> {
        self.require_state(SupervisorState::Created, "launch")?;
        let result = self.initialize(options);
        if result.is_err() {
            self.abandon();
        }
        result
    }

    fn initialize(&mut self, options: &LaunchOptions) -> Result<(), LaunchError> {
        load_system_properties(self.environment.as_ref(), &mut self.settings)?;
        let config = load_configuration(self.environment.as_ref(), &self.settings, options)?;

        let runtime = self
            .factory
            .create(&config)
            .map_err(|source| LaunchError::Lifecycle {
                stage: "create",
                source,
            })?;
        self.shared.slot.publish(Arc::clone(&runtime));

        if hook_enabled(&config) {
            self.register_hook();
        } else {
            debug!("exit hook disabled by configuration");
        }

        runtime.init().map_err(|source| LaunchError::Lifecycle {
            stage: "initialize",
            source,
        })?;
        self.shared.set_state(SupervisorState::Initialized);

        let source = self.environment.module_source();
        let default_dir = self.environment.default_deploy_dir();
        self.deploy_report = Some(reconcile(
            &config,
            runtime.as_ref(),
            &default_dir,
            source.as_ref(),
        ));
        self.auto_install_report = Some(install_from_properties(&config, runtime.as_ref()));
        self.configuration = Some(config);
        Ok(())
    }

    fn register_hook(&self) {
        let slot = Arc::clone(&self.shared.slot);
        let id = self.shared.hooks.register(
            HOOK_NAME,
            Box::new(move || {
                let Some(runtime) = slot.current() else {
                    return;
                };
                info!("exit requested; stopping runtime");
                if let Err(err) = runtime.stop() {
                    error!(err = %err, "failed to stop runtime from exit hook");
                    return;
                }
                if let Err(err) = runtime.wait_for_stop(None) {
                    error!(err = %err, "failed waiting for runtime from exit hook");
                }
            }),
        );
        debug!(id = id.0, "exit hook registered");
        *lock(&self.shared.hook) = Some(id);
    }

    /// Start the runtime and the background poll worker.
    #[instrument(skip_all)]
    pub fn start(&mut self) -> Result<(), LaunchError> {
        self.require_state(SupervisorState::Initialized, "start")?;
        let result = self.start_worker();
        if result.is_err() {
            self.abandon();
        }
        result
    }

    fn start_worker(&mut self) -> Result<(), LaunchError> {
        let runtime = self.shared.slot.current().ok_or(LaunchError::InvalidState {
            action: "start",
            state: self.state(),
        })?;
        runtime.start().map_err(|source| LaunchError::Lifecycle {
            stage: "start",
            source,
        })?;
        self.shared.set_state(SupervisorState::Started);

        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                let outcome = poll_until_terminal(&shared, runtime.as_ref());
                shared.release_hook();
                if done_tx.send(outcome).is_err() {
                    debug!("supervisor no longer awaiting poll worker");
                }
            })
            .map_err(|err| LaunchError::Lifecycle {
                stage: "spawn poll worker",
                source: RuntimeError::Lifecycle(err.to_string()),
            })?;
        self.worker = Some(Worker {
            handle,
            done: done_rx,
        });
        info!("runtime started");
        Ok(())
    }

    /// Block until the poll worker observes a terminal stop.
    ///
    /// Returns the terminal stop reason, or `None` when no worker ran or its
    /// wait failed. Calling it again returns the same answer.
    pub fn await_termination(&mut self) -> Option<StopReason> {
        if self.outcome.is_none() {
            if let Some(worker) = &self.worker {
                self.outcome = receive_outcome(&worker.done);
            }
        }
        self.outcome
    }

    /// Stop the runtime and release everything this launch holds.
    ///
    /// A second call is a no-op. An interrupted wait is reported only after
    /// cleanup has completed.
    #[instrument(skip_all)]
    pub fn shutdown(&mut self) -> Result<(), LaunchError> {
        if self.state() == SupervisorState::Stopped {
            debug!("shutdown already complete");
            return Ok(());
        }

        self.shared.gate.close();
        self.shared.set_state(SupervisorState::Stopping);

        let mut interrupted = false;
        if let Some(runtime) = self.shared.slot.current() {
            if let Err(err) = runtime.stop() {
                warn!(err = %err, "runtime stop request failed");
            }
            match runtime.wait_for_stop(None) {
                Ok(reason) => debug!(reason = %reason, "runtime quiesced"),
                Err(RuntimeError::Interrupted) => {
                    warn!("interrupted while waiting for runtime to stop");
                    interrupted = true;
                }
                Err(err) => warn!(err = %err, "failed waiting for runtime to stop"),
            }
        }

        if let Some(worker) = self.worker.take() {
            if self.outcome.is_none() {
                self.outcome = receive_outcome(&worker.done);
            }
            if worker.handle.join().is_err() {
                error!("poll worker panicked");
            }
        }

        self.abandon();
        info!("runtime shut down");
        if interrupted {
            Err(LaunchError::InterruptedWait)
        } else {
            Ok(())
        }
    }

    /// Launch, start, wait for a terminal stop, then shut down.
    pub fn run(&mut self, options: &LaunchOptions) -> Result<Option<StopReason>, LaunchError> {
        self.launch(options)?;
        self.start()?;
        let reason = self.await_termination();
        self.shutdown()?;
        Ok(reason)
    }

    /// Release the hook and the published runtime. Always the last step.
    fn abandon(&mut self) {
        self.shared.gate.close();
        self.shared.release_hook();
        self.shared.slot.clear();
        self.shared.set_state(SupervisorState::Stopped);
    }
}

fn hook_enabled(config: &ConfigurationSet) -> bool {
    config
        .get(SHUTDOWN_HOOK)
        .is_none_or(|value| !value.trim().eq_ignore_ascii_case("false"))
}

fn receive_outcome(done: &Receiver<Result<StopReason, RuntimeError>>) -> Option<StopReason> {
    match done.recv() {
        Ok(Ok(reason)) => Some(reason),
        Ok(Err(err)) => {
            warn!(err = %err, "poll worker ended with an error");
            None
        }
        Err(_) => {
            debug!("poll worker exited without reporting");
            None
        }
    }
}

/// Wait for the runtime to stop, restarting it after each stop-for-update
/// while the restart gate is open.
fn poll_until_terminal(shared: &Shared, runtime: &dyn Runtime) -> Result<StopReason, RuntimeError> {
    loop {
        let reason = runtime.wait_for_stop(None)?;
        if !reason.wants_restart() {
            info!(reason = %reason, "runtime stopped");
            return Ok(reason);
        }

        let restarted = shared.gate.run_if_open(|| {
            shared.set_state(SupervisorState::Restarting);
            info!("runtime stopped for update; restarting");
            let result = runtime.start();
            shared.set_state(SupervisorState::Started);
            result
        });
        match restarted {
            Some(Ok(())) => continue,
            Some(Err(err)) => {
                error!(err = %err, "runtime restart failed");
                return Err(err);
            }
            None => {
                debug!("restart cancelled by shutdown");
                return Ok(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_gate_skips_restart() {
        let gate = RestartGate::new();
        assert_eq!(gate.run_if_open(|| 1), Some(1));
        gate.close();
        assert_eq!(gate.run_if_open(|| 2), None);
    }

    #[test]
    fn hook_flag_is_case_insensitive() {
        let disabled: ConfigurationSet = [(SHUTDOWN_HOOK, " FALSE ")].into_iter().collect();
        let enabled: ConfigurationSet = [(SHUTDOWN_HOOK, "true")].into_iter().collect();
        assert!(!hook_enabled(&disabled));
        assert!(hook_enabled(&enabled));
        assert!(hook_enabled(&ConfigurationSet::new()));
    }

    #[test]
    fn state_labels_are_lowercase() {
        assert_eq!(SupervisorState::Restarting.to_string(), "restarting");
        assert_eq!(SupervisorState::Stopped.to_string(), "stopped");
    }
}
