//! Lifecycle tests for the supervisor.
//!
//! These tests drive `Supervisor` through launch, start, restart and
//! shutdown against scripted runtimes and hooks, and once end-to-end against
//! the bookkeeping runtime.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use launcher::core::keys::{DEPLOY_DIR, RUNTIME_STORAGE};
use launcher::core::types::{ModuleState, StopReason};
use launcher::error::LaunchError;
use launcher::io::config::{ConfigurationSet, LaunchOptions};
use launcher::io::settings::ProcessSettings;
use launcher::registry::RegistryRuntime;
use launcher::runtime::{Runtime, RuntimeError, RuntimeFactory};
use launcher::supervisor::{Supervisor, SupervisorState};
use launcher::test_support::{
    RecordingHooks, RuntimeCall, ScriptedRuntime, SharedRuntimeFactory, TestLayout,
};

const PATIENCE: Duration = Duration::from_secs(5);

fn supervisor(
    layout: &TestLayout,
    factory: Box<dyn RuntimeFactory>,
    hooks: &Arc<RecordingHooks>,
) -> Supervisor {
    Supervisor::new(
        Arc::new(layout.environment()),
        ProcessSettings::new(),
        factory,
        hooks.clone(),
    )
}

fn scripted(
    layout: &TestLayout,
    runtime: &Arc<ScriptedRuntime>,
    hooks: &Arc<RecordingHooks>,
) -> Supervisor {
    supervisor(
        layout,
        Box::new(SharedRuntimeFactory::new(Arc::clone(runtime))),
        hooks,
    )
}

#[test]
fn stop_for_update_restarts_exactly_once_before_next_wait() {
    let layout = TestLayout::new();
    let runtime = Arc::new(ScriptedRuntime::new().with_stop_reasons([StopReason::StopForUpdate]));
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    supervisor.start().expect("start");
    assert!(runtime.await_waits(2, PATIENCE), "worker never waited again");
    assert_eq!(runtime.count(&RuntimeCall::Start), 2);

    supervisor.shutdown().expect("shutdown");
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(runtime.count(&RuntimeCall::Start), 2);
    assert_eq!(hooks.registered(), 1);
    assert_eq!(hooks.deregistered(), 1);
    assert_eq!(hooks.active(), 0);
    assert!(supervisor.runtime().is_none());
}

#[test]
fn terminal_stop_ends_loop_and_removes_hook_once() {
    let layout = TestLayout::new();
    let runtime = Arc::new(ScriptedRuntime::new().with_stop_reasons([StopReason::Stopped]));
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    supervisor.start().expect("start");
    assert_eq!(supervisor.await_termination(), Some(StopReason::Stopped));
    assert_eq!(runtime.count(&RuntimeCall::Start), 1);
    assert_eq!(hooks.deregistered(), 1);

    supervisor.shutdown().expect("shutdown");
    assert_eq!(hooks.deregistered(), 1);
    assert_eq!(hooks.active(), 0);
}

#[test]
fn second_shutdown_is_a_no_op() {
    let layout = TestLayout::new();
    let runtime = Arc::new(ScriptedRuntime::new());
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    supervisor.start().expect("start");
    supervisor.shutdown().expect("first shutdown");
    supervisor.shutdown().expect("second shutdown");

    assert_eq!(runtime.count(&RuntimeCall::Stop), 1);
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(supervisor.await_termination(), Some(StopReason::Stopped));
}

#[test]
fn exit_hook_stops_the_runtime() {
    let layout = TestLayout::new();
    let runtime = Arc::new(ScriptedRuntime::new());
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    supervisor.start().expect("start");
    hooks.fire();

    assert_eq!(supervisor.await_termination(), Some(StopReason::Stopped));
    supervisor.shutdown().expect("shutdown");
    assert_eq!(hooks.active(), 0);
    assert_eq!(hooks.deregistered(), 0);
}

#[test]
fn hook_can_be_disabled_by_configuration() {
    let layout = TestLayout::new();
    layout.write_config("launcher.shutdown.hook=False\n");
    let runtime = Arc::new(ScriptedRuntime::new());
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    assert_eq!(hooks.registered(), 0);
    supervisor.shutdown().expect("shutdown");
}

#[test]
fn init_failure_is_fatal_and_releases_everything() {
    let layout = TestLayout::new();
    let runtime = Arc::new(ScriptedRuntime::new().fail_init("storage locked"));
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    let err = supervisor.launch(&LaunchOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        LaunchError::Lifecycle {
            stage: "initialize",
            ..
        }
    ));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(hooks.active(), 0);
    assert!(supervisor.runtime().is_none());
    assert_eq!(runtime.calls(), vec![RuntimeCall::Init]);
}

#[test]
fn start_failure_is_fatal() {
    let layout = TestLayout::new();
    let runtime = Arc::new(ScriptedRuntime::new().fail_start("no threads"));
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    let err = supervisor.start().unwrap_err();
    assert!(matches!(err, LaunchError::Lifecycle { stage: "start", .. }));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(hooks.active(), 0);
}

#[test]
fn interrupted_wait_is_reported_after_cleanup() {
    let layout = TestLayout::new();
    let runtime = Arc::new(ScriptedRuntime::new().interrupt_waits());
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    supervisor.start().expect("start");
    let err = supervisor.shutdown().unwrap_err();

    assert!(matches!(err, LaunchError::InterruptedWait));
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(supervisor.runtime().is_none());
    assert_eq!(hooks.active(), 0);
    supervisor.shutdown().expect("second shutdown");
}

#[test]
fn launch_twice_is_rejected() {
    let layout = TestLayout::new();
    let runtime = Arc::new(ScriptedRuntime::new());
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    let err = supervisor.launch(&LaunchOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        LaunchError::InvalidState {
            action: "launch",
            state: SupervisorState::Initialized
        }
    ));
    supervisor.shutdown().expect("shutdown");
}

#[test]
fn launch_deploys_and_processes_auto_properties() {
    let layout = TestLayout::new();
    layout.add_module("b.jar");
    layout.add_module("a.jar");
    layout.write_config(
        "launcher.auto.deploy.action=install,start\n\
         launcher.auto.start.2=\"file:extra module.jar\"\n",
    );
    let runtime = Arc::new(ScriptedRuntime::new());
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");

    let deploy = supervisor.deploy_report().expect("deploy report");
    assert_eq!(deploy.installed.len(), 2);
    assert!(deploy.installed[0].ends_with("a.jar"));
    assert_eq!(deploy.started, deploy.installed);
    let auto = supervisor.auto_install_report().expect("auto report");
    assert_eq!(auto.installed, vec![("file:extra module.jar".to_string(), 2)]);
    assert_eq!(auto.started, vec!["file:extra module.jar"]);
    assert_eq!(supervisor.state(), SupervisorState::Initialized);

    supervisor.shutdown().expect("shutdown");
}

#[test]
fn explicit_options_reach_the_runtime_factory() {
    let layout = TestLayout::new();
    layout.write_config("launcher.auto.deploy.dir=from-file\nruntime.storage=from-file\n");
    let factory = SharedRuntimeFactory::new(Arc::new(ScriptedRuntime::new()));
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = supervisor(&layout, Box::new(factory.clone()), &hooks);

    let options = LaunchOptions {
        deploy_dir: Some("from-cli".to_string()),
        storage_dir: Some("cache".to_string()),
    };
    supervisor.launch(&options).expect("launch");

    let configurations = factory.configurations();
    assert_eq!(configurations.len(), 1);
    assert_eq!(configurations[0].get(DEPLOY_DIR), Some("from-cli"));
    assert_eq!(configurations[0].get(RUNTIME_STORAGE), Some("cache"));
    supervisor.shutdown().expect("shutdown");
}

#[test]
fn system_properties_feed_settings_and_configuration() {
    let layout = TestLayout::new();
    layout.write_system("runtime.storage=/var/cache/mods\nsite=north\n");
    layout.write_config("region=${site}\n");
    let runtime = Arc::new(ScriptedRuntime::new());
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = scripted(&layout, &runtime, &hooks);
    assert!(supervisor.configuration().is_none());

    supervisor.launch(&LaunchOptions::default()).expect("launch");

    assert_eq!(supervisor.settings().get("site"), Some("north"));
    let configuration = supervisor.configuration().expect("configuration");
    assert_eq!(configuration.get("region"), Some("north"));
    assert_eq!(configuration.get(RUNTIME_STORAGE), Some("/var/cache/mods"));
    assert_eq!(configuration.get("site"), None);
    supervisor.shutdown().expect("shutdown");
}

/// Factory that keeps a handle on the concrete runtime it created.
#[derive(Clone, Default)]
struct KeepRegistry(Arc<Mutex<Option<Arc<RegistryRuntime>>>>);

impl KeepRegistry {
    fn runtime(&self) -> Arc<RegistryRuntime> {
        self.0.lock().expect("lock").clone().expect("runtime created")
    }
}

impl RuntimeFactory for KeepRegistry {
    fn create(&self, configuration: &ConfigurationSet) -> Result<Arc<dyn Runtime>, RuntimeError> {
        let runtime = Arc::new(RegistryRuntime::from_config(configuration));
        *self.0.lock().expect("lock") = Some(Arc::clone(&runtime));
        Ok(runtime)
    }
}

#[test]
fn registry_runtime_survives_update_restart() {
    let layout = TestLayout::new();
    layout.add_module("a.jar");
    layout.add_module("b.jar");
    layout.write_config("launcher.auto.deploy.action=install,start\n");
    let factory = KeepRegistry::default();
    let hooks = Arc::new(RecordingHooks::new());
    let mut supervisor = supervisor(&layout, Box::new(factory.clone()), &hooks);

    supervisor.launch(&LaunchOptions::default()).expect("launch");
    supervisor.start().expect("start");
    let runtime = factory.runtime();
    assert!(runtime.is_running());

    runtime.request_update();
    let deadline = Instant::now() + PATIENCE;
    while !runtime.is_running() {
        assert!(Instant::now() < deadline, "runtime was not restarted");
        std::thread::sleep(Duration::from_millis(10));
    }

    supervisor.shutdown().expect("shutdown");
    assert!(!runtime.is_running());
    let active = runtime
        .installed()
        .into_iter()
        .filter(|module| !module.id.is_bootstrap() && module.state == ModuleState::Active)
        .count();
    assert_eq!(active, 2);
    assert_eq!(hooks.deregistered(), 1);
}
