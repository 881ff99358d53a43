//! Test doubles for the launcher's collaborators.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tempfile::TempDir;

use crate::core::types::{
    ModuleId, ModuleOperation, ModuleRecord, ModuleState, StartTier, StopReason,
};
use crate::hooks::{ExitHook, ExitHooks, HookId, HookRegistry};
use crate::io::config::ConfigurationSet;
use crate::io::environment::FilesystemEnvironment;
use crate::io::source::ModuleSource;
use crate::runtime::{ModuleStream, Runtime, RuntimeError, RuntimeFactory};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One call made on a [`ScriptedRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Init,
    Start,
    Stop,
    WaitForStop,
    Install(String),
    Update(String),
    Uninstall(String),
    StartModule(String),
    SetTier(String, StartTier),
}

impl RuntimeCall {
    fn is_module_call(&self) -> bool {
        !matches!(
            self,
            RuntimeCall::Init | RuntimeCall::Start | RuntimeCall::Stop | RuntimeCall::WaitForStop
        )
    }
}

#[derive(Default)]
struct Script {
    calls: Vec<RuntimeCall>,
    modules: BTreeMap<ModuleId, (ModuleRecord, Option<StartTier>)>,
    next_id: u64,
    fragments: BTreeSet<String>,
    failing: BTreeSet<(String, String)>,
    init_error: Option<String>,
    start_error: Option<String>,
    stop_reasons: VecDeque<StopReason>,
    stop_requested: bool,
    interrupt_waits: bool,
}

impl Script {
    fn check(&self, operation: ModuleOperation, location: &str) -> Result<(), RuntimeError> {
        if self
            .failing
            .contains(&(operation.to_string(), location.to_string()))
        {
            Err(RuntimeError::module(location, format!("scripted {operation} failure")))
        } else {
            Ok(())
        }
    }

    fn find(&self, location: &str) -> Option<ModuleRecord> {
        self.modules
            .values()
            .find(|(record, _)| record.location == location)
            .map(|(record, _)| record.clone())
    }

    fn add(&mut self, location: &str, fragment: bool, state: ModuleState) -> ModuleRecord {
        let record = ModuleRecord {
            id: ModuleId(self.next_id),
            location: location.to_string(),
            fragment,
            state,
        };
        self.next_id += 1;
        self.modules.insert(record.id, (record.clone(), None));
        record
    }
}

/// Runtime double that records every call and plays back scripted stops.
///
/// `wait_for_stop` first returns the queued stop reasons one by one, then
/// blocks until `stop` is called.
pub struct ScriptedRuntime {
    script: Mutex<Script>,
    changed: Condvar,
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRuntime {
    /// A runtime holding only the bootstrap module (id 0).
    pub fn new() -> Self {
        let mut script = Script::default();
        script.add("system:bootstrap", false, ModuleState::Active);
        Self {
            script: Mutex::new(script),
            changed: Condvar::new(),
        }
    }

    /// Pre-install a module without recording a call.
    pub fn with_module(self, location: &str, fragment: bool, state: ModuleState) -> Self {
        lock(&self.script).add(location, fragment, state);
        self
    }

    /// Installs of `location` produce a fragment.
    pub fn fragment(self, location: &str) -> Self {
        lock(&self.script).fragments.insert(location.to_string());
        self
    }

    pub fn fail_on(self, operation: ModuleOperation, location: &str) -> Self {
        lock(&self.script)
            .failing
            .insert((operation.to_string(), location.to_string()));
        self
    }

    pub fn fail_init(self, message: &str) -> Self {
        lock(&self.script).init_error = Some(message.to_string());
        self
    }

    pub fn fail_start(self, message: &str) -> Self {
        lock(&self.script).start_error = Some(message.to_string());
        self
    }

    /// Reasons returned by successive `wait_for_stop` calls before blocking.
    pub fn with_stop_reasons(self, reasons: impl IntoIterator<Item = StopReason>) -> Self {
        lock(&self.script).stop_reasons.extend(reasons);
        self
    }

    /// Waits released by `stop` fail with [`RuntimeError::Interrupted`].
    pub fn interrupt_waits(self) -> Self {
        lock(&self.script).interrupt_waits = true;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.script).calls.clone()
    }

    /// Calls other than init/start/stop/wait.
    pub fn module_calls(&self) -> Vec<RuntimeCall> {
        lock(&self.script)
            .calls
            .iter()
            .filter(|call| call.is_module_call())
            .cloned()
            .collect()
    }

    pub fn count(&self, call: &RuntimeCall) -> usize {
        lock(&self.script)
            .calls
            .iter()
            .filter(|recorded| *recorded == call)
            .count()
    }

    pub fn record(&self, location: &str) -> Option<ModuleRecord> {
        lock(&self.script).find(location)
    }

    pub fn record_by_id(&self, id: ModuleId) -> Option<ModuleRecord> {
        lock(&self.script)
            .modules
            .get(&id)
            .map(|(record, _)| record.clone())
    }

    /// Tier assigned through `set_start_tier`, if any.
    pub fn tier_of(&self, location: &str) -> Option<StartTier> {
        lock(&self.script)
            .modules
            .values()
            .find(|(record, _)| record.location == location)
            .and_then(|(_, tier)| *tier)
    }

    /// Block until `wait_for_stop` has been entered `count` times.
    /// Returns `false` on timeout.
    pub fn await_waits(&self, count: usize, timeout: Duration) -> bool {
        let script = lock(&self.script);
        let (_script, result) = self
            .changed
            .wait_timeout_while(script, timeout, |script| {
                script
                    .calls
                    .iter()
                    .filter(|call| **call == RuntimeCall::WaitForStop)
                    .count()
                    < count
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !result.timed_out()
    }

    fn record_call(&self, call: RuntimeCall) -> MutexGuard<'_, Script> {
        let mut script = lock(&self.script);
        script.calls.push(call);
        self.changed.notify_all();
        script
    }
}

impl Runtime for ScriptedRuntime {
    fn init(&self) -> Result<(), RuntimeError> {
        let script = self.record_call(RuntimeCall::Init);
        match &script.init_error {
            Some(message) => Err(RuntimeError::Lifecycle(message.clone())),
            None => Ok(()),
        }
    }

    fn start(&self) -> Result<(), RuntimeError> {
        let script = self.record_call(RuntimeCall::Start);
        match &script.start_error {
            Some(message) => Err(RuntimeError::Lifecycle(message.clone())),
            None => Ok(()),
        }
    }

    fn stop(&self) -> Result<(), RuntimeError> {
        let mut script = self.record_call(RuntimeCall::Stop);
        script.stop_requested = true;
        self.changed.notify_all();
        Ok(())
    }

    fn wait_for_stop(&self, timeout: Option<Duration>) -> Result<StopReason, RuntimeError> {
        let mut script = self.record_call(RuntimeCall::WaitForStop);
        if let Some(reason) = script.stop_reasons.pop_front() {
            return Ok(reason);
        }
        let pending = |script: &mut Script| !script.stop_requested;
        script = match timeout {
            None => self
                .changed
                .wait_while(script, pending)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            Some(timeout) => {
                let (script, result) = self
                    .changed
                    .wait_timeout_while(script, timeout, pending)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if result.timed_out() {
                    return Ok(StopReason::TimedOut);
                }
                script
            }
        };
        if script.interrupt_waits {
            Err(RuntimeError::Interrupted)
        } else {
            Ok(StopReason::Stopped)
        }
    }

    fn install(
        &self,
        location: &str,
        stream: Option<ModuleStream>,
    ) -> Result<ModuleRecord, RuntimeError> {
        if let Some(mut stream) = stream {
            let mut sink = Vec::new();
            stream
                .read_to_end(&mut sink)
                .map_err(|source| RuntimeError::Open {
                    location: location.to_string(),
                    source,
                })?;
        }
        let mut script = self.record_call(RuntimeCall::Install(location.to_string()));
        script.check(ModuleOperation::Install, location)?;
        if let Some(existing) = script.find(location) {
            return Ok(existing);
        }
        let fragment = script.fragments.contains(location);
        Ok(script.add(location, fragment, ModuleState::Installed))
    }

    fn update(&self, module: &ModuleRecord) -> Result<(), RuntimeError> {
        let script = self.record_call(RuntimeCall::Update(module.location.clone()));
        script.check(ModuleOperation::Update, &module.location)
    }

    fn uninstall(&self, module: &ModuleRecord) -> Result<(), RuntimeError> {
        let mut script = self.record_call(RuntimeCall::Uninstall(module.location.clone()));
        script.check(ModuleOperation::Uninstall, &module.location)?;
        if module.id.is_bootstrap() {
            return Err(RuntimeError::module(&module.location, "bootstrap module"));
        }
        script.modules.remove(&module.id);
        Ok(())
    }

    fn start_module(&self, module: &ModuleRecord) -> Result<(), RuntimeError> {
        let mut script = self.record_call(RuntimeCall::StartModule(module.location.clone()));
        script.check(ModuleOperation::Start, &module.location)?;
        match script.modules.get_mut(&module.id) {
            Some((record, _)) => {
                record.state = ModuleState::Active;
                Ok(())
            }
            None => Err(RuntimeError::module(&module.location, "not installed")),
        }
    }

    fn installed(&self) -> Vec<ModuleRecord> {
        lock(&self.script)
            .modules
            .values()
            .map(|(record, _)| record.clone())
            .collect()
    }

    fn set_start_tier(&self, module: &ModuleRecord, tier: StartTier) -> Result<(), RuntimeError> {
        let mut script =
            self.record_call(RuntimeCall::SetTier(module.location.clone(), tier));
        script.check(ModuleOperation::AssignTier, &module.location)?;
        match script.modules.get_mut(&module.id) {
            Some((_, assigned)) => {
                *assigned = Some(tier);
                Ok(())
            }
            None => Err(RuntimeError::module(&module.location, "not installed")),
        }
    }

    fn initial_start_tier(&self) -> StartTier {
        1
    }
}

/// Factory handing out one shared [`ScriptedRuntime`].
#[derive(Clone)]
pub struct SharedRuntimeFactory {
    runtime: Arc<ScriptedRuntime>,
    created: Arc<Mutex<Vec<ConfigurationSet>>>,
}

impl SharedRuntimeFactory {
    pub fn new(runtime: Arc<ScriptedRuntime>) -> Self {
        Self {
            runtime,
            created: Arc::default(),
        }
    }

    /// Configurations passed to `create`, in order.
    pub fn configurations(&self) -> Vec<ConfigurationSet> {
        lock(&self.created).clone()
    }
}

impl RuntimeFactory for SharedRuntimeFactory {
    fn create(&self, configuration: &ConfigurationSet) -> Result<Arc<dyn Runtime>, RuntimeError> {
        lock(&self.created).push(configuration.clone());
        Ok(self.runtime.clone())
    }
}

/// Stream that tracks how many streams are still open.
struct TrackedStream {
    inner: Cursor<Vec<u8>>,
    live: Arc<AtomicUsize>,
}

impl Read for TrackedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory module source keyed by directory.
#[derive(Default)]
pub struct MemorySource {
    dirs: BTreeMap<String, Vec<String>>,
    failing: BTreeSet<String>,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, directory: &str, location: &str) -> Self {
        self.dirs
            .entry(directory.to_string())
            .or_default()
            .push(location.to_string());
        self
    }

    pub fn failing_open(mut self, location: &str) -> Self {
        self.failing.insert(location.to_string());
        self
    }

    /// Number of successful and failed `open` calls.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped.
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl ModuleSource for MemorySource {
    fn list(&self, directory: &str) -> Vec<String> {
        self.dirs.get(directory).cloned().unwrap_or_default()
    }

    fn open(&self, location: &str) -> Result<ModuleStream, RuntimeError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(location) {
            return Err(RuntimeError::Open {
                location: location.to_string(),
                source: std::io::Error::new(ErrorKind::NotFound, "scripted open failure"),
            });
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackedStream {
            inner: Cursor::new(location.as_bytes().to_vec()),
            live: Arc::clone(&self.live),
        }))
    }
}

/// Exit hooks that count registrations and removals.
#[derive(Default)]
pub struct RecordingHooks {
    registry: HookRegistry,
    registered: AtomicUsize,
    deregistered: AtomicUsize,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    /// Successful removals only.
    pub fn deregistered(&self) -> usize {
        self.deregistered.load(Ordering::SeqCst)
    }

    /// Hooks still registered.
    pub fn active(&self) -> usize {
        self.registry.len()
    }

    /// Simulate process exit: run every registered hook.
    pub fn fire(&self) {
        self.registry.run_all();
    }
}

impl ExitHooks for RecordingHooks {
    fn register(&self, name: &str, hook: ExitHook) -> HookId {
        self.registered.fetch_add(1, Ordering::SeqCst);
        self.registry.register(name, hook)
    }

    fn deregister(&self, id: HookId) -> bool {
        let removed = self.registry.deregister(id);
        if removed {
            self.deregistered.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }
}

/// Temporary launcher layout with `conf/` and `modules/` directories.
pub struct TestLayout {
    temp: TempDir,
}

impl TestLayout {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join(FilesystemEnvironment::CONF_DIR))
            .expect("create conf dir");
        std::fs::create_dir_all(temp.path().join(FilesystemEnvironment::DEPLOY_DIR))
            .expect("create modules dir");
        Self { temp }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn write_config(&self, text: &str) -> PathBuf {
        self.write_conf("config.properties", text)
    }

    pub fn write_system(&self, text: &str) -> PathBuf {
        self.write_conf("system.properties", text)
    }

    /// Write a module package into `modules/` and return its path.
    pub fn add_module(&self, name: &str) -> PathBuf {
        let path = self
            .root()
            .join(FilesystemEnvironment::DEPLOY_DIR)
            .join(name);
        std::fs::write(&path, name).expect("write module");
        path
    }

    pub fn environment(&self) -> FilesystemEnvironment {
        FilesystemEnvironment::new(self.root())
    }

    fn write_conf(&self, name: &str, text: &str) -> PathBuf {
        let path = self
            .root()
            .join(FilesystemEnvironment::CONF_DIR)
            .join(name);
        std::fs::write(&path, text).expect("write conf file");
        path
    }
}

impl Default for TestLayout {
    fn default() -> Self {
        Self::new()
    }
}
