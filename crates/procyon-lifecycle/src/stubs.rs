//! In-process doubles for the remote seams, shared by unit and integration
//! tests across the workspace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppMgrError;
use crate::identity::AbilityToken;
use crate::info::{
    AbilityInfo, AppLaunchData, Configuration, LaunchIntent, MemoryLevel, ModuleInfo,
};
use crate::queue::{TimeoutScheduler, TimerKey};
use crate::remote::{AppScheduler, DeathCallback, DeathWatchable};

/// One recorded forward to a [RecordingScheduler].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerCall {
    LaunchApplication,
    LaunchAbility(AbilityToken),
    AbilityStage(String),
    Foreground,
    Background,
    Terminate,
    CleanAbility(AbilityToken),
    MemoryLevel(MemoryLevel),
    ConfigurationUpdate,
    AcceptIntent(String),
    LoadPatch(String),
    HotReloadPage(String),
    UnloadPatch(String),
}

/// Scheduler double that records every forward and can simulate remote death.
pub struct RecordingScheduler {
    calls: Mutex<Vec<SchedulerCall>>,
    death: Mutex<Option<DeathCallback>>,
    config_result: Mutex<Result<(), String>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            death: Mutex::new(None),
            config_result: Mutex::new(Ok(())),
        }
    }

    pub fn calls(&self) -> Vec<SchedulerCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, call: &SchedulerCall) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    /// Makes the next configuration update fail with the given message.
    pub fn fail_configuration_update(&self, message: &str) {
        *self.config_result.lock().expect("config lock") = Err(message.to_string());
    }

    /// Fires the armed death callback, simulating remote process death.
    pub fn trigger_death(&self) {
        if let Some(callback) = self.death.lock().expect("death lock").take() {
            callback();
        }
    }

    fn record(&self, call: SchedulerCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl Default for RecordingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DeathWatchable for RecordingScheduler {
    fn watch_death(&self, callback: DeathCallback) {
        *self.death.lock().expect("death lock") = Some(callback);
    }

    fn unwatch_death(&self) {
        self.death.lock().expect("death lock").take();
    }
}

impl AppScheduler for RecordingScheduler {
    fn schedule_launch_application(&self, _launch: &AppLaunchData) {
        self.record(SchedulerCall::LaunchApplication);
    }

    fn schedule_launch_ability(
        &self,
        _ability: &AbilityInfo,
        token: AbilityToken,
        _intent: Option<&LaunchIntent>,
    ) {
        self.record(SchedulerCall::LaunchAbility(token));
    }

    fn schedule_ability_stage(&self, module: &ModuleInfo) {
        self.record(SchedulerCall::AbilityStage(module.module_name.clone()));
    }

    fn schedule_foreground_application(&self) {
        self.record(SchedulerCall::Foreground);
    }

    fn schedule_background_application(&self) {
        self.record(SchedulerCall::Background);
    }

    fn schedule_terminate_application(&self) {
        self.record(SchedulerCall::Terminate);
    }

    fn schedule_clean_ability(&self, token: AbilityToken) {
        self.record(SchedulerCall::CleanAbility(token));
    }

    fn schedule_memory_level(&self, level: MemoryLevel) {
        self.record(SchedulerCall::MemoryLevel(level));
    }

    fn schedule_configuration_update(&self, _config: &Configuration) -> Result<(), AppMgrError> {
        self.record(SchedulerCall::ConfigurationUpdate);
        self.config_result
            .lock()
            .expect("config lock")
            .clone()
            .map_err(AppMgrError::Remote)
    }

    fn schedule_accept_intent(&self, _intent: &LaunchIntent, module_name: &str) {
        self.record(SchedulerCall::AcceptIntent(module_name.to_string()));
    }

    fn schedule_load_patch(&self, bundle_name: &str) {
        self.record(SchedulerCall::LoadPatch(bundle_name.to_string()));
    }

    fn schedule_hot_reload_page(&self, bundle_name: &str) {
        self.record(SchedulerCall::HotReloadPage(bundle_name.to_string()));
    }

    fn schedule_unload_patch(&self, bundle_name: &str) {
        self.record(SchedulerCall::UnloadPatch(bundle_name.to_string()));
    }
}

/// Scheduler double that swallows everything.
pub struct NoopScheduler;

impl DeathWatchable for NoopScheduler {}

impl AppScheduler for NoopScheduler {
    fn schedule_launch_application(&self, _launch: &AppLaunchData) {}

    fn schedule_launch_ability(
        &self,
        _ability: &AbilityInfo,
        _token: AbilityToken,
        _intent: Option<&LaunchIntent>,
    ) {
    }

    fn schedule_ability_stage(&self, _module: &ModuleInfo) {}

    fn schedule_foreground_application(&self) {}

    fn schedule_background_application(&self) {}

    fn schedule_terminate_application(&self) {}

    fn schedule_clean_ability(&self, _token: AbilityToken) {}

    fn schedule_memory_level(&self, _level: MemoryLevel) {}

    fn schedule_configuration_update(&self, _config: &Configuration) -> Result<(), AppMgrError> {
        Ok(())
    }

    fn schedule_accept_intent(&self, _intent: &LaunchIntent, _module_name: &str) {}

    fn schedule_load_patch(&self, _bundle_name: &str) {}

    fn schedule_hot_reload_page(&self, _bundle_name: &str) {}

    fn schedule_unload_patch(&self, _bundle_name: &str) {}
}

/// Timeout double: records arms and cancels without running anything, so
/// tests can assert on exactly which keys are pending.
#[derive(Default)]
pub struct RecordingTimeouts {
    armed: Mutex<HashMap<TimerKey, Duration>>,
    cancelled: Mutex<Vec<TimerKey>>,
}

impl RecordingTimeouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.armed.lock().expect("armed lock").contains_key(key)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().expect("armed lock").len()
    }

    pub fn cancelled(&self) -> Vec<TimerKey> {
        self.cancelled.lock().expect("cancelled lock").clone()
    }
}

impl TimeoutScheduler for RecordingTimeouts {
    fn schedule(&self, key: TimerKey, delay: Duration) {
        self.armed.lock().expect("armed lock").insert(key, delay);
    }

    fn cancel(&self, key: &TimerKey) {
        self.armed.lock().expect("armed lock").remove(key);
        self.cancelled.lock().expect("cancelled lock").push(key.clone());
    }
}

/// Timeout double that ignores everything.
pub struct NoopTimeouts;

impl TimeoutScheduler for NoopTimeouts {
    fn schedule(&self, _key: TimerKey, _delay: Duration) {}

    fn cancel(&self, _key: &TimerKey) {}
}
