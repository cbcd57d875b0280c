//! Cross-process delivery boundary.
//!
//! [AppLifecycleClient] wraps the remote scheduler handle bound at attach
//! time and forwards one-way lifecycle notifications to it. With no handle
//! bound every forward is a logged no-op; the death-watch is expected to
//! clean the owning record up eventually.

use std::sync::{Arc, RwLock};

use log::warn;

use crate::error::AppMgrError;
use crate::identity::AbilityToken;
use crate::info::{
    AbilityInfo, AppLaunchData, Configuration, LaunchIntent, MemoryLevel, ModuleInfo,
};
use crate::remote::AppScheduler;

/// Lifecycle-delivery client owned by one process record.
pub struct AppLifecycleClient {
    scheduler: RwLock<Option<Arc<dyn AppScheduler>>>,
}

impl AppLifecycleClient {
    pub fn new() -> Self {
        Self {
            scheduler: RwLock::new(None),
        }
    }

    /// Binds the remote scheduler handle (attach).
    pub fn bind(&self, scheduler: Arc<dyn AppScheduler>) {
        *self.scheduler.write().expect("client lock") = Some(scheduler);
    }

    /// Clears the handle (process death).
    pub fn unbind(&self) {
        *self.scheduler.write().expect("client lock") = None;
    }

    pub fn is_bound(&self) -> bool {
        self.scheduler.read().expect("client lock").is_some()
    }

    fn with_scheduler(&self, op: &str, f: impl FnOnce(&dyn AppScheduler)) {
        let guard = self.scheduler.read().expect("client lock");
        match guard.as_ref() {
            Some(scheduler) => f(scheduler.as_ref()),
            None => warn!("{op}: no application client bound, dropping notification"),
        }
    }

    pub fn launch_application(&self, launch: &AppLaunchData) {
        self.with_scheduler("launch_application", |s| {
            s.schedule_launch_application(launch)
        });
    }

    pub fn launch_ability(
        &self,
        ability: &AbilityInfo,
        token: AbilityToken,
        intent: Option<&LaunchIntent>,
    ) {
        self.with_scheduler("launch_ability", |s| {
            s.schedule_launch_ability(ability, token, intent)
        });
    }

    pub fn ability_stage(&self, module: &ModuleInfo) {
        self.with_scheduler("ability_stage", |s| s.schedule_ability_stage(module));
    }

    pub fn schedule_foreground(&self) {
        self.with_scheduler("schedule_foreground", |s| {
            s.schedule_foreground_application()
        });
    }

    pub fn schedule_background(&self) {
        self.with_scheduler("schedule_background", |s| {
            s.schedule_background_application()
        });
    }

    pub fn schedule_terminate(&self) {
        self.with_scheduler("schedule_terminate", |s| s.schedule_terminate_application());
    }

    pub fn clean_ability(&self, token: AbilityToken) {
        self.with_scheduler("clean_ability", |s| s.schedule_clean_ability(token));
    }

    pub fn memory_level(&self, level: MemoryLevel) {
        self.with_scheduler("memory_level", |s| s.schedule_memory_level(level));
    }

    /// Request/response: surfaces the remote's result, or [AppMgrError::ClientNotBound].
    pub fn update_configuration(&self, config: &Configuration) -> Result<(), AppMgrError> {
        let guard = self.scheduler.read().expect("client lock");
        match guard.as_ref() {
            Some(scheduler) => scheduler.schedule_configuration_update(config),
            None => Err(AppMgrError::ClientNotBound),
        }
    }

    pub fn accept_intent(&self, intent: &LaunchIntent, module_name: &str) {
        self.with_scheduler("accept_intent", |s| {
            s.schedule_accept_intent(intent, module_name)
        });
    }

    pub fn load_patch(&self, bundle_name: &str) {
        self.with_scheduler("load_patch", |s| s.schedule_load_patch(bundle_name));
    }

    pub fn hot_reload_page(&self, bundle_name: &str) {
        self.with_scheduler("hot_reload_page", |s| {
            s.schedule_hot_reload_page(bundle_name)
        });
    }

    pub fn unload_patch(&self, bundle_name: &str) {
        self.with_scheduler("unload_patch", |s| s.schedule_unload_patch(bundle_name));
    }
}

impl Default for AppLifecycleClient {
    fn default() -> Self {
        Self::new()
    }
}
