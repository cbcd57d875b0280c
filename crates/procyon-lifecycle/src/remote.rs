//! Remote-facing seams.
//!
//! [AppScheduler] is the interface of the scheduler living inside the real
//! application process: every method is a one-way notification except
//! `schedule_configuration_update`, which surfaces the remote's result.
//! The transport behind it (proxy, in-process test double) is whoever
//! implements the trait; the lifecycle core never sees wire details.
//!
//! [DeathWatchable] is the remote-death primitive: arm a callback, get called
//! once if the remote endpoint becomes unreachable. Callbacks run on an
//! arbitrary transport thread and must only post work onto the serialized
//! queue, never mutate records directly.

use crate::error::AppMgrError;
use crate::identity::AbilityToken;
use crate::info::{
    AbilityInfo, AppLaunchData, Configuration, LaunchIntent, MemoryLevel, ModuleInfo,
};

/// Callback fired once when a remote endpoint dies.
pub type DeathCallback = Box<dyn FnOnce() + Send>;

/// Death-watch registration on a remote handle. The default implementation is
/// for endpoints that cannot die (in-process doubles).
pub trait DeathWatchable {
    fn watch_death(&self, _callback: DeathCallback) {}

    fn unwatch_death(&self) {}
}

/// The remote application process's scheduler interface.
pub trait AppScheduler: DeathWatchable + Send + Sync {
    fn schedule_launch_application(&self, launch: &AppLaunchData);

    fn schedule_launch_ability(
        &self,
        ability: &AbilityInfo,
        token: AbilityToken,
        intent: Option<&LaunchIntent>,
    );

    /// Tells the process a freshly installed module is about to run.
    fn schedule_ability_stage(&self, module: &ModuleInfo);

    fn schedule_foreground_application(&self);

    fn schedule_background_application(&self);

    fn schedule_terminate_application(&self);

    fn schedule_clean_ability(&self, token: AbilityToken);

    fn schedule_memory_level(&self, level: MemoryLevel);

    /// The one request/response call in this set.
    fn schedule_configuration_update(&self, config: &Configuration) -> Result<(), AppMgrError>;

    /// Asks a running process whether it accepts a new launch intent
    /// (specified-ability flow); the answer arrives later as a control-plane
    /// acknowledgment.
    fn schedule_accept_intent(&self, intent: &LaunchIntent, module_name: &str);

    fn schedule_load_patch(&self, bundle_name: &str);

    fn schedule_hot_reload_page(&self, bundle_name: &str);

    fn schedule_unload_patch(&self, bundle_name: &str);
}
