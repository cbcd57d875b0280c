//! Procyon lifecycle core.
//!
//! Record entities for application process lifecycle management: per-ability
//! and per-module bookkeeping, the process-level aggregate state machine, the
//! cross-process delivery client, and the serialized task queue with keyed
//! timeout recovery. The service layer lives in `procyon-appmgr`; permission
//! policy in `procyon-governor`.

pub mod ability_record;
pub mod app_record;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod info;
pub mod module_record;
pub mod queue;
pub mod remote;
pub mod states;
pub mod stubs;

pub use ability_record::AbilityRunningRecord;
pub use app_record::{AppRunningRecord, RenderRecord, RestartWindow, StateTransition};
pub use client::AppLifecycleClient;
pub use config::LifecycleTimeouts;
pub use error::AppMgrError;
pub use identity::{AbilityToken, Pid, RecordId, RecordIdAllocator};
pub use info::{
    AbilityInfo, AbilityStateData, AppLaunchData, AppStateData, ApplicationInfo, BundleInfo,
    Configuration, LaunchIntent, MemoryLevel, ModuleInfo, ProcessData, RenderProcessData,
    RunningProcessInfo,
};
pub use module_record::ModuleRunningRecord;
pub use queue::{SerialTaskQueue, Task, TimeoutScheduler, TimerKey};
pub use remote::{AppScheduler, DeathCallback, DeathWatchable};
pub use states::{AbilityState, ApplicationState, ModuleState};
