//! Procyon application manager service.
//!
//! The control-plane front door over the lifecycle core: the process table,
//! the observer fan-out hub, configuration management, and the serialized
//! event-handler queue that is the sole mutator of lifecycle state. An
//! optional HTTP control surface is available behind the `service-api`
//! feature.

#[cfg(feature = "service-api")]
pub mod api_errors;
#[cfg(feature = "service-api")]
pub mod api_handlers;
#[cfg(feature = "service-api")]
pub mod api_models;
pub mod launcher;
pub mod observer;
pub mod running_manager;
pub mod service;

#[cfg(feature = "service-api")]
pub use api_errors::ApiError;
#[cfg(feature = "service-api")]
pub use api_handlers::{build_router, ApiState};
#[cfg(feature = "service-api")]
pub use api_models::{
    AckResponse, ConfigurationResponse, ForegroundAppsResponse, MemoryLevelRequest,
    ProcessListResponse, UpdateAbilityStateRequest,
};
pub use launcher::{ProcessLauncher, ProcessStartRequest, StubLauncher};
pub use observer::{AppStateObserverManager, ApplicationStateObserver, ConfigurationObserver};
pub use running_manager::AppRunningManager;
pub use service::{AppMgrService, SpecifiedAbilityResponse};
