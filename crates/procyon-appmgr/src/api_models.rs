//! Request/response models for the control-surface router.

use serde::{Deserialize, Serialize};

use procyon_lifecycle::{
    AbilityState, AppStateData, Configuration, MemoryLevel, RunningProcessInfo,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessListResponse {
    pub processes: Vec<RunningProcessInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForegroundAppsResponse {
    pub applications: Vec<AppStateData>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigurationResponse {
    pub configuration: Configuration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateAbilityStateRequest {
    pub state: AbilityState,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryLevelRequest {
    pub level: MemoryLevel,
}

/// The operation was validated and enqueued; completion is observable only
/// through later queries or a registered observer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub accepted: bool,
}

impl AckResponse {
    pub fn accepted() -> Self {
        Self { accepted: true }
    }
}
