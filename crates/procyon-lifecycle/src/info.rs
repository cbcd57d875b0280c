//! Domain models shared between the records, the delivery client, and the
//! observer fan-out: bundle/module/ability descriptors, launch payloads, and
//! the immutable event payloads handed to observers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{AbilityToken, Pid, RecordId};
use crate::states::{AbilityState, ApplicationState};

/// Application-level metadata carried by a process record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub name: String,
    pub bundle_name: String,
    pub uid: i32,
    /// Override for the host process name; the bundle name is used when unset.
    pub process: Option<String>,
    /// Resident application: restarted when its process dies unexpectedly.
    pub keep_alive: bool,
    pub debug: bool,
}

impl ApplicationInfo {
    /// Process name this application runs under.
    pub fn process_name(&self) -> &str {
        self.process.as_deref().unwrap_or(&self.bundle_name)
    }
}

/// Descriptor of one ability.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AbilityInfo {
    pub name: String,
    pub bundle_name: String,
    pub module_name: String,
    pub application_name: String,
    /// Visible to implicit launch matching.
    pub visible: bool,
}

/// Descriptor of one packaged code module.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub module_name: String,
    pub bundle_name: String,
    pub abilities: Vec<AbilityInfo>,
}

/// Installed-bundle metadata (parsed elsewhere; opaque here).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BundleInfo {
    pub name: String,
    pub uid: i32,
    pub version_code: u32,
}

/// A launch request: target plus caller-supplied parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LaunchIntent {
    pub bundle_name: String,
    pub ability_name: String,
    pub module_name: Option<String>,
    pub params: serde_json::Value,
}

/// Memory pressure level forwarded to application processes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemoryLevel {
    Moderate,
    Low,
    Critical,
}

/// Payload delivered with the launch-application notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppLaunchData {
    pub app_info: ApplicationInfo,
    pub record_id: RecordId,
    pub process_name: String,
}

/// System environment parameters delivered to every running process.
///
/// String-keyed so transport stays schema-free; well-known keys live in
/// [keys]. `merge` reports which keys actually changed so a no-op update can
/// short-circuit before any fan-out.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    items: BTreeMap<String, String>,
}

/// Well-known configuration keys.
pub mod keys {
    pub const LANGUAGE: &str = "system.language";
    pub const COLOR_MODE: &str = "system.colorMode";
    pub const DENSITY: &str = "system.density";
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.items.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Applies `other` on top of self and returns the keys whose values
    /// actually changed.
    pub fn merge(&mut self, other: &Configuration) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, value) in &other.items {
            if self.items.get(key) != Some(value) {
                self.items.insert(key.clone(), value.clone());
                changed.push(key.clone());
            }
        }
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Snapshot of one running process for the synchronous query surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunningProcessInfo {
    pub record_id: RecordId,
    pub pid: Option<Pid>,
    pub process_name: String,
    pub bundle_names: Vec<String>,
    pub state: ApplicationState,
}

/// Immutable payload for application-level state notifications.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppStateData {
    pub bundle_name: String,
    pub uid: i32,
    pub state: ApplicationState,
    pub timestamp: DateTime<Utc>,
}

/// Immutable payload for ability-level state notifications.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AbilityStateData {
    pub bundle_name: String,
    pub ability_name: String,
    pub token: AbilityToken,
    pub state: AbilityState,
    pub uid: i32,
    /// Extension components share the ability path but are flagged for
    /// observers that only care about UI abilities.
    pub is_extension: bool,
    pub timestamp: DateTime<Utc>,
}

/// Immutable payload for process creation/death/reuse notifications.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessData {
    pub bundle_name: String,
    pub record_id: RecordId,
    pub pid: Option<Pid>,
    pub uid: i32,
    pub timestamp: DateTime<Utc>,
}

/// Immutable payload for render-process notifications.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderProcessData {
    pub bundle_name: String,
    pub host_pid: Option<Pid>,
    pub pid: Pid,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_name_falls_back_to_bundle() {
        let mut info = ApplicationInfo {
            bundle_name: "com.example.music".into(),
            ..Default::default()
        };
        assert_eq!(info.process_name(), "com.example.music");
        info.process = Some("com.example.music:player".into());
        assert_eq!(info.process_name(), "com.example.music:player");
    }

    #[test]
    fn configuration_merge_reports_changed_keys_only() {
        let mut base = Configuration::new()
            .with(keys::LANGUAGE, "en-US")
            .with(keys::COLOR_MODE, "light");
        let update = Configuration::new()
            .with(keys::LANGUAGE, "en-US")
            .with(keys::COLOR_MODE, "dark");

        let changed = base.merge(&update);

        assert_eq!(changed, vec![keys::COLOR_MODE.to_string()]);
        assert_eq!(base.get(keys::COLOR_MODE), Some("dark"));
    }

    #[test]
    fn configuration_merge_with_identical_values_is_empty() {
        let mut base = Configuration::new().with(keys::LANGUAGE, "en-US");
        let update = Configuration::new().with(keys::LANGUAGE, "en-US");
        assert!(base.merge(&update).is_empty());
    }
}
