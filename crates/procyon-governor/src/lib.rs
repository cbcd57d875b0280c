//! Policy-only permission contracts for the Procyon application manager.
//!
//! The service never inspects credentials itself; it asks a
//! [PermissionGovernor] and acts on the decision. Real deployments bind this
//! to the platform's access-token collaborator; tests and embedded setups use
//! the table-backed or allow-all implementations below.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Identity of a control-plane caller as reported by the transport.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerIdentity {
    pub pid: i32,
    pub uid: i32,
    /// System services bypass per-permission grants.
    pub is_system: bool,
}

impl CallerIdentity {
    pub fn system() -> Self {
        Self {
            pid: 0,
            uid: 0,
            is_system: true,
        }
    }

    pub fn app(pid: i32, uid: i32) -> Self {
        Self {
            pid,
            uid,
            is_system: false,
        }
    }
}

/// Outcome of a permission check.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Permission names checked at the control-plane boundary.
pub mod permissions {
    pub const OBSERVE_APPLICATION_STATE: &str = "procyon.permission.OBSERVE_APPLICATION_STATE";
    pub const KILL_APPLICATION: &str = "procyon.permission.KILL_APPLICATION";
    pub const UPDATE_CONFIGURATION: &str = "procyon.permission.UPDATE_CONFIGURATION";
    pub const GET_RUNNING_INFO: &str = "procyon.permission.GET_RUNNING_INFO";
}

/// External authorization check consumed by the service.
pub trait PermissionGovernor: Send + Sync {
    fn verify_permission(&self, caller: &CallerIdentity, permission: &str) -> AccessDecision;

    /// Privileged callers may read state belonging to other applications.
    fn is_privileged(&self, caller: &CallerIdentity) -> bool {
        caller.is_system
    }
}

/// Governor that allows everything; for tests and trusted single-tenant use.
#[derive(Clone, Debug, Default)]
pub struct AllowAllGovernor;

impl PermissionGovernor for AllowAllGovernor {
    fn verify_permission(&self, _caller: &CallerIdentity, _permission: &str) -> AccessDecision {
        AccessDecision::Allow
    }

    fn is_privileged(&self, _caller: &CallerIdentity) -> bool {
        true
    }
}

/// Governor backed by a static uid -> permission grant table.
/// **No entry = nothing granted**; system callers are always allowed.
#[derive(Clone, Debug, Default)]
pub struct GrantTableGovernor {
    grants: HashMap<i32, HashSet<String>>,
    privileged_uids: HashSet<i32>,
}

impl GrantTableGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, uid: i32, permission: impl Into<String>) -> Self {
        self.grants.entry(uid).or_default().insert(permission.into());
        self
    }

    pub fn privileged(mut self, uid: i32) -> Self {
        self.privileged_uids.insert(uid);
        self
    }
}

impl PermissionGovernor for GrantTableGovernor {
    fn verify_permission(&self, caller: &CallerIdentity, permission: &str) -> AccessDecision {
        if caller.is_system {
            return AccessDecision::Allow;
        }
        match self.grants.get(&caller.uid) {
            Some(granted) if granted.contains(permission) => AccessDecision::Allow,
            _ => AccessDecision::Deny,
        }
    }

    fn is_privileged(&self, caller: &CallerIdentity) -> bool {
        caller.is_system || self.privileged_uids.contains(&caller.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows_everything() {
        let governor = AllowAllGovernor;
        let caller = CallerIdentity::app(100, 20010);
        assert!(governor
            .verify_permission(&caller, permissions::KILL_APPLICATION)
            .is_allowed());
        assert!(governor.is_privileged(&caller));
    }

    #[test]
    fn grant_table_denies_without_grant() {
        let governor = GrantTableGovernor::new();
        let caller = CallerIdentity::app(100, 20010);
        assert_eq!(
            governor.verify_permission(&caller, permissions::OBSERVE_APPLICATION_STATE),
            AccessDecision::Deny
        );
    }

    #[test]
    fn grant_table_allows_granted_permission_only() {
        let governor =
            GrantTableGovernor::new().grant(20010, permissions::OBSERVE_APPLICATION_STATE);
        let caller = CallerIdentity::app(100, 20010);
        assert!(governor
            .verify_permission(&caller, permissions::OBSERVE_APPLICATION_STATE)
            .is_allowed());
        assert_eq!(
            governor.verify_permission(&caller, permissions::KILL_APPLICATION),
            AccessDecision::Deny
        );
    }

    #[test]
    fn system_caller_bypasses_the_table() {
        let governor = GrantTableGovernor::new();
        let caller = CallerIdentity::system();
        assert!(governor
            .verify_permission(&caller, permissions::UPDATE_CONFIGURATION)
            .is_allowed());
        assert!(governor.is_privileged(&caller));
    }

    #[test]
    fn privileged_uid_is_not_implicitly_granted_permissions() {
        let governor = GrantTableGovernor::new().privileged(1000);
        let caller = CallerIdentity::app(50, 1000);
        assert!(governor.is_privileged(&caller));
        assert_eq!(
            governor.verify_permission(&caller, permissions::KILL_APPLICATION),
            AccessDecision::Deny
        );
    }
}
