//! Per-module ability bookkeeping.
//!
//! A module record owns the abilities of one loaded code module inside one
//! process: a live map keyed by token plus a terminating set holding records
//! that were asked to clean up and have not acknowledged yet. All mutating
//! operations on unknown tokens are no-ops; only `add_ability` has a required
//! input (the ability descriptor).

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};

use crate::ability_record::AbilityRunningRecord;
use crate::client::AppLifecycleClient;
use crate::identity::AbilityToken;
use crate::info::{AbilityInfo, LaunchIntent};
use crate::queue::{TimeoutScheduler, TimerKey};
use crate::states::{AbilityState, ModuleState};

/// The abilities of one code module within one process.
#[derive(Debug)]
pub struct ModuleRunningRecord {
    bundle_name: String,
    module_name: String,
    state: ModuleState,
    abilities: HashMap<AbilityToken, AbilityRunningRecord>,
    terminating: HashMap<AbilityToken, AbilityRunningRecord>,
}

impl ModuleRunningRecord {
    pub fn new(bundle_name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            module_name: module_name.into(),
            state: ModuleState::Unknown,
            abilities: HashMap::new(),
            terminating: HashMap::new(),
        }
    }

    pub fn bundle_name(&self) -> &str {
        &self.bundle_name
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Inserts a new ability record keyed by token. Re-adding an existing
    /// token is a no-op returning the existing record; a missing descriptor
    /// signals a caller error upstream and inserts nothing.
    pub fn add_ability(
        &mut self,
        token: AbilityToken,
        info: Option<AbilityInfo>,
        intent: Option<LaunchIntent>,
    ) -> Option<&AbilityRunningRecord> {
        let info = match info {
            Some(info) => info,
            None => {
                warn!("add_ability: missing ability descriptor for token {token}");
                return None;
            }
        };
        if self.state == ModuleState::Unknown {
            self.state = ModuleState::Initialized;
        }
        self.abilities
            .entry(token)
            .or_insert_with(|| AbilityRunningRecord::new(token, info, intent));
        self.abilities.get(&token)
    }

    pub fn ability(&self, token: AbilityToken) -> Option<&AbilityRunningRecord> {
        self.abilities.get(&token)
    }

    pub fn ability_mut(&mut self, token: AbilityToken) -> Option<&mut AbilityRunningRecord> {
        self.abilities.get_mut(&token)
    }

    /// Ability waiting for its termination acknowledgment, if any.
    pub fn terminating_ability(&self, token: AbilityToken) -> Option<&AbilityRunningRecord> {
        self.terminating.get(&token)
    }

    pub fn abilities(&self) -> impl Iterator<Item = &AbilityRunningRecord> {
        self.abilities.values()
    }

    pub fn live_count(&self) -> usize {
        self.abilities.len()
    }

    /// No live and no terminating abilities left.
    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty() && self.terminating.is_empty()
    }

    /// True iff removing `token` would leave the module with zero live
    /// abilities.
    pub fn is_last_ability_record(&self, token: AbilityToken) -> bool {
        self.abilities.keys().all(|t| *t == token)
    }

    /// Delivers the launch notification for one ability and marks both the
    /// ability and the module as running. Returns whether a launch was sent.
    pub fn launch_ability(&mut self, client: &AppLifecycleClient, token: AbilityToken) -> bool {
        let Some(ability) = self.abilities.get_mut(&token) else {
            debug!("launch_ability: unknown token {token}");
            return false;
        };
        client.launch_ability(ability.info(), token, ability.intent());
        ability.set_state(AbilityState::Ready);
        self.state = ModuleState::Running;
        true
    }

    /// Flushes every ability still waiting in Initial; called once the
    /// module's process is ready to host it. Returns the launched tokens.
    pub fn launch_pending_abilities(&mut self, client: &AppLifecycleClient) -> Vec<AbilityToken> {
        let mut launched = Vec::new();
        for ability in self.abilities.values_mut() {
            if ability.state() == AbilityState::Initial {
                client.launch_ability(ability.info(), ability.token(), ability.intent());
                ability.set_state(AbilityState::Ready);
                launched.push(ability.token());
            }
        }
        if !launched.is_empty() {
            self.state = ModuleState::Running;
        }
        launched
    }

    /// Moves the ability into the terminating set, delivers clean-ability,
    /// and arms the termination timeout unless forced.
    pub fn terminate_ability(
        &mut self,
        client: &AppLifecycleClient,
        timers: &dyn TimeoutScheduler,
        timeout: Duration,
        token: AbilityToken,
        force: bool,
    ) {
        let Some(mut ability) = self.abilities.remove(&token) else {
            debug!("terminate_ability: unknown token {token}");
            return;
        };
        ability.set_state(AbilityState::Terminating);
        self.terminating.insert(token, ability);
        if !force {
            timers.schedule(TimerKey::TerminateAbility(token), timeout);
        }
        client.clean_ability(token);
    }

    /// Termination acknowledgment: drops the record from both sets and
    /// disarms the pending timeout. Returns the removed record (in its End
    /// state); a late acknowledgment for an already-cleaned token is a no-op.
    pub fn ability_terminated(
        &mut self,
        timers: &dyn TimeoutScheduler,
        token: AbilityToken,
    ) -> Option<AbilityRunningRecord> {
        timers.cancel(&TimerKey::TerminateAbility(token));
        let removed = self
            .terminating
            .remove(&token)
            .or_else(|| self.abilities.remove(&token));
        match removed {
            Some(mut ability) => {
                ability.set_state(AbilityState::End);
                Some(ability)
            }
            None => {
                debug!("ability_terminated: unknown token {token}");
                None
            }
        }
    }

    /// Tokens still waiting for a termination acknowledgment.
    pub fn terminating_tokens(&self) -> Vec<AbilityToken> {
        self.terminating.keys().copied().collect()
    }
}
