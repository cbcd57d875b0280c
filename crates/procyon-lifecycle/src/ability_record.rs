//! Per-ability bookkeeping.
//!
//! [AbilityRunningRecord] is a pure value holder: it stores the state its
//! owner tells it to store and performs no transition guarding of its own.
//! Validity is the owning record's job; synchronization is the serialized
//! queue's job.

use crate::identity::AbilityToken;
use crate::info::{AbilityInfo, LaunchIntent};
use crate::states::AbilityState;

/// One UI/service component's lifecycle state within a process.
#[derive(Clone, Debug)]
pub struct AbilityRunningRecord {
    token: AbilityToken,
    info: AbilityInfo,
    intent: Option<LaunchIntent>,
    state: AbilityState,
    visibility: i32,
    perceptibility: i32,
    connection_state: i32,
}

impl AbilityRunningRecord {
    pub fn new(token: AbilityToken, info: AbilityInfo, intent: Option<LaunchIntent>) -> Self {
        Self {
            token,
            info,
            intent,
            state: AbilityState::Initial,
            visibility: 0,
            perceptibility: 0,
            connection_state: 0,
        }
    }

    pub fn token(&self) -> AbilityToken {
        self.token
    }

    pub fn info(&self) -> &AbilityInfo {
        &self.info
    }

    pub fn intent(&self) -> Option<&LaunchIntent> {
        self.intent.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn bundle_name(&self) -> &str {
        &self.info.bundle_name
    }

    pub fn state(&self) -> AbilityState {
        self.state
    }

    /// Unconditional write; the caller decides validity.
    pub fn set_state(&mut self, state: AbilityState) {
        self.state = state;
    }

    /// Used by owners to skip redundant downstream notifications.
    pub fn is_same_state(&self, state: AbilityState) -> bool {
        self.state == state
    }

    pub fn visibility(&self) -> i32 {
        self.visibility
    }

    pub fn set_visibility(&mut self, visibility: i32) {
        self.visibility = visibility;
    }

    pub fn perceptibility(&self) -> i32 {
        self.perceptibility
    }

    pub fn set_perceptibility(&mut self, perceptibility: i32) {
        self.perceptibility = perceptibility;
    }

    pub fn connection_state(&self) -> i32 {
        self.connection_state
    }

    pub fn set_connection_state(&mut self, connection_state: i32) {
        self.connection_state = connection_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ability(name: &str) -> AbilityInfo {
        AbilityInfo {
            name: name.into(),
            bundle_name: "com.example.demo".into(),
            module_name: "entry".into(),
            ..Default::default()
        }
    }

    #[test]
    fn new_record_starts_in_initial() {
        let record = AbilityRunningRecord::new(1, ability("Main"), None);
        assert_eq!(record.state(), AbilityState::Initial);
        assert_eq!(record.token(), 1);
        assert_eq!(record.name(), "Main");
    }

    #[test]
    fn set_state_is_unconditional() {
        let mut record = AbilityRunningRecord::new(1, ability("Main"), None);
        record.set_state(AbilityState::Foreground);
        assert!(record.is_same_state(AbilityState::Foreground));
        // No guard at this level: any value sticks.
        record.set_state(AbilityState::Initial);
        assert_eq!(record.state(), AbilityState::Initial);
    }

    #[test]
    fn behavior_attributes_are_plain_passthrough() {
        let mut record = AbilityRunningRecord::new(1, ability("Main"), None);
        record.set_visibility(1);
        record.set_perceptibility(0);
        record.set_connection_state(2);
        assert_eq!(record.visibility(), 1);
        assert_eq!(record.perceptibility(), 0);
        assert_eq!(record.connection_state(), 2);
    }
}
