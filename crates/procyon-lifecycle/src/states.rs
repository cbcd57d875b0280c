//! Lifecycle state enums for abilities, applications, and modules.
//!
//! Ability transitions: Initial -> Ready -> Foreground <-> Background ->
//! Terminating -> End. End is terminal and reachable only through an explicit
//! termination acknowledgment; callers cannot set it directly through the
//! state-update path.

use serde::{Deserialize, Serialize};

/// State of one ability within its host process.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AbilityState {
    /// Created, token bound, not yet scheduled.
    Initial,
    /// Launch was delivered to the remote process.
    Ready,
    Foreground,
    Background,
    /// Transitional: the window layer has started moving it to background.
    Backgrounding,
    /// Clean-ability was delivered; waiting for the acknowledgment.
    Terminating,
    /// Terminal; the record is eligible for removal.
    End,
}

impl AbilityState {
    /// States a caller may request through the state-update path.
    /// Terminating and End are driven by the termination flow only.
    pub fn is_updatable(self) -> bool {
        !matches!(self, AbilityState::Terminating | AbilityState::End)
    }
}

/// Aggregate state of one application process.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    Create,
    Ready,
    Foreground,
    Background,
    /// Every ability was cleaned; terminate was delivered to the process.
    Terminated,
    /// Terminal; the record is gone from the process table.
    End,
}

/// Whether a module's code has been told to start.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Unknown,
    Initialized,
    Running,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_ability_states_are_not_updatable() {
        assert!(AbilityState::Foreground.is_updatable());
        assert!(AbilityState::Backgrounding.is_updatable());
        assert!(!AbilityState::Terminating.is_updatable());
        assert!(!AbilityState::End.is_updatable());
    }
}
