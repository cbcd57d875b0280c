//! Timeout tuning knobs for remote-acknowledgment recovery.

use std::time::Duration;

/// How long the service waits for each remote acknowledgment before treating
/// the process as unresponsive. Liveness tunables, not correctness values.
#[derive(Clone, Debug)]
pub struct LifecycleTimeouts {
    pub terminate_ability: Duration,
    pub terminate_application: Duration,
    pub add_ability_stage: Duration,
    pub start_specified_ability: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            terminate_ability: Duration::from_millis(3_000),
            terminate_application: Duration::from_millis(10_000),
            add_ability_stage: Duration::from_millis(3_000),
            start_specified_ability: Duration::from_millis(3_000),
        }
    }
}

impl LifecycleTimeouts {
    /// Lengthened windows for instrumented/debugger-attached processes.
    pub fn debug() -> Self {
        let base = Self::default();
        Self {
            terminate_ability: base.terminate_ability * 10,
            terminate_application: base.terminate_application * 10,
            add_ability_stage: base.add_ability_stage * 10,
            start_specified_ability: base.start_specified_ability * 10,
        }
    }
}
