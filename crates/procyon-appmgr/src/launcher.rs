//! Process spawning seam.
//!
//! Spawning and killing OS processes is a platform collaborator; the service
//! only consumes this trait. [StubLauncher] hands out synthetic pids for
//! tests and hosted setups with no real spawner.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use procyon_lifecycle::{AppMgrError, Pid};

/// What the spawner needs to start one application process.
#[derive(Clone, Debug)]
pub struct ProcessStartRequest {
    pub bundle_name: String,
    pub process_name: String,
    pub uid: i32,
}

/// Opaque process spawn/kill collaborator.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, request: &ProcessStartRequest) -> Result<Pid, AppMgrError>;

    fn kill(&self, pid: Pid) -> Result<(), AppMgrError>;
}

/// Launcher double: allocates increasing pids and records kills.
pub struct StubLauncher {
    next_pid: AtomicI32,
    launched: Mutex<Vec<ProcessStartRequest>>,
    killed: Mutex<Vec<Pid>>,
}

impl StubLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicI32::new(1000),
            launched: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<ProcessStartRequest> {
        self.launched.lock().expect("launched lock").clone()
    }

    pub fn killed(&self) -> Vec<Pid> {
        self.killed.lock().expect("killed lock").clone()
    }
}

impl Default for StubLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for StubLauncher {
    fn launch(&self, request: &ProcessStartRequest) -> Result<Pid, AppMgrError> {
        self.launched
            .lock()
            .expect("launched lock")
            .push(request.clone());
        Ok(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    fn kill(&self, pid: Pid) -> Result<(), AppMgrError> {
        self.killed.lock().expect("killed lock").push(pid);
        Ok(())
    }
}
