//! Identity types for lifecycle records.
//!
//! AbilityToken is the opaque handle supplied by an ability's host; RecordId
//! identifies one process record for the lifetime of the service; Pid is the
//! OS process id reported by the spawn collaborator.

use std::sync::atomic::{AtomicI32, Ordering};

/// Opaque per-ability handle supplied by the ability's host process.
pub type AbilityToken = u64;

/// Service-unique id of one process record.
pub type RecordId = i32;

/// OS process id.
pub type Pid = i32;

/// Monotonic allocator for [RecordId]s. One instance lives in the process
/// table; ids are never reused within a service lifetime.
#[derive(Debug)]
pub struct RecordIdAllocator {
    next: AtomicI32,
}

impl RecordIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }

    pub fn allocate(&self) -> RecordId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RecordIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
