//! Process table: every running application process, keyed by record id.
//!
//! The table itself is a plain struct; the service wraps it in one mutex.
//! All mutation happens on the serialized queue worker; the synchronous query
//! surface takes the same lock for read-only snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use procyon_lifecycle::{
    AbilityToken, AppMgrError, AppRunningRecord, AppStateData, ApplicationInfo, ApplicationState,
    Configuration, LifecycleTimeouts, Pid, RecordId, RecordIdAllocator, RunningProcessInfo,
    TimeoutScheduler,
};

/// The table of live [AppRunningRecord]s.
pub struct AppRunningManager {
    records: HashMap<RecordId, AppRunningRecord>,
    ids: RecordIdAllocator,
    timers: Arc<dyn TimeoutScheduler>,
    timeouts: LifecycleTimeouts,
}

impl AppRunningManager {
    pub fn new(timers: Arc<dyn TimeoutScheduler>, timeouts: LifecycleTimeouts) -> Self {
        Self {
            records: HashMap::new(),
            ids: RecordIdAllocator::new(),
            timers,
            timeouts,
        }
    }

    /// Creates a record for a freshly launched process.
    pub fn create_record(
        &mut self,
        app_info: &ApplicationInfo,
        process_name: &str,
    ) -> RecordId {
        let record_id = self.ids.allocate();
        let record = AppRunningRecord::new(
            record_id,
            app_info.clone(),
            process_name,
            Arc::clone(&self.timers),
            self.timeouts.clone(),
        );
        self.records.insert(record_id, record);
        record_id
    }

    pub fn record(&self, record_id: RecordId) -> Option<&AppRunningRecord> {
        self.records.get(&record_id)
    }

    pub fn record_mut(&mut self, record_id: RecordId) -> Option<&mut AppRunningRecord> {
        self.records.get_mut(&record_id)
    }

    pub fn remove(&mut self, record_id: RecordId) -> Option<AppRunningRecord> {
        self.records.remove(&record_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &AppRunningRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut AppRunningRecord> {
        self.records.values_mut()
    }

    /// Record owning the token, live or pending termination.
    pub fn record_id_by_token(&self, token: AbilityToken) -> Option<RecordId> {
        self.records
            .values()
            .find(|r| r.owns_token(token))
            .map(|r| r.record_id())
    }

    pub fn record_id_by_pid(&self, pid: Pid) -> Option<RecordId> {
        self.records
            .values()
            .find(|r| r.pid() == Some(pid))
            .map(|r| r.record_id())
    }

    pub fn record_id_by_render_pid(&self, render_pid: Pid) -> Option<RecordId> {
        self.records
            .values()
            .find(|r| r.render().map(|render| render.pid) == Some(render_pid))
            .map(|r| r.record_id())
    }

    /// Existing process hosting (bundle, process name), if any.
    pub fn record_mut_by_name(
        &mut self,
        bundle_name: &str,
        process_name: &str,
    ) -> Option<&mut AppRunningRecord> {
        self.records
            .values_mut()
            .find(|r| r.process_name() == process_name && r.contains_bundle(bundle_name))
    }

    pub fn record_ids_by_bundle(&self, bundle_name: &str) -> Vec<RecordId> {
        self.records
            .values()
            .filter(|r| r.contains_bundle(bundle_name))
            .map(|r| r.record_id())
            .collect()
    }

    pub fn record_ids_by_bundle_and_uid(&self, bundle_name: &str, uid: i32) -> Vec<RecordId> {
        self.records
            .values()
            .filter(|r| r.contains_bundle(bundle_name) && r.has_uid(uid))
            .map(|r| r.record_id())
            .collect()
    }

    pub fn is_bundle_running(&self, bundle_name: &str) -> bool {
        self.records.values().any(|r| r.contains_bundle(bundle_name))
    }

    // ---- snapshots ---------------------------------------------------------

    pub fn running_process_infos(&self) -> Vec<RunningProcessInfo> {
        let mut infos: Vec<_> = self
            .records
            .values()
            .map(|r| r.running_process_info())
            .collect();
        infos.sort_by_key(|info| info.record_id);
        infos
    }

    /// Running-process snapshot restricted to one caller uid.
    pub fn running_process_infos_for_uid(&self, uid: i32) -> Vec<RunningProcessInfo> {
        let mut infos: Vec<_> = self
            .records
            .values()
            .filter(|r| r.has_uid(uid))
            .map(|r| r.running_process_info())
            .collect();
        infos.sort_by_key(|info| info.record_id);
        infos
    }

    pub fn foreground_app_data(&self) -> Vec<AppStateData> {
        self.records
            .values()
            .filter(|r| r.state() == ApplicationState::Foreground)
            .flat_map(|r| r.app_state_data(ApplicationState::Foreground))
            .collect()
    }

    /// Forwards a configuration update to every bound client; unreachable
    /// clients are reported, not fatal.
    pub fn update_configuration_all(
        &self,
        config: &Configuration,
    ) -> Vec<(RecordId, AppMgrError)> {
        let mut failures = Vec::new();
        for record in self.records.values() {
            if let Err(err) = record.update_configuration(config) {
                failures.push((record.record_id(), err));
            }
        }
        failures
    }
}
