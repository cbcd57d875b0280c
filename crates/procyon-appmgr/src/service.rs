//! Control-plane front door.
//!
//! [AppMgrService] receives entry points on arbitrary caller threads and runs
//! none of them inline: every mutating operation posts a closure onto the
//! single serialized queue and returns. The handful of synchronous queries
//! take the table mutex for a read-only snapshot instead. Permission checks
//! happen synchronously at this boundary, before anything is enqueued.
//!
//! Timeout recovery: records arm keyed timeouts through [QueueTimeouts]; a
//! fired key lands in `handle_timeout`, which treats the remote as
//! unresponsive and forces the cleanup the missing acknowledgment would have
//! performed. Acknowledgments cancel their timeout by key, so whichever of
//! ack and timeout runs first wins and the loser is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use procyon_governor::{permissions, CallerIdentity, PermissionGovernor};
use procyon_lifecycle::{
    AbilityInfo, AbilityState, AbilityStateData, AbilityToken, AppMgrError, AppRunningRecord,
    AppScheduler, AppStateData, ApplicationInfo, Configuration, LaunchIntent, LifecycleTimeouts,
    MemoryLevel, ModuleInfo, Pid, ProcessData, RecordId, RenderProcessData, RenderRecord,
    RestartWindow, RunningProcessInfo, SerialTaskQueue, StateTransition, TimeoutScheduler,
    TimerKey,
};

use crate::launcher::{ProcessLauncher, ProcessStartRequest};
use crate::observer::{
    AppStateObserverManager, ApplicationStateObserver, ConfigurationObserver,
};
use crate::running_manager::AppRunningManager;

/// Callback for the specified-ability flow: the answer to an accept-intent
/// question, or the news that the process never answered.
pub trait SpecifiedAbilityResponse: Send + Sync {
    fn on_accept_intent(&self, record_id: RecordId, intent: &LaunchIntent, flag: &str);

    fn on_timeout(&self, record_id: RecordId);
}

/// [TimeoutScheduler] adapter: arming a key posts a delayed task that hands
/// the key to the service's timeout handler; cancelling disarms it by key.
struct QueueTimeouts {
    queue: Arc<SerialTaskQueue>,
    handler: Mutex<Option<Arc<dyn Fn(TimerKey) + Send + Sync>>>,
}

impl QueueTimeouts {
    fn new(queue: Arc<SerialTaskQueue>) -> Self {
        Self {
            queue,
            handler: Mutex::new(None),
        }
    }

    fn set_handler(&self, handler: Arc<dyn Fn(TimerKey) + Send + Sync>) {
        *self.handler.lock().expect("handler lock") = Some(handler);
    }
}

impl TimeoutScheduler for QueueTimeouts {
    fn schedule(&self, key: TimerKey, delay: Duration) {
        let handler = self.handler.lock().expect("handler lock").clone();
        let Some(handler) = handler else {
            warn!("timeout {key:?} armed before service wiring finished");
            return;
        };
        let fired_key = key.clone();
        if self
            .queue
            .post_delayed(key, delay, Box::new(move || handler(fired_key)))
            .is_err()
        {
            warn!("timeout arm after queue shutdown");
        }
    }

    fn cancel(&self, key: &TimerKey) {
        let _ = self.queue.cancel_delayed(key.clone());
    }
}

struct ServiceCtx {
    queue: Arc<SerialTaskQueue>,
    table: Mutex<AppRunningManager>,
    observers: AppStateObserverManager,
    governor: Arc<dyn PermissionGovernor>,
    launcher: Arc<dyn ProcessLauncher>,
    configuration: Mutex<Configuration>,
    specified_response: Mutex<Option<Arc<dyn SpecifiedAbilityResponse>>>,
    /// Per-bundle rolling restart budget for resident applications.
    restart_budgets: Mutex<HashMap<String, RestartWindow>>,
}

/// The application manager service.
pub struct AppMgrService {
    ctx: Arc<ServiceCtx>,
}

impl AppMgrService {
    pub fn new(
        governor: Arc<dyn PermissionGovernor>,
        launcher: Arc<dyn ProcessLauncher>,
        timeouts: LifecycleTimeouts,
    ) -> Self {
        let queue = Arc::new(SerialTaskQueue::new("appmgr-event-handler"));
        let timers = Arc::new(QueueTimeouts::new(Arc::clone(&queue)));
        let ctx = Arc::new(ServiceCtx {
            queue: Arc::clone(&queue),
            table: Mutex::new(AppRunningManager::new(
                Arc::clone(&timers) as Arc<dyn TimeoutScheduler>,
                timeouts,
            )),
            observers: AppStateObserverManager::new(Arc::clone(&queue)),
            governor,
            launcher,
            configuration: Mutex::new(Configuration::new()),
            specified_response: Mutex::new(None),
            restart_budgets: Mutex::new(HashMap::new()),
        });
        let weak: Weak<ServiceCtx> = Arc::downgrade(&ctx);
        timers.set_handler(Arc::new(move |key| {
            if let Some(ctx) = weak.upgrade() {
                handle_timeout(&ctx, key);
            }
        }));
        info!("application manager service started");
        Self { ctx }
    }

    fn check_permission(
        &self,
        caller: &CallerIdentity,
        permission: &str,
    ) -> Result<(), AppMgrError> {
        if self
            .ctx
            .governor
            .verify_permission(caller, permission)
            .is_allowed()
        {
            Ok(())
        } else {
            Err(AppMgrError::PermissionDenied(permission.to_string()))
        }
    }

    // ---- async lifecycle entry points -------------------------------------

    /// Loads (and if necessary spawns a process for) one ability.
    pub fn load_ability(
        &self,
        token: AbilityToken,
        ability_info: AbilityInfo,
        app_info: ApplicationInfo,
        intent: Option<LaunchIntent>,
    ) -> Result<(), AppMgrError> {
        if ability_info.name.is_empty() || app_info.bundle_name.is_empty() {
            return Err(AppMgrError::InvalidParam(
                "load_ability requires ability and application descriptors".into(),
            ));
        }
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            handle_load_ability(&ctx, token, ability_info, app_info, intent);
        }))
    }

    /// Binds the remote scheduler of a spawned process to its record.
    pub fn attach_application(
        &self,
        pid: Pid,
        scheduler: Arc<dyn AppScheduler>,
    ) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            handle_attach_application(&ctx, pid, scheduler);
        }))
    }

    pub fn application_foregrounded(&self, record_id: RecordId) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            apply_and_publish(&ctx, record_id, |record| record.application_foregrounded());
        }))
    }

    pub fn application_backgrounded(&self, record_id: RecordId) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            apply_and_publish(&ctx, record_id, |record| record.application_backgrounded());
        }))
    }

    pub fn application_terminated(&self, record_id: RecordId) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            apply_and_publish(&ctx, record_id, |record| record.application_terminated());
        }))
    }

    /// Stage-info acknowledgment for a module added to a running process.
    pub fn add_ability_stage_done(&self, record_id: RecordId) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            apply_and_publish(&ctx, record_id, |record| record.ability_stage_done());
        }))
    }

    pub fn update_ability_state(
        &self,
        token: AbilityToken,
        state: AbilityState,
    ) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let record_id = ctx.table.lock().expect("table lock").record_id_by_token(token);
            let Some(record_id) = record_id else {
                debug!("update_ability_state: token {token} unknown to every record");
                return;
            };
            apply_and_publish(&ctx, record_id, |record| {
                record.update_ability_state(token, state)
            });
        }))
    }

    pub fn update_extension_state(
        &self,
        token: AbilityToken,
        state: AbilityState,
    ) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let record_id = ctx.table.lock().expect("table lock").record_id_by_token(token);
            let Some(record_id) = record_id else {
                debug!("update_extension_state: token {token} unknown to every record");
                return;
            };
            apply_and_publish(&ctx, record_id, |record| {
                record.update_extension_state(token, state)
            });
        }))
    }

    /// Starts the termination handshake for one ability.
    pub fn terminate_ability(
        &self,
        token: AbilityToken,
        clear_mission: bool,
    ) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            if clear_mission {
                debug!("terminate_ability: clearing mission for token {token}");
            }
            let record_id = ctx.table.lock().expect("table lock").record_id_by_token(token);
            let Some(record_id) = record_id else {
                debug!("terminate_ability: token {token} unknown to every record");
                return;
            };
            apply_and_publish(&ctx, record_id, |record| {
                record.terminate_ability(token, false);
                Vec::new()
            });
        }))
    }

    /// Termination acknowledgment; cancels the pending termination timeout.
    pub fn ability_cleaned(&self, token: AbilityToken) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let record_id = ctx.table.lock().expect("table lock").record_id_by_token(token);
            let Some(record_id) = record_id else {
                debug!("ability_cleaned: token {token} unknown to every record");
                return;
            };
            apply_and_publish(&ctx, record_id, |record| record.ability_terminated(token));
        }))
    }

    /// Opaque behavior-analysis attributes, stored on the ability record.
    pub fn ability_behavior_analysis(
        &self,
        token: AbilityToken,
        visibility: i32,
        perceptibility: i32,
        connection_state: i32,
    ) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let record_id = ctx.table.lock().expect("table lock").record_id_by_token(token);
            let Some(record_id) = record_id else {
                return;
            };
            apply_and_publish(&ctx, record_id, |record| {
                record.ability_behavior_analysis(
                    token,
                    visibility,
                    perceptibility,
                    connection_state,
                );
                Vec::new()
            });
        }))
    }

    // ---- kill paths --------------------------------------------------------

    pub fn kill_process_by_ability_token(
        &self,
        caller: &CallerIdentity,
        token: AbilityToken,
    ) -> Result<(), AppMgrError> {
        self.check_permission(caller, permissions::KILL_APPLICATION)?;
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let record_id = ctx.table.lock().expect("table lock").record_id_by_token(token);
            let Some(record_id) = record_id else {
                debug!("kill_process_by_ability_token: token {token} unknown");
                return;
            };
            apply_and_publish(&ctx, record_id, |record| record.schedule_process_terminate());
        }))
    }

    pub fn kill_application(
        &self,
        caller: &CallerIdentity,
        bundle_name: &str,
    ) -> Result<(), AppMgrError> {
        self.check_permission(caller, permissions::KILL_APPLICATION)?;
        let ctx = Arc::clone(&self.ctx);
        let bundle_name = bundle_name.to_string();
        self.ctx.queue.post(Box::new(move || {
            let ids = ctx
                .table
                .lock()
                .expect("table lock")
                .record_ids_by_bundle(&bundle_name);
            for record_id in ids {
                apply_and_publish(&ctx, record_id, |record| record.schedule_process_terminate());
            }
        }))
    }

    pub fn kill_application_by_uid(
        &self,
        caller: &CallerIdentity,
        bundle_name: &str,
        uid: i32,
    ) -> Result<(), AppMgrError> {
        self.check_permission(caller, permissions::KILL_APPLICATION)?;
        let ctx = Arc::clone(&self.ctx);
        let bundle_name = bundle_name.to_string();
        self.ctx.queue.post(Box::new(move || {
            let ids = ctx
                .table
                .lock()
                .expect("table lock")
                .record_ids_by_bundle_and_uid(&bundle_name, uid);
            for record_id in ids {
                apply_and_publish(&ctx, record_id, |record| record.schedule_process_terminate());
            }
        }))
    }

    // ---- observers ---------------------------------------------------------

    /// Permission check runs inline; the table insert itself is queued.
    pub fn register_application_state_observer(
        &self,
        caller: &CallerIdentity,
        observer: Arc<dyn ApplicationStateObserver>,
        bundle_filters: Vec<String>,
    ) -> Result<(), AppMgrError> {
        self.check_permission(caller, permissions::OBSERVE_APPLICATION_STATE)?;
        self.ctx.observers.register(observer, bundle_filters)
    }

    pub fn unregister_application_state_observer(
        &self,
        caller: &CallerIdentity,
        observer: &Arc<dyn ApplicationStateObserver>,
    ) -> Result<(), AppMgrError> {
        self.check_permission(caller, permissions::OBSERVE_APPLICATION_STATE)?;
        self.ctx.observers.unregister(observer)
    }

    pub fn register_configuration_observer(&self, observer: Arc<dyn ConfigurationObserver>) {
        self.ctx.observers.register_configuration_observer(observer);
    }

    pub fn unregister_configuration_observer(&self, observer: &Arc<dyn ConfigurationObserver>) {
        self.ctx
            .observers
            .unregister_configuration_observer(observer);
    }

    // ---- synchronous queries ----------------------------------------------

    /// Privileged callers see every process; others only their own uid.
    pub fn get_all_running_processes(
        &self,
        caller: &CallerIdentity,
    ) -> Vec<RunningProcessInfo> {
        let table = self.ctx.table.lock().expect("table lock");
        if self.ctx.governor.is_privileged(caller)
            || self
                .ctx
                .governor
                .verify_permission(caller, permissions::GET_RUNNING_INFO)
                .is_allowed()
        {
            table.running_process_infos()
        } else {
            table.running_process_infos_for_uid(caller.uid)
        }
    }

    pub fn get_foreground_applications(
        &self,
        caller: &CallerIdentity,
    ) -> Result<Vec<AppStateData>, AppMgrError> {
        self.check_permission(caller, permissions::GET_RUNNING_INFO)?;
        Ok(self.ctx.table.lock().expect("table lock").foreground_app_data())
    }

    pub fn get_app_running_state_by_bundle(&self, bundle_name: &str) -> bool {
        self.ctx
            .table
            .lock()
            .expect("table lock")
            .is_bundle_running(bundle_name)
    }

    pub fn get_ability_tokens_by_pid(&self, pid: Pid) -> Vec<AbilityToken> {
        let table = self.ctx.table.lock().expect("table lock");
        table
            .record_id_by_pid(pid)
            .and_then(|id| table.record(id))
            .map(|record| record.ability_tokens())
            .unwrap_or_default()
    }

    pub fn get_configuration(&self) -> Configuration {
        self.ctx.configuration.lock().expect("configuration lock").clone()
    }

    /// Merges the update into the shared configuration and fans the result
    /// out to every bound client and configuration observer. An update that
    /// changes nothing returns early with no fan-out.
    pub fn update_configuration(
        &self,
        caller: &CallerIdentity,
        config: &Configuration,
    ) -> Result<(), AppMgrError> {
        self.check_permission(caller, permissions::UPDATE_CONFIGURATION)?;
        let snapshot = {
            let mut current = self.ctx.configuration.lock().expect("configuration lock");
            let changed = current.merge(config);
            if changed.is_empty() {
                debug!("update_configuration: no effective change");
                return Ok(());
            }
            current.clone()
        };
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let failures = ctx
                .table
                .lock()
                .expect("table lock")
                .update_configuration_all(&snapshot);
            for (record_id, err) in failures {
                warn!("configuration push to record {record_id} failed: {err}");
            }
            ctx.observers.on_configuration_updated(&snapshot);
        }))
    }

    pub fn notify_memory_level(&self, level: MemoryLevel) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let table = ctx.table.lock().expect("table lock");
            for record in table.records() {
                record.schedule_memory_level(level);
            }
        }))
    }

    // ---- quick fix ---------------------------------------------------------

    pub fn notify_load_patch(&self, bundle_name: &str) -> Result<(), AppMgrError> {
        self.notify_patch_op(bundle_name, PatchOp::Load)
    }

    pub fn notify_hot_reload_page(&self, bundle_name: &str) -> Result<(), AppMgrError> {
        self.notify_patch_op(bundle_name, PatchOp::HotReload)
    }

    pub fn notify_unload_patch(&self, bundle_name: &str) -> Result<(), AppMgrError> {
        self.notify_patch_op(bundle_name, PatchOp::Unload)
    }

    fn notify_patch_op(&self, bundle_name: &str, op: PatchOp) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        let bundle_name = bundle_name.to_string();
        self.ctx.queue.post(Box::new(move || {
            let table = ctx.table.lock().expect("table lock");
            for id in table.record_ids_by_bundle(&bundle_name) {
                let Some(record) = table.record(id) else { continue };
                match op {
                    PatchOp::Load => record.notify_load_patch(&bundle_name),
                    PatchOp::HotReload => record.notify_hot_reload_page(&bundle_name),
                    PatchOp::Unload => record.notify_unload_patch(&bundle_name),
                }
            }
        }))
    }

    // ---- specified-ability flow -------------------------------------------

    pub fn register_specified_ability_response(
        &self,
        response: Arc<dyn SpecifiedAbilityResponse>,
    ) {
        *self
            .ctx
            .specified_response
            .lock()
            .expect("specified response lock") = Some(response);
    }

    /// Asks the bundle's process (spawning one if needed) whether it accepts
    /// a new intent.
    pub fn start_specified_ability(
        &self,
        intent: LaunchIntent,
        ability_info: AbilityInfo,
        app_info: ApplicationInfo,
    ) -> Result<(), AppMgrError> {
        if ability_info.name.is_empty() || app_info.bundle_name.is_empty() {
            return Err(AppMgrError::InvalidParam(
                "start_specified_ability requires ability and application descriptors".into(),
            ));
        }
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            handle_start_specified_ability(&ctx, intent, ability_info, app_info);
        }))
    }

    /// Accept-intent acknowledgment: cancels the pending timeout and relays
    /// the answer to the registered response callback.
    pub fn schedule_accept_intent_done(
        &self,
        record_id: RecordId,
        intent: LaunchIntent,
        flag: String,
    ) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            apply_and_publish(&ctx, record_id, |record| {
                record.accept_intent_done();
                Vec::new()
            });
            let response = ctx
                .specified_response
                .lock()
                .expect("specified response lock")
                .clone();
            if let Some(response) = response {
                response.on_accept_intent(record_id, &intent, &flag);
            }
        }))
    }

    // ---- render processes --------------------------------------------------

    pub fn attach_render_process(
        &self,
        host_pid: Pid,
        render_pid: Pid,
    ) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let mut created = Vec::new();
            {
                let mut table = ctx.table.lock().expect("table lock");
                let Some(record_id) = table.record_id_by_pid(host_pid) else {
                    warn!("attach_render_process: no record hosts pid {host_pid}");
                    return;
                };
                let record = table.record_mut(record_id).expect("record just found");
                record.set_render(RenderRecord {
                    pid: render_pid,
                    host_pid: Some(host_pid),
                });
                for bundle_name in record.bundle_names() {
                    created.push(RenderProcessData {
                        bundle_name,
                        host_pid: Some(host_pid),
                        pid: render_pid,
                        timestamp: Utc::now(),
                    });
                }
            }
            for data in &created {
                ctx.observers.on_render_process_created(data);
            }
        }))
    }

    pub fn render_process_died(&self, render_pid: Pid) -> Result<(), AppMgrError> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx.queue.post(Box::new(move || {
            let mut died = Vec::new();
            {
                let mut table = ctx.table.lock().expect("table lock");
                let Some(record_id) = table.record_id_by_render_pid(render_pid) else {
                    debug!("render_process_died: no record owns render pid {render_pid}");
                    return;
                };
                let record = table.record_mut(record_id).expect("record just found");
                let render = record.take_render();
                for bundle_name in record.bundle_names() {
                    died.push(RenderProcessData {
                        bundle_name,
                        host_pid: render.as_ref().and_then(|r| r.host_pid),
                        pid: render_pid,
                        timestamp: Utc::now(),
                    });
                }
            }
            for data in &died {
                ctx.observers.on_render_process_died(data);
            }
        }))
    }

    // ---- lifecycle of the service itself -----------------------------------

    /// Blocks until every task posted before this call has run; test and
    /// shutdown support.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.ctx.queue.flush(timeout)
    }

    pub fn shutdown(&self) {
        info!("application manager service stopping");
        self.ctx.queue.shutdown();
    }
}

#[derive(Clone, Copy)]
enum PatchOp {
    Load,
    HotReload,
    Unload,
}

// ---- worker-thread task bodies ---------------------------------------------

/// Applies a mutation to one record and fans its transitions out to the
/// observer hub. Payloads are built under the table lock; dispatch happens
/// after it drops.
fn apply_and_publish(
    ctx: &Arc<ServiceCtx>,
    record_id: RecordId,
    mutate: impl FnOnce(&mut AppRunningRecord) -> Vec<StateTransition>,
) {
    let mut app_events: Vec<AppStateData> = Vec::new();
    let mut process_events: Vec<ProcessData> = Vec::new();
    let mut ability_events: Vec<AbilityStateData> = Vec::new();
    let mut died_events: Vec<ProcessData> = Vec::new();
    {
        let mut table = ctx.table.lock().expect("table lock");
        let Some(record) = table.record_mut(record_id) else {
            debug!("record {record_id} is gone; dropping stale operation");
            return;
        };
        let transitions = mutate(record);
        let mut terminated = false;
        for transition in &transitions {
            match transition {
                StateTransition::AppStateChanged(state) => {
                    app_events.extend(record.app_state_data(*state));
                    process_events.extend(record.process_data());
                }
                StateTransition::AbilityStateChanged(data) => ability_events.push(data.clone()),
                StateTransition::ProcessTerminated => terminated = true,
            }
        }
        if terminated {
            if let Some(removed) = table.remove(record_id) {
                died_events.extend(removed.process_data());
            }
        }
    }
    for event in &ability_events {
        ctx.observers.state_changed_notify_observer(event);
    }
    for event in &app_events {
        ctx.observers.on_app_state_changed(event);
    }
    for event in &process_events {
        ctx.observers.on_process_state_changed(event);
    }
    for event in &died_events {
        ctx.observers.on_process_died(event);
    }
}

/// Creates a record and asks the spawn collaborator for a process.
fn start_process(
    ctx: &Arc<ServiceCtx>,
    app_info: &ApplicationInfo,
    process_name: &str,
) -> Option<RecordId> {
    let record_id;
    let created;
    {
        let mut table = ctx.table.lock().expect("table lock");
        record_id = table.create_record(app_info, process_name);
        let request = ProcessStartRequest {
            bundle_name: app_info.bundle_name.clone(),
            process_name: process_name.to_string(),
            uid: app_info.uid,
        };
        match ctx.launcher.launch(&request) {
            Ok(pid) => table
                .record_mut(record_id)
                .expect("record just created")
                .set_pid(pid),
            Err(err) => {
                error!("process launch for {process_name} failed: {err}");
                table.remove(record_id);
                return None;
            }
        }
        created = table
            .record(record_id)
            .expect("record just created")
            .process_data();
    }
    for data in &created {
        ctx.observers.on_process_created(data);
    }
    Some(record_id)
}

fn handle_load_ability(
    ctx: &Arc<ServiceCtx>,
    token: AbilityToken,
    ability_info: AbilityInfo,
    app_info: ApplicationInfo,
    intent: Option<LaunchIntent>,
) {
    let process_name = app_info.process_name().to_string();
    let module_info = ModuleInfo {
        module_name: ability_info.module_name.clone(),
        bundle_name: ability_info.bundle_name.clone(),
        abilities: Vec::new(),
    };
    let existing = {
        let mut table = ctx.table.lock().expect("table lock");
        table
            .record_mut_by_name(&app_info.bundle_name, &process_name)
            .map(|record| record.record_id())
    };
    match existing {
        Some(record_id) => {
            apply_and_publish(ctx, record_id, |record| {
                let module_is_new = record
                    .module(&module_info.bundle_name, &module_info.module_name)
                    .is_none();
                record.add_module(
                    &app_info,
                    &module_info,
                    Some(ability_info),
                    Some(token),
                    intent,
                );
                if !record.is_attached() {
                    return Vec::new();
                }
                if module_is_new {
                    // The process must load the module before the ability can
                    // launch; pending launches flush on the stage ack.
                    record.schedule_ability_stage(
                        &module_info.bundle_name,
                        &module_info.module_name,
                    );
                    Vec::new()
                } else {
                    record.launch_ability(token)
                }
            });
            let reused = {
                let table = ctx.table.lock().expect("table lock");
                table
                    .record(record_id)
                    .map(|record| record.process_data())
                    .unwrap_or_default()
            };
            for data in &reused {
                ctx.observers.on_process_reused(data);
            }
        }
        None => {
            if let Some(record_id) = start_process(ctx, &app_info, &process_name) {
                let mut table = ctx.table.lock().expect("table lock");
                if let Some(record) = table.record_mut(record_id) {
                    record.add_module(
                        &app_info,
                        &module_info,
                        Some(ability_info),
                        Some(token),
                        intent,
                    );
                }
            }
        }
    }
}

fn handle_attach_application(ctx: &Arc<ServiceCtx>, pid: Pid, scheduler: Arc<dyn AppScheduler>) {
    let record_id = {
        let table = ctx.table.lock().expect("table lock");
        table.record_id_by_pid(pid)
    };
    let Some(record_id) = record_id else {
        warn!("attach_application: no record waits for pid {pid}");
        return;
    };
    // Death callbacks run on a transport thread; they only post.
    let watch_ctx = Arc::clone(ctx);
    scheduler.watch_death(Box::new(move || {
        let task_ctx = Arc::clone(&watch_ctx);
        let posted = watch_ctx
            .queue
            .post(Box::new(move || handle_client_died(&task_ctx, record_id)));
        if posted.is_err() {
            warn!("client death reported after queue shutdown");
        }
    }));
    apply_and_publish(ctx, record_id, |record| {
        record.attach(scheduler);
        let out = record.launch_application();
        if let Some((intent, module_name)) = record.take_pending_intent() {
            record.schedule_accept_intent(&intent, &module_name);
        }
        out
    });
}

fn handle_client_died(ctx: &Arc<ServiceCtx>, record_id: RecordId) {
    let mut died = Vec::new();
    let mut restart: Option<(ApplicationInfo, String)> = None;
    {
        let mut table = ctx.table.lock().expect("table lock");
        let Some(record) = table.record_mut(record_id) else {
            return;
        };
        record.on_client_died();
        if record.keep_alive() {
            if let Some(info) = record.primary_app_info().cloned() {
                let mut budgets = ctx.restart_budgets.lock().expect("budget lock");
                let window = budgets.entry(info.bundle_name.clone()).or_default();
                if window.try_restart(Instant::now()) {
                    restart = Some((info, record.process_name().to_string()));
                } else {
                    warn!(
                        "restart budget exhausted for resident process {}",
                        record.process_name()
                    );
                }
            }
        }
        if let Some(removed) = table.remove(record_id) {
            died.extend(removed.process_data());
        }
    }
    for data in &died {
        ctx.observers.on_process_died(data);
    }
    if let Some((info, process_name)) = restart {
        info!("restarting resident process {process_name}");
        start_process(ctx, &info, &process_name);
    }
}

fn handle_start_specified_ability(
    ctx: &Arc<ServiceCtx>,
    intent: LaunchIntent,
    ability_info: AbilityInfo,
    app_info: ApplicationInfo,
) {
    let process_name = app_info.process_name().to_string();
    let module_name = ability_info.module_name.clone();
    let existing = {
        let mut table = ctx.table.lock().expect("table lock");
        table
            .record_mut_by_name(&app_info.bundle_name, &process_name)
            .map(|record| (record.record_id(), record.is_attached()))
    };
    match existing {
        Some((record_id, true)) => {
            apply_and_publish(ctx, record_id, |record| {
                record.schedule_accept_intent(&intent, &module_name);
                Vec::new()
            });
        }
        Some((record_id, false)) => {
            apply_and_publish(ctx, record_id, |record| {
                record.set_pending_intent(intent, module_name);
                Vec::new()
            });
        }
        None => {
            if let Some(record_id) = start_process(ctx, &app_info, &process_name) {
                let mut table = ctx.table.lock().expect("table lock");
                if let Some(record) = table.record_mut(record_id) {
                    record.add_module(
                        &app_info,
                        &ModuleInfo {
                            module_name: module_name.clone(),
                            bundle_name: ability_info.bundle_name.clone(),
                            abilities: Vec::new(),
                        },
                        None,
                        None,
                        None,
                    );
                    record.set_pending_intent(intent, module_name);
                }
            }
        }
    }
}

/// The remote never acknowledged: force the cleanup the ack would have done.
fn handle_timeout(ctx: &Arc<ServiceCtx>, key: TimerKey) {
    match key {
        TimerKey::TerminateAbility(token) => {
            warn!("terminate-ability acknowledgment timed out for token {token}; forcing cleanup");
            let record_id = ctx.table.lock().expect("table lock").record_id_by_token(token);
            if let Some(record_id) = record_id {
                apply_and_publish(ctx, record_id, |record| record.ability_terminated(token));
            }
        }
        TimerKey::TerminateApplication(record_id) => {
            warn!("terminate acknowledgment timed out for record {record_id}; killing process");
            remove_unresponsive_record(ctx, record_id);
        }
        TimerKey::AddAbilityStage(record_id) => {
            warn!("ability-stage acknowledgment timed out for record {record_id}; killing process");
            remove_unresponsive_record(ctx, record_id);
        }
        TimerKey::StartSpecifiedAbility(record_id) => {
            warn!("accept-intent acknowledgment timed out for record {record_id}");
            let response = ctx
                .specified_response
                .lock()
                .expect("specified response lock")
                .clone();
            if let Some(response) = response {
                response.on_timeout(record_id);
            }
        }
    }
}

fn remove_unresponsive_record(ctx: &Arc<ServiceCtx>, record_id: RecordId) {
    let mut died = Vec::new();
    let mut pid = None;
    {
        let mut table = ctx.table.lock().expect("table lock");
        if let Some(mut removed) = table.remove(record_id) {
            removed.on_client_died();
            pid = removed.pid();
            died.extend(removed.process_data());
        }
    }
    if let Some(pid) = pid {
        if let Err(err) = ctx.launcher.kill(pid) {
            warn!("kill of unresponsive pid {pid} failed: {err}");
        }
    }
    for data in &died {
        ctx.observers.on_process_died(data);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::launcher::StubLauncher;
    use procyon_governor::{AllowAllGovernor, GrantTableGovernor};
    use procyon_lifecycle::info::keys;
    use procyon_lifecycle::stubs::{RecordingScheduler, SchedulerCall};

    const FLUSH: Duration = Duration::from_secs(2);

    fn service(governor: Arc<dyn PermissionGovernor>) -> AppMgrService {
        AppMgrService::new(
            governor,
            Arc::new(StubLauncher::new()),
            LifecycleTimeouts::default(),
        )
    }

    fn app_info(bundle: &str) -> ApplicationInfo {
        ApplicationInfo {
            name: bundle.into(),
            bundle_name: bundle.into(),
            uid: 2000,
            ..Default::default()
        }
    }

    fn ability_info(bundle: &str, name: &str) -> AbilityInfo {
        AbilityInfo {
            name: name.into(),
            bundle_name: bundle.into(),
            module_name: "entry".into(),
            ..Default::default()
        }
    }

    /// Loads one ability and attaches a recording scheduler; returns the pid.
    fn load_and_attach(service: &AppMgrService, token: AbilityToken) -> (Pid, Arc<RecordingScheduler>) {
        service
            .load_ability(
                token,
                ability_info("com.example.demo", "Main"),
                app_info("com.example.demo"),
                None,
            )
            .expect("load_ability");
        assert!(service.flush(FLUSH));
        let processes = service.get_all_running_processes(&CallerIdentity::system());
        let pid = processes[0].pid.expect("pid assigned");
        let scheduler = Arc::new(RecordingScheduler::new());
        service
            .attach_application(pid, Arc::clone(&scheduler) as Arc<dyn AppScheduler>)
            .expect("attach");
        assert!(service.flush(FLUSH));
        (pid, scheduler)
    }

    #[test]
    fn load_ability_rejects_missing_descriptors() {
        let service = service(Arc::new(AllowAllGovernor));
        let err = service
            .load_ability(1, AbilityInfo::default(), app_info("com.example.demo"), None)
            .unwrap_err();
        assert!(matches!(err, AppMgrError::InvalidParam(_)));
        service.shutdown();
    }

    #[test]
    fn kill_application_requires_permission() {
        let service = service(Arc::new(GrantTableGovernor::new()));
        let caller = CallerIdentity::app(10, 20010);
        let err = service.kill_application(&caller, "com.example.demo").unwrap_err();
        assert!(matches!(err, AppMgrError::PermissionDenied(_)));
        service.shutdown();
    }

    #[test]
    fn update_configuration_without_change_skips_fanout() {
        let service = service(Arc::new(AllowAllGovernor));
        let (_pid, scheduler) = load_and_attach(&service, 1);
        let caller = CallerIdentity::system();

        let config = Configuration::new().with(keys::LANGUAGE, "en-US");
        service.update_configuration(&caller, &config).expect("first update");
        assert!(service.flush(FLUSH));
        assert_eq!(scheduler.count(&SchedulerCall::ConfigurationUpdate), 1);

        // Same values again: no effective change, no fan-out.
        service.update_configuration(&caller, &config).expect("second update");
        assert!(service.flush(FLUSH));
        assert_eq!(scheduler.count(&SchedulerCall::ConfigurationUpdate), 1);
        service.shutdown();
    }

    #[test]
    fn memory_level_reaches_every_attached_process() {
        let service = service(Arc::new(AllowAllGovernor));
        let (_pid, scheduler) = load_and_attach(&service, 1);

        service
            .notify_memory_level(MemoryLevel::Critical)
            .expect("notify");
        assert!(service.flush(FLUSH));

        assert_eq!(
            scheduler.count(&SchedulerCall::MemoryLevel(MemoryLevel::Critical)),
            1
        );
        service.shutdown();
    }

    #[test]
    fn running_process_query_is_scoped_by_privilege() {
        let governor = GrantTableGovernor::new();
        let service = service(Arc::new(governor));
        let _ = load_and_attach(&service, 1);

        let own = service.get_all_running_processes(&CallerIdentity::app(10, 9999));
        assert!(own.is_empty(), "unprivileged stranger sees nothing");

        let all = service.get_all_running_processes(&CallerIdentity::system());
        assert_eq!(all.len(), 1);
        service.shutdown();
    }

    #[test]
    fn quick_fix_notifications_reach_the_bundle() {
        let service = service(Arc::new(AllowAllGovernor));
        let (_pid, scheduler) = load_and_attach(&service, 1);

        service.notify_load_patch("com.example.demo").expect("load patch");
        service
            .notify_hot_reload_page("com.example.demo")
            .expect("hot reload");
        service
            .notify_unload_patch("com.example.demo")
            .expect("unload patch");
        assert!(service.flush(FLUSH));

        assert_eq!(
            scheduler.count(&SchedulerCall::LoadPatch("com.example.demo".into())),
            1
        );
        assert_eq!(
            scheduler.count(&SchedulerCall::HotReloadPage("com.example.demo".into())),
            1
        );
        assert_eq!(
            scheduler.count(&SchedulerCall::UnloadPatch("com.example.demo".into())),
            1
        );
        service.shutdown();
    }
}
