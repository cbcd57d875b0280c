//! Process-level aggregate and state machine.
//!
//! One [AppRunningRecord] tracks one OS process hosting an application: its
//! module records, the aggregate application state derived from ability
//! states, and the lifecycle-delivery client bound at attach time. Aggregate
//! invariant: Foreground iff at least one ability is Foreground; Background
//! iff every ability is Background (and one exists); Terminated only after
//! every ability was cleaned.
//!
//! Mutations return [StateTransition] lists instead of touching the observer
//! hub; the service layer maps them to fan-out. All mutation happens on the
//! serialized queue, so the record itself carries no locks.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, warn};

use crate::ability_record::AbilityRunningRecord;
use crate::client::AppLifecycleClient;
use crate::config::LifecycleTimeouts;
use crate::error::AppMgrError;
use crate::identity::{AbilityToken, Pid, RecordId};
use crate::info::{
    AbilityInfo, AbilityStateData, AppLaunchData, AppStateData, ApplicationInfo, Configuration,
    LaunchIntent, MemoryLevel, ModuleInfo, ProcessData, RunningProcessInfo,
};
use crate::module_record::ModuleRunningRecord;
use crate::queue::{TimeoutScheduler, TimerKey};
use crate::remote::AppScheduler;
use crate::states::{AbilityState, ApplicationState};

/// A state change the service should fan out to observers.
#[derive(Clone, Debug)]
pub enum StateTransition {
    AppStateChanged(ApplicationState),
    AbilityStateChanged(AbilityStateData),
    /// The process acknowledged terminate (or was forced); remove the record.
    ProcessTerminated,
}

/// Rolling restart budget for resident applications: at most `limit`
/// restarts inside any `window`.
#[derive(Debug)]
pub struct RestartWindow {
    marks: VecDeque<Instant>,
    limit: usize,
    window: Duration,
}

impl RestartWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            marks: VecDeque::new(),
            limit,
            window,
        }
    }

    /// Consumes one restart slot if the budget allows it.
    pub fn try_restart(&mut self, now: Instant) -> bool {
        while let Some(front) = self.marks.front() {
            if now.duration_since(*front) > self.window {
                self.marks.pop_front();
            } else {
                break;
            }
        }
        if self.marks.len() < self.limit {
            self.marks.push_back(now);
            true
        } else {
            false
        }
    }
}

impl Default for RestartWindow {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(300))
    }
}

/// Bookkeeping for a render process attached to this record.
#[derive(Clone, Debug)]
pub struct RenderRecord {
    pub pid: Pid,
    pub host_pid: Option<Pid>,
}

/// Service-side bookkeeping entity for one application process.
pub struct AppRunningRecord {
    record_id: RecordId,
    process_name: String,
    pid: Option<Pid>,
    state: ApplicationState,
    app_infos: BTreeMap<String, ApplicationInfo>,
    modules: Vec<ModuleRunningRecord>,
    client: AppLifecycleClient,
    timers: Arc<dyn TimeoutScheduler>,
    timeouts: LifecycleTimeouts,
    /// Tokens currently transitioning to foreground; drained on the remote's
    /// foreground acknowledgment.
    foregrounding: Vec<AbilityToken>,
    /// Terminate was already delivered for the whole process.
    terminating: bool,
    render: Option<RenderRecord>,
    /// Intent waiting for the process to attach (specified-ability flow).
    pending_intent: Option<(LaunchIntent, String)>,
}

impl AppRunningRecord {
    pub fn new(
        record_id: RecordId,
        app_info: ApplicationInfo,
        process_name: impl Into<String>,
        timers: Arc<dyn TimeoutScheduler>,
        timeouts: LifecycleTimeouts,
    ) -> Self {
        let mut app_infos = BTreeMap::new();
        app_infos.insert(app_info.bundle_name.clone(), app_info);
        Self {
            record_id,
            process_name: process_name.into(),
            pid: None,
            state: ApplicationState::Create,
            app_infos,
            modules: Vec::new(),
            client: AppLifecycleClient::new(),
            timers,
            timeouts,
            foregrounding: Vec::new(),
            terminating: false,
            render: None,
            pending_intent: None,
        }
    }

    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn set_pid(&mut self, pid: Pid) {
        self.pid = Some(pid);
    }

    pub fn state(&self) -> ApplicationState {
        self.state
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub fn is_attached(&self) -> bool {
        self.client.is_bound()
    }

    pub fn client(&self) -> &AppLifecycleClient {
        &self.client
    }

    pub fn bundle_names(&self) -> Vec<String> {
        self.app_infos.keys().cloned().collect()
    }

    pub fn contains_bundle(&self, bundle_name: &str) -> bool {
        self.app_infos.contains_key(bundle_name)
    }

    pub fn has_uid(&self, uid: i32) -> bool {
        self.app_infos.values().any(|info| info.uid == uid)
    }

    pub fn keep_alive(&self) -> bool {
        self.app_infos.values().any(|info| info.keep_alive)
    }

    pub fn app_info(&self, bundle_name: &str) -> Option<&ApplicationInfo> {
        self.app_infos.get(bundle_name)
    }

    /// First application hosted by the process; every record has at least one.
    pub fn primary_app_info(&self) -> Option<&ApplicationInfo> {
        self.app_infos.values().next()
    }

    fn uid_for_bundle(&self, bundle_name: &str) -> i32 {
        self.app_infos
            .get(bundle_name)
            .map(|info| info.uid)
            .unwrap_or_default()
    }

    // ---- module / ability bookkeeping -------------------------------------

    /// Looks up or creates the module record for (bundle, module) and
    /// delegates ability creation to it. A missing ability descriptor leaves
    /// the module record in place with no ability added.
    pub fn add_module(
        &mut self,
        app_info: &ApplicationInfo,
        module: &ModuleInfo,
        ability: Option<AbilityInfo>,
        token: Option<AbilityToken>,
        intent: Option<LaunchIntent>,
    ) {
        self.app_infos
            .entry(app_info.bundle_name.clone())
            .or_insert_with(|| app_info.clone());
        let bundle = module.bundle_name.as_str();
        let idx = match self.modules.iter().position(|m| {
            m.bundle_name() == bundle && m.module_name() == module.module_name
        }) {
            Some(idx) => idx,
            None => {
                self.modules
                    .push(ModuleRunningRecord::new(bundle, &module.module_name));
                self.modules.len() - 1
            }
        };
        if let Some(token) = token {
            self.modules[idx].add_ability(token, ability, intent);
        }
    }

    pub fn module(&self, bundle_name: &str, module_name: &str) -> Option<&ModuleRunningRecord> {
        self.modules
            .iter()
            .find(|m| m.bundle_name() == bundle_name && m.module_name() == module_name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleRunningRecord> {
        self.modules.iter()
    }

    fn module_index_by_token(&self, token: AbilityToken) -> Option<usize> {
        self.modules.iter().position(|m| m.ability(token).is_some())
    }

    pub fn ability_by_token(&self, token: AbilityToken) -> Option<&AbilityRunningRecord> {
        self.modules.iter().find_map(|m| m.ability(token))
    }

    /// Token known to this record, live or pending termination.
    pub fn owns_token(&self, token: AbilityToken) -> bool {
        self.modules
            .iter()
            .any(|m| m.ability(token).is_some() || m.terminating_ability(token).is_some())
    }

    pub fn ability_tokens(&self) -> Vec<AbilityToken> {
        self.modules
            .iter()
            .flat_map(|m| m.abilities().map(|a| a.token()))
            .collect()
    }

    pub fn has_foreground_ability(&self) -> bool {
        self.modules
            .iter()
            .flat_map(|m| m.abilities())
            .any(|a| a.state() == AbilityState::Foreground)
    }

    fn live_ability_count(&self) -> usize {
        self.modules.iter().map(|m| m.live_count()).sum()
    }

    // ---- launch -----------------------------------------------------------

    /// Delivers launch-application to the freshly attached process and
    /// flushes every pending ability launch.
    pub fn launch_application(&mut self) -> Vec<StateTransition> {
        let mut out = Vec::new();
        let Some(app_info) = self.app_infos.values().next().cloned() else {
            warn!("launch_application: record {} has no application", self.record_id);
            return out;
        };
        let launch = AppLaunchData {
            app_info,
            record_id: self.record_id,
            process_name: self.process_name.clone(),
        };
        self.client.launch_application(&launch);
        if self.state == ApplicationState::Create {
            self.state = ApplicationState::Ready;
            out.push(StateTransition::AppStateChanged(ApplicationState::Ready));
        }
        out.extend(self.launch_pending_abilities());
        out
    }

    /// Launch every ability still in Initial across all modules.
    pub fn launch_pending_abilities(&mut self) -> Vec<StateTransition> {
        let mut launched = Vec::new();
        for module in &mut self.modules {
            launched.extend(module.launch_pending_abilities(&self.client));
        }
        launched
            .into_iter()
            .filter_map(|token| self.ability_transition(token, AbilityState::Ready, false))
            .collect()
    }

    /// Launch one ability (process already attached and running).
    pub fn launch_ability(&mut self, token: AbilityToken) -> Vec<StateTransition> {
        let Some(idx) = self.module_index_by_token(token) else {
            debug!("launch_ability: token {token} not in record {}", self.record_id);
            return Vec::new();
        };
        if self.modules[idx].launch_ability(&self.client, token) {
            self.ability_transition(token, AbilityState::Ready, false)
                .into_iter()
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Tells the process a new module is about to run and arms the
    /// stage-info acknowledgment timeout.
    pub fn schedule_ability_stage(&mut self, bundle_name: &str, module_name: &str) {
        let Some(module) = self.module(bundle_name, module_name) else {
            debug!("schedule_ability_stage: unknown module {module_name}");
            return;
        };
        let info = ModuleInfo {
            module_name: module.module_name().to_string(),
            bundle_name: module.bundle_name().to_string(),
            abilities: Vec::new(),
        };
        self.client.ability_stage(&info);
        self.timers.schedule(
            TimerKey::AddAbilityStage(self.record_id),
            self.timeouts.add_ability_stage,
        );
    }

    /// Stage-info acknowledgment: disarm the timeout, flush pending launches.
    pub fn ability_stage_done(&mut self) -> Vec<StateTransition> {
        self.timers
            .cancel(&TimerKey::AddAbilityStage(self.record_id));
        self.launch_pending_abilities()
    }

    // ---- state updates ----------------------------------------------------

    pub fn update_ability_state(
        &mut self,
        token: AbilityToken,
        state: AbilityState,
    ) -> Vec<StateTransition> {
        self.update_component_state(token, state, false)
    }

    /// Extension components share the ability path but are flagged in the
    /// observer payload.
    pub fn update_extension_state(
        &mut self,
        token: AbilityToken,
        state: AbilityState,
    ) -> Vec<StateTransition> {
        self.update_component_state(token, state, true)
    }

    fn update_component_state(
        &mut self,
        token: AbilityToken,
        new_state: AbilityState,
        is_extension: bool,
    ) -> Vec<StateTransition> {
        let mut out = Vec::new();
        // End is reachable only through the termination acknowledgment;
        // Terminating only through the terminate flow.
        if !new_state.is_updatable() {
            warn!("update_ability_state: rejecting direct transition to {new_state:?}");
            return out;
        }
        let Some(idx) = self.module_index_by_token(token) else {
            debug!(
                "update_ability_state: token {token} unknown to record {}",
                self.record_id
            );
            return out;
        };
        {
            let ability = self.modules[idx]
                .ability_mut(token)
                .expect("ability present in located module");
            if ability.is_same_state(new_state) {
                return out;
            }
            ability.set_state(new_state);
        }
        if let Some(transition) = self.ability_transition(token, new_state, is_extension) {
            out.push(transition);
        }
        match new_state {
            AbilityState::Foreground => self.on_ability_foreground(token, &mut out),
            AbilityState::Background => self.on_ability_background(token, &mut out),
            _ => {}
        }
        out
    }

    fn ability_transition(
        &self,
        token: AbilityToken,
        state: AbilityState,
        is_extension: bool,
    ) -> Option<StateTransition> {
        let ability = self.ability_by_token(token)?;
        Some(StateTransition::AbilityStateChanged(AbilityStateData {
            bundle_name: ability.bundle_name().to_string(),
            ability_name: ability.name().to_string(),
            token,
            state,
            uid: self.uid_for_bundle(ability.bundle_name()),
            is_extension,
            timestamp: Utc::now(),
        }))
    }

    /// First ability entering foreground flips the aggregate and delivers
    /// exactly one foreground notification; later entrants only join the
    /// foregrounding set.
    fn on_ability_foreground(&mut self, token: AbilityToken, out: &mut Vec<StateTransition>) {
        if !self.foregrounding.contains(&token) {
            self.foregrounding.push(token);
        }
        match self.state {
            ApplicationState::Create | ApplicationState::Ready | ApplicationState::Background => {
                self.state = ApplicationState::Foreground;
                self.client.schedule_foreground();
                out.push(StateTransition::AppStateChanged(
                    ApplicationState::Foreground,
                ));
            }
            ApplicationState::Foreground => {}
            other => {
                warn!(
                    "ability {token} foregrounded while record {} is {other:?}",
                    self.record_id
                );
            }
        }
    }

    /// The last ability leaving foreground flips the aggregate and delivers
    /// exactly one background notification.
    fn on_ability_background(&mut self, token: AbilityToken, out: &mut Vec<StateTransition>) {
        self.foregrounding.retain(|t| *t != token);
        if self.state == ApplicationState::Foreground && !self.has_foreground_ability() {
            self.state = ApplicationState::Background;
            self.client.schedule_background();
            out.push(StateTransition::AppStateChanged(
                ApplicationState::Background,
            ));
        }
    }

    /// Remote acknowledged the foreground notification: drain the
    /// foregrounding set and settle the aggregate.
    pub fn application_foregrounded(&mut self) -> Vec<StateTransition> {
        let _ = self.pop_foregrounding_tokens();
        if self.state == ApplicationState::Foreground {
            Vec::new()
        } else {
            self.state = ApplicationState::Foreground;
            vec![StateTransition::AppStateChanged(
                ApplicationState::Foreground,
            )]
        }
    }

    /// Drains the set of tokens still transitioning to foreground.
    pub fn pop_foregrounding_tokens(&mut self) -> Vec<AbilityToken> {
        std::mem::take(&mut self.foregrounding)
    }

    pub fn application_backgrounded(&mut self) -> Vec<StateTransition> {
        if self.state != ApplicationState::Background {
            warn!(
                "background acknowledgment for record {} in state {:?}",
                self.record_id, self.state
            );
        }
        Vec::new()
    }

    // ---- termination ------------------------------------------------------

    /// Moves one ability into its termination handshake.
    pub fn terminate_ability(&mut self, token: AbilityToken, force: bool) {
        let Some(idx) = self.module_index_by_token(token) else {
            debug!(
                "terminate_ability: token {token} unknown to record {}",
                self.record_id
            );
            return;
        };
        let timeout = self.timeouts.terminate_ability;
        self.modules[idx].terminate_ability(&self.client, self.timers.as_ref(), timeout, token, force);
    }

    /// Termination acknowledgment for one ability. When the last ability is
    /// cleaned the aggregate becomes Terminated and terminate is delivered to
    /// the process exactly once.
    pub fn ability_terminated(&mut self, token: AbilityToken) -> Vec<StateTransition> {
        let mut out = Vec::new();
        let Some(idx) = self.modules.iter().position(|m| {
            m.terminating_ability(token).is_some() || m.ability(token).is_some()
        }) else {
            debug!(
                "ability_terminated: token {token} unknown to record {}",
                self.record_id
            );
            return out;
        };
        let Some(removed) = self.modules[idx].ability_terminated(self.timers.as_ref(), token)
        else {
            return out;
        };
        out.push(StateTransition::AbilityStateChanged(AbilityStateData {
            bundle_name: removed.bundle_name().to_string(),
            ability_name: removed.name().to_string(),
            token,
            state: AbilityState::End,
            uid: self.uid_for_bundle(removed.bundle_name()),
            is_extension: false,
            timestamp: Utc::now(),
        }));
        if self.modules[idx].is_empty() {
            self.modules.remove(idx);
        }
        if self.modules.iter().all(|m| m.is_empty()) && !self.terminating {
            out.extend(self.schedule_process_terminate());
        }
        out
    }

    /// Delivers terminate to the process and arms the terminate timeout.
    /// Used both by the natural last-ability path and by the kill paths.
    pub fn schedule_process_terminate(&mut self) -> Vec<StateTransition> {
        if self.terminating {
            return Vec::new();
        }
        self.terminating = true;
        self.state = ApplicationState::Terminated;
        self.client.schedule_terminate();
        self.timers.schedule(
            TimerKey::TerminateApplication(self.record_id),
            self.timeouts.terminate_application,
        );
        vec![StateTransition::AppStateChanged(
            ApplicationState::Terminated,
        )]
    }

    /// Terminate acknowledgment from the process: the record is done.
    pub fn application_terminated(&mut self) -> Vec<StateTransition> {
        if !self.terminating {
            warn!(
                "terminate acknowledgment for record {} that was never asked to terminate",
                self.record_id
            );
            return Vec::new();
        }
        if self.live_ability_count() > 0 {
            warn!(
                "terminate acknowledgment for record {} with live abilities",
                self.record_id
            );
        }
        self.timers
            .cancel(&TimerKey::TerminateApplication(self.record_id));
        self.state = ApplicationState::End;
        vec![StateTransition::ProcessTerminated]
    }

    // ---- attach / death ---------------------------------------------------

    /// Binds the remote scheduler handle. Death-watch arming is the service's
    /// job (the callback must post onto the queue the service owns).
    pub fn attach(&mut self, scheduler: Arc<dyn AppScheduler>) {
        self.client.bind(scheduler);
    }

    /// Remote process died: drop the handle and disarm every pending timeout
    /// belonging to this record.
    pub fn on_client_died(&mut self) {
        self.client.unbind();
        self.cancel_all_timers();
    }

    fn cancel_all_timers(&mut self) {
        self.timers
            .cancel(&TimerKey::TerminateApplication(self.record_id));
        self.timers
            .cancel(&TimerKey::AddAbilityStage(self.record_id));
        self.timers
            .cancel(&TimerKey::StartSpecifiedAbility(self.record_id));
        for module in &self.modules {
            for token in module.terminating_tokens() {
                self.timers.cancel(&TimerKey::TerminateAbility(token));
            }
        }
    }

    // ---- specified-ability flow ------------------------------------------

    /// Asks the process whether it accepts a new intent; arms the
    /// acknowledgment timeout.
    pub fn schedule_accept_intent(&mut self, intent: &LaunchIntent, module_name: &str) {
        self.client.accept_intent(intent, module_name);
        self.timers.schedule(
            TimerKey::StartSpecifiedAbility(self.record_id),
            self.timeouts.start_specified_ability,
        );
    }

    pub fn accept_intent_done(&mut self) {
        self.timers
            .cancel(&TimerKey::StartSpecifiedAbility(self.record_id));
    }

    /// Parks an intent until the process attaches; delivered right after
    /// launch-application.
    pub fn set_pending_intent(&mut self, intent: LaunchIntent, module_name: String) {
        self.pending_intent = Some((intent, module_name));
    }

    pub fn take_pending_intent(&mut self) -> Option<(LaunchIntent, String)> {
        self.pending_intent.take()
    }

    // ---- pass-through forwards -------------------------------------------

    pub fn update_configuration(&self, config: &Configuration) -> Result<(), AppMgrError> {
        self.client.update_configuration(config)
    }

    pub fn schedule_memory_level(&self, level: MemoryLevel) {
        self.client.memory_level(level);
    }

    pub fn notify_load_patch(&self, bundle_name: &str) {
        self.client.load_patch(bundle_name);
    }

    pub fn notify_hot_reload_page(&self, bundle_name: &str) {
        self.client.hot_reload_page(bundle_name);
    }

    pub fn notify_unload_patch(&self, bundle_name: &str) {
        self.client.unload_patch(bundle_name);
    }

    /// Behavior-analysis attributes are opaque pass-through values.
    pub fn ability_behavior_analysis(
        &mut self,
        token: AbilityToken,
        visibility: i32,
        perceptibility: i32,
        connection_state: i32,
    ) {
        let Some(idx) = self.module_index_by_token(token) else {
            debug!("ability_behavior_analysis: unknown token {token}");
            return;
        };
        let ability = self.modules[idx]
            .ability_mut(token)
            .expect("ability present in located module");
        ability.set_visibility(visibility);
        ability.set_perceptibility(perceptibility);
        ability.set_connection_state(connection_state);
    }

    // ---- render process ---------------------------------------------------

    pub fn set_render(&mut self, render: RenderRecord) {
        self.render = Some(render);
    }

    pub fn render(&self) -> Option<&RenderRecord> {
        self.render.as_ref()
    }

    pub fn take_render(&mut self) -> Option<RenderRecord> {
        self.render.take()
    }

    // ---- query snapshots --------------------------------------------------

    pub fn running_process_info(&self) -> RunningProcessInfo {
        RunningProcessInfo {
            record_id: self.record_id,
            pid: self.pid,
            process_name: self.process_name.clone(),
            bundle_names: self.bundle_names(),
            state: self.state,
        }
    }

    /// One payload per hosted application, stamped now.
    pub fn app_state_data(&self, state: ApplicationState) -> Vec<AppStateData> {
        self.app_infos
            .values()
            .map(|info| AppStateData {
                bundle_name: info.bundle_name.clone(),
                uid: info.uid,
                state,
                timestamp: Utc::now(),
            })
            .collect()
    }

    pub fn process_data(&self) -> Vec<ProcessData> {
        self.app_infos
            .values()
            .map(|info| ProcessData {
                bundle_name: info.bundle_name.clone(),
                record_id: self.record_id,
                pid: self.pid,
                uid: info.uid,
                timestamp: Utc::now(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::stubs::{RecordingScheduler, RecordingTimeouts, SchedulerCall};

    fn app_info(bundle: &str) -> ApplicationInfo {
        ApplicationInfo {
            name: bundle.into(),
            bundle_name: bundle.into(),
            uid: 2000,
            ..Default::default()
        }
    }

    fn ability(name: &str, bundle: &str, module: &str) -> AbilityInfo {
        AbilityInfo {
            name: name.into(),
            bundle_name: bundle.into(),
            module_name: module.into(),
            ..Default::default()
        }
    }

    fn module(bundle: &str, name: &str) -> ModuleInfo {
        ModuleInfo {
            module_name: name.into(),
            bundle_name: bundle.into(),
            abilities: Vec::new(),
        }
    }

    struct Fixture {
        record: AppRunningRecord,
        scheduler: Arc<RecordingScheduler>,
        timers: Arc<RecordingTimeouts>,
    }

    /// Record for "proc1" hosting bundle "com.example.demo" module "entry",
    /// attached and launched, with the given ability tokens live in Ready.
    fn attached_record(tokens: &[AbilityToken]) -> Fixture {
        let timers = RecordingTimeouts::shared();
        let mut record = AppRunningRecord::new(
            1,
            app_info("com.example.demo"),
            "proc1",
            Arc::clone(&timers) as Arc<dyn TimeoutScheduler>,
            LifecycleTimeouts::default(),
        );
        let info = app_info("com.example.demo");
        let m = module("com.example.demo", "entry");
        for (i, token) in tokens.iter().enumerate() {
            record.add_module(
                &info,
                &m,
                Some(ability(&format!("Ability{i}"), "com.example.demo", "entry")),
                Some(*token),
                None,
            );
        }
        let scheduler = Arc::new(RecordingScheduler::new());
        record.attach(Arc::clone(&scheduler) as Arc<dyn AppScheduler>);
        let _ = record.launch_application();
        Fixture {
            record,
            scheduler,
            timers,
        }
    }

    #[test]
    fn add_module_creates_record_in_initial_state() {
        let timers = RecordingTimeouts::shared();
        let mut record = AppRunningRecord::new(
            1,
            app_info("com.example.demo"),
            "proc1",
            Arc::clone(&timers) as Arc<dyn TimeoutScheduler>,
            LifecycleTimeouts::default(),
        );
        let info = app_info("com.example.demo");
        record.add_module(
            &info,
            &module("com.example.demo", "m1"),
            Some(ability("Main", "com.example.demo", "m1")),
            Some(11),
            None,
        );

        assert!(record.module("com.example.demo", "m1").is_some());
        assert_eq!(
            record.ability_by_token(11).unwrap().state(),
            AbilityState::Initial
        );
        assert_eq!(record.state(), ApplicationState::Create);
    }

    #[test]
    fn add_module_without_ability_info_keeps_module_empty() {
        let timers = RecordingTimeouts::shared();
        let mut record = AppRunningRecord::new(
            1,
            app_info("com.example.demo"),
            "proc1",
            Arc::clone(&timers) as Arc<dyn TimeoutScheduler>,
            LifecycleTimeouts::default(),
        );
        let info = app_info("com.example.demo");
        record.add_module(&info, &module("com.example.demo", "m1"), None, Some(11), None);

        let m = record.module("com.example.demo", "m1").expect("module exists");
        assert_eq!(m.live_count(), 0);
    }

    #[test]
    fn add_module_twice_is_idempotent() {
        let mut fixture = attached_record(&[11]);
        let info = app_info("com.example.demo");
        let calls_before = fixture.scheduler.calls().len();
        fixture.record.add_module(
            &info,
            &module("com.example.demo", "entry"),
            Some(ability("Ability0", "com.example.demo", "entry")),
            Some(11),
            None,
        );

        assert_eq!(fixture.record.ability_tokens().len(), 1);
        assert_eq!(
            fixture.scheduler.calls().len(),
            calls_before,
            "re-add must not produce new notifications"
        );
    }

    #[test]
    fn launch_application_schedules_ready_and_launches_pending() {
        let fixture = attached_record(&[11, 12]);
        assert_eq!(fixture.record.state(), ApplicationState::Ready);
        assert_eq!(
            fixture.record.ability_by_token(11).unwrap().state(),
            AbilityState::Ready
        );
        assert_eq!(fixture.scheduler.count(&SchedulerCall::LaunchApplication), 1);
        assert_eq!(fixture.scheduler.count(&SchedulerCall::LaunchAbility(11)), 1);
        assert_eq!(fixture.scheduler.count(&SchedulerCall::LaunchAbility(12)), 1);
    }

    #[test]
    fn first_foreground_ability_notifies_exactly_once() {
        let mut fixture = attached_record(&[11]);
        let transitions = fixture
            .record
            .update_ability_state(11, AbilityState::Foreground);

        assert_eq!(fixture.record.state(), ApplicationState::Foreground);
        assert_eq!(fixture.scheduler.count(&SchedulerCall::Foreground), 1);
        assert!(transitions.iter().any(|t| matches!(
            t,
            StateTransition::AppStateChanged(ApplicationState::Foreground)
        )));
    }

    #[test]
    fn concurrent_foreground_abilities_notify_once() {
        let mut fixture = attached_record(&[11, 12, 13]);
        fixture.record.update_ability_state(11, AbilityState::Foreground);
        fixture.record.update_ability_state(12, AbilityState::Foreground);
        fixture.record.update_ability_state(13, AbilityState::Foreground);

        assert_eq!(fixture.scheduler.count(&SchedulerCall::Foreground), 1);
        assert_eq!(fixture.record.state(), ApplicationState::Foreground);
    }

    #[test]
    fn background_notifies_only_when_last_ability_leaves_foreground() {
        let mut fixture = attached_record(&[11, 12]);
        fixture.record.update_ability_state(11, AbilityState::Foreground);
        fixture.record.update_ability_state(12, AbilityState::Foreground);

        fixture.record.update_ability_state(11, AbilityState::Background);
        assert_eq!(
            fixture.record.state(),
            ApplicationState::Foreground,
            "one ability still foreground"
        );
        assert_eq!(fixture.scheduler.count(&SchedulerCall::Background), 0);

        fixture.record.update_ability_state(12, AbilityState::Background);
        assert_eq!(fixture.record.state(), ApplicationState::Background);
        assert_eq!(fixture.scheduler.count(&SchedulerCall::Background), 1);
    }

    #[test]
    fn aggregate_invariant_holds_at_settled_points() {
        let mut fixture = attached_record(&[11, 12]);
        fixture.record.update_ability_state(11, AbilityState::Foreground);
        assert!(fixture.record.has_foreground_ability());
        assert_eq!(fixture.record.state(), ApplicationState::Foreground);

        fixture.record.update_ability_state(11, AbilityState::Background);
        fixture.record.update_ability_state(12, AbilityState::Background);
        assert!(!fixture.record.has_foreground_ability());
        assert_eq!(fixture.record.state(), ApplicationState::Background);
    }

    #[test]
    fn repeated_state_is_swallowed() {
        let mut fixture = attached_record(&[11]);
        fixture.record.update_ability_state(11, AbilityState::Foreground);
        let transitions = fixture
            .record
            .update_ability_state(11, AbilityState::Foreground);

        assert!(transitions.is_empty());
        assert_eq!(fixture.scheduler.count(&SchedulerCall::Foreground), 1);
    }

    #[test]
    fn unknown_token_update_is_a_noop() {
        let mut fixture = attached_record(&[11]);
        let before = fixture.scheduler.calls().len();
        let transitions = fixture
            .record
            .update_ability_state(99, AbilityState::Foreground);

        assert!(transitions.is_empty());
        assert_eq!(fixture.record.state(), ApplicationState::Ready);
        assert_eq!(fixture.scheduler.calls().len(), before);
    }

    #[test]
    fn direct_transition_to_terminal_states_is_rejected() {
        let mut fixture = attached_record(&[11]);
        assert!(fixture
            .record
            .update_ability_state(11, AbilityState::End)
            .is_empty());
        assert!(fixture
            .record
            .update_ability_state(11, AbilityState::Terminating)
            .is_empty());
        assert_eq!(
            fixture.record.ability_by_token(11).unwrap().state(),
            AbilityState::Ready
        );
    }

    #[test]
    fn last_ability_cleaned_terminates_the_process_once() {
        let mut fixture = attached_record(&[11, 12]);
        fixture.record.terminate_ability(11, false);
        fixture.record.terminate_ability(12, false);

        let t1 = fixture.record.ability_terminated(11);
        assert!(!t1
            .iter()
            .any(|t| matches!(t, StateTransition::AppStateChanged(ApplicationState::Terminated))));
        assert_eq!(fixture.scheduler.count(&SchedulerCall::Terminate), 0);

        let t2 = fixture.record.ability_terminated(12);
        assert!(t2
            .iter()
            .any(|t| matches!(t, StateTransition::AppStateChanged(ApplicationState::Terminated))));
        assert_eq!(fixture.scheduler.count(&SchedulerCall::Terminate), 1);
        assert!(fixture
            .timers
            .is_armed(&TimerKey::TerminateApplication(1)));

        // Acknowledgment finishes the record and cancels the timeout.
        let t3 = fixture.record.application_terminated();
        assert!(t3
            .iter()
            .any(|t| matches!(t, StateTransition::ProcessTerminated)));
        assert!(!fixture.timers.is_armed(&TimerKey::TerminateApplication(1)));
    }

    #[test]
    fn terminate_arms_timeout_and_ack_cancels_it() {
        let mut fixture = attached_record(&[11, 12]);
        fixture.record.terminate_ability(11, false);
        assert!(fixture.timers.is_armed(&TimerKey::TerminateAbility(11)));

        fixture.record.ability_terminated(11);
        assert!(!fixture.timers.is_armed(&TimerKey::TerminateAbility(11)));

        // A second acknowledgment for the same token changes nothing.
        assert!(fixture.record.ability_terminated(11).is_empty());
    }

    #[test]
    fn foregrounded_ack_drains_the_foregrounding_set() {
        let mut fixture = attached_record(&[11, 12]);
        fixture.record.update_ability_state(11, AbilityState::Foreground);
        fixture.record.update_ability_state(12, AbilityState::Foreground);

        let ack = fixture.record.application_foregrounded();
        assert!(ack.is_empty(), "aggregate already settled at notify time");
        assert!(fixture.record.pop_foregrounding_tokens().is_empty());
    }

    #[test]
    fn client_death_cancels_pending_timeouts() {
        let mut fixture = attached_record(&[11]);
        fixture.record.terminate_ability(11, false);
        assert!(fixture.timers.is_armed(&TimerKey::TerminateAbility(11)));

        fixture.record.on_client_died();

        assert!(!fixture.record.is_attached());
        assert!(!fixture.timers.is_armed(&TimerKey::TerminateAbility(11)));
    }

    #[test]
    fn restart_window_limits_to_three_per_window() {
        let mut window = RestartWindow::default();
        let now = Instant::now();
        assert!(window.try_restart(now));
        assert!(window.try_restart(now));
        assert!(window.try_restart(now));
        assert!(!window.try_restart(now), "fourth restart must be refused");
    }

    #[test]
    fn restart_window_recovers_after_the_window_passes() {
        let mut window = RestartWindow::new(1, Duration::from_millis(10));
        let start = Instant::now();
        assert!(window.try_restart(start));
        assert!(!window.try_restart(start));
        assert!(window.try_restart(start + Duration::from_millis(50)));
    }

    #[test]
    fn behavior_analysis_passes_attributes_through() {
        let mut fixture = attached_record(&[11]);
        fixture.record.ability_behavior_analysis(11, 1, 1, 3);
        let ability = fixture.record.ability_by_token(11).unwrap();
        assert_eq!(ability.visibility(), 1);
        assert_eq!(ability.perceptibility(), 1);
        assert_eq!(ability.connection_state(), 3);
    }
}
