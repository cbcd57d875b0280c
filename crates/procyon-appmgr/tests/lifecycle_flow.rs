//! End-to-end lifecycle flows through the real service: serialized queue,
//! process table, observer fan-out, and timeout recovery, with in-process
//! doubles standing in for the remote process and the spawner.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use procyon_appmgr::{
    AppMgrService, ApplicationStateObserver, SpecifiedAbilityResponse, StubLauncher,
};
use procyon_governor::{permissions, AllowAllGovernor, CallerIdentity, GrantTableGovernor};
use procyon_lifecycle::stubs::{RecordingScheduler, SchedulerCall};
use procyon_lifecycle::{
    AbilityInfo, AbilityState, AbilityStateData, AbilityToken, AppMgrError, AppScheduler,
    AppStateData, ApplicationInfo, ApplicationState, DeathWatchable, LaunchIntent,
    LifecycleTimeouts, Pid, ProcessData, RecordId,
};

const FLUSH: Duration = Duration::from_secs(2);

fn short_timeouts() -> LifecycleTimeouts {
    LifecycleTimeouts {
        terminate_ability: Duration::from_millis(80),
        terminate_application: Duration::from_millis(120),
        add_ability_stage: Duration::from_millis(80),
        start_specified_ability: Duration::from_millis(80),
    }
}

fn app_info(bundle: &str) -> ApplicationInfo {
    ApplicationInfo {
        name: bundle.into(),
        bundle_name: bundle.into(),
        uid: 2000,
        process: Some("proc1".into()),
        ..Default::default()
    }
}

fn ability_info(name: &str) -> AbilityInfo {
    AbilityInfo {
        name: name.into(),
        bundle_name: "com.example.demo".into(),
        module_name: "m1".into(),
        ..Default::default()
    }
}

#[derive(Default)]
struct TestObserver {
    app_events: Mutex<Vec<AppStateData>>,
    ability_events: Mutex<Vec<AbilityStateData>>,
    created: Mutex<Vec<ProcessData>>,
    died: Mutex<Vec<ProcessData>>,
    reused: Mutex<Vec<ProcessData>>,
}

impl TestObserver {
    fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn app_states(&self) -> Vec<ApplicationState> {
        self.app_events.lock().unwrap().iter().map(|e| e.state).collect()
    }
}

impl DeathWatchable for TestObserver {}

impl ApplicationStateObserver for TestObserver {
    fn on_app_state_changed(&self, data: &AppStateData) {
        self.app_events.lock().unwrap().push(data.clone());
    }

    fn on_ability_state_changed(&self, data: &AbilityStateData) {
        self.ability_events.lock().unwrap().push(data.clone());
    }

    fn on_process_created(&self, data: &ProcessData) {
        self.created.lock().unwrap().push(data.clone());
    }

    fn on_process_died(&self, data: &ProcessData) {
        self.died.lock().unwrap().push(data.clone());
    }

    fn on_process_reused(&self, data: &ProcessData) {
        self.reused.lock().unwrap().push(data.clone());
    }
}

struct Harness {
    service: AppMgrService,
    launcher: Arc<StubLauncher>,
}

impl Harness {
    fn new() -> Self {
        Self::with_timeouts(short_timeouts())
    }

    fn with_timeouts(timeouts: LifecycleTimeouts) -> Self {
        let launcher = Arc::new(StubLauncher::new());
        let service = AppMgrService::new(
            Arc::new(AllowAllGovernor),
            Arc::clone(&launcher) as Arc<dyn procyon_appmgr::ProcessLauncher>,
            timeouts,
        );
        Self { service, launcher }
    }

    fn load(&self, token: AbilityToken, ability: &str, info: ApplicationInfo) {
        self.service
            .load_ability(token, ability_info(ability), info, None)
            .expect("load_ability");
        assert!(self.service.flush(FLUSH));
    }

    fn record_and_pid(&self) -> (RecordId, Pid) {
        let processes = self
            .service
            .get_all_running_processes(&CallerIdentity::system());
        assert_eq!(processes.len(), 1, "exactly one process expected");
        (processes[0].record_id, processes[0].pid.expect("pid"))
    }

    fn attach(&self) -> (RecordId, Arc<RecordingScheduler>) {
        let (record_id, pid) = self.record_and_pid();
        let scheduler = Arc::new(RecordingScheduler::new());
        self.service
            .attach_application(pid, Arc::clone(&scheduler) as Arc<dyn AppScheduler>)
            .expect("attach_application");
        assert!(self.service.flush(FLUSH));
        (record_id, scheduler)
    }

    fn update(&self, token: AbilityToken, state: AbilityState) {
        self.service
            .update_ability_state(token, state)
            .expect("update_ability_state");
        assert!(self.service.flush(FLUSH));
    }

    fn state(&self) -> ApplicationState {
        self.service
            .get_all_running_processes(&CallerIdentity::system())[0]
            .state
    }
}

/// Scenario A: one ability, launch then foreground; the process-level state
/// follows and the remote gets exactly one foreground notification.
#[test]
fn scenario_a_single_ability_foreground() {
    let harness = Harness::new();
    harness.load(1, "Main", app_info("com.example.demo"));

    let processes = harness
        .service
        .get_all_running_processes(&CallerIdentity::system());
    assert_eq!(processes[0].process_name, "proc1");
    assert_eq!(processes[0].state, ApplicationState::Create);

    let (_record_id, scheduler) = harness.attach();
    assert_eq!(harness.state(), ApplicationState::Ready);
    assert_eq!(scheduler.count(&SchedulerCall::LaunchApplication), 1);
    assert_eq!(scheduler.count(&SchedulerCall::LaunchAbility(1)), 1);

    harness.update(1, AbilityState::Foreground);

    assert_eq!(harness.state(), ApplicationState::Foreground);
    assert_eq!(scheduler.count(&SchedulerCall::Foreground), 1);
    harness.service.shutdown();
}

/// Scenario B: with two foreground abilities, backgrounding one keeps the
/// process foreground; backgrounding the last delivers exactly one
/// background notification.
#[test]
fn scenario_b_background_only_on_last_ability() {
    let harness = Harness::new();
    harness.load(1, "Main", app_info("com.example.demo"));
    harness.load(2, "Second", app_info("com.example.demo"));
    let (_record_id, scheduler) = harness.attach();

    harness.update(1, AbilityState::Foreground);
    harness.update(2, AbilityState::Foreground);
    assert_eq!(scheduler.count(&SchedulerCall::Foreground), 1);

    harness.update(1, AbilityState::Background);
    assert_eq!(harness.state(), ApplicationState::Foreground);
    assert_eq!(scheduler.count(&SchedulerCall::Background), 0);

    harness.update(2, AbilityState::Background);
    assert_eq!(harness.state(), ApplicationState::Background);
    assert_eq!(scheduler.count(&SchedulerCall::Background), 1);
    harness.service.shutdown();
}

/// Scenario C: the termination acknowledgment lands before the timeout, so
/// the timeout never fires and no duplicate cleanup happens.
#[test]
fn scenario_c_ack_beats_termination_timeout() {
    let harness = Harness::new();
    harness.load(1, "Main", app_info("com.example.demo"));
    harness.load(2, "Second", app_info("com.example.demo"));
    let (_record_id, scheduler) = harness.attach();

    harness.service.terminate_ability(1, false).expect("terminate");
    assert!(harness.service.flush(FLUSH));
    assert_eq!(scheduler.count(&SchedulerCall::CleanAbility(1)), 1);

    harness.service.ability_cleaned(1).expect("cleaned");
    assert!(harness.service.flush(FLUSH));

    // Outlive the armed window: a cancelled timeout must have no effect.
    thread::sleep(Duration::from_millis(200));
    assert!(harness.service.flush(FLUSH));

    let tokens = {
        let (record_id, pid) = harness.record_and_pid();
        let _ = record_id;
        harness.service.get_ability_tokens_by_pid(pid)
    };
    assert_eq!(tokens, vec![2], "only the surviving ability remains");
    assert_eq!(
        scheduler.count(&SchedulerCall::Terminate),
        0,
        "process with a live ability must not be terminated"
    );
    harness.service.shutdown();
}

/// Timeout-first: the remote never acknowledges the clean, the timeout forces
/// local cleanup, and a late acknowledgment is a no-op. With the last ability
/// gone the process terminate handshake runs, also unacknowledged, so the
/// record is removed and the process killed.
#[test]
fn termination_timeout_forces_cleanup_and_late_ack_is_noop() {
    let harness = Harness::new();
    harness.load(1, "Main", app_info("com.example.demo"));
    let (_record_id, scheduler) = harness.attach();
    let (_, pid) = harness.record_and_pid();

    harness.service.terminate_ability(1, false).expect("terminate");
    assert!(harness.service.flush(FLUSH));

    // Let the terminate-ability window expire; forced cleanup empties the
    // record and starts the process terminate handshake.
    thread::sleep(Duration::from_millis(100));
    assert!(harness.service.flush(FLUSH));
    assert_eq!(scheduler.count(&SchedulerCall::Terminate), 1);

    // Late acknowledgment for the already-cleaned token changes nothing.
    harness.service.ability_cleaned(1).expect("late ack");
    assert!(harness.service.flush(FLUSH));
    assert_eq!(scheduler.count(&SchedulerCall::Terminate), 1);

    // Terminate acknowledgment never arrives either; the record is removed
    // and the unresponsive process killed.
    thread::sleep(Duration::from_millis(150));
    assert!(harness.service.flush(FLUSH));
    assert!(harness
        .service
        .get_all_running_processes(&CallerIdentity::system())
        .is_empty());
    assert_eq!(harness.launcher.killed(), vec![pid]);
    harness.service.shutdown();
}

/// Natural termination: last ability cleaned, terminate delivered once, the
/// acknowledgment removes the record and observers hear about the death.
#[test]
fn graceful_terminate_flow_notifies_observers() {
    let harness = Harness::new();
    let observer = TestObserver::shared();
    harness
        .service
        .register_application_state_observer(
            &CallerIdentity::system(),
            Arc::clone(&observer) as Arc<dyn ApplicationStateObserver>,
            vec![],
        )
        .expect("register observer");
    harness.load(1, "Main", app_info("com.example.demo"));
    let (record_id, scheduler) = harness.attach();

    harness.service.terminate_ability(1, false).expect("terminate");
    harness.service.ability_cleaned(1).expect("cleaned");
    assert!(harness.service.flush(FLUSH));
    assert_eq!(scheduler.count(&SchedulerCall::Terminate), 1);

    harness
        .service
        .application_terminated(record_id)
        .expect("terminated ack");
    assert!(harness.service.flush(FLUSH));

    assert!(harness
        .service
        .get_all_running_processes(&CallerIdentity::system())
        .is_empty());
    assert_eq!(observer.died.lock().unwrap().len(), 1);
    assert!(observer
        .app_states()
        .contains(&ApplicationState::Terminated));
    assert!(
        harness.launcher.killed().is_empty(),
        "graceful exit must not be killed"
    );
    harness.service.shutdown();
}

#[test]
fn unknown_token_operations_are_noops() {
    let harness = Harness::new();
    harness.load(1, "Main", app_info("com.example.demo"));
    let (_record_id, scheduler) = harness.attach();
    let calls_before = scheduler.calls().len();

    harness.update(99, AbilityState::Foreground);
    harness.service.terminate_ability(99, false).expect("terminate");
    harness.service.ability_cleaned(99).expect("cleaned");
    assert!(harness.service.flush(FLUSH));

    assert_eq!(harness.state(), ApplicationState::Ready);
    assert_eq!(scheduler.calls().len(), calls_before);
    harness.service.shutdown();
}

#[test]
fn observer_events_flow_through_filters() {
    let harness = Harness::new();
    let matching = TestObserver::shared();
    let other = TestObserver::shared();
    harness
        .service
        .register_application_state_observer(
            &CallerIdentity::system(),
            Arc::clone(&matching) as Arc<dyn ApplicationStateObserver>,
            vec!["com.example.demo".into()],
        )
        .expect("register matching");
    harness
        .service
        .register_application_state_observer(
            &CallerIdentity::system(),
            Arc::clone(&other) as Arc<dyn ApplicationStateObserver>,
            vec!["com.example.other".into()],
        )
        .expect("register other");

    harness.load(1, "Main", app_info("com.example.demo"));
    harness.attach();
    harness.update(1, AbilityState::Foreground);

    assert_eq!(matching.created.lock().unwrap().len(), 1);
    assert!(matching.app_states().contains(&ApplicationState::Foreground));
    assert!(!matching.ability_events.lock().unwrap().is_empty());

    assert!(other.created.lock().unwrap().is_empty());
    assert!(other.app_events.lock().unwrap().is_empty());
    harness.service.shutdown();
}

#[test]
fn register_observer_requires_permission() {
    let governor = GrantTableGovernor::new().grant(
        5000,
        permissions::OBSERVE_APPLICATION_STATE,
    );
    let launcher = Arc::new(StubLauncher::new());
    let service = AppMgrService::new(
        Arc::new(governor),
        launcher as Arc<dyn procyon_appmgr::ProcessLauncher>,
        short_timeouts(),
    );

    let observer = TestObserver::shared();
    let denied = service.register_application_state_observer(
        &CallerIdentity::app(1, 1234),
        Arc::clone(&observer) as Arc<dyn ApplicationStateObserver>,
        vec![],
    );
    assert!(matches!(denied, Err(AppMgrError::PermissionDenied(_))));

    let allowed = service.register_application_state_observer(
        &CallerIdentity::app(1, 5000),
        Arc::clone(&observer) as Arc<dyn ApplicationStateObserver>,
        vec![],
    );
    assert!(allowed.is_ok());
    service.shutdown();
}

#[test]
fn reusing_a_process_for_a_second_ability_notifies_reuse() {
    let harness = Harness::new();
    let observer = TestObserver::shared();
    harness
        .service
        .register_application_state_observer(
            &CallerIdentity::system(),
            Arc::clone(&observer) as Arc<dyn ApplicationStateObserver>,
            vec![],
        )
        .expect("register observer");

    harness.load(1, "Main", app_info("com.example.demo"));
    harness.attach();
    harness.load(2, "Second", app_info("com.example.demo"));

    assert_eq!(observer.created.lock().unwrap().len(), 1);
    assert_eq!(observer.reused.lock().unwrap().len(), 1);
    assert_eq!(
        harness
            .service
            .get_all_running_processes(&CallerIdentity::system())
            .len(),
        1,
        "second ability must not spawn a second process"
    );
    harness.service.shutdown();
}

#[test]
fn client_death_restarts_resident_process_within_budget() {
    let harness = Harness::new();
    let observer = TestObserver::shared();
    harness
        .service
        .register_application_state_observer(
            &CallerIdentity::system(),
            Arc::clone(&observer) as Arc<dyn ApplicationStateObserver>,
            vec![],
        )
        .expect("register observer");

    let mut info = app_info("com.example.resident");
    info.keep_alive = true;
    harness.load(1, "Main", info);
    let (_record_id, scheduler) = harness.attach();

    scheduler.trigger_death();
    assert!(harness.service.flush(FLUSH));

    assert_eq!(observer.died.lock().unwrap().len(), 1);
    assert_eq!(
        observer.created.lock().unwrap().len(),
        2,
        "initial spawn plus one restart"
    );
    let processes = harness
        .service
        .get_all_running_processes(&CallerIdentity::system());
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].state, ApplicationState::Create);
    harness.service.shutdown();
}

#[test]
fn non_resident_process_is_not_restarted_after_death() {
    let harness = Harness::new();
    harness.load(1, "Main", app_info("com.example.demo"));
    let (_record_id, scheduler) = harness.attach();

    scheduler.trigger_death();
    assert!(harness.service.flush(FLUSH));

    assert!(harness
        .service
        .get_all_running_processes(&CallerIdentity::system())
        .is_empty());
    harness.service.shutdown();
}

struct CollectingResponse {
    accepted: Mutex<Vec<(RecordId, String)>>,
    timed_out: Mutex<Vec<RecordId>>,
}

impl SpecifiedAbilityResponse for CollectingResponse {
    fn on_accept_intent(&self, record_id: RecordId, _intent: &LaunchIntent, flag: &str) {
        self.accepted.lock().unwrap().push((record_id, flag.into()));
    }

    fn on_timeout(&self, record_id: RecordId) {
        self.timed_out.lock().unwrap().push(record_id);
    }
}

#[test]
fn specified_ability_intent_waits_for_attach_and_acknowledges() {
    // Generous accept-intent window: this test exercises the acknowledgment
    // path, not the timeout.
    let mut timeouts = short_timeouts();
    timeouts.start_specified_ability = Duration::from_secs(5);
    let harness = Harness::with_timeouts(timeouts);
    let response = Arc::new(CollectingResponse {
        accepted: Mutex::new(Vec::new()),
        timed_out: Mutex::new(Vec::new()),
    });
    harness
        .service
        .register_specified_ability_response(
            Arc::clone(&response) as Arc<dyn SpecifiedAbilityResponse>
        );

    let intent = LaunchIntent {
        bundle_name: "com.example.demo".into(),
        ability_name: "Specified".into(),
        module_name: Some("m1".into()),
        params: serde_json::json!({"mode": "single"}),
    };
    harness
        .service
        .start_specified_ability(intent.clone(), ability_info("Specified"), app_info("com.example.demo"))
        .expect("start specified");
    assert!(harness.service.flush(FLUSH));

    let (record_id, scheduler) = harness.attach();
    assert_eq!(
        scheduler.count(&SchedulerCall::AcceptIntent("m1".into())),
        1,
        "parked intent must be delivered right after attach"
    );

    harness
        .service
        .schedule_accept_intent_done(record_id, intent, "single-instance".into())
        .expect("accept done");
    assert!(harness.service.flush(FLUSH));

    let accepted = response.accepted.lock().unwrap();
    assert_eq!(accepted.as_slice(), [(record_id, "single-instance".to_string())]);
    assert!(response.timed_out.lock().unwrap().is_empty());
    harness.service.shutdown();
}
