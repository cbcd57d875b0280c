//! State-change fan-out hub.
//!
//! [AppStateObserverManager] keeps the subscriber table: observer handle plus
//! its bundle-name filters (empty filter = everything). Table mutations run
//! on the serialized queue so dispatch never races a register/unregister; the
//! death-watch callback also only posts an unregister task, never mutates
//! inline. Dispatch itself is invoked from the queue worker by the service.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use procyon_lifecycle::{
    AbilityStateData, AppMgrError, AppStateData, Configuration, DeathWatchable, ProcessData,
    RenderProcessData, SerialTaskQueue,
};

/// External subscriber notified of application/process state transitions.
/// Every method has a default no-op body so observers implement only what
/// they care about.
pub trait ApplicationStateObserver: DeathWatchable + Send + Sync {
    fn on_app_state_changed(&self, _data: &AppStateData) {}

    fn on_ability_state_changed(&self, _data: &AbilityStateData) {}

    fn on_extension_state_changed(&self, _data: &AbilityStateData) {}

    fn on_process_created(&self, _data: &ProcessData) {}

    fn on_process_state_changed(&self, _data: &ProcessData) {}

    fn on_process_died(&self, _data: &ProcessData) {}

    fn on_process_reused(&self, _data: &ProcessData) {}

    fn on_render_process_created(&self, _data: &RenderProcessData) {}

    fn on_render_process_died(&self, _data: &RenderProcessData) {}
}

/// Subscriber to system configuration changes.
pub trait ConfigurationObserver: Send + Sync {
    fn on_configuration_updated(&self, config: &Configuration);
}

struct Subscription {
    observer: Arc<dyn ApplicationStateObserver>,
    filters: Vec<String>,
}

impl Subscription {
    fn key(&self) -> usize {
        observer_key(&self.observer)
    }

    fn matches(&self, bundle_name: &str) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f == bundle_name)
    }
}

fn observer_key(observer: &Arc<dyn ApplicationStateObserver>) -> usize {
    Arc::as_ptr(observer) as *const () as usize
}

/// Fan-out hub owned by the service.
pub struct AppStateObserverManager {
    queue: Arc<SerialTaskQueue>,
    subscribers: Arc<Mutex<Vec<Subscription>>>,
    config_observers: Mutex<Vec<Arc<dyn ConfigurationObserver>>>,
}

impl AppStateObserverManager {
    pub fn new(queue: Arc<SerialTaskQueue>) -> Self {
        Self {
            queue,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            config_observers: Mutex::new(Vec::new()),
        }
    }

    /// Records the observer with its filter list and arms the death-watch.
    /// The caller has already passed the permission check; the table insert
    /// itself runs on the queue.
    pub fn register(
        &self,
        observer: Arc<dyn ApplicationStateObserver>,
        filters: Vec<String>,
    ) -> Result<(), AppMgrError> {
        let key = observer_key(&observer);
        if self
            .subscribers
            .lock()
            .expect("subscriber lock")
            .iter()
            .any(|s| s.key() == key)
        {
            return Err(AppMgrError::InvalidParam("observer already registered".into()));
        }

        let death_queue = Arc::clone(&self.queue);
        let death_subscribers = Arc::clone(&self.subscribers);
        observer.watch_death(Box::new(move || {
            // Arbitrary transport thread: only post, never mutate here.
            let subscribers = Arc::clone(&death_subscribers);
            let posted = death_queue.post(Box::new(move || {
                subscribers
                    .lock()
                    .expect("subscriber lock")
                    .retain(|s| s.key() != key);
            }));
            if posted.is_err() {
                warn!("observer death after queue shutdown; entry dropped with the table");
            }
        }));

        let subscribers = Arc::clone(&self.subscribers);
        self.queue.post(Box::new(move || {
            let mut guard = subscribers.lock().expect("subscriber lock");
            if guard.iter().any(|s| s.key() == key) {
                debug!("register raced a duplicate; keeping the first entry");
                return;
            }
            guard.push(Subscription { observer, filters });
        }))
    }

    /// Removes the entry and disarms the death-watch; no-op if absent.
    pub fn unregister(
        &self,
        observer: &Arc<dyn ApplicationStateObserver>,
    ) -> Result<(), AppMgrError> {
        observer.unwatch_death();
        let key = observer_key(observer);
        let subscribers = Arc::clone(&self.subscribers);
        self.queue.post(Box::new(move || {
            subscribers
                .lock()
                .expect("subscriber lock")
                .retain(|s| s.key() != key);
        }))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock").len()
    }

    fn matching(&self, bundle_name: &str) -> Vec<Arc<dyn ApplicationStateObserver>> {
        self.subscribers
            .lock()
            .expect("subscriber lock")
            .iter()
            .filter(|s| s.matches(bundle_name))
            .map(|s| Arc::clone(&s.observer))
            .collect()
    }

    // ---- dispatch (queue worker only) -------------------------------------

    pub fn on_app_state_changed(&self, data: &AppStateData) {
        for observer in self.matching(&data.bundle_name) {
            observer.on_app_state_changed(data);
        }
    }

    /// Routes ability and extension updates to the matching observer method.
    pub fn state_changed_notify_observer(&self, data: &AbilityStateData) {
        for observer in self.matching(&data.bundle_name) {
            if data.is_extension {
                observer.on_extension_state_changed(data);
            } else {
                observer.on_ability_state_changed(data);
            }
        }
    }

    pub fn on_process_created(&self, data: &ProcessData) {
        for observer in self.matching(&data.bundle_name) {
            observer.on_process_created(data);
        }
    }

    pub fn on_process_state_changed(&self, data: &ProcessData) {
        for observer in self.matching(&data.bundle_name) {
            observer.on_process_state_changed(data);
        }
    }

    pub fn on_process_died(&self, data: &ProcessData) {
        for observer in self.matching(&data.bundle_name) {
            observer.on_process_died(data);
        }
    }

    pub fn on_process_reused(&self, data: &ProcessData) {
        for observer in self.matching(&data.bundle_name) {
            observer.on_process_reused(data);
        }
    }

    pub fn on_render_process_created(&self, data: &RenderProcessData) {
        for observer in self.matching(&data.bundle_name) {
            observer.on_render_process_created(data);
        }
    }

    pub fn on_render_process_died(&self, data: &RenderProcessData) {
        for observer in self.matching(&data.bundle_name) {
            observer.on_render_process_died(data);
        }
    }

    // ---- configuration observers ------------------------------------------

    pub fn register_configuration_observer(&self, observer: Arc<dyn ConfigurationObserver>) {
        let mut guard = self.config_observers.lock().expect("config observer lock");
        let key = Arc::as_ptr(&observer) as *const () as usize;
        if guard
            .iter()
            .any(|o| Arc::as_ptr(o) as *const () as usize == key)
        {
            return;
        }
        guard.push(observer);
    }

    pub fn unregister_configuration_observer(&self, observer: &Arc<dyn ConfigurationObserver>) {
        let key = Arc::as_ptr(observer) as *const () as usize;
        self.config_observers
            .lock()
            .expect("config observer lock")
            .retain(|o| Arc::as_ptr(o) as *const () as usize != key);
    }

    pub fn on_configuration_updated(&self, config: &Configuration) {
        let snapshot: Vec<_> = self
            .config_observers
            .lock()
            .expect("config observer lock")
            .clone();
        for observer in snapshot {
            observer.on_configuration_updated(config);
        }
    }
}
