//! Serialized task queue: the sole mutator of lifecycle state.
//!
//! One dedicated worker thread runs move-only task closures in post order.
//! A task that must wait for a remote acknowledgment does not block the
//! thread; it arms a keyed timeout on the same queue and returns. The
//! acknowledgment, arriving later as its own task, cancels the pending
//! timeout by key. Cancellation is generation-checked: re-arming a key
//! invalidates any stale heap entry left by the previous arm.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::AppMgrError;
use crate::identity::{AbilityToken, RecordId};

/// A unit of work executed on the queue's worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Key identifying one pending timeout; an acknowledgment cancels by key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKey {
    TerminateAbility(AbilityToken),
    TerminateApplication(RecordId),
    AddAbilityStage(RecordId),
    StartSpecifiedAbility(RecordId),
}

/// Arm/disarm interface handed to the records. Implementations decide what a
/// fired key means; the records only know when to arm and when to cancel.
pub trait TimeoutScheduler: Send + Sync {
    fn schedule(&self, key: TimerKey, delay: Duration);

    fn cancel(&self, key: &TimerKey);
}

enum Command {
    Run(Task),
    RunDelayed {
        key: TimerKey,
        delay: Duration,
        task: Task,
    },
    Cancel(TimerKey),
    Flush(Sender<()>),
    Shutdown,
}

struct HeapEntry {
    deadline: Instant,
    generation: u64,
    key: TimerKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

/// The single event-handler queue.
pub struct SerialTaskQueue {
    tx: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTaskQueue {
    /// Spawns the worker thread. `name` shows up in thread listings.
    pub fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::channel::<Command>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
                let mut armed: HashMap<TimerKey, (u64, Task)> = HashMap::new();
                let mut generation: u64 = 0;
                loop {
                    let received = match heap.peek() {
                        Some(entry) => {
                            let wait = entry.deadline.saturating_duration_since(Instant::now());
                            match rx.recv_timeout(wait) {
                                Ok(cmd) => Some(cmd),
                                Err(RecvTimeoutError::Timeout) => None,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(cmd) => Some(cmd),
                            Err(_) => break,
                        },
                    };
                    match received {
                        Some(Command::Run(task)) => task(),
                        Some(Command::RunDelayed { key, delay, task }) => {
                            generation += 1;
                            // Re-arming replaces the previous arm; its heap
                            // entry dies on the generation check.
                            armed.insert(key.clone(), (generation, task));
                            heap.push(HeapEntry {
                                deadline: Instant::now() + delay,
                                generation,
                                key,
                            });
                        }
                        Some(Command::Cancel(key)) => {
                            armed.remove(&key);
                        }
                        Some(Command::Flush(done)) => {
                            let _ = done.send(());
                        }
                        Some(Command::Shutdown) => break,
                        None => {}
                    }
                    let now = Instant::now();
                    while let Some(entry) = heap.peek() {
                        if entry.deadline > now {
                            break;
                        }
                        let entry = heap.pop().expect("peeked entry");
                        let fire = match armed.get(&entry.key) {
                            Some((gen, _)) if *gen == entry.generation => true,
                            _ => false,
                        };
                        if fire {
                            let (_, task) = armed.remove(&entry.key).expect("armed entry");
                            task();
                        }
                    }
                }
            })
            .expect("spawn queue worker");
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    fn send(&self, cmd: Command) -> Result<(), AppMgrError> {
        let guard = self.tx.lock().map_err(|e| AppMgrError::Queue(e.to_string()))?;
        match guard.as_ref() {
            Some(tx) => tx
                .send(cmd)
                .map_err(|_| AppMgrError::Queue("worker stopped".into())),
            None => Err(AppMgrError::Queue("queue shut down".into())),
        }
    }

    /// Enqueues a task; runs after everything posted before it.
    pub fn post(&self, task: Task) -> Result<(), AppMgrError> {
        self.send(Command::Run(task))
    }

    /// Arms a keyed timeout. Re-arming the same key replaces the pending one.
    pub fn post_delayed(
        &self,
        key: TimerKey,
        delay: Duration,
        task: Task,
    ) -> Result<(), AppMgrError> {
        self.send(Command::RunDelayed { key, delay, task })
    }

    /// Disarms a pending timeout; no-op if the key is not armed.
    pub fn cancel_delayed(&self, key: TimerKey) -> Result<(), AppMgrError> {
        self.send(Command::Cancel(key))
    }

    /// Blocks until every task posted before this call has run, or until
    /// `timeout` elapses. Returns whether the queue drained in time.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = mpsc::channel();
        if self.send(Command::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }

    /// Stops the worker after it drains commands already queued.
    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SerialTaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
