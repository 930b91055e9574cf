//! Host Scheduler
//!
//! The timer and host-event capability maintenance depends on. Hosts supply
//! an implementation: [`TokioScheduler`] for real processes,
//! [`ManualScheduler`] for deterministic tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A callback run by a scheduler.
pub type Task = Arc<dyn Fn() + Send + Sync>;

// == Host Signal ==
/// Events raised by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostSignal {
    /// The host became visible/active again after being hidden
    VisibilityRestored,
    /// Another writer modified the shared backend
    StorageChanged,
}

/// Identifies a registration so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

// == Scheduler Trait ==
pub trait Scheduler: Send + Sync {
    /// Runs `task` every `interval`, first run one interval from now.
    fn schedule_recurring(&self, interval: Duration, task: Task) -> TaskId;

    /// Runs `task` every time `signal` is raised.
    fn on_host_signal(&self, signal: HostSignal, task: Task) -> TaskId;

    /// Stops a registration. Unknown ids are ignored.
    fn cancel(&self, id: TaskId);
}

// == Signal Registry ==
/// Listener bookkeeping shared by both schedulers.
#[derive(Default)]
struct SignalRegistry {
    listeners: Mutex<Vec<(TaskId, HostSignal, Task)>>,
}

impl SignalRegistry {
    fn add(&self, id: TaskId, signal: HostSignal, task: Task) {
        self.listeners.lock().push((id, signal, task));
    }

    fn remove(&self, id: TaskId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener, _, _)| *listener != id);
        listeners.len() != before
    }

    /// Runs every listener for `signal` outside the registry lock.
    fn emit(&self, signal: HostSignal) -> usize {
        let tasks: Vec<Task> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, s, _)| *s == signal)
            .map(|(_, _, task)| Arc::clone(task))
            .collect();

        for task in &tasks {
            task();
        }
        tasks.len()
    }
}

// == Tokio Scheduler ==
/// Scheduler backed by Tokio tasks.
///
/// Recurring tasks sleep for their interval between runs, then run on the
/// blocking pool so store locks and file I/O never stall a runtime worker.
/// Host signals are raised by the embedding process through
/// [`TokioScheduler::emit`] and run on the calling thread.
pub struct TokioScheduler {
    runtime: Handle,
    next_id: AtomicU64,
    recurring: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    signals: SignalRegistry,
}

impl TokioScheduler {
    /// Creates a scheduler on the current Tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            recurring: Mutex::new(HashMap::new()),
            signals: SignalRegistry::default(),
        }
    }

    /// Raises `signal`, running its listeners on the calling thread.
    pub fn emit(&self, signal: HostSignal) -> usize {
        debug!("Host signal {:?}", signal);
        self.signals.emit(signal)
    }

    fn allocate_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_recurring(&self, interval: Duration, task: Task) -> TaskId {
        let id = self.allocate_id();
        let handle = self.runtime.spawn(async move {
            info!("Starting recurring task with interval of {:?}", interval);
            loop {
                tokio::time::sleep(interval).await;
                let run = Arc::clone(&task);
                if let Err(e) = tokio::task::spawn_blocking(move || run()).await {
                    warn!("Recurring task failed: {}", e);
                }
            }
        });
        self.recurring.lock().insert(id, handle);
        id
    }

    fn on_host_signal(&self, signal: HostSignal, task: Task) -> TaskId {
        let id = self.allocate_id();
        self.signals.add(id, signal, task);
        id
    }

    fn cancel(&self, id: TaskId) {
        if let Some(handle) = self.recurring.lock().remove(&id) {
            handle.abort();
            return;
        }
        self.signals.remove(id);
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.recurring.lock().drain() {
            handle.abort();
        }
    }
}

// == Manual Scheduler ==
struct RecurringTask {
    id: TaskId,
    interval: Duration,
    next_due: Duration,
    task: Task,
}

/// Deterministic scheduler driven by the caller.
///
/// Time only moves through [`ManualScheduler::advance`]; signals only fire
/// through [`ManualScheduler::emit`].
#[derive(Default)]
pub struct ManualScheduler {
    now: Mutex<Duration>,
    next_id: AtomicU64,
    recurring: Mutex<Vec<RecurringTask>>,
    signals: SignalRegistry,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the virtual clock forward, running every recurring task that
    /// falls due in order. Returns the number of task runs.
    pub fn advance(&self, by: Duration) -> usize {
        let target = *self.now.lock() + by;
        let mut runs = 0;

        loop {
            let due = {
                let mut recurring = self.recurring.lock();
                let next = recurring
                    .iter_mut()
                    .filter(|r| r.next_due <= target)
                    .min_by_key(|r| (r.next_due, r.id));
                match next {
                    Some(r) => {
                        *self.now.lock() = r.next_due;
                        r.next_due += r.interval;
                        Some(Arc::clone(&r.task))
                    }
                    None => None,
                }
            };

            match due {
                Some(task) => {
                    task();
                    runs += 1;
                }
                None => break,
            }
        }

        *self.now.lock() = target;
        runs
    }

    /// Raises `signal`. Returns the number of listeners run.
    pub fn emit(&self, signal: HostSignal) -> usize {
        self.signals.emit(signal)
    }

    /// Number of active recurring registrations.
    pub fn recurring_count(&self) -> usize {
        self.recurring.lock().len()
    }

    /// Virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.now.lock()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_recurring(&self, interval: Duration, task: Task) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // A zero interval would never let the clock advance.
        let interval = interval.max(Duration::from_millis(1));
        let next_due = *self.now.lock() + interval;
        self.recurring.lock().push(RecurringTask {
            id,
            interval,
            next_due,
            task,
        });
        id
    }

    fn on_host_signal(&self, signal: HostSignal, task: Task) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.signals.add(id, signal, task);
        id
    }

    fn cancel(&self, id: TaskId) {
        self.recurring.lock().retain(|r| r.id != id);
        self.signals.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Task) {
        let count = Arc::new(AtomicUsize::new(0));
        let task_count = Arc::clone(&count);
        let task: Task = Arc::new(move || {
            task_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, task)
    }

    #[test]
    fn test_manual_recurring_fires_on_interval() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();
        scheduler.schedule_recurring(Duration::from_secs(10), task);

        assert_eq!(scheduler.advance(Duration::from_secs(9)), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(1)), 1);
        assert_eq!(scheduler.advance(Duration::from_secs(25)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.elapsed(), Duration::from_secs(35));
    }

    #[test]
    fn test_manual_signals_and_cancel() {
        let scheduler = ManualScheduler::new();
        let (visible, visible_task) = counter();
        let (changed, changed_task) = counter();
        let visible_id = scheduler.on_host_signal(HostSignal::VisibilityRestored, visible_task);
        scheduler.on_host_signal(HostSignal::StorageChanged, changed_task);

        assert_eq!(scheduler.emit(HostSignal::VisibilityRestored), 1);
        assert_eq!(visible.load(Ordering::SeqCst), 1);
        assert_eq!(changed.load(Ordering::SeqCst), 0);

        scheduler.cancel(visible_id);
        assert_eq!(scheduler.emit(HostSignal::VisibilityRestored), 0);
        assert_eq!(visible.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_cancel_recurring() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();
        let id = scheduler.schedule_recurring(Duration::from_secs(1), task);
        scheduler.cancel(id);

        assert_eq!(scheduler.recurring_count(), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(5)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tokio_recurring_task_runs_and_cancels() {
        let scheduler = TokioScheduler::new();
        let (count, task) = counter();
        let id = scheduler.schedule_recurring(Duration::from_millis(50), task);

        tokio::time::sleep(Duration::from_millis(180)).await;
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected at least two runs, got {}", fired);

        scheduler.cancel(id);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_cancel = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn test_tokio_recurring_task_does_not_block_runtime() {
        let scheduler = TokioScheduler::new();
        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let task_started = Arc::clone(&started);
        let task: Task = Arc::new(move || {
            task_started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
        });
        let id = scheduler.schedule_recurring(Duration::from_millis(10), task);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.load(Ordering::SeqCst));

        // A blocked current-thread runtime would stall this sleep behind the task.
        let before = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(before.elapsed() < Duration::from_millis(200));

        scheduler.cancel(id);
    }

    #[tokio::test]
    async fn test_tokio_emit_runs_listeners() {
        let scheduler = TokioScheduler::new();
        let (count, task) = counter();
        scheduler.on_host_signal(HostSignal::StorageChanged, task);

        assert_eq!(scheduler.emit(HostSignal::StorageChanged), 1);
        assert_eq!(scheduler.emit(HostSignal::VisibilityRestored), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
