//! Maintenance Scheduler
//!
//! Background hygiene for a store: scheduled passes purge expired entries and
//! re-compress large ones under pressure; emergency passes evict aggressively
//! when another writer pushed the store near its ceiling.
//!
//! Passes never overlap. A trigger that arrives while a pass is running is
//! skipped, not queued.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::storage::{OptimizeOutcome, StorageBackend, StorageHandle};
use crate::tasks::scheduler::{HostSignal, Scheduler, Task, TaskId};

// == State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceState {
    Idle,
    ScheduledPass,
    EmergencyPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Scheduled,
    Emergency,
}

// == Summary ==
/// Advisory report of one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    pub kind: PassKind,
    /// Expired entries purged
    pub expired_removed: usize,
    /// Entries evicted for capacity
    pub evicted: usize,
    /// Entries rewritten with a smaller payload
    pub recompressed: usize,
    /// Bytes freed by purging, eviction and re-compression
    pub bytes_freed: u64,
    pub usage_before: f64,
    pub usage_after: f64,
}

impl MaintenanceSummary {
    /// Items removed by the pass, expired or evicted.
    pub fn items_removed(&self) -> usize {
        self.expired_removed + self.evicted
    }

    fn log(&self) {
        if self.items_removed() > 0 || self.recompressed > 0 {
            info!(
                "{:?} maintenance: removed {} entries ({} expired, {} evicted), recompressed {}, freed {} bytes, usage {:.1}% -> {:.1}%",
                self.kind,
                self.items_removed(),
                self.expired_removed,
                self.evicted,
                self.recompressed,
                self.bytes_freed,
                self.usage_before * 100.0,
                self.usage_after * 100.0
            );
        } else {
            debug!("{:?} maintenance: nothing to do", self.kind);
        }
    }
}

// == Settings ==
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceSettings {
    /// Interval between scheduled passes
    pub interval: Duration,
    /// Usage ratio that makes a storage-changed signal run an emergency pass
    pub emergency_threshold: f64,
    /// Usage ratio above which a scheduled pass re-compresses large entries
    pub optimization_threshold: f64,
    /// Fraction of the ceiling an emergency pass tries to free
    pub emergency_free_fraction: f64,
}

impl MaintenanceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.maintenance_interval(),
            emergency_threshold: config.emergency_threshold,
            optimization_threshold: config.optimization_threshold,
            emergency_free_fraction: config.emergency_free_fraction,
        }
    }
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// == Worker ==
/// Pass logic shared with scheduler callbacks.
struct Worker<B: StorageBackend> {
    store: StorageHandle<B>,
    settings: MaintenanceSettings,
    state: Mutex<MaintenanceState>,
}

/// Returns the worker to Idle when a pass ends, even by panic.
struct PassGuard<'a> {
    state: &'a Mutex<MaintenanceState>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = MaintenanceState::Idle;
    }
}

impl<B: StorageBackend> Worker<B> {
    fn begin(&self, next: MaintenanceState) -> Option<PassGuard<'_>> {
        let mut state = self.state.lock();
        if *state != MaintenanceState::Idle {
            debug!("Maintenance already running ({:?}), skipping {:?}", *state, next);
            return None;
        }
        *state = next;
        Some(PassGuard { state: &self.state })
    }

    fn scheduled_pass(&self) -> Option<MaintenanceSummary> {
        let _guard = self.begin(MaintenanceState::ScheduledPass)?;
        let mut store = self.store.lock();

        let usage_before = store.usage_ratio();
        let purged = store.purge_expired();

        let optimized = if store.usage_ratio() > self.settings.optimization_threshold {
            store.optimize_storage()
        } else {
            OptimizeOutcome::default()
        };

        let summary = MaintenanceSummary {
            kind: PassKind::Scheduled,
            expired_removed: purged.removed.len(),
            evicted: 0,
            recompressed: optimized.recompressed,
            bytes_freed: purged.bytes_freed + optimized.bytes_saved,
            usage_before,
            usage_after: store.usage_ratio(),
        };
        summary.log();
        Some(summary)
    }

    fn emergency_pass(&self) -> Option<MaintenanceSummary> {
        let _guard = self.begin(MaintenanceState::EmergencyPass)?;
        let mut store = self.store.lock();

        let usage_before = store.usage_ratio();
        if usage_before <= self.settings.emergency_threshold {
            debug!(
                "Storage changed, usage {:.1}% under emergency threshold",
                usage_before * 100.0
            );
            return None;
        }

        let purged = store.purge_expired();
        let mut evicted = 0;
        let mut bytes_freed = purged.bytes_freed;

        if store.usage_ratio() > self.settings.emergency_threshold {
            let target = (store.ceiling() as f64 * self.settings.emergency_free_fraction) as u64;
            let reclaimed = store.reclaim(target);
            evicted = reclaimed.evicted.len();
            bytes_freed += reclaimed.bytes_freed;
        }

        let summary = MaintenanceSummary {
            kind: PassKind::Emergency,
            expired_removed: purged.removed.len(),
            evicted,
            recompressed: 0,
            bytes_freed,
            usage_before,
            usage_after: store.usage_ratio(),
        };
        summary.log();
        Some(summary)
    }
}

// == Maintenance Scheduler ==
/// Owns the maintenance registrations for one store.
///
/// Created with [`MaintenanceScheduler::init`], torn down with
/// [`MaintenanceScheduler::destroy`] or on drop.
pub struct MaintenanceScheduler<B: StorageBackend + 'static> {
    worker: Arc<Worker<B>>,
    scheduler: Arc<dyn Scheduler>,
    registrations: Mutex<Vec<TaskId>>,
}

impl<B: StorageBackend + 'static> MaintenanceScheduler<B> {
    /// Registers the periodic timer and the two host-signal listeners.
    pub fn init(
        store: StorageHandle<B>,
        scheduler: Arc<dyn Scheduler>,
        settings: MaintenanceSettings,
    ) -> Self {
        let interval = settings.interval;
        let worker = Arc::new(Worker {
            store,
            settings,
            state: Mutex::new(MaintenanceState::Idle),
        });

        let scheduled: Task = {
            let worker = Arc::clone(&worker);
            Arc::new(move || {
                worker.scheduled_pass();
            })
        };
        let emergency: Task = {
            let worker = Arc::clone(&worker);
            Arc::new(move || {
                worker.emergency_pass();
            })
        };

        let registrations = vec![
            scheduler.schedule_recurring(interval, Arc::clone(&scheduled)),
            scheduler.on_host_signal(HostSignal::VisibilityRestored, scheduled),
            scheduler.on_host_signal(HostSignal::StorageChanged, emergency),
        ];
        info!("Maintenance scheduled every {:?}", interval);

        Self {
            worker,
            scheduler,
            registrations: Mutex::new(registrations),
        }
    }

    /// Cancels every registration. Safe to call more than once.
    pub fn destroy(&self) {
        let registrations: Vec<TaskId> = self.registrations.lock().drain(..).collect();
        if registrations.is_empty() {
            return;
        }
        for id in registrations {
            self.scheduler.cancel(id);
        }
        info!("Maintenance stopped");
    }

    /// True between `init` and `destroy`.
    pub fn is_active(&self) -> bool {
        !self.registrations.lock().is_empty()
    }

    pub fn state(&self) -> MaintenanceState {
        *self.worker.state.lock()
    }

    /// Runs a scheduled pass now. None if another pass is in progress.
    pub fn run_scheduled_pass(&self) -> Option<MaintenanceSummary> {
        self.worker.scheduled_pass()
    }

    /// Runs an emergency pass now if usage is over the threshold. None if
    /// usage is under it or another pass is in progress.
    pub fn trigger_emergency(&self) -> Option<MaintenanceSummary> {
        self.worker.emergency_pass()
    }
}

impl<B: StorageBackend + 'static> Drop for MaintenanceScheduler<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SetOptions;
    use crate::storage::{MemoryBackend, SmartStorage};
    use crate::tasks::scheduler::{ManualScheduler, TokioScheduler};
    use std::thread::sleep;

    fn handle(max_size: u64) -> StorageHandle<MemoryBackend> {
        let config = Config {
            max_size,
            ..Config::default()
        };
        SmartStorage::new(MemoryBackend::new(), &config).into_handle()
    }

    fn settings() -> MaintenanceSettings {
        MaintenanceSettings {
            interval: Duration::from_secs(3600),
            ..MaintenanceSettings::default()
        }
    }

    fn short_ttl() -> SetOptions {
        SetOptions::default().with_ttl(Duration::from_millis(20))
    }

    #[test]
    fn test_timer_runs_scheduled_pass() {
        let store = handle(1_000_000);
        let scheduler = Arc::new(ManualScheduler::new());
        let _maintenance = MaintenanceScheduler::init(store.clone(), scheduler.clone(), settings());

        store.lock().set_item("stale", &1, &short_ttl());
        store.lock().set_item("fresh", &2, &SetOptions::default());
        sleep(Duration::from_millis(40));

        assert_eq!(scheduler.advance(Duration::from_secs(3599)), 0);
        assert_eq!(store.lock().len(), 2);

        assert_eq!(scheduler.advance(Duration::from_secs(1)), 1);
        assert_eq!(store.lock().len(), 1);
        assert!(store.lock().has_item("fresh"));
    }

    #[test]
    fn test_visibility_signal_runs_scheduled_pass() {
        let store = handle(1_000_000);
        let scheduler = Arc::new(ManualScheduler::new());
        let _maintenance = MaintenanceScheduler::init(store.clone(), scheduler.clone(), settings());

        store.lock().set_item("stale", &1, &short_ttl());
        sleep(Duration::from_millis(40));

        assert_eq!(scheduler.emit(HostSignal::VisibilityRestored), 1);
        assert!(store.lock().is_empty());
    }

    #[test]
    fn test_scheduled_pass_summary() {
        let store = handle(1_000_000);
        let maintenance =
            MaintenanceScheduler::init(store.clone(), Arc::new(ManualScheduler::new()), settings());

        store.lock().set_item("a", &1, &short_ttl());
        store.lock().set_item("b", &2, &short_ttl());
        sleep(Duration::from_millis(40));

        let summary = maintenance.run_scheduled_pass().unwrap();
        assert_eq!(summary.kind, PassKind::Scheduled);
        assert_eq!(summary.expired_removed, 2);
        assert_eq!(summary.items_removed(), 2);
        assert!(summary.bytes_freed > 0);
        assert_eq!(summary.usage_after, 0.0);
        assert_eq!(maintenance.state(), MaintenanceState::Idle);
    }

    #[test]
    fn test_emergency_skipped_under_threshold() {
        let store = handle(1_000_000);
        let scheduler = Arc::new(ManualScheduler::new());
        let maintenance = MaintenanceScheduler::init(store.clone(), scheduler.clone(), settings());

        store.lock().set_item("a", &1, &SetOptions::default());
        assert!(maintenance.trigger_emergency().is_none());
        assert_eq!(scheduler.emit(HostSignal::StorageChanged), 1);
        assert!(store.lock().has_item("a"));
    }

    #[test]
    fn test_storage_changed_signal_evicts_when_over_threshold() {
        // Ten equal entries, then a ceiling that puts usage at ~95%.
        let probe = handle(1_000_000);
        probe.lock().set_item("k0", &"value", &SetOptions::default());
        let entry_size = probe.lock().current_size();

        let store = handle(entry_size * 10 + entry_size / 2);
        for i in 0..10 {
            store
                .lock()
                .set_item(&format!("k{}", i), &"value", &SetOptions::default());
            sleep(Duration::from_millis(2));
        }
        assert!(store.lock().usage_ratio() > 0.8);

        let scheduler = Arc::new(ManualScheduler::new());
        let _maintenance = MaintenanceScheduler::init(store.clone(), scheduler.clone(), settings());

        // Another writer modified storage: emergency pass frees 30% of the ceiling.
        scheduler.emit(HostSignal::StorageChanged);

        let store = store.lock();
        assert_eq!(store.len(), 6);
        assert!(store.backend().get_item("k0").is_none());
        assert!(store.backend().get_item("k3").is_none());
        assert!(store.backend().get_item("k4").is_some());
        assert!(store.usage_ratio() <= 0.8);
    }

    #[test]
    fn test_emergency_prefers_expired_entries() {
        let probe = handle(1_000_000);
        probe.lock().set_item("k0", &"value", &SetOptions::default());
        let entry_size = probe.lock().current_size();

        // Expiring entries are slightly larger; 5x leaves room for all four.
        let store = handle(entry_size * 5);
        store.lock().set_item("k0", &"value", &SetOptions::default());
        sleep(Duration::from_millis(2));
        for key in ["k1", "k2", "k3"] {
            store.lock().set_item(key, &"value", &short_ttl());
        }
        sleep(Duration::from_millis(40));

        let maintenance =
            MaintenanceScheduler::init(store.clone(), Arc::new(ManualScheduler::new()), settings());
        let summary = maintenance.trigger_emergency().unwrap();

        assert_eq!(summary.kind, PassKind::Emergency);
        assert_eq!(summary.expired_removed, 3);
        assert_eq!(summary.evicted, 0);
        assert!(store.lock().has_item("k0"));
    }

    #[test]
    fn test_passes_are_not_reentrant() {
        let store = handle(1_000_000);
        let maintenance =
            MaintenanceScheduler::init(store.clone(), Arc::new(ManualScheduler::new()), settings());

        let guard = store.lock();
        std::thread::scope(|s| {
            let first = s.spawn(|| maintenance.run_scheduled_pass());

            while maintenance.state() == MaintenanceState::Idle {
                std::thread::yield_now();
            }
            assert_eq!(maintenance.state(), MaintenanceState::ScheduledPass);
            assert!(maintenance.run_scheduled_pass().is_none());
            assert!(maintenance.trigger_emergency().is_none());

            drop(guard);
            assert!(first.join().unwrap().is_some());
        });
        assert_eq!(maintenance.state(), MaintenanceState::Idle);
    }

    #[test]
    fn test_destroy_cancels_registrations() {
        let store = handle(1_000_000);
        let scheduler = Arc::new(ManualScheduler::new());
        let maintenance = MaintenanceScheduler::init(store.clone(), scheduler.clone(), settings());
        assert!(maintenance.is_active());
        assert_eq!(scheduler.recurring_count(), 1);

        maintenance.destroy();
        maintenance.destroy();

        assert!(!maintenance.is_active());
        assert_eq!(scheduler.recurring_count(), 0);
        assert_eq!(scheduler.emit(HostSignal::VisibilityRestored), 0);
        assert_eq!(scheduler.emit(HostSignal::StorageChanged), 0);
    }

    #[test]
    fn test_drop_cancels_registrations() {
        let store = handle(1_000_000);
        let scheduler = Arc::new(ManualScheduler::new());
        drop(MaintenanceScheduler::init(store, scheduler.clone(), settings()));

        assert_eq!(scheduler.recurring_count(), 0);
    }

    #[tokio::test]
    async fn test_tokio_timer_purges_expired_entries() {
        let store = handle(1_000_000);
        store.lock().set_item("expire_soon", &"value", &short_ttl());
        store.lock().set_item("long_lived", &"value", &SetOptions::default());

        let settings = MaintenanceSettings {
            interval: Duration::from_millis(50),
            ..MaintenanceSettings::default()
        };
        let maintenance =
            MaintenanceScheduler::init(store.clone(), Arc::new(TokioScheduler::new()), settings);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.lock().backend().get_item("expire_soon").is_none());
        assert!(store.lock().has_item("long_lived"));
        maintenance.destroy();
    }
}
