//! Background Tasks Module
//!
//! Scheduling capability and the maintenance passes that run on it.
//!
//! # Tasks
//! - Scheduled pass: purge expired entries, re-compress large ones under pressure
//! - Emergency pass: evict oldest entries when another writer fills the store

mod maintenance;
mod scheduler;

pub use maintenance::{
    MaintenanceScheduler, MaintenanceSettings, MaintenanceState, MaintenanceSummary, PassKind,
};
pub use scheduler::{HostSignal, ManualScheduler, Scheduler, Task, TaskId, TokioScheduler};
