//! Background upkeep for the shared resilience state.
//!
//! `FailureTracker` and `QuotaCounter` only prune what a request touches.
//! Everything else is swept by interval tasks started through
//! `ResilienceServices::spawn_maintenance`, or one at a time with
//! `FailureTracker::spawn_compaction` and `QuotaCounter::spawn_gc`.

use tokio::task::JoinHandle;

/// Handle to one running interval task.
pub struct MaintenanceHandle {
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// The compaction and quota gc tasks, started together.
pub struct Maintenance {
    pub compaction: MaintenanceHandle,
    pub gc: MaintenanceHandle,
}

impl Maintenance {
    pub fn shutdown(&self) {
        self.compaction.shutdown();
        self.gc.shutdown();
    }

    pub fn is_finished(&self) -> bool {
        self.compaction.is_finished() && self.gc.is_finished()
    }
}
