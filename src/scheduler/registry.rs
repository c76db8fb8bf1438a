use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::error::Result;
use crate::scheduler::load::GlobalLoad;
use crate::scheduler::record::{WorkerRecord, WorkerSnapshot};
use crate::scheduler::selection::{self, SelectedWorker};
use crate::scheduler::sink::MessageSink;

/// Authoritative map of live workers, keyed by worker id.
///
/// Writers (`register`, `unregister`, `update_status`) take the lock
/// exclusively; readers (`select`, `global_load` and the snapshot helpers)
/// share it. Every critical section is a map operation or a scalar write,
/// never I/O, so a blocking lock is used and the guard never crosses an
/// `.await`.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<BTreeMap<String, WorkerRecord>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-written entry,
    // so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, WorkerRecord>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, WorkerRecord>> {
        self.workers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert the worker with zero active tasks, replacing any existing
    /// entry under the same id.
    pub fn register(
        &self,
        worker_id: impl Into<String>,
        hostname: impl Into<String>,
        max_concurrency: u32,
        sink: Arc<dyn MessageSink>,
    ) {
        let worker_id = worker_id.into();
        let record = WorkerRecord::new(worker_id.clone(), hostname.into(), max_concurrency, sink);

        let mut workers = self.write();
        let replaced = workers.insert(worker_id.clone(), record).is_some();
        let total = workers.len();
        drop(workers);

        if replaced {
            tracing::warn!(
                worker_id = %worker_id,
                total,
                "Worker re-registered, previous entry replaced"
            );
        } else {
            tracing::info!(worker_id = %worker_id, max_concurrency, total, "Worker registered");
        }
    }

    /// Remove the worker if present. Returns whether an entry was removed.
    pub fn unregister(&self, worker_id: &str) -> bool {
        let mut workers = self.write();
        let removed = workers.remove(worker_id).is_some();
        let total = workers.len();
        drop(workers);

        if removed {
            tracing::info!(worker_id, total, "Worker unregistered");
        } else {
            tracing::debug!(worker_id, "Unregister for absent worker");
        }
        removed
    }

    /// Overwrite the worker's reported active task count.
    ///
    /// Updates for unknown ids are dropped so a late update can never
    /// resurrect a removed worker. Returns whether the update was applied.
    pub fn update_status(&self, worker_id: &str, active_task_count: u32) -> bool {
        let applied = match self.write().get_mut(worker_id) {
            Some(record) => {
                record.active_task_count = active_task_count;
                record.last_status_at = Utc::now();
                true
            }
            None => false,
        };

        if !applied {
            tracing::warn!(worker_id, active_task_count, "Status for unknown worker");
        }
        applied
    }

    /// Choose the least-loaded worker with spare capacity.
    ///
    /// Returns [`SchedulerError::NoAvailableWorker`] when the registry is
    /// empty or every worker is saturated.
    ///
    /// [`SchedulerError::NoAvailableWorker`]: crate::error::SchedulerError::NoAvailableWorker
    pub fn select(&self) -> Result<SelectedWorker> {
        selection::select_from(self.read().values())
    }

    pub fn global_load(&self) -> GlobalLoad {
        GlobalLoad::from_records(self.read().values())
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerSnapshot> {
        self.read().get(worker_id).map(WorkerRecord::snapshot)
    }

    /// All workers, ordered by id.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.read().values().map(WorkerRecord::snapshot).collect()
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.read().contains_key(worker_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Ties a worker's registry entry to the lifetime of its connection.
///
/// Dropping the registration unregisters the worker, whichever way the
/// owning handler exits.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<WorkerRegistry>,
    worker_id: String,
}

impl Registration {
    /// Register the worker and return the guard that will remove it.
    pub fn register(
        registry: Arc<WorkerRegistry>,
        worker_id: impl Into<String>,
        hostname: impl Into<String>,
        max_concurrency: u32,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let worker_id = worker_id.into();
        registry.register(worker_id.clone(), hostname, max_concurrency, sink);
        Self {
            registry,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.worker_id);
    }
}
