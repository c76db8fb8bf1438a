use serde::Serialize;

use crate::scheduler::record::{WorkerRecord, WorkerSnapshot};

/// Cluster-wide rollup of reported load and declared capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalLoad {
    pub active_tasks: u64,
    pub total_capacity: u64,
}

impl GlobalLoad {
    pub fn from_records<'a, I>(workers: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkerRecord>,
    {
        workers.into_iter().fold(Self::default(), |acc, w| Self {
            active_tasks: acc.active_tasks + u64::from(w.active_task_count),
            total_capacity: acc.total_capacity + u64::from(w.max_concurrency),
        })
    }

    /// Same rollup over snapshots, for callers that also need the worker list.
    pub fn from_snapshots<'a, I>(workers: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkerSnapshot>,
    {
        workers.into_iter().fold(Self::default(), |acc, w| Self {
            active_tasks: acc.active_tasks + u64::from(w.active_task_count),
            total_capacity: acc.total_capacity + u64::from(w.max_concurrency),
        })
    }

    /// Fraction of declared capacity in use; 0.0 when there is no capacity.
    pub fn utilization(&self) -> f64 {
        if self.total_capacity == 0 {
            0.0
        } else {
            self.active_tasks as f64 / self.total_capacity as f64
        }
    }

    pub fn as_tuple(&self) -> (u64, u64) {
        (self.active_tasks, self.total_capacity)
    }
}
