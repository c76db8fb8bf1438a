//! Least-loaded-with-capacity worker selection.
//!
//! Workers at or over their declared capacity are skipped. Among the rest
//! the one with the fewest active tasks wins; ties go to the lowest worker
//! id so the choice does not depend on iteration order.

use std::sync::Arc;

use crate::error::{Result, SchedulerError};
use crate::proto::master_message::Payload;
use crate::proto::{MasterMessage, TaskAssignment};
use crate::scheduler::record::WorkerRecord;
use crate::scheduler::sink::MessageSink;

/// Pick the target worker among `workers`, or `None` if none has spare capacity.
pub fn least_loaded<'a, I>(workers: I) -> Option<&'a WorkerRecord>
where
    I: IntoIterator<Item = &'a WorkerRecord>,
{
    workers
        .into_iter()
        .filter(|w| w.has_capacity())
        .min_by(|a, b| {
            a.active_task_count
                .cmp(&b.active_task_count)
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Outcome of a successful selection.
///
/// Selection reserves nothing. A caller that dispatches work must account
/// for it (status update or local increment) before selecting again.
#[derive(Clone)]
pub struct SelectedWorker {
    pub worker_id: String,
    pub active_task_count: u32,
    pub max_concurrency: u32,
    pub sink: Arc<dyn MessageSink>,
}

impl SelectedWorker {
    pub(crate) fn from_record(record: &WorkerRecord) -> Self {
        Self {
            worker_id: record.id.clone(),
            active_task_count: record.active_task_count,
            max_concurrency: record.max_concurrency,
            sink: record.sink.clone(),
        }
    }

    /// Push a task assignment to the selected worker.
    pub async fn assign(&self, task_id: impl Into<String>) -> Result<()> {
        let task_id = task_id.into();
        tracing::info!(worker_id = %self.worker_id, task_id = %task_id, "Assigning task");
        self.sink
            .deliver(MasterMessage {
                payload: Some(Payload::TaskAssignment(TaskAssignment { task_id })),
            })
            .await
    }
}

impl std::fmt::Debug for SelectedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedWorker")
            .field("worker_id", &self.worker_id)
            .field("active_task_count", &self.active_task_count)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

pub(crate) fn select_from<'a, I>(workers: I) -> Result<SelectedWorker>
where
    I: IntoIterator<Item = &'a WorkerRecord>,
{
    least_loaded(workers)
        .map(SelectedWorker::from_record)
        .ok_or(SchedulerError::NoAvailableWorker)
}
