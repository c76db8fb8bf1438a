use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scheduler::sink::MessageSink;

/// The master's view of one connected, registered worker.
#[derive(Clone)]
pub struct WorkerRecord {
    pub id: String,
    pub hostname: String,
    pub max_concurrency: u32,
    /// Last reported in-flight task count. May exceed `max_concurrency`
    /// between an assignment and the next status update.
    pub active_task_count: u32,
    pub sink: Arc<dyn MessageSink>,
    pub registered_at: DateTime<Utc>,
    pub last_status_at: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(
        id: String,
        hostname: String,
        max_concurrency: u32,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            hostname,
            max_concurrency,
            active_task_count: 0,
            sink,
            registered_at: now,
            last_status_at: now,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.active_task_count < self.max_concurrency
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            hostname: self.hostname.clone(),
            max_concurrency: self.max_concurrency,
            active_task_count: self.active_task_count,
            registered_at: self.registered_at,
            last_status_at: self.last_status_at,
        }
    }
}

impl fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRecord")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("max_concurrency", &self.max_concurrency)
            .field("active_task_count", &self.active_task_count)
            .field("registered_at", &self.registered_at)
            .field("last_status_at", &self.last_status_at)
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a [`WorkerRecord`] without the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub id: String,
    pub hostname: String,
    pub max_concurrency: u32,
    pub active_task_count: u32,
    pub registered_at: DateTime<Utc>,
    pub last_status_at: DateTime<Utc>,
}

impl WorkerSnapshot {
    pub fn has_capacity(&self) -> bool {
        self.active_task_count < self.max_concurrency
    }

    /// Free task slots; zero when the worker reports more than its capacity.
    pub fn spare_capacity(&self) -> u32 {
        self.max_concurrency.saturating_sub(self.active_task_count)
    }
}
