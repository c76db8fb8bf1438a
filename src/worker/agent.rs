use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;
use tonic::Streaming;

use crate::config::WorkerConfig;
use crate::error::{Result, SchedulerError};
use crate::proto::master_message::Payload as MasterPayload;
use crate::proto::scheduler_service_client::SchedulerServiceClient;
use crate::proto::worker_message::Payload as WorkerPayload;
use crate::proto::{MasterMessage, RegisterRequest, StatusUpdate, TaskAssignment, WorkerMessage};
use crate::worker::heartbeat::HeartbeatSender;

/// Shared count of tasks the worker is currently running.
///
/// Reported to the master on every status update.
#[derive(Debug, Clone, Default)]
pub struct ActiveTasks(Arc<AtomicU32>);

impl ActiveTasks {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, count: u32) {
        self.0.store(count, Ordering::Relaxed);
    }

    /// Called by the task runner when it starts an assigned task.
    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Called by the task runner when a task finishes. Saturates at zero.
    pub fn decrement(&self) -> u32 {
        let prev = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }
}

/// Worker side of the control channel.
///
/// Registers with the master, then reports [`ActiveTasks`] on a fixed
/// interval. Task assignments are forwarded to the optional assignment
/// channel; executing them is up to the receiver.
pub struct WorkerAgent {
    config: WorkerConfig,
    worker_id: String,
    active_tasks: ActiveTasks,
    assignments: Option<mpsc::Sender<TaskAssignment>>,
}

impl WorkerAgent {
    pub fn new(config: WorkerConfig) -> Self {
        let worker_id = config.resolved_worker_id();
        Self {
            config,
            worker_id,
            active_tasks: ActiveTasks::default(),
            assignments: None,
        }
    }

    pub fn with_assignments(mut self, tx: mpsc::Sender<TaskAssignment>) -> Self {
        self.assignments = Some(tx);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn active_tasks(&self) -> ActiveTasks {
        self.active_tasks.clone()
    }

    fn envelope(&self, payload: WorkerPayload) -> WorkerMessage {
        WorkerMessage {
            worker_id: self.worker_id.clone(),
            payload: Some(payload),
        }
    }

    /// Connect, register and report status until `shutdown` is cancelled or
    /// the master closes the stream.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            worker_id = %self.worker_id,
            master = %self.config.master_addr,
            "Connecting to master"
        );
        let channel = Endpoint::new(self.config.master_addr.clone())?.connect().await?;
        let mut client = SchedulerServiceClient::new(channel);

        let (out_tx, out_rx) = mpsc::channel(16);
        let max_concurrency = i32::try_from(self.config.max_concurrency).unwrap_or(i32::MAX);
        out_tx
            .send(self.envelope(WorkerPayload::RegisterRequest(RegisterRequest {
                hostname: self.config.hostname.clone(),
                max_concurrency,
            })))
            .await
            .map_err(|_| SchedulerError::Internal("outbound channel closed".to_string()))?;

        let mut inbound = client
            .connect(ReceiverStream::new(out_rx))
            .await?
            .into_inner();
        self.await_registration(&mut inbound).await?;

        let (tick_tx, mut tick_rx) = mpsc::channel(1);
        let heartbeat = HeartbeatSender::new(self.config.status_interval_ms);
        let heartbeat_handle = tokio::spawn(async move { heartbeat.run(tick_tx).await });

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(worker_id = %self.worker_id, "Shutting down worker");
                    break Ok(());
                }
                Some(()) = tick_rx.recv() => {
                    let active = self.active_tasks.get();
                    let update = self.envelope(WorkerPayload::StatusUpdate(StatusUpdate {
                        active_task_count: i32::try_from(active).unwrap_or(i32::MAX),
                    }));
                    tracing::debug!(worker_id = %self.worker_id, active, "Sending status update");
                    if out_tx.send(update).await.is_err() {
                        break Err(SchedulerError::SinkClosed(self.worker_id.clone()));
                    }
                }
                msg = inbound.message() => match msg {
                    Ok(Some(msg)) => self.handle_master_message(msg).await,
                    Ok(None) => {
                        tracing::info!(worker_id = %self.worker_id, "Master closed the connection");
                        break Ok(());
                    }
                    Err(status) => {
                        tracing::warn!(
                            worker_id = %self.worker_id,
                            error = %status,
                            "Error receiving from master"
                        );
                        break Err(status.into());
                    }
                },
            }
        };

        heartbeat_handle.abort();
        result
    }

    async fn await_registration(&self, inbound: &mut Streaming<MasterMessage>) -> Result<()> {
        match inbound.message().await? {
            Some(MasterMessage {
                payload: Some(MasterPayload::RegisterResponse(resp)),
            }) => {
                if resp.success {
                    tracing::info!(
                        worker_id = %self.worker_id,
                        message = %resp.message,
                        "Registered with master"
                    );
                    Ok(())
                } else {
                    Err(SchedulerError::RegistrationRejected(resp.message))
                }
            }
            Some(_) => Err(SchedulerError::ProtocolViolation(
                "expected RegisterResponse".to_string(),
            )),
            None => Err(SchedulerError::RegistrationRejected(
                "master closed the stream before acknowledging".to_string(),
            )),
        }
    }

    async fn handle_master_message(&self, msg: MasterMessage) {
        match msg.payload {
            Some(MasterPayload::TaskAssignment(assignment)) => {
                tracing::info!(
                    worker_id = %self.worker_id,
                    task_id = %assignment.task_id,
                    "Received task assignment"
                );
                if let Some(tx) = &self.assignments {
                    if tx.send(assignment).await.is_err() {
                        tracing::warn!(worker_id = %self.worker_id, "Assignment receiver dropped");
                    }
                }
            }
            Some(MasterPayload::RegisterResponse(_)) => {
                tracing::warn!(worker_id = %self.worker_id, "Unexpected RegisterResponse ignored");
            }
            None => {
                tracing::warn!(worker_id = %self.worker_id, "Unknown message from master ignored");
            }
        }
    }
}
