use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::grpc::connection::ConnectionHandler;
use crate::proto::scheduler_service_server::SchedulerService;
use crate::proto::{
    GetClusterLoadRequest, GetClusterLoadResponse, MasterMessage, WorkerInfo, WorkerMessage,
};
use crate::scheduler::{GlobalLoad, WorkerRegistry, WorkerSnapshot};

type MasterStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<MasterMessage, Status>> + Send>>;

/// gRPC service workers connect to
pub struct MasterService {
    registry: Arc<WorkerRegistry>,
    idle_timeout: Option<Duration>,
    outbound_buffer: usize,
}

impl MasterService {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            idle_timeout: None,
            outbound_buffer: 32,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_outbound_buffer(mut self, outbound_buffer: usize) -> Self {
        self.outbound_buffer = outbound_buffer.max(1);
        self
    }
}

fn worker_info(snapshot: WorkerSnapshot) -> WorkerInfo {
    WorkerInfo {
        worker_id: snapshot.id,
        hostname: snapshot.hostname,
        max_concurrency: snapshot.max_concurrency,
        active_task_count: snapshot.active_task_count,
        registered_at_ms: snapshot.registered_at.timestamp_millis(),
        last_status_at_ms: snapshot.last_status_at.timestamp_millis(),
    }
}

#[tonic::async_trait]
impl SchedulerService for MasterService {
    type ConnectStream = MasterStream;

    async fn connect(
        &self,
        request: Request<Streaming<WorkerMessage>>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        let peer = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::info!(peer = %peer, "Worker connected");

        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        let handler = ConnectionHandler::new(self.registry.clone(), peer.clone())
            .with_idle_timeout(self.idle_timeout);

        // One task per connection; it owns the only strong outbound sender,
        // so the response stream ends when the task does.
        tokio::spawn(async move {
            match handler.run(Box::pin(inbound), tx).await {
                Ok(()) => tracing::debug!(peer = %peer, "Connection closed"),
                Err(e) => tracing::warn!(peer = %peer, error = %e, "Connection terminated"),
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as Self::ConnectStream))
    }

    async fn get_cluster_load(
        &self,
        _request: Request<GetClusterLoadRequest>,
    ) -> Result<Response<GetClusterLoadResponse>, Status> {
        // Totals come from the same snapshot as the worker list.
        let snapshot = self.registry.snapshot();
        let load = GlobalLoad::from_snapshots(&snapshot);

        Ok(Response::new(GetClusterLoadResponse {
            active_tasks: load.active_tasks,
            total_capacity: load.total_capacity,
            workers: snapshot.into_iter().map(worker_info).collect(),
        }))
    }
}
