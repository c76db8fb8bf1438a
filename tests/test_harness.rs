//! Shared helpers for registry, connection and end-to-end tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use swift_scheduler::config::MasterConfig;
use swift_scheduler::error::Result;
use swift_scheduler::grpc::GrpcServer;
use swift_scheduler::proto::master_message::Payload as MasterPayload;
use swift_scheduler::proto::worker_message::Payload as WorkerPayload;
use swift_scheduler::proto::{MasterMessage, RegisterRequest, StatusUpdate, WorkerMessage};
use swift_scheduler::scheduler::{MessageSink, WorkerRegistry};

/// Sink that records every delivered message.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<MasterMessage>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered(&self) -> Vec<MasterMessage> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .filter_map(|m| match m.payload {
                Some(MasterPayload::TaskAssignment(a)) => Some(a.task_id),
                _ => None,
            })
            .collect()
    }
}

#[tonic::async_trait]
impl MessageSink for RecordingSink {
    async fn deliver(&self, message: MasterMessage) -> Result<()> {
        self.delivered.lock().unwrap().push(message);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

pub fn register_msg(worker_id: &str, max_concurrency: i32) -> WorkerMessage {
    WorkerMessage {
        worker_id: worker_id.to_string(),
        payload: Some(WorkerPayload::RegisterRequest(RegisterRequest {
            hostname: format!("{}-host", worker_id),
            max_concurrency,
        })),
    }
}

pub fn status_msg(worker_id: &str, active_task_count: i32) -> WorkerMessage {
    WorkerMessage {
        worker_id: worker_id.to_string(),
        payload: Some(WorkerPayload::StatusUpdate(StatusUpdate { active_task_count })),
    }
}

pub fn empty_msg(worker_id: &str) -> WorkerMessage {
    WorkerMessage {
        worker_id: worker_id.to_string(),
        payload: None,
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` expires.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Master gRPC server bound to an ephemeral local port
pub struct TestMaster {
    pub registry: Arc<WorkerRegistry>,
    pub url: String,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl TestMaster {
    pub async fn start(config: MasterConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(WorkerRegistry::new());
        let shutdown = CancellationToken::new();

        let server = GrpcServer::new(config, registry.clone());
        let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

        Self {
            registry,
            url: format!("http://{}", addr),
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}
