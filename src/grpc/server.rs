use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::config::MasterConfig;
use crate::error::{Result, SchedulerError};
use crate::grpc::master_service::MasterService;
use crate::proto::scheduler_service_server::SchedulerServiceServer;
use crate::scheduler::WorkerRegistry;

pub struct GrpcServer {
    config: MasterConfig,
    registry: Arc<WorkerRegistry>,
}

impl GrpcServer {
    pub fn new(config: MasterConfig, registry: Arc<WorkerRegistry>) -> Self {
        Self { config, registry }
    }

    fn service(&self) -> SchedulerServiceServer<MasterService> {
        let service = MasterService::new(self.registry.clone())
            .with_idle_timeout(self.config.idle_timeout())
            .with_outbound_buffer(self.config.outbound_buffer);
        SchedulerServiceServer::new(service)
    }

    /// Bind the configured address and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SchedulerError::Internal(format!("failed to bind {}: {}", addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr().ok(), "Starting gRPC server");

        Server::builder()
            .add_service(self.service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await;
                tracing::info!("gRPC server shutting down");
            })
            .await?;
        Ok(())
    }
}
