//! Per-connection protocol state machine.
//!
//! ```text
//! AwaitingHandshake --RegisterRequest--> Active --EOF / error--> Terminated
//!        |                                 ^  |
//!        +--anything else / EOF--> Terminated  +-- StatusUpdate, duplicate
//!                                                  register, unknown payload
//! ```
//!
//! The handler is the only writer of its worker's registry entry. The entry
//! lives inside a [`Registration`], so it is removed on every exit from
//! `Active`, including errors, cancellation of the task and panics.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::{Stream, StreamExt};
use tonic::Status;

use crate::error::{Result, SchedulerError};
use crate::grpc::message::{register_response, validate_registration, InboundMessage};
use crate::proto::WorkerMessage;
use crate::scheduler::sink::OutboundSender;
use crate::scheduler::{ChannelSink, Registration, WorkerRegistry};

enum ConnectionState {
    AwaitingHandshake,
    Active(Registration),
    Terminated,
}

/// Drives one worker connection from handshake to teardown.
pub struct ConnectionHandler {
    registry: Arc<WorkerRegistry>,
    peer: String,
    idle_timeout: Option<Duration>,
}

impl ConnectionHandler {
    pub fn new(registry: Arc<WorkerRegistry>, peer: impl Into<String>) -> Self {
        Self {
            registry,
            peer: peer.into(),
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Run the connection until it terminates.
    ///
    /// `Ok(())` means the worker closed the stream cleanly, before or after
    /// registering. A rejected handshake returns
    /// [`SchedulerError::ProtocolViolation`]; transport failures, idle
    /// timeouts and a dead outbound channel are returned as-is. In every
    /// case the worker is absent from the registry when this returns.
    pub async fn run<S>(self, mut inbound: S, outbound: OutboundSender) -> Result<()>
    where
        S: Stream<Item = std::result::Result<WorkerMessage, Status>> + Unpin,
    {
        let mut state = ConnectionState::AwaitingHandshake;
        loop {
            state = match state {
                ConnectionState::AwaitingHandshake => {
                    self.handshake(&mut inbound, &outbound).await?
                }
                ConnectionState::Active(registration) => {
                    self.serve_next(registration, &mut inbound).await?
                }
                ConnectionState::Terminated => return Ok(()),
            };
        }
    }

    async fn next_message<S>(&self, inbound: &mut S) -> Result<Option<WorkerMessage>>
    where
        S: Stream<Item = std::result::Result<WorkerMessage, Status>> + Unpin,
    {
        let next = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, inbound.next())
                .await
                .map_err(|_| SchedulerError::IdleTimeout(limit))?,
            None => inbound.next().await,
        };
        next.transpose().map_err(SchedulerError::from)
    }

    async fn handshake<S>(
        &self,
        inbound: &mut S,
        outbound: &OutboundSender,
    ) -> Result<ConnectionState>
    where
        S: Stream<Item = std::result::Result<WorkerMessage, Status>> + Unpin,
    {
        let msg = match self.next_message(inbound).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::info!(peer = %self.peer, "Worker disconnected before registering");
                return Ok(ConnectionState::Terminated);
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "Error receiving first message");
                return Err(e);
            }
        };

        let (worker_id, hostname, max_concurrency) = match InboundMessage::from(msg) {
            InboundMessage::Register {
                worker_id,
                hostname,
                max_concurrency,
            } => (worker_id, hostname, max_concurrency),
            other => {
                let reason = format!(
                    "expected RegisterRequest as first message, got {}",
                    other.kind()
                );
                tracing::warn!(
                    peer = %self.peer,
                    claimed_worker_id = %other.worker_id(),
                    "Rejecting connection: {}",
                    reason
                );
                // The worker may already be gone; the rejection stands either way.
                let _ = outbound
                    .send(Err(Status::failed_precondition(reason.clone())))
                    .await;
                return Err(SchedulerError::ProtocolViolation(reason));
            }
        };

        let registration = match validate_registration(worker_id, hostname, max_concurrency) {
            Ok(registration) => registration,
            Err(reason) => {
                tracing::warn!(peer = %self.peer, "Rejecting registration: {}", reason);
                let _ = outbound
                    .send(Ok(register_response(false, reason.clone())))
                    .await;
                return Err(SchedulerError::ProtocolViolation(reason));
            }
        };

        let sink = Arc::new(ChannelSink::new(registration.worker_id.clone(), outbound));
        let guard = Registration::register(
            self.registry.clone(),
            registration.worker_id.clone(),
            registration.hostname.clone(),
            registration.max_concurrency,
            sink,
        );

        if outbound
            .send(Ok(register_response(true, "Registered")))
            .await
            .is_err()
        {
            tracing::warn!(
                worker_id = %registration.worker_id,
                peer = %self.peer,
                "Failed to send RegisterResponse"
            );
            // Dropping the guard unregisters the worker.
            return Err(SchedulerError::SinkClosed(registration.worker_id));
        }

        tracing::info!(
            worker_id = %registration.worker_id,
            hostname = %registration.hostname,
            max_concurrency = registration.max_concurrency,
            peer = %self.peer,
            "Handshake complete"
        );
        Ok(ConnectionState::Active(guard))
    }

    async fn serve_next<S>(
        &self,
        registration: Registration,
        inbound: &mut S,
    ) -> Result<ConnectionState>
    where
        S: Stream<Item = std::result::Result<WorkerMessage, Status>> + Unpin,
    {
        match self.next_message(inbound).await {
            Ok(Some(msg)) => {
                self.apply(&registration, InboundMessage::from(msg));
                Ok(ConnectionState::Active(registration))
            }
            Ok(None) => {
                tracing::info!(worker_id = %registration.worker_id(), "Worker disconnected");
                drop(registration);
                Ok(ConnectionState::Terminated)
            }
            Err(e) => {
                tracing::warn!(
                    worker_id = %registration.worker_id(),
                    error = %e,
                    "Connection to worker lost"
                );
                Err(e)
            }
        }
    }

    fn apply(&self, registration: &Registration, message: InboundMessage) {
        let worker_id = registration.worker_id();
        match message {
            InboundMessage::Status {
                worker_id: claimed,
                active_task_count,
            } => {
                if !claimed.is_empty() && claimed != worker_id {
                    tracing::warn!(
                        worker_id,
                        claimed_worker_id = %claimed,
                        "Status update names another worker; applying to this connection's worker"
                    );
                }
                let Ok(active) = u32::try_from(active_task_count) else {
                    tracing::warn!(
                        worker_id,
                        active_task_count,
                        "Negative active task count dropped"
                    );
                    return;
                };

                let registry = registration.registry();
                registry.update_status(worker_id, active);
                let load = registry.global_load();
                tracing::debug!(
                    worker_id,
                    active,
                    global_active = load.active_tasks,
                    global_capacity = load.total_capacity,
                    "Status update"
                );
            }
            InboundMessage::Register { .. } => {
                tracing::warn!(worker_id, "Duplicate RegisterRequest ignored");
            }
            InboundMessage::Unrecognized { .. } => {
                tracing::warn!(worker_id, "Unrecognized payload ignored");
            }
        }
    }
}
