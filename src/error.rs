use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("No available worker")]
    NoAvailableWorker,

    #[error("Outbound channel closed for worker {0}")]
    SinkClosed(String),

    #[error("No message received for {0:?}")]
    IdleTimeout(Duration),

    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("gRPC error: {0}")]
    Transport(#[from] tonic::Status),

    #[error("Connection error: {0}")]
    Connection(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
