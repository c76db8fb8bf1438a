use crate::proto::master_message::Payload as MasterPayload;
use crate::proto::worker_message::Payload as WorkerPayload;
use crate::proto::{MasterMessage, RegisterResponse, WorkerMessage};

/// Worker -> master message, classified.
///
/// Anything without a recognised payload, including oneof arms added by
/// newer workers, lands in `Unrecognized` and is ignored by the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Register {
        worker_id: String,
        hostname: String,
        max_concurrency: i32,
    },
    Status {
        worker_id: String,
        active_task_count: i32,
    },
    Unrecognized {
        worker_id: String,
    },
}

impl InboundMessage {
    pub fn worker_id(&self) -> &str {
        match self {
            InboundMessage::Register { worker_id, .. }
            | InboundMessage::Status { worker_id, .. }
            | InboundMessage::Unrecognized { worker_id } => worker_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Register { .. } => "register_request",
            InboundMessage::Status { .. } => "status_update",
            InboundMessage::Unrecognized { .. } => "unrecognized",
        }
    }
}

impl From<WorkerMessage> for InboundMessage {
    fn from(msg: WorkerMessage) -> Self {
        let worker_id = msg.worker_id;
        match msg.payload {
            Some(WorkerPayload::RegisterRequest(req)) => InboundMessage::Register {
                worker_id,
                hostname: req.hostname,
                max_concurrency: req.max_concurrency,
            },
            Some(WorkerPayload::StatusUpdate(update)) => InboundMessage::Status {
                worker_id,
                active_task_count: update.active_task_count,
            },
            None => InboundMessage::Unrecognized { worker_id },
        }
    }
}

/// A registration that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRegistration {
    pub worker_id: String,
    pub hostname: String,
    pub max_concurrency: u32,
}

/// Check the fields of a registration request.
pub fn validate_registration(
    worker_id: String,
    hostname: String,
    max_concurrency: i32,
) -> Result<ValidRegistration, String> {
    if worker_id.trim().is_empty() {
        return Err("worker_id must not be empty".to_string());
    }
    let max_concurrency = u32::try_from(max_concurrency)
        .map_err(|_| format!("max_concurrency must be >= 0, got {}", max_concurrency))?;
    Ok(ValidRegistration {
        worker_id,
        hostname,
        max_concurrency,
    })
}

pub fn register_response(success: bool, message: impl Into<String>) -> MasterMessage {
    MasterMessage {
        payload: Some(MasterPayload::RegisterResponse(RegisterResponse {
            success,
            message: message.into(),
        })),
    }
}
