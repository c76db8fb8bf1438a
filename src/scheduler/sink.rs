use tokio::sync::mpsc;
use tonic::Status;

use crate::error::{Result, SchedulerError};
use crate::proto::MasterMessage;

/// Outbound half of a worker connection as seen by the rest of the master.
///
/// A sink can push messages to its worker but cannot close the connection;
/// only the connection handler owns the transport.
#[tonic::async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver one message to the worker.
    async fn deliver(&self, message: MasterMessage) -> Result<()>;

    /// Whether the underlying connection has gone away.
    fn is_closed(&self) -> bool;
}

pub type OutboundSender = mpsc::Sender<std::result::Result<MasterMessage, Status>>;

/// [`MessageSink`] over a weak handle to a connection's outbound channel.
///
/// Holding the sink does not keep the response stream open: once the
/// connection handler drops its sender, delivery fails with
/// [`SchedulerError::SinkClosed`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    worker_id: String,
    tx: mpsc::WeakSender<std::result::Result<MasterMessage, Status>>,
}

impl ChannelSink {
    pub fn new(worker_id: impl Into<String>, tx: &OutboundSender) -> Self {
        Self {
            worker_id: worker_id.into(),
            tx: tx.downgrade(),
        }
    }
}

#[tonic::async_trait]
impl MessageSink for ChannelSink {
    async fn deliver(&self, message: MasterMessage) -> Result<()> {
        let tx = self
            .tx
            .upgrade()
            .ok_or_else(|| SchedulerError::SinkClosed(self.worker_id.clone()))?;
        tx.send(Ok(message))
            .await
            .map_err(|_| SchedulerError::SinkClosed(self.worker_id.clone()))
    }

    fn is_closed(&self) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}
