//! Bus consumer/producer traits and the inbound message type.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("pulsar: {0}")]
    Pulsar(#[from] pulsar::Error),

    #[error("bus connection: {0}")]
    Connection(String),

    #[error("ack: {0}")]
    Ack(String),
}

/// A raw message received from the bus.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Opaque JSON payload.
    pub payload: Bytes,
    /// Broker publish time.
    pub publish_time: DateTime<Utc>,
    /// Provider-specific handle for the later acknowledgement.
    pub ack: AckHandle,
}

/// Provider-specific acknowledgement handle.
#[derive(Debug, Clone)]
pub struct AckHandle(pub(crate) AckInner);

#[derive(Debug, Clone)]
pub(crate) enum AckInner {
    Pulsar {
        topic: String,
        id: pulsar::proto::MessageIdData,
    },
    /// In-memory sources (tests) track acks by sequence number.
    Seq(u64),
}

impl AckHandle {
    /// Handle for in-memory sources.
    pub fn seq(n: u64) -> Self {
        Self(AckInner::Seq(n))
    }

    /// The sequence number of an in-memory handle, if that's what this is.
    pub fn as_seq(&self) -> Option<u64> {
        match self.0 {
            AckInner::Seq(n) => Some(n),
            AckInner::Pulsar { .. } => None,
        }
    }
}

/// Subscribing half of the bus: messages arrive one at a time and are
/// acknowledged individually, at-least-once.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Receive the next message. `None` means the source closed.
    async fn recv(&self) -> Option<InboundMessage>;

    /// Acknowledge a processed message.
    async fn ack(&self, msg: &InboundMessage) -> Result<(), BusError>;
}

/// Outcome handler for a fire-and-forget send.
pub type SendCallback = Box<dyn FnOnce(Result<(), String>) + Send + 'static>;

/// Publishing half of the bus. Sends are asynchronous; `done` runs when the
/// broker confirms or rejects the message.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, key: String, payload: Vec<u8>, done: SendCallback);
}
