//! Message bus to the ML service
//!
//! Workers publish scoring requests through [`MlDispatchClient`]; responses
//! come back on one shared durable queue consumed by the response
//! correlator (`crate::worker::correlator`). Nothing waits on a reply
//! in-process: the job store is the only place a request and its response
//! meet.

pub mod client;
pub mod dispatch;
pub mod memory;
pub mod messages;

pub use client::{NatsClient, QueueNames};
pub use dispatch::{validate_features, MlDispatchClient};
pub use memory::MemoryBus;

use bytes::Bytes;

use crate::types::Result;

/// A message ready for the bus
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Queue name (NATS subject)
    pub subject: String,
    pub correlation_id: String,
    pub reply_to: String,
    pub content_type: String,
    pub payload: Bytes,
}

/// Persistent publisher shared by all workers
#[async_trait::async_trait]
pub trait BusPublisher: Send + Sync {
    /// Resolves once the broker has stored the message
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Flush and stop accepting publishes; idempotent
    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;
}
