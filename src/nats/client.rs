//! NATS JetStream client wrapper
//!
//! Every logical ML queue is a durable work-queue stream with one subject
//! (the queue name). Publishing waits for the JetStream ack, so a returned
//! `Ok` means the broker has stored the message.

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream};
use async_nats::{Client, ConnectOptions, HeaderMap, HeaderValue};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::messages::{HEADER_CONTENT_TYPE, HEADER_CORRELATION_ID, HEADER_REPLY_TO};
use super::{BusPublisher, OutboundMessage};
use crate::config::BusArgs;
use crate::types::{Result, RisklineError};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Stream size cap per queue
const STREAM_MAX_BYTES: i64 = 256 * 1024 * 1024;

/// Broker-side duplicate window for `Nats-Msg-Id`
const DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Names of the four ML queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub request: String,
    pub response: String,
    pub health_request: String,
    pub health_response: String,
}

impl QueueNames {
    pub fn all(&self) -> [&str; 4] {
        [
            &self.request,
            &self.response,
            &self.health_request,
            &self.health_response,
        ]
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            request: "ml.prediction.hybrid_request".to_string(),
            response: "ml.prediction.hybrid_response".to_string(),
            health_request: "ml.health.request".to_string(),
            health_response: "ml.health.response".to_string(),
        }
    }
}

/// JetStream stream backing a queue: `ml.health.request` -> `ML_HEALTH_REQUEST`
pub fn stream_name(queue: &str) -> String {
    queue
        .chars()
        .map(|c| match c {
            '.' | '-' | ' ' | '*' | '>' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Durable consumer name for a queue
pub fn consumer_name(queue: &str) -> String {
    format!("riskline_{}", stream_name(queue).to_ascii_lowercase())
}

/// NATS connection plus JetStream context
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    jetstream: jetstream::Context,
    name: String,
    closed: Arc<AtomicBool>,
}

impl NatsClient {
    /// Connect; fails fast when the server is unreachable
    pub async fn connect(args: &BusArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.bus_url);

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.bus_user, &args.bus_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.bus_url)
            .await
            .map_err(|e| RisklineError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.bus_url);

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            name: name.to_string(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Declare a queue as a durable stream; idempotent
    pub async fn ensure_queue(&self, queue: &str) -> Result<Stream> {
        let name = stream_name(queue);
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: name.clone(),
                subjects: vec![queue.to_string()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                storage: jetstream::stream::StorageType::File,
                max_bytes: STREAM_MAX_BYTES,
                duplicate_window: DUPLICATE_WINDOW,
                ..Default::default()
            })
            .await
            .map_err(|e| RisklineError::Nats(format!("Failed to declare queue {}: {}", queue, e)))?;

        debug!(queue, stream = %name, "Queue declared");
        Ok(stream)
    }

    /// Declare all four ML queues
    pub async fn ensure_queues(&self, queues: &QueueNames) -> Result<()> {
        for queue in queues.all() {
            self.ensure_queue(queue).await?;
        }
        info!(
            request = %queues.request,
            response = %queues.response,
            "ML queues declared"
        );
        Ok(())
    }

    /// Durable pull consumer with explicit acks and one message in flight
    pub async fn response_consumer(&self, queue: &str) -> Result<PullConsumer> {
        let stream = self.ensure_queue(queue).await?;
        let durable = consumer_name(queue);

        let consumer = stream
            .get_or_create_consumer(
                &durable,
                jetstream::consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    filter_subject: queue.to_string(),
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RisklineError::Nats(format!("Failed to create consumer: {}", e)))?;

        info!(queue, consumer = %durable, "Response consumer ready");
        Ok(consumer)
    }

    /// Whether the server connection is up
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.client.connection_state() == async_nats::connection::State::Connected
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| RisklineError::Nats(format!("Invalid header: {}", e)))
}

#[async_trait::async_trait]
impl BusPublisher for NatsClient {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RisklineError::BusUnavailable("connection closed".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_CORRELATION_ID, header(&message.correlation_id)?);
        headers.insert(HEADER_REPLY_TO, header(&message.reply_to)?);
        headers.insert(HEADER_CONTENT_TYPE, header(&message.content_type)?);
        headers.insert(async_nats::header::NATS_MESSAGE_ID, header(&message.correlation_id)?);

        let ack = self
            .jetstream
            .publish_with_headers(message.subject.clone(), headers, message.payload)
            .await
            .map_err(|e| RisklineError::BusUnavailable(format!("Publish failed: {}", e)))?;

        let ack = ack.await.map_err(|e| {
            RisklineError::BusUnavailable(format!("Publish not acknowledged: {}", e))
        })?;

        if ack.duplicate {
            debug!(correlation_id = %message.correlation_id, "Broker dropped duplicate publish");
        }
        Ok(())
    }

    /// Flush pending publishes and refuse new ones. Terminal: the client is
    /// not reopened, and the connection itself is dropped with the last handle.
    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .flush()
            .await
            .map_err(|e| RisklineError::Nats(format!("Flush failed: {}", e)))?;
        info!(client = %self.name, "NATS connection closed");
        Ok(())
    }

    /// False only after `close`; a dropped connection reconnects on its own
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
