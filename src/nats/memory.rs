//! In-process bus
//!
//! Records published messages instead of sending them. Tests read the
//! recorded requests back and feed matching responses to the correlator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{BusPublisher, OutboundMessage};
use crate::types::{Result, RisklineError};

#[derive(Default)]
pub struct MemoryBus {
    published: Mutex<Vec<OutboundMessage>>,
    fail_publish: AtomicBool,
    closed: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail with `BusUnavailable`
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Everything published so far, oldest first
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Messages published to one queue
    pub fn published_to(&self, subject: &str) -> Vec<OutboundMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.subject == subject)
            .collect()
    }
}

#[async_trait::async_trait]
impl BusPublisher for MemoryBus {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RisklineError::BusUnavailable("connection closed".to_string()));
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(RisklineError::BusUnavailable(
                "simulated broker outage".to_string(),
            ));
        }

        self.published
            .lock()
            .map_err(|_| RisklineError::Internal("bus log poisoned".to_string()))?
            .push(message);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
