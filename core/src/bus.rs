//! The message-bus transport seam
//!
//! The gateway's only inter-process channel is a publish/subscribe bus
//! with request/reply and ephemeral inbox subjects. The concrete broker
//! is a deployment concern, so the gateway programs against the [`Bus`]
//! trait; [`MemoryBus`] is the in-process implementation used by tests
//! and single-process deployments. A transport adapter for a networked
//! broker implements the same trait out of tree.

use crate::error::BusError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// A message delivered to a subscription
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Subject the message was published on
    pub subject: String,
    /// Inbox subject to reply to, when the publisher expects replies
    pub reply_to: Option<String>,
    /// Raw payload
    pub payload: Bytes,
}

/// A stream of messages for one subject, in arrival order
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    /// Wait for the next message; `None` once the bus side is gone
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Wait for the next message with a deadline
    ///
    /// `Ok(None)` means the subscription closed; `Err(Timeout)` means the
    /// deadline passed with nothing delivered.
    pub async fn next_timeout(&mut self, dur: Duration) -> Result<Option<BusMessage>, BusError> {
        match tokio::time::timeout(dur, self.rx.recv()).await {
            Ok(msg) => Ok(msg),
            Err(_) => Err(BusError::Timeout(dur.as_millis() as u64)),
        }
    }
}

/// Transport seam between the gateway, plugins and the message bus
///
/// Implementations must support many concurrent in-flight requests;
/// callers serialize nothing.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a message on a subject
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Publish a message that asks subscribers to reply to `reply_to`
    async fn publish_request(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), BusError>;

    /// Request/reply: publish and await the first reply within `timeout`
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError>;

    /// Subscribe to a subject
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    /// Drain the connection on shutdown
    ///
    /// Flushes anything in flight and closes every subscription; after
    /// this, subscriptions yield `None` and publishes reach nobody. The
    /// default is a no-op for transports with nothing buffered.
    async fn drain(&self) -> Result<(), BusError> {
        Ok(())
    }

    /// Allocate a fresh ephemeral inbox subject
    fn new_inbox(&self) -> String;
}

/// In-process bus: exact-subject fan-out over unbounded channels
///
/// No wildcards, no persistence, no cross-process reach. Closed
/// subscribers are pruned on the next publish to their subject.
#[derive(Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>>,
    inbox_seq: AtomicU64,
}

impl MemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    fn fan_out(&self, subject: &str, reply_to: Option<&str>, payload: Bytes) {
        let mut topics = self.topics.lock();
        if let Some(senders) = topics.get_mut(subject) {
            senders.retain(|tx| {
                tx.send(BusMessage {
                    subject: subject.to_string(),
                    reply_to: reply_to.map(str::to_string),
                    payload: payload.clone(),
                })
                .is_ok()
            });
            if senders.is_empty() {
                topics.remove(subject);
            }
        }
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.fan_out(subject, None, payload);
        Ok(())
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), BusError> {
        self.fan_out(subject, Some(reply_to), payload);
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        let inbox = self.new_inbox();
        let mut sub = self.subscribe(&inbox).await?;
        self.publish_request(subject, &inbox, payload).await?;
        let outcome = tokio::time::timeout(timeout, sub.next()).await;
        self.topics.lock().remove(&inbox);
        match outcome {
            Ok(Some(msg)) => Ok(msg.payload),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription { rx })
    }

    async fn drain(&self) -> Result<(), BusError> {
        // Dropping the senders ends every subscription stream.
        self.topics.lock().clear();
        Ok(())
    }

    fn new_inbox(&self) -> String {
        let n = self.inbox_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("_inbox.{n}")
    }
}
