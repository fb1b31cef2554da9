#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Message bus abstractions: publishing, subscriptions, and ack/nack settlement.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON-lines publisher and subscription adapters.
pub mod jsonl;
/// In-memory bus with redelivery on nack.
pub mod memory;

pub use jsonl::{FileMessagePublisher, JsonLinesSubscription};
pub use memory::{MemoryMessageBus, MemorySubscription};

/// A message carried by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique identifier.
    #[serde(default = "new_message_id")]
    pub id: String,
    /// Message body. Encoded as (lossy) UTF-8 text in JSON form.
    #[serde(with = "text_bytes")]
    pub data: Vec<u8>,
    /// Free-form string attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Time the message was published.
    #[serde(default = "Utc::now")]
    pub publish_time: DateTime<Utc>,
    /// Number of times this message has been handed to a subscriber.
    #[serde(default)]
    pub delivery_attempt: u32,
}

impl BusMessage {
    /// Creates a message with a fresh id and no attributes.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: new_message_id(),
            data: data.into(),
            attributes: BTreeMap::new(),
            publish_time: Utc::now(),
            delivery_attempt: 0,
        }
    }

    /// Replaces the attribute map.
    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Adds a single attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

fn new_message_id() -> String {
    format!("msg-{}", Uuid::new_v4())
}

mod text_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}

/// How a delivery was settled by its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Settlement {
    /// Processed; must not be redelivered.
    Ack,
    /// Not processed; eligible for redelivery.
    Nack,
}

/// Receives the settlement of a single delivery.
pub trait Acknowledger: Send + Sync {
    /// Records the outcome. Called exactly once per delivery.
    fn settle(self: Box<Self>, settlement: Settlement);
}

/// A message handed to a subscriber, pending settlement.
///
/// Dropping a delivery without settling it counts as a nack.
pub struct Delivery {
    message: BusMessage,
    acker: Option<Box<dyn Acknowledger>>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("settled", &self.acker.is_none())
            .finish()
    }
}

impl Delivery {
    /// Wraps a message with the acknowledger that settles it.
    pub fn new(message: BusMessage, acker: impl Acknowledger + 'static) -> Self {
        Self {
            message,
            acker: Some(Box::new(acker)),
        }
    }

    /// The delivered message.
    #[must_use]
    pub const fn message(&self) -> &BusMessage {
        &self.message
    }

    /// Acknowledges the delivery.
    pub fn ack(mut self) {
        self.settle(Settlement::Ack);
    }

    /// Negatively acknowledges the delivery.
    pub fn nack(mut self) {
        self.settle(Settlement::Nack);
    }

    fn settle(&mut self, settlement: Settlement) {
        if let Some(acker) = self.acker.take() {
            acker.settle(settlement);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.settle(Settlement::Nack);
    }
}

/// Running totals of settled deliveries.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    acked: AtomicU64,
    nacked: AtomicU64,
}

impl DeliveryStats {
    /// Records one settlement.
    pub fn record(&self, settlement: Settlement) {
        let counter = match settlement {
            Settlement::Ack => &self.acked,
            Settlement::Nack => &self.nacked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of acknowledged deliveries.
    #[must_use]
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    /// Number of negatively acknowledged deliveries.
    #[must_use]
    pub fn nacked(&self) -> u64 {
        self.nacked.load(Ordering::Relaxed)
    }
}

/// Message publisher interface.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes a message to `topic`, returning the message id.
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String>;
}

/// Subscription interface.
#[async_trait]
pub trait MessageSubscription: Send + Sync {
    /// Waits for the next delivery. `None` once the subscription is closed and drained.
    async fn next(&self) -> Result<Option<Delivery>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recorder(Arc<DeliveryStats>);

    impl Acknowledger for Recorder {
        fn settle(self: Box<Self>, settlement: Settlement) {
            self.0.record(settlement);
        }
    }

    #[test]
    fn delivery_settles_once() {
        let stats = Arc::new(DeliveryStats::default());
        Delivery::new(BusMessage::new("a"), Recorder(Arc::clone(&stats))).ack();
        Delivery::new(BusMessage::new("b"), Recorder(Arc::clone(&stats))).nack();
        assert_eq!(stats.acked(), 1);
        assert_eq!(stats.nacked(), 1);
    }

    #[test]
    fn dropped_delivery_is_nacked() {
        let stats = Arc::new(DeliveryStats::default());
        drop(Delivery::new(BusMessage::new("a"), Recorder(Arc::clone(&stats))));
        assert_eq!(stats.acked(), 0);
        assert_eq!(stats.nacked(), 1);
    }

    #[test]
    fn message_json_uses_text_body() {
        let message = BusMessage::new("hello world").with_attribute("reply_to", "ops");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["data"], "hello world");
        assert_eq!(json["attributes"]["reply_to"], "ops");

        let parsed: BusMessage = serde_json::from_str(r#"{"data":"ping"}"#).unwrap();
        assert_eq!(parsed.data, b"ping");
        assert!(parsed.id.starts_with("msg-"));
        assert!(parsed.attributes.is_empty());
    }
}
