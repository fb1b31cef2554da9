use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    Acknowledger, BusMessage, Delivery, DeliveryStats, MessagePublisher, MessageSubscription,
    Settlement,
};

#[derive(Debug, Default)]
struct TopicState {
    pending: VecDeque<BusMessage>,
    backlog: VecDeque<BusMessage>,
    stats: Arc<DeliveryStats>,
}

#[derive(Debug)]
struct BusInner {
    topics: Mutex<HashMap<String, TopicState>>,
    notify: Notify,
    capacity: usize,
    closed: Mutex<bool>,
}

/// In-memory bus (for local development and tests).
///
/// Each topic is a work queue: subscribers on the same topic compete for
/// messages, and a nack puts the message back at the head of the queue.
#[derive(Debug, Clone)]
pub struct MemoryMessageBus {
    inner: Arc<BusInner>,
}

impl MemoryMessageBus {
    /// Creates a bus retaining up to `capacity` published messages per topic for snapshots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                capacity: capacity.max(1),
                closed: Mutex::new(false),
            }),
        }
    }

    /// Opens a subscription consuming `topic`.
    #[must_use]
    pub fn subscription(&self, topic: impl Into<String>) -> MemorySubscription {
        MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.into(),
        }
    }

    /// Recent messages published to `topic`, oldest first.
    #[must_use]
    pub fn snapshot(&self, topic: &str) -> Vec<BusMessage> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|state| state.backlog.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages on `topic` not yet handed to a subscriber.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map_or(0, |state| state.pending.len())
    }

    /// Settlement totals for `topic`.
    #[must_use]
    pub fn stats(&self, topic: &str) -> Arc<DeliveryStats> {
        let mut topics = self.inner.topics.lock();
        Arc::clone(&topics.entry(topic.to_string()).or_default().stats)
    }

    /// Closes the bus. Subscriptions drain what is pending and then end.
    pub fn close(&self) {
        *self.inner.closed.lock() = true;
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl MessagePublisher for MemoryMessageBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String> {
        let id = message.id.clone();
        {
            let mut topics = self.inner.topics.lock();
            let state = topics.entry(topic.to_string()).or_default();
            state.backlog.push_back(message.clone());
            if state.backlog.len() > self.inner.capacity {
                state.backlog.pop_front();
            }
            state.pending.push_back(message);
        }
        self.inner.notify.notify_waiters();
        Ok(id)
    }
}

/// Subscription bound to one topic of a [`MemoryMessageBus`].
#[derive(Debug, Clone)]
pub struct MemorySubscription {
    inner: Arc<BusInner>,
    topic: String,
}

impl MemorySubscription {
    fn try_take(&self) -> Option<Delivery> {
        let mut topics = self.inner.topics.lock();
        let state = topics.get_mut(&self.topic)?;
        let mut message = state.pending.pop_front()?;
        message.delivery_attempt += 1;
        Some(Delivery::new(
            message.clone(),
            MemoryAcker {
                inner: Arc::clone(&self.inner),
                topic: self.topic.clone(),
                stats: Arc::clone(&state.stats),
                message,
            },
        ))
    }
}

#[async_trait]
impl MessageSubscription for MemorySubscription {
    async fn next(&self) -> Result<Option<Delivery>> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(delivery) = self.try_take() {
                return Ok(Some(delivery));
            }
            if *self.inner.closed.lock() {
                return Ok(None);
            }
            notified.await;
        }
    }
}

struct MemoryAcker {
    inner: Arc<BusInner>,
    topic: String,
    stats: Arc<DeliveryStats>,
    message: BusMessage,
}

impl Acknowledger for MemoryAcker {
    fn settle(self: Box<Self>, settlement: Settlement) {
        let Self {
            inner,
            topic,
            stats,
            message,
        } = *self;
        stats.record(settlement);
        if settlement == Settlement::Nack {
            inner
                .topics
                .lock()
                .entry(topic)
                .or_default()
                .pending
                .push_front(message);
            inner.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::runtime::Runtime;

    #[test]
    fn publishes_and_receives() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryMessageBus::new(16);
            let sub = bus.subscription("commands");
            bus.publish("commands", BusMessage::new("echo hi"))
                .await
                .unwrap();
            let delivery = sub.next().await.unwrap().unwrap();
            assert_eq!(delivery.message().text(), "echo hi");
            assert_eq!(delivery.message().delivery_attempt, 1);
            delivery.ack();
            assert_eq!(bus.stats("commands").acked(), 1);
            assert_eq!(bus.snapshot("commands").len(), 1);
        });
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt() {
        let bus = MemoryMessageBus::new(4);
        let sub = bus.subscription("commands");
        bus.publish("commands", BusMessage::new("retry me"))
            .await
            .unwrap();
        sub.next().await.unwrap().unwrap().nack();
        let again = sub.next().await.unwrap().unwrap();
        assert_eq!(again.message().delivery_attempt, 2);
        again.ack();
        let stats = bus.stats("commands");
        assert_eq!((stats.acked(), stats.nacked()), (1, 1));
        assert_eq!(bus.pending("commands"), 0);
    }

    #[tokio::test]
    async fn waiting_subscriber_wakes_on_publish() {
        let bus = MemoryMessageBus::new(4);
        let sub = bus.subscription("commands");
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish("commands", BusMessage::new("late"))
                .await
                .unwrap();
        });
        let delivery = sub.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().data, b"late");
        delivery.ack();
    }

    #[tokio::test]
    async fn closed_bus_drains_then_ends() {
        let bus = MemoryMessageBus::new(4);
        let sub = bus.subscription("commands");
        bus.publish("commands", BusMessage::new("last"))
            .await
            .unwrap();
        bus.close();
        sub.next().await.unwrap().unwrap().ack();
        assert!(sub.next().await.unwrap().is_none());
    }

    #[test]
    fn snapshot_is_bounded_by_capacity() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryMessageBus::new(2);
            for body in ["a", "b", "c"] {
                bus.publish("results", BusMessage::new(body)).await.unwrap();
            }
            let bodies: Vec<_> = bus
                .snapshot("results")
                .into_iter()
                .map(|m| m.text())
                .collect();
            assert_eq!(bodies, vec!["b", "c"]);
        });
    }
}
