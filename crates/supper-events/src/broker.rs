use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{Envelope, PublishError, Publisher, PublisherProvider, Subscriber};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a publish waits on a full subscriber queue.
    pub publish_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { publish_timeout: DEFAULT_PUBLISH_TIMEOUT }
    }
}

/// Fans every published envelope out to the bounded queue of each
/// subscription on its topic.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    config: BrokerConfig,
    /// topic -> one sender per live subscription
    topics: RwLock<HashMap<String, Vec<mpsc::Sender<Envelope>>>>,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn senders(&self, topic: &str) -> Result<Vec<mpsc::Sender<Envelope>>, PublishError> {
        let mut topics = self.inner.topics.write().map_err(|_| PublishError::Closed)?;
        let Some(senders) = topics.get_mut(topic) else {
            return Ok(Vec::new());
        };
        senders.retain(|s| !s.is_closed());
        Ok(senders.clone())
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<(), PublishError> {
        let senders = self.senders(&envelope.topic)?;
        if senders.is_empty() {
            debug!(topic = %envelope.topic, id = %envelope.id, "No subscribers, message dropped");
            return Ok(());
        }
        for tx in senders {
            match tokio::time::timeout(self.inner.config.publish_timeout, tx.send(envelope.clone())).await {
                Ok(Ok(())) => {}
                // Subscription dropped between the snapshot and the send.
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(topic = %envelope.topic, id = %envelope.id, "Subscriber queue full, publish timed out");
                    return Err(PublishError::Backpressure { topic: envelope.topic.clone() });
                }
            }
        }
        Ok(())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

struct TopicPublisher {
    topic: String,
    broker: InMemoryBroker,
}

impl Publisher for TopicPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), PublishError>> {
        Box::pin(self.broker.deliver(envelope))
    }
}

impl PublisherProvider for InMemoryBroker {
    fn provide(&self, topic: &str) -> Arc<dyn Publisher> {
        Arc::new(TopicPublisher { topic: topic.to_string(), broker: self.clone() })
    }
}

impl Subscriber for InMemoryBroker {
    fn subscribe(&self, topic: &str, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        match self.inner.topics.write() {
            Ok(mut topics) => topics.entry(topic.to_string()).or_default().push(tx.clone()),
            Err(_) => warn!(topic, "Broker registry poisoned, subscription will stay empty"),
        }
        debug!(topic, capacity, "Subscribed");
        Subscription { topic: topic.to_string(), rx, nacker: Nacker { tx } }
    }
}

/// The receiving end of one subscription.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<Envelope>,
    nacker: Nacker,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next envelope.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// A handle that can return envelopes to this subscription from other tasks.
    pub fn nacker(&self) -> Nacker {
        self.nacker.clone()
    }
}

/// Returns envelopes to the queue they came from.
#[derive(Clone)]
pub struct Nacker {
    tx: mpsc::Sender<Envelope>,
}

impl Nacker {
    /// Requeues `envelope` with its attempt count incremented, after `delay`.
    /// The requeue runs in the background so the caller never blocks on
    /// its own full queue.
    pub fn nack(&self, envelope: Envelope, delay: Duration) {
        let tx = self.tx.clone();
        let envelope = envelope.redelivery();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if tx.send(envelope).await.is_err() {
                debug!("Subscription closed before redelivery");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DATA_CHANGES, FINALIZED};
    use supper_types::models::MealPlan;
    use supper_types::{DataChangeMessage, Entity, EventType};

    fn message(id: &str) -> DataChangeMessage {
        DataChangeMessage::new(EventType::Finalized, MealPlan::reference(id))
    }

    #[tokio::test]
    async fn fans_out_to_every_subscription_on_the_topic() {
        let broker = InMemoryBroker::default();
        let mut a = broker.subscribe(FINALIZED, 8);
        let mut b = broker.subscribe(FINALIZED, 8);
        let mut other = broker.subscribe(DATA_CHANGES, 8);

        let sent = broker.provide(FINALIZED).send(message("p1")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), sent);
        assert_eq!(b.recv().await.unwrap(), sent);
        assert!(other.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let broker = InMemoryBroker::default();
        broker.provide(FINALIZED).send(message("p1")).await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_times_out_with_backpressure() {
        let broker = InMemoryBroker::new(BrokerConfig { publish_timeout: Duration::from_millis(20) });
        let _sub = broker.subscribe(FINALIZED, 1);
        let publisher = broker.provide(FINALIZED);
        publisher.send(message("p1")).await.unwrap();
        let err = publisher.send(message("p2")).await.unwrap_err();
        assert!(matches!(err, PublishError::Backpressure { .. }));
    }

    #[tokio::test]
    async fn nack_redelivers_with_the_next_attempt() {
        let broker = InMemoryBroker::default();
        let mut sub = broker.subscribe(FINALIZED, 4);
        broker.provide(FINALIZED).send(message("p1")).await.unwrap();

        let first = sub.recv().await.unwrap();
        sub.nacker().nack(first.clone(), Duration::ZERO);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let broker = InMemoryBroker::default();
        drop(broker.subscribe(FINALIZED, 1));
        broker.provide(FINALIZED).send(message("p1")).await.unwrap();
        broker.provide(FINALIZED).send(message("p2")).await.unwrap();
        assert!(broker.senders(FINALIZED).unwrap().is_empty());
    }
}
