//! The loop every topic consumer runs: pull, process under a deadline,
//! and ack, nack or drop depending on how processing failed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use supper_events::{Envelope, Nacker, Subscription};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::WorkerError;

pub trait Handler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), WorkerError>>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Messages processed at once. Nothing more is pulled while all are busy.
    pub concurrency: usize,
    pub message_deadline: Duration,
    /// First redelivery delay; doubles per attempt.
    pub redelivery_base: Duration,
    pub redelivery_max: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            message_deadline: Duration::from_secs(5 * 60),
            redelivery_base: Duration::from_secs(1),
            redelivery_max: Duration::from_secs(60),
        }
    }
}

impl ConsumerConfig {
    fn redelivery_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.redelivery_base.saturating_mul(factor).min(self.redelivery_max)
    }
}

pub async fn run<H: Handler>(handler: Arc<H>, mut subscription: Subscription, config: ConsumerConfig, cancel: CancellationToken) {
    let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let nacker = subscription.nacker();
    let mut in_flight = JoinSet::new();
    info!(worker = handler.name(), topic = subscription.topic(), "Consumer started");

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = subscription.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let handler = Arc::clone(&handler);
        let nacker = nacker.clone();
        let config = config.clone();
        in_flight.spawn(async move {
            process(handler.as_ref(), envelope, &nacker, &config).await;
            drop(permit);
        });
        while in_flight.try_join_next().is_some() {}
    }

    // Let in-flight messages finish.
    while in_flight.join_next().await.is_some() {}
    info!(worker = handler.name(), "Consumer stopped");
}

async fn process<H: Handler>(handler: &H, envelope: Envelope, nacker: &Nacker, config: &ConsumerConfig) {
    let outcome = tokio::time::timeout(config.message_deadline, handler.handle(&envelope)).await;
    let reason = match outcome {
        Ok(Ok(())) => {
            debug!(worker = handler.name(), message_id = %envelope.id, attempt = envelope.attempt, "handled");
            return;
        }
        Ok(Err(WorkerError::Poison(reason))) => {
            warn!(worker = handler.name(), message_id = %envelope.id, "dropping poison message: {}", reason);
            return;
        }
        Ok(Err(WorkerError::Transient(reason))) => reason,
        Err(_) => "message deadline exceeded".to_string(),
    };

    if envelope.is_exhausted() {
        error!(
            worker = handler.name(),
            message_id = %envelope.id,
            attempts = envelope.attempt,
            "giving up on message: {}", reason
        );
        return;
    }
    let delay = config.redelivery_delay(envelope.attempt);
    debug!(worker = handler.name(), message_id = %envelope.id, attempt = envelope.attempt, ?delay, "redelivering: {}", reason);
    nacker.nack(envelope, delay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use supper_events::{FINALIZATION_REQUESTS, InMemoryBroker, MAX_DELIVERIES, PublisherProvider, Subscriber};
    use supper_types::models::MealPlan;
    use supper_types::{DataChangeMessage, Entity, EventType};

    /// Fails with `failure` for the first `failures` deliveries.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        poison: bool,
    }

    impl Handler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn handle<'a>(&'a self, _: &'a Envelope) -> BoxFuture<'a, Result<(), WorkerError>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call > self.failures {
                    Ok(())
                } else if self.poison {
                    Err(WorkerError::Poison("bad payload".into()))
                } else {
                    Err(WorkerError::Transient("busy".into()))
                }
            })
        }
    }

    fn fast() -> ConsumerConfig {
        ConsumerConfig {
            concurrency: 2,
            message_deadline: Duration::from_secs(5),
            redelivery_base: Duration::from_millis(1),
            redelivery_max: Duration::from_millis(5),
        }
    }

    async fn deliver_one(handler: Arc<Flaky>) -> u32 {
        let broker = InMemoryBroker::default();
        let subscription = broker.subscribe(FINALIZATION_REQUESTS, 8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&handler), subscription, fast(), cancel.clone()));

        let message = DataChangeMessage::new(EventType::FinalizationRequested, MealPlan::reference("p1"));
        broker.provide(FINALIZATION_REQUESTS).send(message).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        task.await.unwrap();
        handler.calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn transient_failures_are_redelivered() {
        let calls = deliver_one(Arc::new(Flaky { calls: AtomicU32::new(0), failures: 2, poison: false })).await;
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn poison_messages_are_dropped_at_once() {
        let calls = deliver_one(Arc::new(Flaky { calls: AtomicU32::new(0), failures: 10, poison: true })).await;
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn redelivery_stops_at_the_ceiling() {
        let calls = deliver_one(Arc::new(Flaky { calls: AtomicU32::new(0), failures: 100, poison: false })).await;
        assert_eq!(calls, MAX_DELIVERIES);
    }

    #[test]
    fn redelivery_delay_doubles_up_to_the_cap() {
        let config = ConsumerConfig::default();
        assert_eq!(config.redelivery_delay(1), Duration::from_secs(1));
        assert_eq!(config.redelivery_delay(3), Duration::from_secs(4));
        assert_eq!(config.redelivery_delay(30), Duration::from_secs(60));
    }
}
