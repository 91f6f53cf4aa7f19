//! Publish/subscribe contracts for data-change messages and the in-process
//! broker implementing them.
//!
//! Delivery is at-least-once: a subscriber that fails to process a message
//! hands it back with [`Nacker::nack`] and sees it again with `attempt`
//! incremented. Consumers must be idempotent.

pub mod broker;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use supper_types::{DataChangeMessage, ids, time};
use thiserror::Error;

pub use broker::{BrokerConfig, InMemoryBroker, Nacker, Subscription};

/// Every committed mutation; consumed by the webhook dispatcher.
pub const DATA_CHANGES: &str = "data_changes";
/// Requests to evaluate a meal plan for finalization; consumed by the finalizer.
pub const FINALIZATION_REQUESTS: &str = "meal_plan_finalization_requests";
/// Finalized meal plans; consumed by the prep-step creator.
pub const FINALIZED: &str = "meal_plan_finalized";

pub const TOPICS: &[&str] = &[DATA_CHANGES, FINALIZATION_REQUESTS, FINALIZED];

/// Deliveries after which a message is dropped instead of redelivered.
pub const MAX_DELIVERIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub topic: String,
    /// 1 on first delivery.
    pub attempt: u32,
    pub message: DataChangeMessage,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(topic: &str, message: DataChangeMessage) -> Self {
        Self {
            id: ids::new_id(),
            topic: topic.to_string(),
            attempt: 1,
            message,
            published_at: time::now(),
        }
    }

    /// The same envelope queued for another delivery.
    pub fn redelivery(mut self) -> Self {
        self.attempt += 1;
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= MAX_DELIVERIES
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("topic {topic} did not accept the message within the publish timeout")]
    Backpressure { topic: String },
    #[error("broker is shut down")]
    Closed,
}

/// A long-lived handle for publishing to one topic. Safe to share across
/// tasks.
pub trait Publisher: Send + Sync {
    fn topic(&self) -> &str;

    fn publish<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), PublishError>>;

    /// Wraps `message` in a fresh envelope for this topic and publishes it.
    fn send(&self, message: DataChangeMessage) -> BoxFuture<'_, Result<Envelope, PublishError>> {
        Box::pin(async move {
            let envelope = Envelope::new(self.topic(), message);
            self.publish(&envelope).await?;
            Ok(envelope)
        })
    }
}

pub trait PublisherProvider: Send + Sync {
    fn provide(&self, topic: &str) -> Arc<dyn Publisher>;
}

pub trait Subscriber: Send + Sync {
    /// Opens a queue of `capacity` messages receiving everything published
    /// to `topic` from now on.
    fn subscribe(&self, topic: &str, capacity: usize) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use supper_types::models::Recipe;
    use supper_types::{Entity, EventType};

    #[test]
    fn redelivery_counts_attempts() {
        let msg = DataChangeMessage::new(EventType::Archived, Recipe::reference("r1"));
        let mut env = Envelope::new(DATA_CHANGES, msg);
        assert_eq!(env.attempt, 1);
        for _ in 1..MAX_DELIVERIES {
            assert!(!env.is_exhausted());
            env = env.redelivery();
        }
        assert!(env.is_exhausted());
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let msg = DataChangeMessage::new(EventType::Created, Recipe::reference("r1"));
        let json = serde_json::to_value(Envelope::new(FINALIZED, msg)).unwrap();
        assert_eq!(json["topic"], "meal_plan_finalized");
        assert!(json["publishedAt"].is_i64());
        assert_eq!(json["message"]["payload"]["dataType"], "recipe");
    }
}
