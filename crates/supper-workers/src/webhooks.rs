//! Delivers data-change messages to household webhooks.
//!
//! Each webhook gets its own queue and task, so deliveries to one endpoint
//! stay in order while different endpoints proceed in parallel. Every
//! delivery carries the webhook as loaded for that message, so edits apply
//! to the next message, and queues of webhooks that are gone are dropped
//! when their household next sees a change. A delivery
//! is retried with jittered exponential backoff; once the attempts or the
//! time budget run out, the failure is recorded and the message dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::Client;
use sha2::Sha256;
use supper_db::{Database, WebhookDataManager};
use supper_events::Envelope;
use supper_types::models::Webhook;
use supper_types::time;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::consumer::Handler;
use crate::{WorkerError, WorkerResult, blocking};

pub const SIGNATURE_HEADER: &str = "X-Supper-Signature";
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
    /// Wall-clock limit across every attempt of one delivery.
    pub total_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(15),
            total_budget: Duration::from_secs(10 * 60),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the wait after failed attempt `attempt` (1-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }

    /// Full jitter: uniform in `[0, ceiling]`.
    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=ceiling))
    }
}

struct Delivery {
    webhook: Webhook,
    message_id: String,
    body: Vec<u8>,
}

struct Queue {
    household_id: String,
    sender: mpsc::Sender<Delivery>,
}

pub struct WebhookDispatcher {
    db: Arc<Database>,
    client: Client,
    signing_secret: Option<String>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    /// webhook id -> its delivery queue
    queues: Mutex<HashMap<String, Queue>>,
}

impl WebhookDispatcher {
    pub fn new(
        db: Arc<Database>,
        signing_secret: Option<String>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(retry.attempt_timeout).build()?;
        Ok(Self {
            db,
            client,
            signing_secret,
            retry,
            cancel,
            queues: Mutex::new(HashMap::new()),
        })
    }

    async fn dispatch(&self, envelope: &Envelope) -> WorkerResult<()> {
        let message = &envelope.message;
        let Some(household_id) = message.household_id.clone() else {
            return Ok(());
        };
        let lookup = household_id.clone();
        let webhooks = blocking(&self.db, move |db| Ok(db.webhooks_for_household(&lookup)?)).await?;
        self.prune(&household_id, &webhooks)?;
        let matching: Vec<Webhook> = webhooks
            .into_iter()
            .filter(|w| w.wants(message.event_type, message.data_type(), &envelope.topic))
            .collect();
        if matching.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(message).map_err(|e| WorkerError::Poison(e.to_string()))?;
        for webhook in matching {
            let queue = self.queue_for(&webhook)?;
            let delivery = Delivery { webhook, message_id: message.id.clone(), body: body.clone() };
            if queue.send(delivery).await.is_err() {
                return Err(WorkerError::Transient("webhook queue closed".into()));
            }
        }
        Ok(())
    }

    fn lock_queues(&self) -> WorkerResult<std::sync::MutexGuard<'_, HashMap<String, Queue>>> {
        self.queues.lock().map_err(|_| WorkerError::Transient("webhook queues poisoned".into()))
    }

    /// Drops the queues of `household_id`'s webhooks that were archived.
    /// Their tasks finish what is already queued and stop.
    fn prune(&self, household_id: &str, live: &[Webhook]) -> WorkerResult<()> {
        let mut queues = self.lock_queues()?;
        queues.retain(|id, queue| {
            let keep = queue.household_id != household_id || live.iter().any(|w| w.id == *id);
            if !keep {
                debug!(webhook_id = %id, "Dropping queue of removed webhook");
            }
            keep
        });
        Ok(())
    }

    /// The queue feeding `webhook`'s delivery task, started on first use.
    fn queue_for(&self, webhook: &Webhook) -> WorkerResult<mpsc::Sender<Delivery>> {
        let mut queues = self.lock_queues()?;
        if let Some(queue) = queues.get(&webhook.id).filter(|q| !q.sender.is_closed()) {
            return Ok(queue.sender.clone());
        }

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        queues.insert(
            webhook.id.clone(),
            Queue { household_id: webhook.belongs_to_household.clone(), sender: tx.clone() },
        );
        let target = Target {
            db: Arc::clone(&self.db),
            client: self.client.clone(),
            signing_secret: self.signing_secret.clone(),
            retry: self.retry.clone(),
            webhook_id: webhook.id.clone(),
        };
        tokio::spawn(target.run(rx, self.cancel.clone()));
        Ok(tx)
    }

    #[cfg(test)]
    fn queue_count(&self) -> usize {
        self.queues.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Handler for WebhookDispatcher {
    fn name(&self) -> &'static str {
        "webhook_dispatcher"
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), WorkerError>> {
        Box::pin(self.dispatch(envelope))
    }
}

/// One webhook's delivery task.
struct Target {
    db: Arc<Database>,
    client: Client,
    signing_secret: Option<String>,
    retry: RetryPolicy,
    webhook_id: String,
}

impl Target {
    async fn run(self, mut rx: mpsc::Receiver<Delivery>, cancel: CancellationToken) {
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = rx.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            self.deliver(delivery, &cancel).await;
        }
        debug!(webhook_id = %self.webhook_id, "Webhook queue stopped");
    }

    async fn deliver(&self, delivery: Delivery, cancel: &CancellationToken) {
        let started = Instant::now();
        let mut attempt = 0;
        let last_error = loop {
            attempt += 1;
            let error = match self.attempt(&delivery.webhook, &delivery.body).await {
                Ok(()) => {
                    debug!(webhook_id = %self.webhook_id, message_id = %delivery.message_id, attempt, "delivered");
                    return;
                }
                Err(e) => e,
            };
            if attempt >= self.retry.max_attempts {
                break error;
            }
            let wait = self.retry.backoff(attempt);
            if started.elapsed() + wait > self.retry.total_budget {
                break format!("{} (retry budget exhausted)", error);
            }
            debug!(webhook_id = %self.webhook_id, attempt, ?wait, "delivery failed: {}", error);
            tokio::select! {
                _ = cancel.cancelled() => break format!("{} (shutting down)", error),
                _ = tokio::time::sleep(wait) => {}
            }
        };

        error!(
            webhook_id = %self.webhook_id,
            message_id = %delivery.message_id,
            attempts = attempt,
            "giving up on webhook delivery: {}", last_error
        );
        let db = Arc::clone(&self.db);
        let webhook_id = self.webhook_id.clone();
        let recorded = blocking(&db, move |db| {
            Ok(db.record_delivery_failure(&webhook_id, &delivery.message_id, attempt, &last_error, time::now())?)
        })
        .await;
        if let Err(e) = recorded {
            warn!(webhook_id = %self.webhook_id, "recording delivery failure: {}", e);
        }
    }

    async fn attempt(&self, webhook: &Webhook, body: &[u8]) -> Result<(), String> {
        let method = reqwest::Method::from_bytes(webhook.method.as_bytes()).map_err(|e| e.to_string())?;
        let mut request = self
            .client
            .request(method, &webhook.url)
            .header(reqwest::header::CONTENT_TYPE, &webhook.content_type)
            .body(body.to_vec());
        if let Some(secret) = &self.signing_secret {
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", sign(secret, body)));
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("endpoint answered {}", status))
        }
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use supper_db::{DataManager, Scope};
    use supper_events::DATA_CHANGES;
    use supper_types::models::{Recipe, WebhookCreationInput};
    use supper_types::{DataChangeMessage, Entity, EventType, ids};

    async fn serve(status: StatusCode) -> (String, mpsc::UnboundedReceiver<(HeaderMap, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, body: axum::body::Bytes| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((headers, body.to_vec()));
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}/hook", addr), rx)
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(2),
            total_budget: Duration::from_secs(10),
        }
    }

    fn register(db: &Database, household_id: &str, url: &str, events: &[&str]) -> Webhook {
        let webhook = WebhookCreationInput {
            name: "notify".into(),
            url: url.into(),
            content_type: "application/json".into(),
            method: "POST".into(),
            events: events.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
        .into_entity(ids::new_id(), household_id, time::now());
        db.create(&webhook).unwrap();
        webhook
    }

    fn change(event_type: EventType, household_id: &str) -> Envelope {
        Envelope::new(
            DATA_CHANGES,
            DataChangeMessage::new(event_type, Recipe::reference("r1")).in_household(household_id),
        )
    }

    #[tokio::test]
    async fn matching_changes_are_delivered_signed() {
        let (_dir, db) = testing::open_db();
        let (_, household) = testing::household(&db, "alice");
        let (url, mut received) = serve(StatusCode::OK).await;
        register(&db, &household.id, &url, &["created"]);

        let dispatcher =
            WebhookDispatcher::new(Arc::new(db), Some("s3cret".into()), fast(), CancellationToken::new()).unwrap();
        dispatcher.handle(&change(EventType::Archived, &household.id)).await.unwrap();
        dispatcher.handle(&change(EventType::Created, &household.id)).await.unwrap();

        let (headers, body) = tokio::time::timeout(Duration::from_secs(5), received.recv()).await.unwrap().unwrap();
        let sent: DataChangeMessage = serde_json::from_slice(&body).unwrap();
        assert_eq!(sent.event_type, EventType::Created);
        let signature = headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        assert_eq!(signature, format!("sha256={}", sign("s3cret", &body)));
        // the archived change never went out
        assert!(received.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_households_are_not_notified() {
        let (_dir, db) = testing::open_db();
        let (_, alice) = testing::household(&db, "alice");
        let (_, bob) = testing::household(&db, "bob");
        let (url, mut received) = serve(StatusCode::OK).await;
        register(&db, &alice.id, &url, &[]);

        let dispatcher = WebhookDispatcher::new(Arc::new(db), None, fast(), CancellationToken::new()).unwrap();
        dispatcher.handle(&change(EventType::Created, &bob.id)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(received.try_recv().is_err());
    }

    #[tokio::test]
    async fn exhausted_deliveries_are_recorded() {
        let (_dir, db) = testing::open_db();
        let (_, household) = testing::household(&db, "alice");
        let (url, mut received) = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let webhook = register(&db, &household.id, &url, &[]);

        let db = Arc::new(db);
        let dispatcher = WebhookDispatcher::new(Arc::clone(&db), None, fast(), CancellationToken::new()).unwrap();
        let envelope = change(EventType::Created, &household.id);
        dispatcher.handle(&envelope).await.unwrap();

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), received.recv()).await.unwrap().unwrap();
        }
        let mut failures = Vec::new();
        for _ in 0..50 {
            failures = db.delivery_failures(&webhook.id).unwrap();
            if !failures.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(failures[0].message_id, envelope.message.id);
    }

    #[tokio::test]
    async fn edits_apply_to_the_next_message_and_archived_webhooks_lose_their_queue() {
        let (_dir, db) = testing::open_db();
        let (_, household) = testing::household(&db, "alice");
        let (first_url, mut first) = serve(StatusCode::OK).await;
        let (second_url, mut second) = serve(StatusCode::OK).await;
        let mut webhook = register(&db, &household.id, &first_url, &[]);

        let db = Arc::new(db);
        let dispatcher = WebhookDispatcher::new(Arc::clone(&db), None, fast(), CancellationToken::new()).unwrap();
        dispatcher.handle(&change(EventType::Created, &household.id)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), first.recv()).await.unwrap().unwrap();
        assert_eq!(dispatcher.queue_count(), 1);

        webhook.url = second_url;
        db.update(&mut webhook).unwrap();
        dispatcher.handle(&change(EventType::Updated, &household.id)).await.unwrap();
        let (_, body) = tokio::time::timeout(Duration::from_secs(5), second.recv()).await.unwrap().unwrap();
        let sent: DataChangeMessage = serde_json::from_slice(&body).unwrap();
        assert_eq!(sent.event_type, EventType::Updated);
        assert!(first.try_recv().is_err());

        DataManager::<Webhook>::archive(db.as_ref(), &webhook.id, &Scope::all()).unwrap();
        dispatcher.handle(&change(EventType::Archived, &household.id)).await.unwrap();
        assert_eq!(dispatcher.queue_count(), 0);
    }

    #[test]
    fn backoff_doubles_from_the_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ceiling(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_ceiling(4), Duration::from_secs(8));
        for attempt in 1..=5 {
            assert!(policy.backoff(attempt) <= policy.backoff_ceiling(attempt));
        }
    }
}
