//! Background workers: the periodic queue loader, the finalizer, the
//! prep-step creator and the webhook dispatcher. Each reads one topic
//! through the shared consumer loop in [`consumer`].

pub mod consumer;
pub mod finalizer;
pub mod loader;
pub mod prep;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use supper_db::{Database, DbError, PlanLockManager};
use supper_events::{FINALIZATION_REQUESTS, FINALIZED, DATA_CHANGES, PublisherProvider, Subscriber};
use supper_types::ids;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use consumer::{ConsumerConfig, Handler};
pub use finalizer::Finalizer;
pub use loader::QueueLoader;
pub use prep::PrepStepCreator;
pub use webhooks::{RetryPolicy, WebhookDispatcher};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
/// How long a worker holds a plan lease before another replica may take it.
pub const PLAN_LEASE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The message can never succeed; it is dropped.
    #[error("poison message: {0}")]
    Poison(String),
    /// Worth another delivery.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl From<DbError> for WorkerError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => WorkerError::Poison("entity not found".into()),
            DbError::Invalid(detail) => WorkerError::Poison(detail),
            DbError::Finalized => WorkerError::Poison("meal plan is finalized".into()),
            other => WorkerError::Transient(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for WorkerError {
    fn from(e: tokio::task::JoinError) -> Self {
        WorkerError::Transient(format!("blocking task failed: {}", e))
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub consumer: ConsumerConfig,
    pub queue_capacity: usize,
    pub scan_interval: Duration,
    pub webhook_signing_secret: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer: ConsumerConfig::default(),
            queue_capacity: 1024,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            webhook_signing_secret: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Runs `f` on the blocking pool.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> WorkerResult<T>
where
    F: FnOnce(&Database) -> WorkerResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db)).await?
}

/// Runs `f` holding the advisory lease on `plan_id`. A lease held elsewhere
/// is transient: the message comes back once the holder is done.
pub(crate) fn with_plan_lock<T>(
    db: &Database,
    plan_id: &str,
    holder: &str,
    f: impl FnOnce(&Database) -> WorkerResult<T>,
) -> WorkerResult<T> {
    if !db.acquire_plan_lock(plan_id, holder, PLAN_LEASE)? {
        return Err(WorkerError::Transient(format!("meal plan {} is locked", plan_id)));
    }
    let result = f(db);
    if let Err(e) = db.release_plan_lock(plan_id, holder) {
        tracing::warn!(meal_plan_id = %plan_id, "releasing plan lock: {}", e);
    }
    result
}

/// Lease holder name for this process.
pub(crate) fn holder_name() -> String {
    format!("worker-{}", ids::new_id())
}

/// Subscribes every worker and spawns its loop. All loops stop when
/// `cancel` fires; in-flight messages finish first.
pub fn spawn<B>(db: Arc<Database>, broker: &B, config: WorkerConfig, cancel: CancellationToken) -> anyhow::Result<Vec<JoinHandle<()>>>
where
    B: Subscriber + PublisherProvider,
{
    let data_changes = broker.provide(DATA_CHANGES);
    let requests = broker.provide(FINALIZATION_REQUESTS);
    let finalized = broker.provide(FINALIZED);

    let finalizer = Arc::new(Finalizer::new(Arc::clone(&db), Arc::clone(&finalized), Arc::clone(&data_changes)));
    let prep = Arc::new(PrepStepCreator::new(Arc::clone(&db), Arc::clone(&data_changes)));
    let dispatcher = Arc::new(WebhookDispatcher::new(
        Arc::clone(&db),
        config.webhook_signing_secret.clone(),
        config.retry.clone(),
        cancel.clone(),
    )?);
    let loader = QueueLoader::new(Arc::clone(&db), requests, finalized, config.scan_interval);

    let handles = vec![
        tokio::spawn(consumer::run(
            finalizer,
            broker.subscribe(FINALIZATION_REQUESTS, config.queue_capacity),
            config.consumer.clone(),
            cancel.clone(),
        )),
        tokio::spawn(consumer::run(
            prep,
            broker.subscribe(FINALIZED, config.queue_capacity),
            config.consumer.clone(),
            cancel.clone(),
        )),
        tokio::spawn(consumer::run(
            dispatcher,
            broker.subscribe(DATA_CHANGES, config.queue_capacity),
            config.consumer.clone(),
            cancel.clone(),
        )),
        tokio::spawn(loader.run(cancel)),
    ];
    info!(workers = handles.len(), "Workers started");
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_are_poison_and_busy_databases_are_not() {
        assert!(matches!(WorkerError::from(DbError::NotFound), WorkerError::Poison(_)));
        assert!(matches!(WorkerError::from(DbError::Transient("busy".into())), WorkerError::Transient(_)));
    }

    #[test]
    fn held_locks_are_transient() {
        let (_dir, db) = testing::open_db();
        assert!(db.acquire_plan_lock("p1", "elsewhere", PLAN_LEASE).unwrap());
        let err = with_plan_lock(&db, "p1", "me", |_| Ok(())).unwrap_err();
        assert!(matches!(err, WorkerError::Transient(_)));

        db.release_plan_lock("p1", "elsewhere").unwrap();
        assert_eq!(with_plan_lock(&db, "p1", "me", |_| Ok(7)).unwrap(), 7);
        // released again afterwards
        assert!(db.acquire_plan_lock("p1", "elsewhere", PLAN_LEASE).unwrap());
    }
}
