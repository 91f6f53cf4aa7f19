//! Periodic scan that feeds the finalization and prep-step queues.
//!
//! Plans whose deadline passed, or which took votes since their last check,
//! get a finalization request. Finalized plans without derived prep steps
//! get their finalization announced again, which covers announcements lost
//! before they reached the queue.

use std::sync::Arc;
use std::time::Duration;

use supper_db::{Database, MealPlanDataManager};
use supper_events::Publisher;
use supper_types::models::MealPlan;
use supper_types::{DataChangeMessage, Entity, EventType, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{WorkerResult, blocking};

pub struct QueueLoader {
    db: Arc<Database>,
    requests: Arc<dyn Publisher>,
    finalized: Arc<dyn Publisher>,
    interval: Duration,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub finalization_requests: usize,
    pub prep_requests: usize,
}

impl QueueLoader {
    pub fn new(db: Arc<Database>, requests: Arc<dyn Publisher>, finalized: Arc<dyn Publisher>, interval: Duration) -> Self {
        Self { db, requests, finalized, interval }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.scan().await {
                Ok(report) if report != ScanReport::default() => {
                    info!(
                        finalization = report.finalization_requests,
                        prep = report.prep_requests,
                        "Queue loader: requests published"
                    );
                }
                Ok(_) => debug!("Queue loader: nothing to do"),
                Err(e) => warn!("Queue loader error: {}", e),
            }
        }
        info!("Queue loader stopped");
    }

    pub async fn scan(&self) -> WorkerResult<ScanReport> {
        let now = time::now();
        let (to_finalize, to_prep) = blocking(&self.db, move |db| {
            Ok((db.plans_needing_finalization(now)?, db.plans_needing_prep_steps()?))
        })
        .await?;

        let mut report = ScanReport::default();
        for id in to_finalize {
            let message = DataChangeMessage::new(EventType::FinalizationRequested, MealPlan::reference(id.as_str()));
            match self.requests.send(message).await {
                Ok(_) => report.finalization_requests += 1,
                Err(e) => warn!(meal_plan_id = %id, "queueing finalization: {}", e),
            }
        }
        for id in to_prep {
            let message = DataChangeMessage::new(EventType::Finalized, MealPlan::reference(id.as_str()));
            match self.finalized.send(message).await {
                Ok(_) => report.prep_requests += 1,
                Err(e) => warn!(meal_plan_id = %id, "queueing prep steps: {}", e),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use chrono::Duration as ChronoDuration;
    use supper_db::MealPlanOptionVoteDataManager;
    use supper_events::{FINALIZATION_REQUESTS, FINALIZED, InMemoryBroker, PublisherProvider, Subscriber};

    #[tokio::test]
    async fn voted_plans_are_queued_for_finalization() {
        let (_dir, db) = testing::open_db();
        let fixture = testing::shared_plan(&db);
        let event = &fixture.plan.events[0];
        let (user, household) = &fixture.owner;
        db.cast_ballot(&fixture.plan.id, &event.id, household, user, &testing::ballot(&fixture.plan, 0), time::now())
            .unwrap();

        let broker = InMemoryBroker::default();
        let mut requests = broker.subscribe(FINALIZATION_REQUESTS, 8);
        let loader = QueueLoader::new(
            Arc::new(db),
            broker.provide(FINALIZATION_REQUESTS),
            broker.provide(FINALIZED),
            Duration::from_secs(60),
        );

        let report = loader.scan().await.unwrap();
        assert_eq!(report, ScanReport { finalization_requests: 1, prep_requests: 0 });
        let request = requests.recv().await.unwrap();
        assert_eq!(request.message.event_type, EventType::FinalizationRequested);
        assert_eq!(request.message.payload.entity_id(), fixture.plan.id);
    }

    #[tokio::test]
    async fn finalized_plans_without_steps_are_requeued() {
        let (_dir, db) = testing::open_db();
        let fixture = testing::shared_plan(&db);
        // Past its deadline with no votes, the plan finalizes by tie-break.
        let later = time::now() + ChronoDuration::days(2);
        db.finalize_meal_plan(&fixture.plan.id, later).unwrap();

        let broker = InMemoryBroker::default();
        let mut finalized = broker.subscribe(FINALIZED, 8);
        let loader = QueueLoader::new(
            Arc::new(db),
            broker.provide(FINALIZATION_REQUESTS),
            broker.provide(FINALIZED),
            Duration::from_secs(60),
        );

        let report = loader.scan().await.unwrap();
        assert_eq!(report.prep_requests, 1);
        assert_eq!(finalized.recv().await.unwrap().message.payload.entity_id(), fixture.plan.id);
    }
}
