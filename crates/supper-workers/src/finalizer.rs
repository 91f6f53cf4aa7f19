//! Consumes finalization requests and runs the plan state machine.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use supper_db::{Database, MealPlanDataManager};
use supper_events::{Envelope, Publisher};
use supper_planning::Decision;
use supper_types::{DataChange, DataChangeMessage, EventType, time};
use tracing::{debug, warn};

use crate::consumer::Handler;
use crate::{WorkerError, WorkerResult, blocking, holder_name, with_plan_lock};

pub struct Finalizer {
    db: Arc<Database>,
    finalized: Arc<dyn Publisher>,
    data_changes: Arc<dyn Publisher>,
    holder: String,
}

impl Finalizer {
    pub fn new(db: Arc<Database>, finalized: Arc<dyn Publisher>, data_changes: Arc<dyn Publisher>) -> Self {
        Self { db, finalized, data_changes, holder: holder_name() }
    }

    async fn finalize(&self, plan_id: String) -> WorkerResult<()> {
        let holder = self.holder.clone();
        let target = plan_id.clone();
        let (decision, plan) = blocking(&self.db, move |db| {
            with_plan_lock(db, &target, &holder, |db| Ok(db.finalize_meal_plan(&target, time::now())?))
        })
        .await?;

        match decision {
            Decision::Finalize(outcomes) => {
                let tiebroken = outcomes.iter().filter(|o| o.tiebroken).count();
                debug!(meal_plan_id = %plan_id, events = outcomes.len(), tiebroken, "Announcing finalized meal plan");
                let message = DataChangeMessage::of(EventType::Finalized, &plan).in_household(plan.belongs_to_household.clone());
                // A lost publish is picked up by the loader's reconcile scan.
                for publisher in [&self.finalized, &self.data_changes] {
                    if let Err(e) = publisher.send(message.clone()).await {
                        warn!(meal_plan_id = %plan_id, topic = publisher.topic(), "publishing finalization: {}", e);
                    }
                }
            }
            Decision::Pending { open_events } => {
                debug!(meal_plan_id = %plan_id, open = open_events.len(), "Meal plan still open");
            }
            Decision::Blocked { event_id } => {
                warn!(meal_plan_id = %plan_id, event_id = %event_id, "Meal plan event has no options");
            }
            Decision::AlreadyFinalized => debug!(meal_plan_id = %plan_id, "Already finalized"),
        }
        Ok(())
    }
}

/// The meal plan a message refers to.
pub(crate) fn plan_id(envelope: &Envelope) -> WorkerResult<String> {
    match &envelope.message.payload {
        change @ DataChange::MealPlan(_) => Ok(change.entity_id().to_string()),
        other => Err(WorkerError::Poison(format!("expected a meal plan, got {}", other.data_type()))),
    }
}

impl Handler for Finalizer {
    fn name(&self) -> &'static str {
        "finalizer"
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), WorkerError>> {
        Box::pin(async move { self.finalize(plan_id(envelope)?).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use supper_db::{DataManager, MealPlanOptionVoteDataManager, Scope};
    use supper_events::{FINALIZED, InMemoryBroker, PublisherProvider, Subscriber};
    use supper_types::models::{MealPlan, MealPlanStatus, Recipe};
    use supper_types::Entity;

    fn request(plan_id: &str) -> Envelope {
        Envelope::new(
            supper_events::FINALIZATION_REQUESTS,
            DataChangeMessage::new(EventType::FinalizationRequested, MealPlan::reference(plan_id)),
        )
    }

    #[tokio::test]
    async fn finalizes_and_announces_a_fully_voted_plan() {
        let (_dir, db) = testing::open_db();
        let fixture = testing::shared_plan(&db);
        let event = &fixture.plan.events[0];
        for (user, household) in [&fixture.owner, &fixture.guest] {
            db.cast_ballot(&fixture.plan.id, &event.id, household, user, &testing::ballot(&fixture.plan, 0), time::now())
                .unwrap();
        }

        let db = Arc::new(db);
        let broker = InMemoryBroker::default();
        let mut finalized = broker.subscribe(FINALIZED, 4);
        let finalizer = Finalizer::new(Arc::clone(&db), broker.provide(FINALIZED), broker.provide("unused"));

        finalizer.handle(&request(&fixture.plan.id)).await.unwrap();
        let stored: MealPlan = DataManager::get(db.as_ref(), &fixture.plan.id, &Scope::all()).unwrap();
        assert_eq!(stored.status, MealPlanStatus::Finalized);
        let announced = finalized.recv().await.unwrap();
        assert_eq!(announced.message.payload.entity_id(), fixture.plan.id);

        // Redelivery is harmless.
        finalizer.handle(&request(&fixture.plan.id)).await.unwrap();
    }

    #[tokio::test]
    async fn other_payloads_are_poison() {
        let (_dir, db) = testing::open_db();
        let broker = InMemoryBroker::default();
        let finalizer = Finalizer::new(Arc::new(db), broker.provide(FINALIZED), broker.provide("unused"));
        let envelope = Envelope::new(FINALIZED, DataChangeMessage::new(EventType::Created, Recipe::reference("r1")));
        assert!(matches!(finalizer.handle(&envelope).await, Err(WorkerError::Poison(_))));
    }
}
