//! Turns finalized meal plans into advanced prep steps.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use supper_db::{AdvancedPrepStepDataManager, DataManager, Database, Scope};
use supper_events::{Envelope, Publisher};
use supper_planning::derive_prep_windows;
use supper_types::models::{AdvancedPrepStep, MealPlan, MealPlanStatus};
use supper_types::{DataChangeMessage, EventType, time};
use tracing::{info, warn};

use crate::consumer::Handler;
use crate::finalizer::plan_id;
use crate::{WorkerError, WorkerResult, blocking, holder_name, with_plan_lock};

pub struct PrepStepCreator {
    db: Arc<Database>,
    data_changes: Arc<dyn Publisher>,
    holder: String,
}

impl PrepStepCreator {
    pub fn new(db: Arc<Database>, data_changes: Arc<dyn Publisher>) -> Self {
        Self { db, data_changes, holder: holder_name() }
    }

    async fn create(&self, plan_id: String) -> WorkerResult<()> {
        let holder = self.holder.clone();
        let target = plan_id.clone();
        let (household, created) = blocking(&self.db, move |db| {
            with_plan_lock(db, &target, &holder, |db| derive(db, &target))
        })
        .await?;

        if created.is_empty() {
            return Ok(());
        }
        info!(meal_plan_id = %plan_id, steps = created.len(), "Advanced prep steps created");
        for step in &created {
            let message = DataChangeMessage::of(EventType::Created, step).in_household(household.clone());
            if let Err(e) = self.data_changes.send(message).await {
                warn!(advanced_prep_step_id = %step.id, "publishing prep step: {}", e);
            }
        }
        Ok(())
    }
}

/// Inserts the windows still missing for a finalized plan. Returns the
/// owning household and the rows this call created.
fn derive(db: &Database, plan_id: &str) -> WorkerResult<(String, Vec<AdvancedPrepStep>)> {
    let plan: MealPlan = DataManager::get(db, plan_id, &Scope::all())?;
    if plan.status != MealPlanStatus::Finalized {
        return Err(WorkerError::Poison(format!("meal plan {} is not finalized", plan_id)));
    }
    let now = time::now();
    let (steps_by_meal, storable) = db.prep_inputs(&plan)?;
    let windows = derive_prep_windows(&plan, &steps_by_meal, &storable, now);
    let created = db.create_advanced_prep_steps(plan_id, &windows, now)?;
    Ok((plan.belongs_to_household, created))
}

impl Handler for PrepStepCreator {
    fn name(&self) -> &'static str {
        "prep_steps"
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), WorkerError>> {
        Box::pin(async move { self.create(plan_id(envelope)?).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use supper_db::{MealPlanDataManager, MealPlanOptionVoteDataManager};
    use supper_events::{DATA_CHANGES, FINALIZED, InMemoryBroker, PublisherProvider, Subscriber};
    use supper_types::{DataType, Entity};

    fn finalized(plan_id: &str) -> Envelope {
        Envelope::new(FINALIZED, DataChangeMessage::new(EventType::Finalized, MealPlan::reference(plan_id)))
    }

    #[tokio::test]
    async fn creates_steps_once_per_plan() {
        let (_dir, db) = testing::open_db();
        let fixture = testing::shared_plan(&db);
        let event = &fixture.plan.events[0];
        for (user, household) in [&fixture.owner, &fixture.guest] {
            db.cast_ballot(&fixture.plan.id, &event.id, household, user, &testing::ballot(&fixture.plan, 1), time::now())
                .unwrap();
        }
        db.finalize_meal_plan(&fixture.plan.id, time::now()).unwrap();

        let db = Arc::new(db);
        let broker = InMemoryBroker::default();
        let mut changes = broker.subscribe(DATA_CHANGES, 8);
        let creator = PrepStepCreator::new(Arc::clone(&db), broker.provide(DATA_CHANGES));

        creator.handle(&finalized(&fixture.plan.id)).await.unwrap();
        let steps = db.advanced_prep_steps_for_plan(&fixture.plan.id).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].meal_plan_option, event.options[1].id);
        assert!(steps[0].cannot_complete_after <= event.starts_at);

        let announced = changes.recv().await.unwrap();
        assert_eq!(announced.message.data_type(), DataType::AdvancedPrepStep);
        assert_eq!(announced.message.household_id.as_deref(), Some(fixture.owner.1.as_str()));

        // A second delivery finds nothing left to create.
        creator.handle(&finalized(&fixture.plan.id)).await.unwrap();
        assert_eq!(db.advanced_prep_steps_for_plan(&fixture.plan.id).unwrap().len(), 1);
        assert!(db.plans_needing_prep_steps().unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_plans_are_poison() {
        let (_dir, db) = testing::open_db();
        let fixture = testing::shared_plan(&db);
        let broker = InMemoryBroker::default();
        let creator = PrepStepCreator::new(Arc::new(db), broker.provide(DATA_CHANGES));
        let outcome = creator.handle(&finalized(&fixture.plan.id)).await;
        assert!(matches!(outcome, Err(WorkerError::Poison(_))));
    }
}
