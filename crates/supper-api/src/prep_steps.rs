//! Advanced prep steps. Rows are created by the prep-step worker; the API
//! only reads them and marks them done.

use axum::{body::Bytes, extract::State, response::Response};
use supper_db::meal_plans::visible_scope as visible_plans;
use supper_db::prep_steps::visible_scope;
use supper_db::{AdvancedPrepStepDataManager, DataManager};
use supper_types::models::{AdvancedPrepStep, AdvancedPrepStepStatusInput, MealPlan};
use supper_types::{Entity, EventType, time};
use tracing::{info, instrument};

use crate::AppState;
use crate::envelope::{self, Details, TraceId};
use crate::error::ApiResult;
use crate::params::{self, PathParams, RouteBinder};
use crate::service::{self, message_from, run_db};
use crate::session::Session;

pub fn bind<R: RouteBinder>(router: R) -> R {
    let item = format!("/advanced_prep_steps/{}", params::ADVANCED_PREP_STEP_ID.placeholder());
    router
        .get(&format!("/meal_plans/{}/advanced_prep_steps", params::MEAL_PLAN_ID.placeholder()), for_plan)
        .get(&item, read)
        .post(&format!("{}/complete", item), complete)
}

pub async fn for_plan(State(state): State<AppState>, session: Session, params: PathParams, trace: TraceId) -> ApiResult<Response> {
    let plan_id = params::MEAL_PLAN_ID.fetch(&params)?;
    let household = session.household_id().to_string();
    let steps = run_db(&state.db, move |db| {
        // 404 for plans outside the household's reach, not an empty list.
        let _: MealPlan = DataManager::get(db, &plan_id, &visible_plans(&household))?;
        Ok(db.advanced_prep_steps_for_plan(&plan_id)?)
    })
    .await?;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), steps))
}

pub async fn read(State(state): State<AppState>, session: Session, params: PathParams, trace: TraceId) -> ApiResult<Response> {
    let id = params::ADVANCED_PREP_STEP_ID.fetch(&params)?;
    let household = session.household_id().to_string();
    let step: AdvancedPrepStep = run_db(&state.db, move |db| Ok(DataManager::get(db, &id, &visible_scope(&household))?)).await?;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), step))
}

/// An empty body marks the step done.
fn status_from(body: &[u8]) -> ApiResult<AdvancedPrepStepStatusInput> {
    let input: Option<AdvancedPrepStepStatusInput> = envelope::decode_or_default(body)?;
    Ok(input.unwrap_or(AdvancedPrepStepStatusInput { completed: true, notes: None }))
}

/// Completing a step retires it from the to-do list, so subscribers see an
/// archive; reopening it is an ordinary update.
fn completion_event(completed: bool) -> EventType {
    if completed { EventType::Archived } else { EventType::Updated }
}

#[instrument(skip_all, fields(operation = "complete_prep_step", trace_id = %_trace.0, user_id = %session.user_id(),
    household_id = %session.household_id()))]
pub async fn complete(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    _trace: TraceId,
    body: Bytes,
) -> ApiResult<Response> {
    let id = params::ADVANCED_PREP_STEP_ID.fetch(&params)?;
    let input = status_from(&body)?;
    let household = session.household_id().to_string();
    let step = run_db(&state.db, move |db| {
        if !DataManager::<AdvancedPrepStep>::exists(db, &id, &visible_scope(&household))? {
            return Err(crate::error::ApiError::NotFound);
        }
        Ok(db.complete_advanced_prep_step(&id, input.completed, input.notes.as_deref(), time::now())?)
    })
    .await?;
    info!(advanced_prep_step_id = %step.id, completed = step.completed_at.is_some(), "prep step updated");

    let message = message_from(&session, completion_event(step.completed_at.is_some()), step.to_change());
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::no_content())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_completion_bodies_mean_done() {
        assert!(status_from(b"").unwrap().completed);
        assert!(status_from(b"  \n").unwrap().completed);

        let undone = status_from(br#"{"completed": false, "notes": "oops"}"#).unwrap();
        assert!(!undone.completed);
        assert_eq!(undone.notes.as_deref(), Some("oops"));
    }

    #[test]
    fn reopening_a_step_is_an_update() {
        assert_eq!(completion_event(true), EventType::Archived);
        assert_eq!(completion_event(false), EventType::Updated);
    }

    #[test]
    fn malformed_completion_bodies_are_rejected() {
        assert_eq!(status_from(b"{").unwrap_err().code(), "MALFORMED_INPUT");
    }
}
