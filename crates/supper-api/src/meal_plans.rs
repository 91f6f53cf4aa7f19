//! Meal plans, events, options and votes, plus the two operations that
//! drive a plan to its outcome: casting a ballot and finalizing.
//!
//! The active household sees plans it owns or that are shared with it.
//! Only the owning household changes a plan's structure; every participating
//! household votes.

use axum::{extract::State, http::StatusCode, response::Response};
use supper_db::meal_plans::{event_scope, option_scope, owner_scope, visible_scope, vote_scope};
use supper_db::{DataManager, Database, MealPlanDataManager, MealPlanOptionVoteDataManager, Scope};
use supper_planning::{Decision, check_ballot};
use supper_types::models::*;
use supper_types::{DataChangeMessage, Entity, EventType, SessionContext, Validate, ids, time};
use tracing::{Span, info, instrument};

use crate::AppState;
use crate::envelope::{self, Details, JsonBody, TraceId};
use crate::error::{ApiError, ApiResult};
use crate::params::{self, PathParams, RouteBinder};
use crate::service::{self, Operation, ResourceService, bind_crud, bind_item, bind_list, message_from, run_db};
use crate::session::Session;

const VISIBLE_PLANS: &str = "SELECT id FROM meal_plans WHERE archived_at IS NULL
     AND (belongs_to_household = ? OR id IN (SELECT meal_plan_id FROM meal_plan_shares WHERE household_id = ?))";
const OWNED_PLANS: &str = "SELECT id FROM meal_plans WHERE archived_at IS NULL AND belongs_to_household = ?";

pub fn bind<R: RouteBinder>(router: R, state: &AppState) -> R {
    let plan = format!("/meal_plans/{}", params::MEAL_PLAN_ID.placeholder());
    let event = format!("{}/events/{}", plan, params::MEAL_PLAN_EVENT_ID.placeholder());
    let option = format!("{}/options/{}", event, params::MEAL_PLAN_OPTION_ID.placeholder());

    let router = bind_crud(
        router,
        "/meal_plans",
        params::MEAL_PLAN_ID,
        ResourceService::new("meal_plan", state, params::MEAL_PLAN_ID, prepare_plan).scope(plans_scope),
    );
    let router = bind_crud(
        router,
        &format!("{}/events", plan),
        params::MEAL_PLAN_EVENT_ID,
        ResourceService::new("meal_plan_event", state, params::MEAL_PLAN_EVENT_ID, prepare_event)
            .parents(&[params::MEAL_PLAN_ID])
            .scope(events_scope)
            .check(MealPlanEvent::check),
    );
    let router = bind_crud(
        router,
        &format!("{}/options", event),
        params::MEAL_PLAN_OPTION_ID,
        ResourceService::new("meal_plan_option", state, params::MEAL_PLAN_OPTION_ID, prepare_option)
            .parents(&[params::MEAL_PLAN_ID, params::MEAL_PLAN_EVENT_ID])
            .scope(options_scope),
    );

    let votes = std::sync::Arc::new(
        ResourceService::new("meal_plan_option_vote", state, params::MEAL_PLAN_OPTION_VOTE_ID, reject_single_vote)
            .parents(&[params::MEAL_PLAN_ID, params::MEAL_PLAN_EVENT_ID, params::MEAL_PLAN_OPTION_ID])
            .scope(votes_scope),
    );
    let router = bind_list(router, &format!("{}/votes", option), &votes);
    let router = bind_item(
        router,
        &format!("{}/votes/{}", option, params::MEAL_PLAN_OPTION_VOTE_ID.placeholder()),
        &votes,
    );

    router
        .post(&format!("{}/vote", event), cast_ballot)
        .post(&format!("{}/finalize", plan), finalize)
}

fn plans_clause(session: &SessionContext, op: Operation) -> (String, Vec<String>) {
    let household = session.household_id().to_string();
    if op.mutates() {
        (OWNED_PLANS.to_string(), vec![household])
    } else {
        (VISIBLE_PLANS.to_string(), vec![household.clone(), household])
    }
}

fn plans_scope(session: &SessionContext, _: &[String], op: Operation) -> Scope {
    if op.mutates() { owner_scope(session.household_id()) } else { visible_scope(session.household_id()) }
}

fn events_scope(session: &SessionContext, parents: &[String], op: Operation) -> Scope {
    let (plans, params) = plans_clause(session, op);
    event_scope(&parents[0]).raw(&format!("belongs_to_meal_plan IN ({})", plans), params)
}

fn options_scope(session: &SessionContext, parents: &[String], op: Operation) -> Scope {
    let (plans, plan_params) = plans_clause(session, op);
    let mut params = vec![parents[0].clone()];
    params.extend(plan_params);
    option_scope(&parents[1]).raw(
        &format!(
            "belongs_to_meal_plan_event IN (SELECT id FROM meal_plan_events
               WHERE archived_at IS NULL AND belongs_to_meal_plan = ? AND belongs_to_meal_plan IN ({}))",
            plans
        ),
        params,
    )
}

/// Any participating household reads votes; a household may only retract
/// its own.
fn votes_scope(session: &SessionContext, parents: &[String], op: Operation) -> Scope {
    let (plans, plan_params) = plans_clause(session, Operation::Read);
    let mut params = vec![parents[1].clone(), parents[0].clone()];
    params.extend(plan_params);
    let scope = vote_scope(&parents[2]).raw(
        &format!(
            "belongs_to_meal_plan_option IN (SELECT id FROM meal_plan_options
               WHERE archived_at IS NULL AND belongs_to_meal_plan_event = ?
                 AND belongs_to_meal_plan_event IN (SELECT id FROM meal_plan_events
                   WHERE belongs_to_meal_plan = ? AND belongs_to_meal_plan IN ({})))",
            plans
        ),
        params,
    );
    if op.mutates() { scope.eq("by_household", session.household_id()) } else { scope }
}

fn meal_exists(db: &Database, field: String, meal_id: &str) -> ApiResult<()> {
    if DataManager::<Meal>::exists(db, meal_id, &Scope::all())? {
        Ok(())
    } else {
        Err(ApiError::invalid(field, "meal does not exist"))
    }
}

fn prepare_plan(db: &Database, input: MealPlanCreationInput, session: &SessionContext, _: &[String]) -> ApiResult<MealPlan> {
    let now = time::now();
    if input.voting_deadline <= now {
        return Err(ApiError::invalid("votingDeadline", "must be in the future"));
    }
    for (i, household) in input.shared_with_households.iter().enumerate() {
        if !DataManager::<Household>::exists(db, household, &Scope::all())? {
            return Err(ApiError::invalid(format!("sharedWithHouseholds[{}]", i), "household does not exist"));
        }
    }
    for (i, event) in input.events.iter().enumerate() {
        for (j, option) in event.options.iter().enumerate() {
            meal_exists(db, format!("events[{}].options[{}].mealID", i, j), &option.meal_id)?;
        }
    }
    Ok(input.into_entity(&mut ids::new_id, session.household_id(), now))
}

/// The plan must belong to the active household and still be open.
fn open_plan(db: &Database, session: &SessionContext, plan_id: &str) -> ApiResult<MealPlan> {
    let plan: MealPlan = DataManager::get(db, plan_id, &owner_scope(session.household_id()))?;
    if plan.status == MealPlanStatus::Finalized {
        return Err(finalized_error());
    }
    Ok(plan)
}

fn finalized_error() -> ApiError {
    ApiError::bad_request("MEAL_PLAN_FINALIZED", "the meal plan is already finalized")
}

fn prepare_event(
    db: &Database,
    input: MealPlanEventCreationInput,
    session: &SessionContext,
    parents: &[String],
) -> ApiResult<MealPlanEvent> {
    open_plan(db, session, &parents[0])?;
    for (j, option) in input.options.iter().enumerate() {
        meal_exists(db, format!("options[{}].mealID", j), &option.meal_id)?;
    }
    Ok(input.into_entity(&mut ids::new_id, &parents[0], time::now()))
}

fn prepare_option(
    db: &Database,
    input: MealPlanOptionCreationInput,
    session: &SessionContext,
    parents: &[String],
) -> ApiResult<MealPlanOption> {
    let plan = open_plan(db, session, &parents[0])?;
    let event = plan.events.iter().find(|e| e.id == parents[1]).ok_or(ApiError::NotFound)?;
    if event.options.iter().any(|o| o.meal_id == input.meal_id) {
        return Err(ApiError::invalid("mealID", "the event already offers this meal"));
    }
    meal_exists(db, "mealID".to_string(), &input.meal_id)?;
    Ok(input.into_entity(ids::new_id(), &parents[1], time::now()))
}

/// Votes are only ever written as whole ballots.
fn reject_single_vote(_: &Database, _: BallotInput, _: &SessionContext, _: &[String]) -> ApiResult<MealPlanOptionVote> {
    Err(ApiError::bad_request("USE_BALLOT", "votes are cast as a ballot on the event"))
}

/// Replaces the active household's ballot for one event and asks the
/// finalizer to take another look at the plan.
#[instrument(skip_all, fields(operation = "cast_ballot", trace_id = %trace.0, user_id = %session.user_id(),
    household_id = %session.household_id(), meal_plan_id = tracing::field::Empty))]
pub async fn cast_ballot(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
    JsonBody(input): JsonBody<BallotInput>,
) -> ApiResult<Response> {
    let plan_id = params::MEAL_PLAN_ID.fetch(&params)?;
    let event_id = params::MEAL_PLAN_EVENT_ID.fetch(&params)?;
    Span::current().record("meal_plan_id", plan_id.as_str());
    input.validate()?;

    let context = session.context.clone();
    let target = plan_id.clone();
    let (votes, event) = run_db(&state.db, move |db| {
        let plan: MealPlan = DataManager::get(db, &target, &visible_scope(context.household_id()))?;
        if plan.status == MealPlanStatus::Finalized {
            return Err(finalized_error());
        }
        let event = plan.events.iter().find(|e| e.id == event_id).ok_or(ApiError::NotFound)?;
        check_ballot(event, &input).map_err(|(i, e)| ApiError::invalid(e.field(i), e.to_string()))?;

        let votes =
            db.cast_ballot(&target, &event_id, context.household_id(), context.user_id(), &input.votes, time::now())?;
        let event: MealPlanEvent = DataManager::get(db, &event_id, &event_scope(&target))?;
        Ok((votes, event))
    })
    .await?;
    info!(votes = votes.len(), "ballot cast");

    // One message for the whole ballot, carrying the event with its votes.
    let cast = message_from(&session, EventType::BallotCast, event.to_change());
    service::publish(state.publishers.data_changes.as_ref(), cast).await;
    let request = message_from(&session, EventType::FinalizationRequested, MealPlan::reference(&plan_id));
    service::publish(state.publishers.finalization_requests.as_ref(), request).await;

    Ok(envelope::with_status(StatusCode::CREATED, Details::new(&trace, Some(&session.context)), votes))
}

/// Finalizes on demand. Succeeds only when every event is already
/// resolvable; otherwise nothing is written.
#[instrument(skip_all, fields(operation = "finalize", trace_id = %trace.0, user_id = %session.user_id(),
    household_id = %session.household_id(), meal_plan_id = tracing::field::Empty))]
pub async fn finalize(State(state): State<AppState>, session: Session, params: PathParams, trace: TraceId) -> ApiResult<Response> {
    let plan_id = params::MEAL_PLAN_ID.fetch(&params)?;
    Span::current().record("meal_plan_id", plan_id.as_str());

    let household = session.household_id().to_string();
    let (decision, plan) = run_db(&state.db, move |db| {
        if !DataManager::<MealPlan>::exists(db, &plan_id, &owner_scope(&household))? {
            return Err(ApiError::NotFound);
        }
        Ok(db.finalize_meal_plan(&plan_id, time::now())?)
    })
    .await?;

    match decision {
        Decision::Finalize(_) => {
            let message = DataChangeMessage::of(EventType::Finalized, &plan)
                .by_user(session.user_id())
                .in_household(plan.belongs_to_household.clone());
            service::publish(state.publishers.data_changes.as_ref(), message.clone()).await;
            service::publish(state.publishers.finalized.as_ref(), message).await;
        }
        Decision::AlreadyFinalized => {}
        Decision::Pending { open_events } => {
            return Err(ApiError::bad_request(
                "NOT_FINALIZABLE",
                format!("{} event(s) are still open for voting", open_events.len()),
            ));
        }
        Decision::Blocked { event_id } => {
            return Err(ApiError::bad_request("NOT_FINALIZABLE", format!("event {} has no options", event_id)));
        }
    }
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use supper_types::{AccountStatus, Requester};

    fn session(household: &str) -> SessionContext {
        SessionContext {
            requester: Requester { user_id: "u1".into(), account_status: AccountStatus::Good, service_roles: Vec::new() },
            active_household_id: household.into(),
            household_permissions: HashMap::new(),
        }
    }

    #[test]
    fn reads_include_shared_plans_and_writes_do_not() {
        let (read, read_params) = plans_clause(&session("h1"), Operation::Read);
        assert!(read.contains("meal_plan_shares"));
        assert_eq!(read_params, vec!["h1", "h1"]);

        let (write, write_params) = plans_clause(&session("h1"), Operation::Update);
        assert!(!write.contains("meal_plan_shares"));
        assert_eq!(write_params, vec!["h1"]);
    }

    #[test]
    fn households_retract_only_their_own_votes() {
        let parents = vec!["p1".to_string(), "e1".to_string(), "o1".to_string()];
        let archive = format!("{:?}", votes_scope(&session("h2"), &parents, Operation::Archive));
        let read = format!("{:?}", votes_scope(&session("h2"), &parents, Operation::Read));
        assert!(archive.contains("by_household"));
        assert!(!read.contains("by_household"));
    }

    #[test]
    fn plans_need_a_future_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db"), &Default::default()).unwrap();
        let input = MealPlanCreationInput {
            voting_deadline: time::now() - chrono::Duration::hours(1),
            ..Default::default()
        };
        let err = prepare_plan(&db, input, &session("h1"), &[]).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT.votingDeadline");
    }
}
