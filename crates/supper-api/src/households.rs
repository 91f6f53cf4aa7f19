//! Households and their memberships.

use axum::{extract::State, response::Response};
use supper_db::households::member_scope;
use supper_db::{DataManager, Database, HouseholdDataManager, Scope};
use supper_types::models::{
    Household, HouseholdCreationInput, HouseholdOwnershipTransferInput, HouseholdUserMembership,
    ModifyMemberPermissionsInput,
};
use supper_types::{DataChangeMessage, Entity, EventType, HouseholdPermission, HouseholdRole, SessionContext, Validate, ids, time};
use tracing::{info, instrument};

use crate::AppState;
use crate::envelope::{self, Details, JsonBody, TraceId};
use crate::error::{ApiError, ApiResult};
use crate::params::{self, PathParams, RouteBinder};
use crate::service::{self, Operation, ResourceService, bind_crud, message_from, run_db};
use crate::session::Session;

pub fn bind<R: RouteBinder>(router: R, state: &AppState) -> R {
    let svc = ResourceService::new("household", state, params::HOUSEHOLD_ID, prepare)
        .scope(scope)
        .authorize(authorize);
    let router = bind_crud(router, "/households", params::HOUSEHOLD_ID, svc);

    let household = format!("/households/{}", params::HOUSEHOLD_ID.placeholder());
    let member = format!("{}/members/{}", household, params::USER_ID.placeholder());
    router
        .post(&format!("{}/transfer", household), transfer)
        .post(&format!("{}/default", household), make_default)
        .patch(&format!("{}/permissions", member), modify_permissions)
        .delete(&member, remove_member)
}

fn scope(session: &SessionContext, _: &[String], _: Operation) -> Scope {
    member_scope(session.user_id())
}

/// Outsiders never learn the household exists; members without the needed
/// role are told they lack it.
fn require(session: &SessionContext, household_id: &str, permission: HouseholdPermission) -> ApiResult<()> {
    if !session.is_member_of(household_id) {
        return Err(ApiError::NotFound);
    }
    if !session.can(household_id, permission) {
        return Err(ApiError::forbidden("household admin role required"));
    }
    Ok(())
}

fn authorize(session: &SessionContext, op: Operation, _: &[String], id: Option<&str>) -> ApiResult<()> {
    match (op, id) {
        (Operation::Update, Some(id)) => require(session, id, HouseholdPermission::UpdateHousehold),
        (Operation::Archive, Some(id)) => require(session, id, HouseholdPermission::ArchiveHousehold),
        _ => Ok(()),
    }
}

/// A created household starts with its creator as sole admin. It does not
/// replace the creator's default household.
fn prepare(_: &Database, input: HouseholdCreationInput, session: &SessionContext, _: &[String]) -> ApiResult<Household> {
    let now = time::now();
    let id = ids::new_id();
    Ok(Household {
        id: id.clone(),
        name: input.name,
        contact_phone: input.contact_phone,
        belongs_to_user: session.user_id().to_string(),
        members: vec![HouseholdUserMembership {
            id: ids::new_id(),
            belongs_to_household: id,
            belongs_to_user: session.user_id().to_string(),
            role: HouseholdRole::Admin,
            default_household: false,
            created_at: now,
            ..Default::default()
        }],
        created_at: now,
        ..Default::default()
    })
}

fn load(db: &Database, household_id: &str) -> ApiResult<Household> {
    Ok(DataManager::get(db, household_id, &Scope::all())?)
}

#[instrument(skip_all, fields(operation = "transfer_household", user_id = %session.user_id()))]
pub async fn transfer(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
    JsonBody(input): JsonBody<HouseholdOwnershipTransferInput>,
) -> ApiResult<Response> {
    let household_id = params::HOUSEHOLD_ID.fetch(&params)?;
    require(&session, &household_id, HouseholdPermission::TransferHousehold)?;
    input.validate()?;

    let household = run_db(&state.db, move |db| {
        db.transfer_ownership(&household_id, &input.current_owner, &input.new_owner)?;
        load(db, &household_id)
    })
    .await?;
    info!(household_id = %household.id, new_owner = %household.belongs_to_user, "household ownership transferred");

    let message = message_from(&session, EventType::OwnershipTransferred, household.to_change());
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), household))
}

pub async fn modify_permissions(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
    JsonBody(input): JsonBody<ModifyMemberPermissionsInput>,
) -> ApiResult<Response> {
    let household_id = params::HOUSEHOLD_ID.fetch(&params)?;
    let user_id = params::USER_ID.fetch(&params)?;
    require(&session, &household_id, HouseholdPermission::ModifyMemberPermissions)?;
    input.validate()?;

    let household = run_db(&state.db, move |db| {
        let household = load(db, &household_id)?;
        if household.belongs_to_user == user_id && input.new_role != HouseholdRole::Admin {
            return Err(ApiError::invalid("newRole", "the owner must remain an admin"));
        }
        db.set_member_role(&household_id, &user_id, input.new_role)?;
        load(db, &household_id)
    })
    .await?;

    let message = message_from(&session, EventType::MemberPermissionsChanged, household.to_change());
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), household))
}

/// Members may always leave; removing someone else takes the permission.
#[instrument(skip_all, fields(operation = "remove_member", user_id = %session.user_id()))]
pub async fn remove_member(State(state): State<AppState>, session: Session, params: PathParams) -> ApiResult<Response> {
    let household_id = params::HOUSEHOLD_ID.fetch(&params)?;
    let user_id = params::USER_ID.fetch(&params)?;
    if user_id == session.user_id() {
        if !session.is_member_of(&household_id) {
            return Err(ApiError::NotFound);
        }
    } else {
        require(&session, &household_id, HouseholdPermission::RemoveMembers)?;
    }

    let target = household_id.clone();
    let emptied = run_db(&state.db, move |db| Ok(db.remove_member(&target, &user_id)?)).await?;

    let publisher = state.publishers.data_changes.as_ref();
    let removed = message_from(&session, EventType::MemberRemoved, Household::reference(&household_id));
    service::publish(publisher, removed).await;
    if emptied {
        info!(household_id = %household_id, "last member left, household archived");
        let archived = message_from(&session, EventType::Archived, Household::reference(&household_id));
        service::publish(publisher, archived).await;
    }
    Ok(envelope::no_content())
}

pub async fn make_default(State(state): State<AppState>, session: Session, params: PathParams) -> ApiResult<Response> {
    let household_id = params::HOUSEHOLD_ID.fetch(&params)?;
    if !session.is_member_of(&household_id) {
        return Err(ApiError::NotFound);
    }

    let user_id = session.user_id().to_string();
    let membership = run_db(&state.db, move |db| {
        db.set_default_household(&user_id, &household_id)?;
        db.memberships_for_user(&user_id)?
            .into_iter()
            .find(|m| m.belongs_to_household == household_id)
            .ok_or(ApiError::NotFound)
    })
    .await?;

    let message = DataChangeMessage::of(EventType::Updated, &membership)
        .by_user(session.user_id())
        .in_household(session.household_id());
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::no_content())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use supper_types::{AccountStatus, Requester, ServiceRole};

    fn session(role: Option<HouseholdRole>) -> SessionContext {
        let mut household_permissions = HashMap::new();
        if let Some(role) = role {
            household_permissions.insert("h1".to_string(), role);
        }
        SessionContext {
            requester: Requester {
                user_id: "u1".into(),
                account_status: AccountStatus::Good,
                service_roles: vec![ServiceRole::ServiceUser],
            },
            active_household_id: "h0".into(),
            household_permissions,
        }
    }

    #[test]
    fn outsiders_get_not_found_and_members_get_forbidden() {
        let outsider = authorize(&session(None), Operation::Update, &[], Some("h1")).unwrap_err();
        assert!(matches!(outsider, ApiError::NotFound));

        let member = authorize(&session(Some(HouseholdRole::Member)), Operation::Archive, &[], Some("h1")).unwrap_err();
        assert!(matches!(member, ApiError::Forbidden(_)));

        assert!(authorize(&session(Some(HouseholdRole::Admin)), Operation::Update, &[], Some("h1")).is_ok());
        assert!(authorize(&session(None), Operation::Create, &[], None).is_ok());
    }

    #[test]
    fn creator_becomes_the_admin_of_a_new_household() {
        let (_dir, db) = open_db();
        let input = HouseholdCreationInput { name: "Cabin".into(), contact_phone: None };
        let household = prepare(&db, input, &session(None), &[]).unwrap();
        assert_eq!(household.belongs_to_user, "u1");
        assert_eq!(household.members.len(), 1);
        assert_eq!(household.members[0].role, HouseholdRole::Admin);
        assert!(!household.members[0].default_household);
    }

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db"), &Default::default()).unwrap();
        (dir, db)
    }
}
