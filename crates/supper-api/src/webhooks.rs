//! Household webhooks. Members may look; only household admins create or
//! remove them.

use std::sync::Arc;

use axum::{extract::State, response::Response};
use supper_db::webhooks::household_scope;
use supper_db::{DataManager, Database, Scope, WebhookDataManager};
use supper_types::models::{Webhook, WebhookCreationInput};
use supper_types::{HouseholdPermission, SessionContext, ids, time};

use crate::AppState;
use crate::envelope::{self, Details, TraceId};
use crate::error::{ApiError, ApiResult};
use crate::params::{self, PathParams, RouteBinder};
use crate::service::{Operation, ResourceService, bind_collection, bind_item, run_db};
use crate::session::Session;

pub fn bind<R: RouteBinder>(router: R, state: &AppState) -> R {
    let item = format!("/webhooks/{}", params::WEBHOOK_ID.placeholder());
    let svc = Arc::new(
        ResourceService::new("webhook", state, params::WEBHOOK_ID, prepare)
            .scope(scope)
            .authorize(authorize),
    );
    let router = bind_collection(router, "/webhooks", &svc);
    let router = bind_item(router, &item, &svc);
    router.get(&format!("{}/delivery_failures", item), delivery_failures)
}

fn scope(session: &SessionContext, _: &[String], _: Operation) -> Scope {
    household_scope(session.household_id())
}

fn authorize(session: &SessionContext, op: Operation, _: &[String], _: Option<&str>) -> ApiResult<()> {
    if op.mutates() && !session.can(session.household_id(), HouseholdPermission::ManageWebhooks) {
        return Err(ApiError::forbidden("household admin role required"));
    }
    Ok(())
}

fn prepare(_: &Database, input: WebhookCreationInput, session: &SessionContext, _: &[String]) -> ApiResult<Webhook> {
    Ok(input.into_entity(ids::new_id(), session.household_id(), time::now()))
}

/// Deliveries to this webhook that exhausted their retries, newest first.
pub async fn delivery_failures(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
) -> ApiResult<Response> {
    let id = params::WEBHOOK_ID.fetch(&params)?;
    let household = session.household_id().to_string();
    let failures = run_db(&state.db, move |db| {
        let _: Webhook = DataManager::get(db, &id, &household_scope(&household))?;
        let mut failures = db.delivery_failures(&id)?;
        failures.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(failures)
    })
    .await?;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use supper_types::{AccountStatus, HouseholdRole, Requester};

    fn session(role: HouseholdRole) -> SessionContext {
        SessionContext {
            requester: Requester { user_id: "u1".into(), account_status: AccountStatus::Good, service_roles: Vec::new() },
            active_household_id: "h1".into(),
            household_permissions: HashMap::from([("h1".to_string(), role)]),
        }
    }

    #[test]
    fn members_read_and_admins_write() {
        let member = session(HouseholdRole::Member);
        assert!(authorize(&member, Operation::List, &[], None).is_ok());
        assert!(matches!(authorize(&member, Operation::Create, &[], None), Err(ApiError::Forbidden(_))));
        assert!(authorize(&session(HouseholdRole::Admin), Operation::Archive, &[], Some("w1")).is_ok());
    }
}
