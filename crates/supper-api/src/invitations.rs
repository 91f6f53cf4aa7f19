//! Household invitations. The token travels to the invitee out of band and
//! is spent by whichever transition happens first.

use axum::{extract::State, http::StatusCode, response::Response};
use chrono::Duration;
use supper_db::{DataManager, HouseholdInvitationDataManager, Scope};
use supper_types::models::{
    HouseholdInvitation, HouseholdInvitationCreationInput, HouseholdInvitationUpdateInput, INVITATION_LIFETIME_DAYS,
    InvitationStatus, User,
};
use supper_types::{EventType, HouseholdPermission, SessionContext, Validate, ids, time};
use tracing::{info, instrument};

use crate::AppState;
use crate::envelope::{self, Details, JsonBody, TraceId};
use crate::error::{ApiError, ApiResult};
use crate::params::{self, Filter, PathParams, RouteBinder};
use crate::service::{self, message_from, run_db};
use crate::session::{Session, new_session_token};

pub fn bind<R: RouteBinder>(router: R) -> R {
    let item = format!("/household_invitations/{}", params::HOUSEHOLD_INVITATION_ID.placeholder());
    router
        .post(&format!("/households/{}/invite", params::HOUSEHOLD_ID.placeholder()), invite)
        .get("/household_invitations/received", received)
        .get("/household_invitations/sent", sent)
        .get(&item, read)
        .put(&format!("{}/accept", item), accept)
        .put(&format!("{}/reject", item), reject)
        .put(&format!("{}/cancel", item), cancel)
}

#[instrument(skip_all, fields(operation = "invite", user_id = %session.user_id(), household_id = tracing::field::Empty))]
pub async fn invite(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
    JsonBody(input): JsonBody<HouseholdInvitationCreationInput>,
) -> ApiResult<Response> {
    let household_id = params::HOUSEHOLD_ID.fetch(&params)?;
    tracing::Span::current().record("household_id", household_id.as_str());
    if !session.is_member_of(&household_id) {
        return Err(ApiError::NotFound);
    }
    if !session.can(&household_id, HouseholdPermission::InviteMembers) {
        return Err(ApiError::forbidden("household admin role required"));
    }
    input.validate()?;

    let now = time::now();
    let invitation = HouseholdInvitation {
        id: ids::new_id(),
        from_user: session.user_id().to_string(),
        to_user: None,
        to_email: input.to_email.trim().to_lowercase(),
        to_name: input.to_name,
        destination_household: household_id,
        status: InvitationStatus::Pending,
        note: input.note,
        token: new_session_token(),
        expires_at: now + Duration::days(INVITATION_LIFETIME_DAYS),
        created_at: now,
        ..Default::default()
    };
    let stored = invitation.clone();
    run_db(&state.db, move |db| Ok(db.create(&stored)?)).await?;
    info!(invitation_id = %invitation.id, "invitation sent");

    let message = message_from(&session, EventType::Created, supper_types::Entity::to_change(&invitation));
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::with_status(StatusCode::CREATED, Details::new(&trace, Some(&session.context)), invitation))
}

/// The sender, the addressee and members of the destination household may
/// see an invitation. Everyone else gets 404.
fn visible_to(invitation: &HouseholdInvitation, session: &SessionContext, email: Option<&str>) -> bool {
    invitation.from_user == session.user_id()
        || invitation.to_user.as_deref() == Some(session.user_id())
        || email.is_some_and(|e| !invitation.to_email.is_empty() && invitation.to_email.eq_ignore_ascii_case(e))
        || session.is_member_of(&invitation.destination_household)
}

fn own_email(db: &supper_db::Database, user_id: &str) -> ApiResult<Option<String>> {
    let user: User = DataManager::get(db, user_id, &Scope::all())?;
    Ok(user.email_address)
}

pub async fn read(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
) -> ApiResult<Response> {
    let id = params::HOUSEHOLD_INVITATION_ID.fetch(&params)?;
    let user_id = session.user_id().to_string();
    let (invitation, email) = run_db(&state.db, move |db| {
        let invitation: HouseholdInvitation = DataManager::get(db, &id, &Scope::all())?;
        Ok((invitation, own_email(db, &user_id)?))
    })
    .await?;

    if !visible_to(&invitation, &session, email.as_deref()) {
        return Err(ApiError::NotFound);
    }
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), invitation))
}

pub async fn received(State(state): State<AppState>, session: Session, trace: TraceId, filter: Filter) -> ApiResult<Response> {
    let user_id = session.user_id().to_string();
    let filter = filter.0;
    let page = run_db(&state.db, move |db| {
        let email = own_email(db, &user_id)?;
        Ok(db.invitations_received(&user_id, email.as_deref(), &filter)?)
    })
    .await?;
    Ok(envelope::with_page(Details::new(&trace, Some(&session.context)), page))
}

pub async fn sent(State(state): State<AppState>, session: Session, trace: TraceId, filter: Filter) -> ApiResult<Response> {
    let user_id = session.user_id().to_string();
    let filter = filter.0;
    let page = run_db(&state.db, move |db| Ok(db.invitations_sent(&user_id, &filter)?)).await?;
    Ok(envelope::with_page(Details::new(&trace, Some(&session.context)), page))
}

pub async fn accept(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
    JsonBody(input): JsonBody<HouseholdInvitationUpdateInput>,
) -> ApiResult<Response> {
    resolve(state, session, params, trace, input, InvitationStatus::Accepted).await
}

pub async fn reject(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
    JsonBody(input): JsonBody<HouseholdInvitationUpdateInput>,
) -> ApiResult<Response> {
    resolve(state, session, params, trace, input, InvitationStatus::Rejected).await
}

pub async fn cancel(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
    JsonBody(input): JsonBody<HouseholdInvitationUpdateInput>,
) -> ApiResult<Response> {
    resolve(state, session, params, trace, input, InvitationStatus::Cancelled).await
}

fn event_for(status: InvitationStatus) -> EventType {
    match status {
        InvitationStatus::Accepted => EventType::InvitationAccepted,
        InvitationStatus::Rejected => EventType::InvitationRejected,
        _ => EventType::InvitationCancelled,
    }
}

/// Only the sender or an admin of the destination household may cancel.
/// Anyone holding the token may accept or reject.
#[instrument(skip_all, fields(operation = "resolve_invitation", user_id = %session.user_id(), status = %status))]
async fn resolve(
    state: AppState,
    session: Session,
    params: PathParams,
    trace: TraceId,
    input: HouseholdInvitationUpdateInput,
    status: InvitationStatus,
) -> ApiResult<Response> {
    let id = params::HOUSEHOLD_INVITATION_ID.fetch(&params)?;
    input.validate()?;

    let context = session.context.clone();
    let invitation = run_db(&state.db, move |db| {
        let pending: HouseholdInvitation = DataManager::get(db, &id, &Scope::all().eq("token", input.token.as_str()))?;
        if status == InvitationStatus::Cancelled
            && pending.from_user != context.user_id()
            && !context.can(&pending.destination_household, HouseholdPermission::InviteMembers)
        {
            return Err(ApiError::forbidden("only the sender may cancel an invitation"));
        }
        if status == InvitationStatus::Accepted && context.is_member_of(&pending.destination_household) {
            return Err(ApiError::invalid("token", "already a member of this household"));
        }
        Ok(db.resolve_invitation(&id, &input.token, status, &input.note, context.user_id(), time::now())?)
    })
    .await?;
    info!(invitation_id = %invitation.id, "invitation {}", invitation.status);

    let message = message_from(&session, event_for(status), supper_types::Entity::to_change(&invitation));
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), invitation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use supper_types::{AccountStatus, HouseholdRole, Requester};

    fn session(user_id: &str, households: &[&str]) -> SessionContext {
        SessionContext {
            requester: Requester {
                user_id: user_id.into(),
                account_status: AccountStatus::Good,
                service_roles: Vec::new(),
            },
            active_household_id: households.first().copied().unwrap_or("h0").into(),
            household_permissions: households.iter().map(|h| (h.to_string(), HouseholdRole::Member)).collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn visibility_covers_sender_addressee_and_household() {
        let invitation = HouseholdInvitation {
            from_user: "sender".into(),
            to_email: "bob@example.com".into(),
            destination_household: "h1".into(),
            ..Default::default()
        };
        assert!(visible_to(&invitation, &session("sender", &["h9"]), None));
        assert!(visible_to(&invitation, &session("bob", &["h2"]), Some("Bob@Example.com")));
        assert!(visible_to(&invitation, &session("carol", &["h1"]), None));
        assert!(!visible_to(&invitation, &session("mallory", &["h2"]), Some("mallory@example.com")));
    }

    #[test]
    fn each_transition_has_its_own_event() {
        assert_eq!(event_for(InvitationStatus::Accepted), EventType::InvitationAccepted);
        assert_eq!(event_for(InvitationStatus::Rejected), EventType::InvitationRejected);
        assert_eq!(event_for(InvitationStatus::Cancelled), EventType::InvitationCancelled);
    }
}
