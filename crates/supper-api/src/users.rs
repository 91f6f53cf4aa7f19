//! User accounts: self-service reads, admin listing and search, account
//! status administration and avatars.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, header},
    response::Response,
};
use supper_db::valid::SEARCH_LIMIT;
use supper_db::{DataManager, Scope, SearchableDataManager, UserDataManager};
use supper_types::models::{User, UserAccountStatusUpdateInput};
use supper_types::{DataChangeMessage, Entity, EventType, SessionContext, Validate};
use tracing::{Span, info, instrument};

use crate::AppState;
use crate::envelope::{self, Details, JsonBody, TraceId};
use crate::error::{ApiError, ApiResult};
use crate::params::{self, Filter, PathParams, RouteBinder, SearchQuery};
use crate::service::{self, message_from, run_db};
use crate::session::Session;

pub fn bind<R: RouteBinder>(router: R) -> R {
    router
        .get("/users", list)
        .get("/users/self", read_self)
        .delete("/users/self", archive_self)
        .get("/users/search", search)
        .get(&format!("/users/{}", params::USER_ID.placeholder()), read)
        .post("/users/avatar/upload", upload_avatar)
        .post("/admin/users/status", update_account_status)
}

fn require_admin(session: &SessionContext) -> ApiResult<()> {
    if session.is_service_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("service admin role required"))
    }
}

pub async fn read_self(State(state): State<AppState>, session: Session, trace: TraceId) -> ApiResult<Response> {
    let user_id = session.user_id().to_string();
    let user: User = run_db(&state.db, move |db| Ok(DataManager::get(db, &user_id, &Scope::all())?)).await?;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), user))
}

/// Users may read themselves; service admins may read anyone. Everyone
/// else gets 404.
pub async fn read(
    State(state): State<AppState>,
    session: Session,
    params: PathParams,
    trace: TraceId,
) -> ApiResult<Response> {
    let user_id = params::USER_ID.fetch(&params)?;
    if user_id != session.user_id() && !session.is_service_admin() {
        return Err(ApiError::NotFound);
    }
    let user: User = run_db(&state.db, move |db| Ok(DataManager::get(db, &user_id, &Scope::all())?)).await?;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), user))
}

pub async fn list(State(state): State<AppState>, session: Session, trace: TraceId, filter: Filter) -> ApiResult<Response> {
    require_admin(&session)?;
    let filter = filter.0;
    let page = run_db(&state.db, move |db| Ok(DataManager::<User>::list(db, &Scope::all(), &filter)?)).await?;
    Ok(envelope::with_page(Details::new(&trace, Some(&session.context)), page))
}

pub async fn search(
    State(state): State<AppState>,
    session: Session,
    trace: TraceId,
    query: SearchQuery,
) -> ApiResult<Response> {
    require_admin(&session)?;
    let users = run_db(&state.db, move |db| {
        Ok(SearchableDataManager::<User>::search(db, query.q.trim(), SEARCH_LIMIT)?)
    })
    .await?;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), users))
}

#[instrument(skip_all, fields(operation = "archive_self", user_id = %session.user_id()))]
pub async fn archive_self(State(state): State<AppState>, session: Session) -> ApiResult<Response> {
    let user_id = session.user_id().to_string();
    run_db(&state.db, move |db| Ok(DataManager::<User>::archive(db, &user_id, &Scope::all())?)).await?;

    let message = message_from(&session, EventType::Archived, User::reference(session.user_id()));
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    info!("account archived by its owner");
    Ok(envelope::no_content())
}

#[instrument(skip_all, fields(operation = "update_account_status", user_id = %session.user_id(), target = tracing::field::Empty))]
pub async fn update_account_status(
    State(state): State<AppState>,
    session: Session,
    JsonBody(input): JsonBody<UserAccountStatusUpdateInput>,
) -> ApiResult<Response> {
    require_admin(&session)?;
    input.validate()?;
    Span::current().record("target", input.target_user_id.as_str());
    if input.target_user_id == session.user_id() {
        return Err(ApiError::invalid("targetUserID", "admins cannot change their own status"));
    }

    let target = input.target_user_id.clone();
    run_db(&state.db, move |db| {
        Ok(db.set_account_status(&input.target_user_id, input.new_status, &input.reason)?)
    })
    .await?;

    let message = message_from(&session, EventType::AccountStatusChanged, User::reference(&target));
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::no_content())
}

fn image_extension(headers: &HeaderMap) -> Option<&'static str> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    match content_type.split(';').next()?.trim().to_ascii_lowercase().as_str() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Stores the raw request body as the caller's avatar.
#[instrument(skip_all, fields(operation = "upload_avatar", user_id = %session.user_id(), size = body.len()))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    session: Session,
    trace: TraceId,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let extension = image_extension(&headers).ok_or(ApiError::UnsupportedContentType)?;
    if body.is_empty() {
        return Err(ApiError::invalid("avatar", "must not be empty"));
    }
    if body.len() > state.uploads.max_size() {
        return Err(ApiError::PayloadTooLarge);
    }

    let key = state
        .uploads
        .save("avatars", session.user_id(), &format!("avatar.{}", extension), &body)
        .await?;
    let user_id = session.user_id().to_string();
    let user: User = run_db(&state.db, move |db| {
        db.set_avatar(&user_id, &key)?;
        Ok(DataManager::get(db, &user_id, &Scope::all())?)
    })
    .await?;

    let message = DataChangeMessage::of(EventType::AvatarUploaded, &user)
        .by_user(session.user_id())
        .in_household(session.household_id());
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn only_known_image_types_are_accepted() {
        let mut headers = HeaderMap::new();
        assert_eq!(image_extension(&headers), None);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
        assert_eq!(image_extension(&headers), Some("jpg"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/svg+xml"));
        assert_eq!(image_extension(&headers), None);
    }
}
