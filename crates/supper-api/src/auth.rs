//! Account lifecycle: signup with two-factor provisioning, login and logout,
//! credential changes and switching the active household.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{extract::State, http::StatusCode, response::Response};
use axum_extra::extract::cookie::CookieJar;
use chrono::Duration;
use supper_db::{
    DataManager, Database, DbError, HouseholdInvitationDataManager, Scope, SessionDataManager, SessionRecord,
    UserDataManager,
};
use supper_types::models::{
    ChangeActiveHouseholdInput, Household, HouseholdInvitation, HouseholdUserMembership, InvitationStatus,
    LoginInput, PasswordUpdateInput, TotpSecretRefreshInput, TotpSecretRefreshResponse, TotpSecretVerificationInput,
    User, UserCreationResponse, UserRegistrationInput, UserStatusResponse,
};
use supper_types::{
    AccountStatus, DataChangeMessage, Entity, EventType, HouseholdRole, QueryFilter, ServiceRole, Validate,
    ValidationError, ids, time,
};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::envelope::{self, Details, JsonBody, TraceId};
use crate::error::{ApiError, ApiResult};
use crate::params::RouteBinder;
use crate::service::{self, run_db};
use crate::session::{self, AuthConfig, Session};

const TOTP_ISSUER: &str = "supper";

pub fn bind<R: RouteBinder>(router: R) -> R {
    router
        .post("/users", signup)
        .post("/users/totp_secret/verify", verify_totp_secret)
        .post("/login", login)
        .post("/logout", logout)
        .get("/auth/status", status)
        .post("/password/update", update_password)
        .post("/totp_secret/new", new_totp_secret)
        .post("/users/household/select", select_household)
}

// -- Credentials --

pub(crate) fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("hashing password: {}", e)))
}

pub(crate) fn password_matches(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

fn totp_for(secret: &str, username: &str) -> ApiResult<TOTP> {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("unreadable two factor secret: {:?}", e)))?;
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, Some(TOTP_ISSUER.to_string()), username.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("building TOTP: {}", e)))
}

/// A fresh base32 secret and the `data:` URL of its provisioning QR code.
fn provision_two_factor(username: &str) -> ApiResult<(String, String)> {
    let bytes = Secret::generate_secret()
        .to_bytes()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("generating two factor secret: {:?}", e)))?;
    let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, Some(TOTP_ISSUER.to_string()), username.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("building TOTP: {}", e)))?;
    let qr = totp
        .get_qr_base64()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("rendering QR code: {}", e)))?;
    Ok((totp.get_secret_base32(), format!("data:image/png;base64,{}", qr)))
}

pub(crate) fn totp_matches(user: &User, token: &str) -> ApiResult<bool> {
    let totp = totp_for(&user.two_factor_secret, &user.username)?;
    totp.check_current(token)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("system clock before the epoch: {}", e)))
}

/// Password, and the TOTP code once two-factor is active.
fn check_credentials(user: &User, password: &str, totp_token: Option<&str>, password_field: &str) -> ApiResult<()> {
    if !password_matches(password, &user.hashed_password) {
        return Err(ApiError::invalid(password_field, "does not match"));
    }
    if user.two_factor_verified() {
        let token = totp_token.ok_or_else(|| ApiError::invalid("totpToken", "required for this account"))?;
        if !totp_matches(user, token)? {
            return Err(ApiError::invalid("totpToken", "does not match"));
        }
    }
    Ok(())
}

fn check_signup_policy(config: &AuthConfig, input: &UserRegistrationInput) -> Result<(), ValidationError> {
    if input.username.chars().count() < config.minimum_username_length {
        return Err(ValidationError::new(
            "username",
            format!("must be at least {} characters", config.minimum_username_length),
        ));
    }
    if input.password.chars().count() < config.minimum_password_length {
        return Err(ValidationError::new(
            "password",
            format!("must be at least {} characters", config.minimum_password_length),
        ));
    }
    Ok(())
}

/// A user's own household with them as its admin, the way signup makes it.
fn own_household(user: &User) -> Household {
    let household_id = ids::new_id();
    Household {
        id: household_id.clone(),
        name: format!("{}'s household", user.username),
        belongs_to_user: user.id.clone(),
        members: vec![HouseholdUserMembership {
            id: ids::new_id(),
            belongs_to_household: household_id,
            belongs_to_user: user.id.clone(),
            role: HouseholdRole::Admin,
            default_household: true,
            created_at: user.created_at,
            ..Default::default()
        }],
        created_at: user.created_at,
        ..Default::default()
    }
}

/// The invitation a signup carries, checked before the account exists.
fn pending_invitation(db: &Database, id: &str, token: &str) -> ApiResult<HouseholdInvitation> {
    let invitation: HouseholdInvitation = DataManager::get(db, id, &Scope::all().eq("token", token))?;
    if invitation.status != InvitationStatus::Pending {
        return Err(ApiError::invalid("invitationID", "invitation is no longer pending"));
    }
    if invitation.is_expired(time::now()) {
        return Err(ApiError::invalid("invitationID", "invitation has expired"));
    }
    Ok(invitation)
}

#[instrument(skip_all, fields(operation = "signup", trace_id = %trace.0, user_id = tracing::field::Empty))]
pub async fn signup(
    State(state): State<AppState>,
    trace: TraceId,
    JsonBody(input): JsonBody<UserRegistrationInput>,
) -> ApiResult<Response> {
    if !state.config.auth.enable_signup {
        return Err(ApiError::forbidden("signup is disabled"));
    }
    input.validate()?;
    check_signup_policy(&state.config.auth, &input)?;

    let (secret, qr_code) = provision_two_factor(&input.username)?;
    let user = User {
        id: ids::new_id(),
        username: input.username.clone(),
        email_address: input.email_address.clone(),
        two_factor_secret: secret.clone(),
        service_roles: vec![ServiceRole::ServiceUser],
        account_status: AccountStatus::Unverified,
        created_at: time::now(),
        ..Default::default()
    };
    tracing::Span::current().record("user_id", user.id.as_str());
    let household = own_household(&user);

    let (user, household, joined) = run_db(&state.db, move |db| {
        let invitation = match (&input.invitation_id, &input.invitation_token) {
            (Some(id), Some(token)) => Some(pending_invitation(db, id, token)?),
            _ => None,
        };
        let mut user = user;
        user.hashed_password = hash_password(&input.password)?;
        let joined = match invitation {
            Some(invitation) => Some(db.create_user_from_invitation(
                &user,
                &household,
                &invitation.id,
                &invitation.token,
                time::now(),
            )?),
            None => {
                db.create_user(&user, &household)?;
                None
            }
        };
        Ok((user, household, joined))
    })
    .await?;

    let publisher = state.publishers.data_changes.as_ref();
    service::publish(publisher, DataChangeMessage::of(EventType::Created, &user).by_user(&user.id).in_household(&household.id)).await;
    service::publish(publisher, DataChangeMessage::of(EventType::Created, &household).by_user(&user.id).in_household(&household.id)).await;
    if let Some(invitation) = &joined {
        let message = DataChangeMessage::of(EventType::InvitationAccepted, invitation)
            .by_user(&user.id)
            .in_household(&invitation.destination_household);
        service::publish(publisher, message).await;
    }
    info!(username = %user.username, "account created");

    let response = UserCreationResponse {
        id: user.id,
        username: user.username,
        email_address: user.email_address,
        account_status: user.account_status,
        two_factor_secret: secret,
        qr_code,
        household_id: household.id,
        created_at: user.created_at,
    };
    Ok(envelope::with_status(StatusCode::CREATED, Details::new(&trace, None), response))
}

#[instrument(skip_all, fields(operation = "verify_totp_secret", user_id = %input.user_id))]
pub async fn verify_totp_secret(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<TotpSecretVerificationInput>,
) -> ApiResult<Response> {
    input.validate()?;
    let user = run_db(&state.db, move |db| {
        let user: User = DataManager::get(db, &input.user_id, &Scope::all())?;
        if user.two_factor_verified() {
            return Err(ApiError::invalid("userID", "two factor secret already verified"));
        }
        if !totp_matches(&user, &input.totp_token)? {
            return Err(ApiError::invalid("totpToken", "does not match"));
        }
        db.mark_two_factor_verified(&user.id, time::now())?;
        Ok(user)
    })
    .await?;

    let message = DataChangeMessage::new(EventType::TwoFactorSecretVerified, User::reference(&user.id)).by_user(&user.id);
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::no_content())
}

/// Banned and terminated accounts are archived, so the plain lookup misses
/// them; look again among archived rows to tell them apart from unknowns.
fn find_login(db: &Database, username: &str) -> ApiResult<User> {
    match db.get_user_by_username(username) {
        Ok(user) => Ok(user),
        Err(DbError::NotFound) => {
            let filter = QueryFilter { include_archived: true, limit: Some(1), ..Default::default() };
            let page = DataManager::<User>::list(db, &Scope::all().eq("username", username), &filter)?;
            page.data.into_iter().next().ok_or(ApiError::Unauthenticated)
        }
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip_all, fields(operation = "login", trace_id = %trace.0, username = %input.username))]
pub async fn login(
    State(state): State<AppState>,
    trace: TraceId,
    jar: CookieJar,
    JsonBody(input): JsonBody<LoginInput>,
) -> ApiResult<(CookieJar, Response)> {
    input.validate()?;
    let cookie_token = session::new_session_token();
    let token_hash = session::digest(&cookie_token);
    let lifetime = Duration::from_std(state.config.auth.session_lifetime).unwrap_or(Duration::days(7));

    let (user, context) = run_db(&state.db, move |db| {
        let user = find_login(db, &input.username)?;
        if !password_matches(&input.password, &user.hashed_password) {
            return Err(ApiError::Unauthenticated);
        }
        if !user.account_status.may_authenticate() {
            return Err(ApiError::forbidden(format!("account is {}", user.account_status)));
        }
        if user.two_factor_verified() {
            let token = input
                .totp_token
                .as_deref()
                .ok_or_else(|| ApiError::invalid("totpToken", "required for this account"))?;
            if !totp_matches(&user, token)? {
                return Err(ApiError::Unauthenticated);
            }
        }
        let context = db.session_context(&user.id, None)?.ok_or(ApiError::Unauthenticated)?;

        let now = time::now();
        db.create_session(&SessionRecord {
            token_hash,
            user_id: user.id.clone(),
            household_id: context.household_id().to_string(),
            expires_at: now + lifetime,
            created_at: now,
        })?;
        Ok((user, context))
    })
    .await
    .inspect_err(|e| {
        if matches!(e, ApiError::Unauthenticated) {
            warn!("login rejected");
        }
    })?;

    let token = session::create_token(&state.config.auth, &user.id, context.household_id())?;
    let message = DataChangeMessage::new(EventType::LoggedIn, User::reference(&user.id))
        .by_user(&user.id)
        .in_household(context.household_id());
    service::publish(state.publishers.data_changes.as_ref(), message).await;

    let response = UserStatusResponse {
        user_id: user.id,
        account_status: user.account_status,
        active_household_id: context.household_id().to_string(),
        user_is_authenticated: true,
        token: Some(token),
    };
    let jar = jar.add(session::session_cookie(&state.config.auth, cookie_token));
    Ok((jar, envelope::with_data(Details::new(&trace, Some(&context)), response)))
}

#[instrument(skip_all, fields(operation = "logout", user_id = %session.user_id()))]
pub async fn logout(State(state): State<AppState>, session: Session, jar: CookieJar) -> ApiResult<(CookieJar, Response)> {
    if let Some(hash) = session.cookie_hash.clone() {
        run_db(&state.db, move |db| Ok(db.delete_session(&hash)?)).await?;
    }
    let message = DataChangeMessage::new(EventType::LoggedOut, User::reference(session.user_id()))
        .by_user(session.user_id())
        .in_household(session.household_id());
    service::publish(state.publishers.data_changes.as_ref(), message).await;

    let jar = jar.remove(session::expired_cookie(&state.config.auth));
    Ok((jar, envelope::no_content()))
}

pub async fn status(session: Session, trace: TraceId) -> ApiResult<Response> {
    let response = UserStatusResponse {
        user_id: session.user_id().to_string(),
        account_status: session.requester.account_status,
        active_household_id: session.household_id().to_string(),
        user_is_authenticated: true,
        token: None,
    };
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), response))
}

#[instrument(skip_all, fields(operation = "update_password", user_id = %session.user_id()))]
pub async fn update_password(
    State(state): State<AppState>,
    session: Session,
    JsonBody(input): JsonBody<PasswordUpdateInput>,
) -> ApiResult<Response> {
    input.validate()?;
    if input.new_password.chars().count() < state.config.auth.minimum_password_length {
        return Err(ApiError::invalid(
            "newPassword",
            format!("must be at least {} characters", state.config.auth.minimum_password_length),
        ));
    }
    let user_id = session.user_id().to_string();
    run_db(&state.db, move |db| {
        let user: User = DataManager::get(db, &user_id, &Scope::all())?;
        check_credentials(&user, &input.current_password, input.totp_token.as_deref(), "currentPassword")?;
        db.update_password(&user.id, &hash_password(&input.new_password)?)?;
        Ok(())
    })
    .await?;

    let message = DataChangeMessage::new(EventType::PasswordChanged, User::reference(session.user_id()))
        .by_user(session.user_id())
        .in_household(session.household_id());
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::no_content())
}

/// Replaces the two-factor secret. The new secret starts unverified.
#[instrument(skip_all, fields(operation = "new_totp_secret", user_id = %session.user_id()))]
pub async fn new_totp_secret(
    State(state): State<AppState>,
    session: Session,
    trace: TraceId,
    JsonBody(input): JsonBody<TotpSecretRefreshInput>,
) -> ApiResult<Response> {
    input.validate()?;
    let user_id = session.user_id().to_string();
    let response = run_db(&state.db, move |db| {
        let user: User = DataManager::get(db, &user_id, &Scope::all())?;
        check_credentials(&user, &input.current_password, input.totp_token.as_deref(), "currentPassword")?;
        let (secret, qr_code) = provision_two_factor(&user.username)?;
        db.set_two_factor_secret(&user.id, &secret, None)?;
        Ok(TotpSecretRefreshResponse { two_factor_secret: secret, qr_code })
    })
    .await?;

    let message = DataChangeMessage::new(EventType::TwoFactorSecretChanged, User::reference(session.user_id()))
        .by_user(session.user_id())
        .in_household(session.household_id());
    service::publish(state.publishers.data_changes.as_ref(), message).await;
    Ok(envelope::with_data(Details::new(&trace, Some(&session.context)), response))
}

/// Switches the active household. Bearer callers get a new token; cookie
/// sessions are updated in place.
#[instrument(skip_all, fields(operation = "select_household", user_id = %session.user_id()))]
pub async fn select_household(
    State(state): State<AppState>,
    session: Session,
    trace: TraceId,
    JsonBody(input): JsonBody<ChangeActiveHouseholdInput>,
) -> ApiResult<Response> {
    input.validate()?;
    if !session.is_member_of(&input.household_id) {
        return Err(ApiError::NotFound);
    }
    if let Some(hash) = session.cookie_hash.clone() {
        let household_id = input.household_id.clone();
        run_db(&state.db, move |db| Ok(db.set_session_household(&hash, &household_id)?)).await?;
    }
    let token = session::create_token(&state.config.auth, session.user_id(), &input.household_id)?;

    let message = DataChangeMessage::new(EventType::ActiveHouseholdChanged, User::reference(session.user_id()))
        .by_user(session.user_id())
        .in_household(&input.household_id);
    service::publish(state.publishers.data_changes.as_ref(), message).await;

    let response = UserStatusResponse {
        user_id: session.user_id().to_string(),
        account_status: session.requester.account_status,
        active_household_id: input.household_id.clone(),
        user_is_authenticated: true,
        token: Some(token),
    };
    let details = Details { trace_id: trace.0, current_household_id: Some(input.household_id) };
    Ok(envelope::with_data(details, response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_hash_and_verify() {
        let hash = hash_password("P@ssw0rd!").unwrap();
        assert!(password_matches("P@ssw0rd!", &hash));
        assert!(!password_matches("wrong", &hash));
        assert!(!password_matches("P@ssw0rd!", "not a hash"));
    }

    #[test]
    fn provisioned_secrets_verify_their_own_codes() {
        let (secret, qr) = provision_two_factor("alice").unwrap();
        assert!(qr.starts_with("data:image/png;base64,"));

        let user = User { username: "alice".into(), two_factor_secret: secret, ..Default::default() };
        let code = totp_for(&user.two_factor_secret, &user.username).unwrap().generate_current().unwrap();
        assert!(totp_matches(&user, &code).unwrap());
    }

    #[test]
    fn signup_policy_follows_configuration() {
        let config = AuthConfig { minimum_password_length: 12, ..Default::default() };
        let input = UserRegistrationInput {
            username: "alice".into(),
            password: "P@ssw0rd!".into(),
            ..Default::default()
        };
        assert_eq!(check_signup_policy(&config, &input).unwrap_err().field, "password");
        assert!(check_signup_policy(&AuthConfig::default(), &input).is_ok());
    }

    #[test]
    fn own_household_makes_the_user_its_admin() {
        let user = User { id: "u1".into(), username: "alice".into(), ..Default::default() };
        let household = own_household(&user);
        assert_eq!(household.belongs_to_user, "u1");
        assert_eq!(household.members.len(), 1);
        assert_eq!(household.members[0].role, HouseholdRole::Admin);
        assert!(household.members[0].default_household);
    }
}
