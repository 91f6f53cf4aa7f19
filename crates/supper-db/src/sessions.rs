use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;
use supper_types::models::User;
use supper_types::session::{Requester, SessionContext};

use crate::error::{DbError, DbResult, OptionalExt};
use crate::households::HouseholdDataManager;
use crate::record::{self, Scope, ms, read_ms};
use crate::users::is_active;
use crate::Database;

/// A cookie session. Only the SHA-256 digest of the cookie token is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub token_hash: String,
    pub user_id: String,
    pub household_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

pub trait SessionDataManager {
    fn create_session(&self, session: &SessionRecord) -> DbResult<()>;
    /// The live session for a token digest, if any.
    fn get_session(&self, token_hash: &str, now: DateTime<Utc>) -> DbResult<Option<SessionRecord>>;
    fn delete_session(&self, token_hash: &str) -> DbResult<()>;
    fn set_session_household(&self, token_hash: &str, household_id: &str) -> DbResult<()>;
    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> DbResult<usize>;
    /// Builds the request context for a user. `None` when the user is gone,
    /// may not sign in, or belongs to no household.
    fn session_context(&self, user_id: &str, household_id: Option<&str>) -> DbResult<Option<SessionContext>>;
}

impl SessionDataManager for Database {
    fn create_session(&self, session: &SessionRecord) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO sessions (token_hash, user_id, household_id, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.token_hash,
                    session.user_id,
                    session.household_id,
                    ms(session.expires_at),
                    ms(session.created_at)
                ],
            )?;
            Ok(())
        })
    }

    fn get_session(&self, token_hash: &str, now: DateTime<Utc>) -> DbResult<Option<SessionRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT token_hash, user_id, household_id, expires_at, created_at FROM sessions
                 WHERE token_hash = ?1 AND expires_at > ?2",
                params![token_hash, ms(now)],
                |row| {
                    Ok(SessionRecord {
                        token_hash: row.get("token_hash")?,
                        user_id: row.get("user_id")?,
                        household_id: row.get("household_id")?,
                        expires_at: read_ms(row, "expires_at")?,
                        created_at: read_ms(row, "created_at")?,
                    })
                },
            )
            .optional()
        })
    }

    fn delete_session(&self, token_hash: &str) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?;
            Ok(())
        })
    }

    fn set_session_household(&self, token_hash: &str, household_id: &str) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            match conn.execute(
                "UPDATE sessions SET household_id = ?1 WHERE token_hash = ?2",
                [household_id, token_hash],
            )? {
                0 => Err(DbError::NotFound),
                _ => Ok(()),
            }
        })
    }

    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> DbResult<usize> {
        self.with_conn_mut(|conn| Ok(conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [ms(now)])?))
    }

    fn session_context(&self, user_id: &str, household_id: Option<&str>) -> DbResult<Option<SessionContext>> {
        let user: Option<User> = self
            .with_conn(|conn| record::fetch_one::<User>(conn, user_id, &Scope::all()).map(Some))
            .or_else(|e| match e {
                DbError::NotFound => Ok(None),
                other => Err(other),
            })?;
        let Some(user) = user.filter(is_active) else {
            return Ok(None);
        };

        let memberships = self.memberships_for_user(&user.id)?;
        let active = household_id
            .and_then(|h| memberships.iter().find(|m| m.belongs_to_household == h))
            .or_else(|| memberships.iter().find(|m| m.default_household))
            .or_else(|| memberships.first());
        let Some(active) = active else {
            return Ok(None);
        };

        Ok(Some(SessionContext {
            active_household_id: active.belongs_to_household.clone(),
            household_permissions: memberships
                .iter()
                .map(|m| (m.belongs_to_household.clone(), m.role))
                .collect::<HashMap<_, _>>(),
            requester: Requester {
                user_id: user.id,
                account_status: user.account_status,
                service_roles: user.service_roles,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_temp;
    use crate::users::UserDataManager;
    use crate::users::tests::user_with_household;
    use chrono::Duration;
    use supper_types::session::AccountStatus;
    use supper_types::time;

    #[test]
    fn sessions_expire() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        db.create_user(&alice, &home).unwrap();

        let now = time::now();
        let session = SessionRecord {
            token_hash: "abc".into(),
            user_id: alice.id.clone(),
            household_id: home.id.clone(),
            expires_at: now + Duration::hours(1),
            created_at: now,
        };
        db.create_session(&session).unwrap();
        assert_eq!(db.get_session("abc", now).unwrap(), Some(session));
        assert_eq!(db.get_session("abc", now + Duration::hours(2)).unwrap(), None);
        assert_eq!(db.purge_expired_sessions(now + Duration::hours(2)).unwrap(), 1);
    }

    #[test]
    fn context_falls_back_to_the_default_household() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        db.create_user(&alice, &home).unwrap();

        let ctx = db.session_context(&alice.id, Some("elsewhere")).unwrap().unwrap();
        assert_eq!(ctx.active_household_id, home.id);
        assert!(ctx.is_member_of(&home.id));

        db.set_account_status(&alice.id, AccountStatus::Terminated, "").unwrap();
        assert!(db.session_context(&alice.id, None).unwrap().is_none());
    }
}
