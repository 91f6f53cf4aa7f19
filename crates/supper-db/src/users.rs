use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params};
use supper_types::models::{Household, User};
use supper_types::session::{AccountStatus, ServiceRole};
use supper_types::time;

use crate::error::{DbError, DbResult, OptionalExt};
use crate::record::{self, Record, ms, opt_ms, opt_text, read_enum, read_ms, read_opt_ms, text};
use crate::valid::Searchable;
use crate::Database;

impl Record for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &[
        "username",
        "email_address",
        "avatar_src",
        "hashed_password",
        "two_factor_secret",
        "two_factor_secret_verified_at",
        "service_roles",
        "account_status",
        "account_status_explanation",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let roles: String = row.get("service_roles")?;
        Ok(User {
            id: row.get("id")?,
            username: row.get("username")?,
            email_address: row.get("email_address")?,
            avatar_src: row.get("avatar_src")?,
            hashed_password: row.get("hashed_password")?,
            two_factor_secret: row.get("two_factor_secret")?,
            two_factor_secret_verified_at: read_opt_ms(row, "two_factor_secret_verified_at")?,
            service_roles: roles.split(',').filter_map(|r| r.parse::<ServiceRole>().ok()).collect(),
            account_status: read_enum(row, "account_status")?,
            account_status_explanation: row.get("account_status_explanation")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        let roles: Vec<&str> = self.service_roles.iter().map(|r| r.as_str()).collect();
        vec![
            text(&self.username),
            opt_text(self.email_address.as_deref()),
            opt_text(self.avatar_src.as_deref()),
            text(&self.hashed_password),
            text(&self.two_factor_secret),
            opt_ms(self.two_factor_secret_verified_at),
            text(&roles.join(",")),
            text(self.account_status.as_str()),
            text(&self.account_status_explanation),
        ]
    }
}

impl Searchable for User {
    const SEARCH_COLUMN: &'static str = "username";
}

pub trait UserDataManager {
    /// Inserts a new user together with the household every user owns.
    fn create_user(&self, user: &User, household: &Household) -> DbResult<()>;
    fn get_user_by_username(&self, username: &str) -> DbResult<User>;
    fn update_password(&self, user_id: &str, hashed_password: &str) -> DbResult<()>;
    /// Replaces the 2FA secret. `verified_at` is `None` until the user
    /// confirms a token generated from it.
    fn set_two_factor_secret(&self, user_id: &str, secret: &str, verified_at: Option<DateTime<Utc>>) -> DbResult<()>;
    fn mark_two_factor_verified(&self, user_id: &str, now: DateTime<Utc>) -> DbResult<()>;
    fn set_avatar(&self, user_id: &str, avatar_src: &str) -> DbResult<()>;
    /// Banning or terminating an account also archives it.
    fn set_account_status(&self, user_id: &str, status: AccountStatus, explanation: &str) -> DbResult<()>;
}

pub(crate) fn insert_user(conn: &Connection, user: &User, household: &Household) -> DbResult<()> {
    record::insert(conn, user)?;
    record::insert(conn, household)
}

impl UserDataManager for Database {
    fn create_user(&self, user: &User, household: &Household) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            insert_user(&tx, user, household)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn get_user_by_username(&self, username: &str) -> DbResult<User> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE username = ?1 AND archived_at IS NULL",
                record::select_list::<User>()
            );
            Ok(conn.query_row(&sql, [username], User::from_row)?)
        })
    }

    fn update_password(&self, user_id: &str, hashed_password: &str) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            set_column(conn, user_id, "hashed_password", text(hashed_password))
        })
    }

    fn set_two_factor_secret(&self, user_id: &str, secret: &str, verified_at: Option<DateTime<Utc>>) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET two_factor_secret = ?1, two_factor_secret_verified_at = ?2, last_updated_at = ?3
                 WHERE id = ?4 AND archived_at IS NULL",
                params![secret, opt_ms(verified_at), ms(time::now()), user_id],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound);
            }
            Ok(())
        })
    }

    fn mark_two_factor_verified(&self, user_id: &str, now: DateTime<Utc>) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET two_factor_secret_verified_at = ?1, account_status = ?2, last_updated_at = ?1
                 WHERE id = ?3 AND archived_at IS NULL AND two_factor_secret_verified_at IS NULL",
                params![ms(now), AccountStatus::Good.as_str(), user_id],
            )?;
            if changed == 0 {
                // Either no such user, or the secret was already verified.
                let verified: Option<Option<i64>> = conn
                    .query_row(
                        "SELECT two_factor_secret_verified_at FROM users WHERE id = ?1 AND archived_at IS NULL",
                        [user_id],
                        |r| r.get(0),
                    )
                    .optional()?;
                return match verified {
                    None => Err(DbError::NotFound),
                    Some(_) => Err(DbError::Invalid("two factor secret already verified".into())),
                };
            }
            Ok(())
        })
    }

    fn set_avatar(&self, user_id: &str, avatar_src: &str) -> DbResult<()> {
        self.with_conn_mut(|conn| set_column(conn, user_id, "avatar_src", text(avatar_src)))
    }

    fn set_account_status(&self, user_id: &str, status: AccountStatus, explanation: &str) -> DbResult<()> {
        let now = time::now();
        let archived_at = if status.may_authenticate() { Value::Null } else { ms(now) };
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET account_status = ?1, account_status_explanation = ?2,
                    archived_at = COALESCE(archived_at, ?3), last_updated_at = ?4
                 WHERE id = ?5",
                params![status.as_str(), explanation, archived_at, ms(now), user_id],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound);
            }
            Ok(())
        })
    }
}

fn set_column(conn: &Connection, user_id: &str, column: &str, value: Value) -> DbResult<()> {
    let sql = format!(
        "UPDATE users SET {} = ?1, last_updated_at = ?2 WHERE id = ?3 AND archived_at IS NULL",
        column
    );
    match conn.execute(&sql, params![value, ms(time::now()), user_id])? {
        0 => Err(DbError::NotFound),
        _ => Ok(()),
    }
}

/// `true` when the user may still sign in; used by session resolution.
pub(crate) fn is_active(user: &User) -> bool {
    user.archived_at.is_none() && user.account_status.may_authenticate()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::{DataManager, Scope};
    use crate::testing::open_temp;
    use supper_types::models::HouseholdUserMembership;
    use supper_types::session::HouseholdRole;

    /// A user and their own household, the way signup creates them.
    pub fn user_with_household(username: &str) -> (User, Household) {
        let now = time::now();
        let user = User {
            id: supper_types::ids::new_id(),
            username: username.into(),
            hashed_password: "hash".into(),
            two_factor_secret: "SECRET".into(),
            service_roles: vec![ServiceRole::ServiceUser],
            created_at: now,
            ..Default::default()
        };
        let household_id = supper_types::ids::new_id();
        let household = Household {
            id: household_id.clone(),
            name: format!("{}'s household", username),
            belongs_to_user: user.id.clone(),
            members: vec![HouseholdUserMembership {
                id: supper_types::ids::new_id(),
                belongs_to_household: household_id,
                belongs_to_user: user.id.clone(),
                role: HouseholdRole::Admin,
                default_household: true,
                created_at: now,
                ..Default::default()
            }],
            created_at: now,
            ..Default::default()
        };
        (user, household)
    }

    #[test]
    fn signup_creates_user_and_household() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("alice");
        db.create_user(&user, &household).unwrap();

        let fetched = db.get_user_by_username("alice").unwrap();
        assert_eq!(fetched.id, user.id);
        assert_eq!(fetched.service_roles, vec![ServiceRole::ServiceUser]);

        let h: Household = db.get(&household.id, &Scope::all()).unwrap();
        assert_eq!(h.members.len(), 1);
        assert_eq!(h.members[0].role, HouseholdRole::Admin);
    }

    #[test]
    fn duplicate_usernames_conflict() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("alice");
        db.create_user(&user, &household).unwrap();
        let (again, household) = user_with_household("alice");
        assert!(matches!(db.create_user(&again, &household), Err(DbError::Conflict(_))));
    }

    #[test]
    fn banning_archives_the_account() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("mallory");
        db.create_user(&user, &household).unwrap();
        db.set_account_status(&user.id, AccountStatus::Banned, "spam").unwrap();
        assert!(matches!(db.get_user_by_username("mallory"), Err(DbError::NotFound)));
    }

    #[test]
    fn two_factor_verification_happens_once() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("bob");
        db.create_user(&user, &household).unwrap();
        db.mark_two_factor_verified(&user.id, time::now()).unwrap();
        let fetched = db.get_user_by_username("bob").unwrap();
        assert!(fetched.two_factor_verified());
        assert_eq!(fetched.account_status, AccountStatus::Good);
        assert!(matches!(db.mark_two_factor_verified(&user.id, time::now()), Err(DbError::Invalid(_))));
    }
}
