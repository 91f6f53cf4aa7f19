use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params};
use supper_types::filter::{ListPage, QueryFilter};
use supper_types::ids;
use supper_types::models::{Household, HouseholdInvitation, HouseholdUserMembership, InvitationStatus, User};
use supper_types::session::HouseholdRole;

use crate::error::{DbError, DbResult};
use crate::record::{self, Record, Scope, ms, opt_text, read_enum, read_ms, read_opt_ms, text};
use crate::users::insert_user;
use crate::Database;

impl Record for HouseholdInvitation {
    const TABLE: &'static str = "household_invitations";
    const COLUMNS: &'static [&'static str] = &[
        "from_user",
        "to_user",
        "to_email",
        "to_name",
        "destination_household",
        "status",
        "note",
        "status_note",
        "token",
        "expires_at",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HouseholdInvitation {
            id: row.get("id")?,
            from_user: row.get("from_user")?,
            to_user: row.get("to_user")?,
            to_email: row.get("to_email")?,
            to_name: row.get("to_name")?,
            destination_household: row.get("destination_household")?,
            status: read_enum(row, "status")?,
            note: row.get("note")?,
            status_note: row.get("status_note")?,
            token: row.get("token")?,
            expires_at: read_ms(row, "expires_at")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.from_user),
            opt_text(self.to_user.as_deref()),
            text(&self.to_email),
            text(&self.to_name),
            text(&self.destination_household),
            text(self.status.as_str()),
            text(&self.note),
            text(&self.status_note),
            text(&self.token),
            ms(self.expires_at),
        ]
    }
}

pub trait HouseholdInvitationDataManager {
    /// Pending invitations addressed to the user, by ID or by email.
    fn invitations_received(
        &self,
        user_id: &str,
        email: Option<&str>,
        filter: &QueryFilter,
    ) -> DbResult<ListPage<HouseholdInvitation>>;
    fn invitations_sent(&self, user_id: &str, filter: &QueryFilter) -> DbResult<ListPage<HouseholdInvitation>>;
    /// Moves a pending invitation to `status`. The token must match and is
    /// spent by the transition. Accepting adds `user_id` to the household.
    fn resolve_invitation(
        &self,
        id: &str,
        token: &str,
        status: InvitationStatus,
        note: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<HouseholdInvitation>;
    /// Creates a new user with their own household and accepts the
    /// invitation on their behalf, all or nothing.
    fn create_user_from_invitation(
        &self,
        user: &User,
        household: &Household,
        id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> DbResult<HouseholdInvitation>;
}

enum Resolution {
    Resolved(HouseholdInvitation),
    Expired,
}

/// Moves a pending invitation on inside the caller's transaction. An expired
/// invitation is left for the caller to stamp.
fn resolve_in(
    conn: &Connection,
    id: &str,
    token: &str,
    status: InvitationStatus,
    note: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> DbResult<Resolution> {
    let mut invitation: HouseholdInvitation = record::fetch_one(conn, id, &Scope::all().eq("token", token))?;

    if invitation.status != InvitationStatus::Pending {
        return Err(DbError::Invalid(format!("invitation is {}", invitation.status)));
    }
    if invitation.is_expired(now) {
        return Ok(Resolution::Expired);
    }

    invitation.status = status;
    invitation.status_note = note.to_string();
    if status == InvitationStatus::Accepted {
        invitation.to_user = Some(user_id.to_string());
        record::insert(
            conn,
            &HouseholdUserMembership {
                id: ids::new_id(),
                belongs_to_household: invitation.destination_household.clone(),
                belongs_to_user: user_id.to_string(),
                role: HouseholdRole::Member,
                default_household: false,
                created_at: now,
                last_updated_at: None,
                archived_at: None,
            },
        )?;
    }
    record::update_row(conn, &invitation, now)?;
    invitation.touch(now);
    Ok(Resolution::Resolved(invitation))
}

fn mark_expired(conn: &Connection, id: &str, now: DateTime<Utc>) -> DbResult<DbError> {
    conn.execute(
        "UPDATE household_invitations SET status = ?1, last_updated_at = ?2 WHERE id = ?3",
        params![InvitationStatus::Expired.as_str(), ms(now), id],
    )?;
    Ok(DbError::Invalid("invitation has expired".into()))
}

impl HouseholdInvitationDataManager for Database {
    fn invitations_received(
        &self,
        user_id: &str,
        email: Option<&str>,
        filter: &QueryFilter,
    ) -> DbResult<ListPage<HouseholdInvitation>> {
        let scope = Scope::all().eq("status", InvitationStatus::Pending.as_str()).raw(
            "to_user = ? OR (to_email <> '' AND to_email = ?)",
            [user_id.to_string(), email.unwrap_or_default().to_string()],
        );
        self.with_conn(|conn| record::list(conn, &scope, filter))
    }

    fn invitations_sent(&self, user_id: &str, filter: &QueryFilter) -> DbResult<ListPage<HouseholdInvitation>> {
        self.with_conn(|conn| record::list(conn, &Scope::all().eq("from_user", user_id), filter))
    }

    fn resolve_invitation(
        &self,
        id: &str,
        token: &str,
        status: InvitationStatus,
        note: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<HouseholdInvitation> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let resolution = resolve_in(&tx, id, token, status, note, user_id, now)?;
            match resolution {
                Resolution::Resolved(invitation) => {
                    tx.commit()?;
                    Ok(invitation)
                }
                Resolution::Expired => {
                    let err = mark_expired(&tx, id, now)?;
                    tx.commit()?;
                    Err(err)
                }
            }
        })
    }

    fn create_user_from_invitation(
        &self,
        user: &User,
        household: &Household,
        id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> DbResult<HouseholdInvitation> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            insert_user(&tx, user, household)?;
            match resolve_in(&tx, id, token, InvitationStatus::Accepted, "", &user.id, now)? {
                Resolution::Resolved(invitation) => {
                    tx.commit()?;
                    Ok(invitation)
                }
                Resolution::Expired => {
                    // The user goes; the expiry sticks.
                    tx.rollback()?;
                    Err(mark_expired(conn, id, now)?)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::households::HouseholdDataManager;
    use crate::record::DataManager;
    use crate::testing::open_temp;
    use crate::users::UserDataManager;
    use crate::users::tests::user_with_household;
    use chrono::Duration;
    use supper_types::time;

    fn invite(db: &Database, from: &str, household: &str, to_email: &str, expires_at: DateTime<Utc>) -> HouseholdInvitation {
        let inv = HouseholdInvitation {
            id: ids::new_id(),
            from_user: from.into(),
            to_email: to_email.into(),
            destination_household: household.into(),
            token: ids::new_id(),
            expires_at,
            created_at: time::now(),
            ..Default::default()
        };
        db.create(&inv).unwrap();
        inv
    }

    #[test]
    fn accepting_joins_the_household_and_spends_the_token() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        let (bob, bobs) = user_with_household("bob");
        db.create_user(&alice, &home).unwrap();
        db.create_user(&bob, &bobs).unwrap();

        let now = time::now();
        let inv = invite(&db, &alice.id, &home.id, "bob@example.org", now + Duration::days(7));
        let received = db.invitations_received(&bob.id, Some("bob@example.org"), &QueryFilter::default()).unwrap();
        assert_eq!(received.data.len(), 1);

        let accepted = db
            .resolve_invitation(&inv.id, &inv.token, InvitationStatus::Accepted, "yay", &bob.id, now)
            .unwrap();
        assert_eq!(accepted.status, InvitationStatus::Accepted);
        assert_eq!(db.memberships_for_user(&bob.id).unwrap().len(), 2);

        let again = db.resolve_invitation(&inv.id, &inv.token, InvitationStatus::Accepted, "", &bob.id, now);
        assert!(matches!(again, Err(DbError::Invalid(_))));
    }

    #[test]
    fn wrong_token_is_not_found_and_expired_invitations_expire() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        db.create_user(&alice, &home).unwrap();
        let now = time::now();
        let inv = invite(&db, &alice.id, &home.id, "x@example.org", now - Duration::seconds(1));

        let wrong = db.resolve_invitation(&inv.id, "nope", InvitationStatus::Rejected, "", &alice.id, now);
        assert!(matches!(wrong, Err(DbError::NotFound)));

        let late = db.resolve_invitation(&inv.id, &inv.token, InvitationStatus::Rejected, "", &alice.id, now);
        assert!(matches!(late, Err(DbError::Invalid(_))));
        let stored: HouseholdInvitation = db.get(&inv.id, &Scope::all()).unwrap();
        assert_eq!(stored.status, InvitationStatus::Expired);
    }

    #[test]
    fn invited_signups_are_all_or_nothing() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        db.create_user(&alice, &home).unwrap();
        let now = time::now();
        let inv = invite(&db, &alice.id, &home.id, "carol@example.org", now + Duration::days(7));

        let (carol, carols) = user_with_household("carol");
        let joined = db.create_user_from_invitation(&carol, &carols, &inv.id, &inv.token, now).unwrap();
        assert_eq!(joined.to_user.as_deref(), Some(carol.id.as_str()));
        assert_eq!(db.memberships_for_user(&carol.id).unwrap().len(), 2);

        // The token is spent: a second signup on it leaves nothing behind.
        let (dave, daves) = user_with_household("dave");
        let err = db.create_user_from_invitation(&dave, &daves, &inv.id, &inv.token, now).unwrap_err();
        assert!(matches!(err, DbError::Invalid(_)));
        assert!(matches!(db.get_user_by_username("dave"), Err(DbError::NotFound)));
        assert!(!DataManager::<Household>::exists(&db, &daves.id, &Scope::all()).unwrap());
    }

    #[test]
    fn expired_invitations_stay_expired_after_a_failed_signup() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        db.create_user(&alice, &home).unwrap();
        let now = time::now();
        let inv = invite(&db, &alice.id, &home.id, "erin@example.org", now - Duration::seconds(1));

        let (erin, erins) = user_with_household("erin");
        let err = db.create_user_from_invitation(&erin, &erins, &inv.id, &inv.token, now).unwrap_err();
        assert!(matches!(err, DbError::Invalid(_)));
        assert!(matches!(db.get_user_by_username("erin"), Err(DbError::NotFound)));
        let stored: HouseholdInvitation = db.get(&inv.id, &Scope::all()).unwrap();
        assert_eq!(stored.status, InvitationStatus::Expired);
    }
}
