use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params};
use supper_types::filter::{ListPage, QueryFilter};
use supper_types::models::{Household, HouseholdUserMembership};
use supper_types::session::HouseholdRole;
use supper_types::time;

use crate::error::{DbError, DbResult, OptionalExt};
use crate::record::{self, Record, Scope, flag, ms, opt_text, read_enum, read_ms, read_opt_ms, text};
use crate::Database;

impl Record for Household {
    const TABLE: &'static str = "households";
    const COLUMNS: &'static [&'static str] = &["name", "contact_phone", "belongs_to_user"];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Household {
            id: row.get("id")?,
            name: row.get("name")?,
            contact_phone: row.get("contact_phone")?,
            belongs_to_user: row.get("belongs_to_user")?,
            members: Vec::new(),
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            opt_text(self.contact_phone.as_deref()),
            text(&self.belongs_to_user),
        ]
    }

    fn load_children(&mut self, conn: &Connection) -> DbResult<()> {
        self.members = record::fetch_where(conn, &Scope::all().eq("belongs_to_household", &self.id))?;
        Ok(())
    }

    fn insert_children(&self, conn: &Connection) -> DbResult<()> {
        for m in &self.members {
            record::insert(conn, m)?;
        }
        Ok(())
    }
}

impl Record for HouseholdUserMembership {
    const TABLE: &'static str = "household_user_memberships";
    const COLUMNS: &'static [&'static str] =
        &["belongs_to_household", "belongs_to_user", "household_role", "default_household"];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HouseholdUserMembership {
            id: row.get("id")?,
            belongs_to_household: row.get("belongs_to_household")?,
            belongs_to_user: row.get("belongs_to_user")?,
            role: read_enum(row, "household_role")?,
            default_household: row.get("default_household")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.belongs_to_household),
            text(&self.belongs_to_user),
            text(self.role.as_str()),
            flag(self.default_household),
        ]
    }
}

/// Scope matching the households `user_id` is a live member of.
pub fn member_scope(user_id: &str) -> Scope {
    Scope::all().raw(
        "id IN (SELECT belongs_to_household FROM household_user_memberships
                WHERE belongs_to_user = ? AND archived_at IS NULL)",
        [user_id.to_string()],
    )
}

pub trait HouseholdDataManager {
    fn households_for_user(&self, user_id: &str, filter: &QueryFilter) -> DbResult<ListPage<Household>>;
    fn memberships_for_user(&self, user_id: &str) -> DbResult<Vec<HouseholdUserMembership>>;
    fn add_member(&self, membership: &HouseholdUserMembership) -> DbResult<()>;
    /// Removes a member. Returns `true` when that left the household empty,
    /// in which case the household is archived as well.
    fn remove_member(&self, household_id: &str, user_id: &str) -> DbResult<bool>;
    fn set_member_role(&self, household_id: &str, user_id: &str, role: HouseholdRole) -> DbResult<()>;
    /// Hands the household to another member, who becomes an admin.
    fn transfer_ownership(&self, household_id: &str, from_user: &str, to_user: &str) -> DbResult<()>;
    fn set_default_household(&self, user_id: &str, household_id: &str) -> DbResult<()>;
}

impl HouseholdDataManager for Database {
    fn households_for_user(&self, user_id: &str, filter: &QueryFilter) -> DbResult<ListPage<Household>> {
        self.with_conn(|conn| record::list(conn, &member_scope(user_id), filter))
    }

    fn memberships_for_user(&self, user_id: &str) -> DbResult<Vec<HouseholdUserMembership>> {
        self.with_conn(|conn| {
            record::fetch_where(
                conn,
                &Scope::all().eq("belongs_to_user", user_id).raw(
                    "belongs_to_household IN (SELECT id FROM households WHERE archived_at IS NULL)",
                    [],
                ),
            )
        })
    }

    fn add_member(&self, membership: &HouseholdUserMembership) -> DbResult<()> {
        self.with_conn_mut(|conn| record::insert(conn, membership))
    }

    fn remove_member(&self, household_id: &str, user_id: &str) -> DbResult<bool> {
        let now = time::now();
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let changed = tx.execute(
                "UPDATE household_user_memberships SET archived_at = ?1, last_updated_at = ?1
                 WHERE belongs_to_household = ?2 AND belongs_to_user = ?3 AND archived_at IS NULL",
                params![ms(now), household_id, user_id],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound);
            }

            let next_owner: Option<String> = tx
                .query_row(
                    "SELECT belongs_to_user FROM household_user_memberships
                     WHERE belongs_to_household = ?1 AND archived_at IS NULL
                     ORDER BY household_role = 'admin' DESC, created_at, id LIMIT 1",
                    [household_id],
                    |r| r.get(0),
                )
                .optional()?;

            let emptied = match next_owner {
                None => {
                    record::archive_row::<Household>(&tx, household_id, &Scope::all(), now)?;
                    true
                }
                Some(next) => {
                    // The household outlives its owner; the longest-standing admin inherits it.
                    tx.execute(
                        "UPDATE households SET belongs_to_user = ?1, last_updated_at = ?2
                         WHERE id = ?3 AND belongs_to_user = ?4",
                        params![next, ms(now), household_id, user_id],
                    )?;
                    false
                }
            };
            tx.commit()?;
            Ok(emptied)
        })
    }

    fn set_member_role(&self, household_id: &str, user_id: &str, role: HouseholdRole) -> DbResult<()> {
        self.with_conn_mut(|conn| set_role(conn, household_id, user_id, role, time::now()))
    }

    fn transfer_ownership(&self, household_id: &str, from_user: &str, to_user: &str) -> DbResult<()> {
        let now = time::now();
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let changed = tx.execute(
                "UPDATE households SET belongs_to_user = ?1, last_updated_at = ?2
                 WHERE id = ?3 AND belongs_to_user = ?4 AND archived_at IS NULL",
                params![to_user, ms(now), household_id, from_user],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound);
            }
            set_role(&tx, household_id, to_user, HouseholdRole::Admin, now).map_err(|e| match e {
                DbError::NotFound => DbError::Invalid("new owner is not a member of the household".into()),
                other => other,
            })?;
            tx.commit()?;
            Ok(())
        })
    }

    fn set_default_household(&self, user_id: &str, household_id: &str) -> DbResult<()> {
        let now = time::now();
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE household_user_memberships SET default_household = 0, last_updated_at = ?1
                 WHERE belongs_to_user = ?2 AND default_household = 1 AND archived_at IS NULL",
                params![ms(now), user_id],
            )?;
            let changed = tx.execute(
                "UPDATE household_user_memberships SET default_household = 1, last_updated_at = ?1
                 WHERE belongs_to_user = ?2 AND belongs_to_household = ?3 AND archived_at IS NULL",
                params![ms(now), user_id, household_id],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound);
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn set_role(
    conn: &Connection,
    household_id: &str,
    user_id: &str,
    role: HouseholdRole,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let changed = conn.execute(
        "UPDATE household_user_memberships SET household_role = ?1, last_updated_at = ?2
         WHERE belongs_to_household = ?3 AND belongs_to_user = ?4 AND archived_at IS NULL",
        params![role.as_str(), ms(now), household_id, user_id],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DataManager;
    use crate::testing::open_temp;
    use crate::users::UserDataManager;
    use crate::users::tests::user_with_household;

    fn join(db: &Database, household: &Household, user_id: &str) {
        db.add_member(&HouseholdUserMembership {
            id: supper_types::ids::new_id(),
            belongs_to_household: household.id.clone(),
            belongs_to_user: user_id.into(),
            created_at: time::now(),
            ..Default::default()
        })
        .unwrap();
    }

    #[test]
    fn removing_the_last_member_archives_the_household() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        db.create_user(&alice, &home).unwrap();

        assert!(db.remove_member(&home.id, &alice.id).unwrap());
        assert!(!DataManager::<Household>::exists(&db, &home.id, &Scope::all()).unwrap());
    }

    #[test]
    fn ownership_passes_on_when_the_owner_leaves() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        let (bob, bobs) = user_with_household("bob");
        db.create_user(&alice, &home).unwrap();
        db.create_user(&bob, &bobs).unwrap();
        join(&db, &home, &bob.id);

        assert!(!db.remove_member(&home.id, &alice.id).unwrap());
        let h: Household = db.get(&home.id, &Scope::all()).unwrap();
        assert_eq!(h.belongs_to_user, bob.id);
        assert_eq!(h.members.len(), 1);
    }

    #[test]
    fn transfer_requires_membership() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        let (bob, bobs) = user_with_household("bob");
        db.create_user(&alice, &home).unwrap();
        db.create_user(&bob, &bobs).unwrap();

        assert!(matches!(db.transfer_ownership(&home.id, &alice.id, &bob.id), Err(DbError::Invalid(_))));
        join(&db, &home, &bob.id);
        db.transfer_ownership(&home.id, &alice.id, &bob.id).unwrap();
        let roles: Vec<_> = db.memberships_for_user(&bob.id).unwrap().into_iter().map(|m| m.role).collect();
        assert!(roles.iter().all(|r| *r == HouseholdRole::Admin));
    }

    #[test]
    fn households_for_user_lists_memberships_only() {
        let (_dir, db) = open_temp();
        let (alice, home) = user_with_household("alice");
        let (bob, bobs) = user_with_household("bob");
        db.create_user(&alice, &home).unwrap();
        db.create_user(&bob, &bobs).unwrap();
        join(&db, &bobs, &alice.id);

        let page = db.households_for_user(&alice.id, &QueryFilter::default()).unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.pagination.total_count, 2);
        let page = db.households_for_user(&bob.id, &QueryFilter::default()).unwrap();
        assert_eq!(page.data.len(), 1);

        db.set_default_household(&alice.id, &bobs.id).unwrap();
        let defaults: Vec<_> = db
            .memberships_for_user(&alice.id)
            .unwrap()
            .into_iter()
            .filter(|m| m.default_household)
            .map(|m| m.belongs_to_household)
            .collect();
        assert_eq!(defaults, vec![bobs.id.clone()]);
    }
}
