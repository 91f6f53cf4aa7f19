//! Meal plans with their events, options and votes, plus the serializable
//! finalization transition.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior, params};
use supper_planning::{Decision, decide};
use supper_types::filter::{ListPage, QueryFilter};
use supper_types::models::{MealPlan, MealPlanEvent, MealPlanOption, MealPlanOptionVote, MealPlanStatus};
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::record::{self, Record, Scope, Write, flag, int, ms, opt_text, read_enum, read_ms, read_opt_ms, text};
use crate::Database;

impl Record for MealPlan {
    const TABLE: &'static str = "meal_plans";
    const COLUMNS: &'static [&'static str] = &["notes", "status", "voting_deadline", "belongs_to_household"];
    const STATE_COLUMNS: &'static [&'static str] = &["status"];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MealPlan {
            id: row.get("id")?,
            notes: row.get("notes")?,
            status: read_enum(row, "status")?,
            voting_deadline: read_ms(row, "voting_deadline")?,
            belongs_to_household: row.get("belongs_to_household")?,
            shared_with_households: Vec::new(),
            events: Vec::new(),
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.notes),
            text(self.status.as_str()),
            ms(self.voting_deadline),
            text(&self.belongs_to_household),
        ]
    }

    fn load_children(&mut self, conn: &Connection) -> DbResult<()> {
        let mut stmt = conn.prepare(
            "SELECT s.household_id FROM meal_plan_shares s
             JOIN households h ON h.id = s.household_id AND h.archived_at IS NULL
             WHERE s.meal_plan_id = ?1 ORDER BY s.household_id",
        )?;
        self.shared_with_households = stmt
            .query_map(params![self.id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        self.events = record::fetch_where(conn, &event_scope(&self.id))?;
        Ok(())
    }

    fn insert_children(&self, conn: &Connection) -> DbResult<()> {
        insert_shares(conn, self)?;
        for event in &self.events {
            record::insert(conn, event)?;
        }
        Ok(())
    }

    fn update_children(&self, conn: &Connection) -> DbResult<()> {
        conn.execute("DELETE FROM meal_plan_shares WHERE meal_plan_id = ?1", params![self.id])?;
        insert_shares(conn, self)
    }

    /// Archiving is orthogonal to the voting state; edits stop at finalization.
    fn before_write(conn: &Connection, id: &str, write: Write) -> DbResult<()> {
        match write {
            Write::Update => ensure_plan_open(conn, PLAN_OF_PLAN, id),
            Write::Archive => Ok(()),
        }
    }
}

fn insert_shares(conn: &Connection, plan: &MealPlan) -> DbResult<()> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO meal_plan_shares (meal_plan_id, household_id) VALUES (?1, ?2)")?;
    for household in plan.shared_with_households.iter().filter(|h| **h != plan.belongs_to_household) {
        stmt.execute(params![plan.id, household])?;
    }
    Ok(())
}

impl Record for MealPlanEvent {
    const TABLE: &'static str = "meal_plan_events";
    const COLUMNS: &'static [&'static str] = &["notes", "meal_name", "starts_at", "ends_at", "belongs_to_meal_plan"];
    const CHILD_ORDER: &'static str = "starts_at, id";

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MealPlanEvent {
            id: row.get("id")?,
            notes: row.get("notes")?,
            meal_type: read_enum(row, "meal_name")?,
            starts_at: read_ms(row, "starts_at")?,
            ends_at: read_ms(row, "ends_at")?,
            belongs_to_meal_plan: row.get("belongs_to_meal_plan")?,
            options: Vec::new(),
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.notes),
            text(self.meal_type.as_str()),
            ms(self.starts_at),
            ms(self.ends_at),
            text(&self.belongs_to_meal_plan),
        ]
    }

    fn load_children(&mut self, conn: &Connection) -> DbResult<()> {
        self.options = record::fetch_where(conn, &option_scope(&self.id))?;
        Ok(())
    }

    fn insert_children(&self, conn: &Connection) -> DbResult<()> {
        for option in &self.options {
            record::insert(conn, option)?;
        }
        Ok(())
    }

    fn before_insert(&self, conn: &Connection) -> DbResult<()> {
        ensure_plan_open(conn, PLAN_OF_PLAN, &self.belongs_to_meal_plan)?;
        recheck_plan(conn, PLAN_OF_PLAN, &self.belongs_to_meal_plan)
    }

    fn before_write(conn: &Connection, id: &str, _: Write) -> DbResult<()> {
        ensure_plan_open(conn, PLAN_OF_EVENT, id)
    }
}

impl Record for MealPlanOption {
    const TABLE: &'static str = "meal_plan_options";
    const COLUMNS: &'static [&'static str] = &[
        "meal_id",
        "notes",
        "assigned_cook",
        "chosen",
        "tiebroken",
        "belongs_to_meal_plan_event",
    ];
    const STATE_COLUMNS: &'static [&'static str] = &["chosen", "tiebroken"];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MealPlanOption {
            id: row.get("id")?,
            meal_id: row.get("meal_id")?,
            notes: row.get("notes")?,
            assigned_cook: row.get("assigned_cook")?,
            chosen: row.get("chosen")?,
            tiebroken: row.get("tiebroken")?,
            belongs_to_meal_plan_event: row.get("belongs_to_meal_plan_event")?,
            votes: Vec::new(),
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.meal_id),
            text(&self.notes),
            opt_text(self.assigned_cook.as_deref()),
            flag(self.chosen),
            flag(self.tiebroken),
            text(&self.belongs_to_meal_plan_event),
        ]
    }

    fn load_children(&mut self, conn: &Connection) -> DbResult<()> {
        self.votes = record::fetch_where(conn, &vote_scope(&self.id))?;
        Ok(())
    }

    fn insert_children(&self, conn: &Connection) -> DbResult<()> {
        for vote in &self.votes {
            record::insert(conn, vote)?;
        }
        Ok(())
    }

    fn before_insert(&self, conn: &Connection) -> DbResult<()> {
        ensure_plan_open(conn, PLAN_OF_EVENT, &self.belongs_to_meal_plan_event)?;
        recheck_plan(conn, PLAN_OF_EVENT, &self.belongs_to_meal_plan_event)
    }

    /// An event keeps at least one live option, or its plan could never be
    /// finalized.
    fn before_write(conn: &Connection, id: &str, write: Write) -> DbResult<()> {
        ensure_plan_open(conn, PLAN_OF_OPTION, id)?;
        if write == Write::Archive {
            let live: i64 = conn.query_row(
                "SELECT COUNT(*) FROM meal_plan_options o
                 JOIN meal_plan_options s ON s.belongs_to_meal_plan_event = o.belongs_to_meal_plan_event
                 WHERE o.id = ?1 AND o.archived_at IS NULL AND s.archived_at IS NULL",
                params![id],
                |r| r.get(0),
            )?;
            if live == 1 {
                return Err(DbError::Invalid("an event must keep at least one option".into()));
            }
        }
        Ok(())
    }
}

impl Record for MealPlanOptionVote {
    const TABLE: &'static str = "meal_plan_option_votes";
    const COLUMNS: &'static [&'static str] = &[
        "rank",
        "abstain",
        "notes",
        "by_user",
        "by_household",
        "belongs_to_meal_plan_option",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(MealPlanOptionVote {
            id: row.get("id")?,
            rank: row.get("rank")?,
            abstain: row.get("abstain")?,
            notes: row.get("notes")?,
            by_user: row.get("by_user")?,
            by_household: row.get("by_household")?,
            belongs_to_meal_plan_option: row.get("belongs_to_meal_plan_option")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            int(self.rank),
            flag(self.abstain),
            text(&self.notes),
            text(&self.by_user),
            text(&self.by_household),
            text(&self.belongs_to_meal_plan_option),
        ]
    }

    fn before_write(conn: &Connection, id: &str, _: Write) -> DbResult<()> {
        ensure_plan_open(conn, PLAN_OF_VOTE, id)
    }
}

// Subqueries resolving `?2` to the ID of the plan that owns the row.
const PLAN_OF_PLAN: &str = "SELECT ?2";
const PLAN_OF_EVENT: &str = "SELECT belongs_to_meal_plan FROM meal_plan_events WHERE id = ?2";
const PLAN_OF_OPTION: &str = "SELECT e.belongs_to_meal_plan FROM meal_plan_options o
     JOIN meal_plan_events e ON e.id = o.belongs_to_meal_plan_event WHERE o.id = ?2";
const PLAN_OF_VOTE: &str = "SELECT e.belongs_to_meal_plan FROM meal_plan_option_votes v
     JOIN meal_plan_options o ON o.id = v.belongs_to_meal_plan_option
     JOIN meal_plan_events e ON e.id = o.belongs_to_meal_plan_event WHERE v.id = ?2";

/// Fails with `Finalized` when the plan owning `key` is finalized. Missing
/// rows pass; the write that follows reports them.
fn ensure_plan_open(conn: &Connection, owning_plan: &str, key: &str) -> DbResult<()> {
    let finalized: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM meal_plans WHERE status = ?1 AND id IN ({}))", owning_plan),
        params![MealPlanStatus::Finalized.as_str(), key],
        |r| r.get(0),
    )?;
    if finalized { Err(DbError::Finalized) } else { Ok(()) }
}

/// New choices may unblock a plan the scan had given up on after its
/// deadline.
fn recheck_plan(conn: &Connection, owning_plan: &str, key: &str) -> DbResult<()> {
    conn.execute(
        &format!("UPDATE meal_plans SET finalization_checked_at = NULL WHERE id IN ({})", owning_plan.replace("?2", "?1")),
        params![key],
    )?;
    Ok(())
}

/// Plans a household owns or has been invited to vote on.
pub fn visible_scope(household_id: &str) -> Scope {
    Scope::all().raw(
        "belongs_to_household = ? OR id IN (SELECT meal_plan_id FROM meal_plan_shares WHERE household_id = ?)",
        [household_id.to_string(), household_id.to_string()],
    )
}

/// Plans whose structure a household may change.
pub fn owner_scope(household_id: &str) -> Scope {
    Scope::all().eq("belongs_to_household", household_id)
}

pub fn event_scope(plan_id: &str) -> Scope {
    Scope::all().eq("belongs_to_meal_plan", plan_id)
}

pub fn option_scope(event_id: &str) -> Scope {
    Scope::all().eq("belongs_to_meal_plan_event", event_id)
}

pub fn vote_scope(option_id: &str) -> Scope {
    Scope::all().eq("belongs_to_meal_plan_option", option_id)
}

pub trait MealPlanDataManager {
    fn meal_plans_for_household(&self, household_id: &str, filter: &QueryFilter) -> DbResult<ListPage<MealPlan>>;
    /// Runs the finalization decision against the current votes and, when
    /// every event is resolvable, writes the chosen options and the status
    /// in the same immediate transaction. Returns the decision and the plan
    /// as it stands afterwards.
    fn finalize_meal_plan(&self, plan_id: &str, now: DateTime<Utc>) -> DbResult<(Decision, MealPlan)>;
    /// Awaiting-votes plans whose deadline has passed since they were last
    /// checked, or which received votes since then. A plan checked after its
    /// deadline and still unresolved (an event without options) waits for
    /// new votes or options instead of being requeued on every scan.
    fn plans_needing_finalization(&self, now: DateTime<Utc>) -> DbResult<Vec<String>>;
    /// Finalized plans whose prep steps were never derived.
    fn plans_needing_prep_steps(&self) -> DbResult<Vec<String>>;
}

impl MealPlanDataManager for Database {
    fn meal_plans_for_household(&self, household_id: &str, filter: &QueryFilter) -> DbResult<ListPage<MealPlan>> {
        self.with_conn(|conn| record::list(conn, &visible_scope(household_id), filter))
    }

    fn finalize_meal_plan(&self, plan_id: &str, now: DateTime<Utc>) -> DbResult<(Decision, MealPlan)> {
        self.with_conn_mut(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let plan: MealPlan = record::fetch_one(&tx, plan_id, &Scope::all())?;
            let decision = decide(&plan, now);

            let plan = match &decision {
                Decision::Finalize(outcomes) => {
                    for outcome in outcomes {
                        tx.execute(
                            "UPDATE meal_plan_options SET chosen = 1, tiebroken = ?1, last_updated_at = ?2
                             WHERE id = ?3 AND belongs_to_meal_plan_event = ?4",
                            params![outcome.tiebroken, now.timestamp_millis(), outcome.option_id, outcome.event_id],
                        )?;
                    }
                    tx.execute(
                        "UPDATE meal_plans SET status = ?1, last_updated_at = ?2, finalization_checked_at = ?2
                         WHERE id = ?3",
                        params![MealPlanStatus::Finalized.as_str(), now.timestamp_millis(), plan_id],
                    )?;
                    info!(meal_plan_id = %plan_id, events = outcomes.len(), "Meal plan finalized");
                    record::fetch_one(&tx, plan_id, &Scope::all())?
                }
                Decision::AlreadyFinalized => plan,
                Decision::Pending { .. } | Decision::Blocked { .. } => {
                    tx.execute(
                        "UPDATE meal_plans SET finalization_checked_at = ?1 WHERE id = ?2",
                        params![now.timestamp_millis(), plan_id],
                    )?;
                    plan
                }
            };
            tx.commit()?;
            Ok((decision, plan))
        })
    }

    fn plans_needing_finalization(&self, now: DateTime<Utc>) -> DbResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM meal_plans
                 WHERE archived_at IS NULL AND status = ?1
                   AND ((voting_deadline <= ?2 AND COALESCE(finalization_checked_at, 0) < voting_deadline)
                        OR votes_updated_at > COALESCE(finalization_checked_at, 0))
                 ORDER BY voting_deadline, id",
            )?;
            let ids = stmt
                .query_map(params![MealPlanStatus::AwaitingVotes.as_str(), now.timestamp_millis()], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    fn plans_needing_prep_steps(&self) -> DbResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM meal_plans
                 WHERE archived_at IS NULL AND status = ?1 AND prep_steps_derived_at IS NULL
                 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(params![MealPlanStatus::Finalized.as_str()], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }
}
