use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use supper_types::models::{BallotEntry, MealPlanOptionVote, MealPlanStatus};
use supper_types::ids;

use crate::error::{DbError, DbResult, OptionalExt};
use crate::record;
use crate::Database;

pub trait MealPlanOptionVoteDataManager {
    /// Replaces the household's ballot for one event: its previous votes on
    /// the event's options are archived and `entries` stored in their place.
    /// Fails with `Finalized` once the plan is finalized.
    fn cast_ballot(
        &self,
        plan_id: &str,
        event_id: &str,
        household_id: &str,
        user_id: &str,
        entries: &[BallotEntry],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<MealPlanOptionVote>>;
}

impl MealPlanOptionVoteDataManager for Database {
    fn cast_ballot(
        &self,
        plan_id: &str,
        event_id: &str,
        household_id: &str,
        user_id: &str,
        entries: &[BallotEntry],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<MealPlanOptionVote>> {
        self.with_conn_mut(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            ensure_open(&tx, plan_id)?;

            tx.execute(
                "UPDATE meal_plan_option_votes SET archived_at = ?1, last_updated_at = ?1
                 WHERE by_household = ?2 AND archived_at IS NULL
                   AND belongs_to_meal_plan_option IN
                       (SELECT id FROM meal_plan_options WHERE belongs_to_meal_plan_event = ?3)",
                params![now.timestamp_millis(), household_id, event_id],
            )?;

            let votes: Vec<MealPlanOptionVote> = entries
                .iter()
                .map(|e| MealPlanOptionVote {
                    id: ids::new_id(),
                    rank: e.rank,
                    abstain: e.abstain,
                    notes: e.notes.clone(),
                    by_user: user_id.to_string(),
                    by_household: household_id.to_string(),
                    belongs_to_meal_plan_option: e.belongs_to_meal_plan_option.clone(),
                    created_at: now,
                    last_updated_at: None,
                    archived_at: None,
                })
                .collect();
            for vote in &votes {
                record::insert(&tx, vote)?;
            }
            touch_votes(&tx, plan_id, now)?;
            tx.commit()?;
            Ok(votes)
        })
    }
}

fn ensure_open(conn: &Connection, plan_id: &str) -> DbResult<()> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM meal_plans WHERE id = ?1 AND archived_at IS NULL",
            params![plan_id],
            |r| r.get(0),
        )
        .optional()?;
    match status.as_deref() {
        None => Err(DbError::NotFound),
        Some(s) if s == MealPlanStatus::Finalized.as_str() => Err(DbError::Finalized),
        Some(_) => Ok(()),
    }
}

/// Records that the plan's votes changed so the finalization scan
/// re-evaluates it before the deadline.
fn touch_votes(conn: &Connection, plan_id: &str, now: DateTime<Utc>) -> DbResult<()> {
    conn.execute(
        "UPDATE meal_plans SET votes_updated_at = ?1 WHERE id = ?2",
        params![now.timestamp_millis(), plan_id],
    )?;
    Ok(())
}
