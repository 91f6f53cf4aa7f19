use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Row, params};
use supper_planning::PrepWindow;
use supper_types::ids;
use supper_types::models::{AdvancedPrepStep, MealPlan, RecipeStep};
use tracing::debug;

use crate::error::DbResult;
use crate::record::{self, Record, Scope, ms, opt_ms, read_ms, read_opt_ms, text};
use crate::Database;

impl Record for AdvancedPrepStep {
    const TABLE: &'static str = "advanced_prep_steps";
    const COLUMNS: &'static [&'static str] = &[
        "meal_plan_option",
        "recipe_step",
        "belongs_to_meal_plan",
        "cannot_complete_before",
        "cannot_complete_after",
        "completed_at",
        "notes",
    ];
    const CHILD_ORDER: &'static str = "cannot_complete_before, id";

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AdvancedPrepStep {
            id: row.get("id")?,
            meal_plan_option: row.get("meal_plan_option")?,
            recipe_step: row.get("recipe_step")?,
            belongs_to_meal_plan: row.get("belongs_to_meal_plan")?,
            cannot_complete_before: read_ms(row, "cannot_complete_before")?,
            cannot_complete_after: read_ms(row, "cannot_complete_after")?,
            completed_at: read_opt_ms(row, "completed_at")?,
            notes: row.get("notes")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.meal_plan_option),
            text(&self.recipe_step),
            text(&self.belongs_to_meal_plan),
            ms(self.cannot_complete_before),
            ms(self.cannot_complete_after),
            opt_ms(self.completed_at),
            text(&self.notes),
        ]
    }
}

/// Prep steps of plans the household owns or shares.
pub fn visible_scope(household_id: &str) -> Scope {
    Scope::all().raw(
        "belongs_to_meal_plan IN (SELECT id FROM meal_plans WHERE archived_at IS NULL AND (belongs_to_household = ?
            OR id IN (SELECT meal_plan_id FROM meal_plan_shares WHERE household_id = ?)))",
        [household_id.to_string(), household_id.to_string()],
    )
}

pub trait AdvancedPrepStepDataManager {
    /// The recipe steps of every chosen option's meal, keyed by meal ID, and
    /// the IDs of preparations whose output keeps.
    fn prep_inputs(&self, plan: &MealPlan) -> DbResult<(HashMap<String, Vec<RecipeStep>>, HashSet<String>)>;
    /// Inserts the rows missing for `windows` and marks the plan derived.
    /// Returns only the rows this call inserted.
    fn create_advanced_prep_steps(
        &self,
        plan_id: &str,
        windows: &[PrepWindow],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<AdvancedPrepStep>>;
    fn advanced_prep_steps_for_plan(&self, plan_id: &str) -> DbResult<Vec<AdvancedPrepStep>>;
    /// Sets or clears `completed_at`. Notes are replaced when given.
    fn complete_advanced_prep_step(
        &self,
        id: &str,
        completed: bool,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<AdvancedPrepStep>;
}

impl AdvancedPrepStepDataManager for Database {
    fn prep_inputs(&self, plan: &MealPlan) -> DbResult<(HashMap<String, Vec<RecipeStep>>, HashSet<String>)> {
        self.with_conn(|conn| {
            let mut steps_by_meal = HashMap::new();
            let chosen = plan.events.iter().flat_map(|e| e.options.iter()).filter(|o| o.chosen);
            for option in chosen {
                if steps_by_meal.contains_key(&option.meal_id) {
                    continue;
                }
                let scope = Scope::all().raw(
                    "belongs_to_recipe IN (SELECT r.id FROM meal_recipes mr JOIN recipes r ON r.id = mr.recipe_id
                                           WHERE mr.meal_id = ? AND r.archived_at IS NULL)",
                    [option.meal_id.clone()],
                );
                let steps: Vec<RecipeStep> = record::fetch_where(conn, &scope)?;
                steps_by_meal.insert(option.meal_id.clone(), steps);
            }

            let mut stmt = conn.prepare(
                "SELECT id FROM valid_preparations WHERE yields_storable_output = 1 AND archived_at IS NULL",
            )?;
            let storable = stmt
                .query_map([], |r| r.get(0))?
                .collect::<Result<HashSet<String>, _>>()?;
            Ok((steps_by_meal, storable))
        })
    }

    fn create_advanced_prep_steps(
        &self,
        plan_id: &str,
        windows: &[PrepWindow],
        now: DateTime<Utc>,
    ) -> DbResult<Vec<AdvancedPrepStep>> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut created = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO advanced_prep_steps
                     (id, meal_plan_option, recipe_step, belongs_to_meal_plan,
                      cannot_complete_before, cannot_complete_after, notes, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', ?7)",
                )?;
                for w in windows {
                    let step = AdvancedPrepStep {
                        id: ids::new_id(),
                        meal_plan_option: w.meal_plan_option.clone(),
                        recipe_step: w.recipe_step.clone(),
                        belongs_to_meal_plan: plan_id.to_string(),
                        cannot_complete_before: w.cannot_complete_before,
                        cannot_complete_after: w.cannot_complete_after,
                        created_at: now,
                        ..Default::default()
                    };
                    let inserted = stmt.execute(params![
                        step.id,
                        step.meal_plan_option,
                        step.recipe_step,
                        step.belongs_to_meal_plan,
                        step.cannot_complete_before.timestamp_millis(),
                        step.cannot_complete_after.timestamp_millis(),
                        now.timestamp_millis(),
                    ])?;
                    if inserted == 1 {
                        created.push(step);
                    }
                }
            }
            tx.execute(
                "UPDATE meal_plans SET prep_steps_derived_at = ?1 WHERE id = ?2",
                params![now.timestamp_millis(), plan_id],
            )?;
            tx.commit()?;
            debug!(meal_plan_id = %plan_id, windows = windows.len(), created = created.len(), "Prep steps stored");
            Ok(created)
        })
    }

    fn advanced_prep_steps_for_plan(&self, plan_id: &str) -> DbResult<Vec<AdvancedPrepStep>> {
        self.with_conn(|conn| record::fetch_where(conn, &Scope::all().eq("belongs_to_meal_plan", plan_id)))
    }

    fn complete_advanced_prep_step(
        &self,
        id: &str,
        completed: bool,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<AdvancedPrepStep> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut step: AdvancedPrepStep = record::fetch_one(&tx, id, &Scope::all())?;
            step.completed_at = completed.then_some(now);
            if let Some(notes) = notes {
                step.notes = notes.to_string();
            }
            record::update_row(&tx, &step, now)?;
            tx.commit()?;
            step.touch(now);
            Ok(step)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meal_plans::tests::{ballot, shared_plan};
    use crate::record::DataManager;
    use crate::testing::open_temp;
    use crate::{DbError, MealPlanDataManager, MealPlanOptionVoteDataManager};
    use chrono::Duration;
    use supper_planning::derive_prep_windows;
    use supper_types::time;

    fn finalized_plan(db: &Database) -> (MealPlan, String) {
        let f = shared_plan(db, time::now() + Duration::days(1));
        let event = &f.plan.events[0];
        let now = time::now();
        db.cast_ballot(&f.plan.id, &event.id, &f.owner.1.id, &f.owner.0.id, &ballot(&f.plan, 0), now).unwrap();
        db.cast_ballot(&f.plan.id, &event.id, &f.guest.1.id, &f.guest.0.id, &ballot(&f.plan, 0), now).unwrap();
        let (_, plan) = db.finalize_meal_plan(&f.plan.id, now).unwrap();
        (plan, f.guest.1.id.clone())
    }

    #[test]
    fn derivation_is_idempotent() {
        let (_dir, db) = open_temp();
        let (plan, _) = finalized_plan(&db);
        let now = time::now();

        let (steps, storable) = db.prep_inputs(&plan).unwrap();
        let windows = derive_prep_windows(&plan, &steps, &storable, now);
        // Only the storable dough step of the bread recipe qualifies.
        assert_eq!(windows.len(), 1);

        let first = db.create_advanced_prep_steps(&plan.id, &windows, now).unwrap();
        let second = db.create_advanced_prep_steps(&plan.id, &windows, now).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        let stored = db.advanced_prep_steps_for_plan(&plan.id).unwrap();
        assert_eq!(stored, first);
        let starts_at = plan.events[0].starts_at;
        assert!(stored[0].cannot_complete_before < stored[0].cannot_complete_after);
        assert_eq!(stored[0].cannot_complete_after, starts_at - Duration::hours(1));
        assert!(db.plans_needing_prep_steps().unwrap().is_empty());
    }

    #[test]
    fn completion_sets_and_clears_the_timestamp() {
        let (_dir, db) = open_temp();
        let (plan, guest) = finalized_plan(&db);
        let now = time::now();
        let (steps, storable) = db.prep_inputs(&plan).unwrap();
        let windows = derive_prep_windows(&plan, &steps, &storable, now);
        let created = db.create_advanced_prep_steps(&plan.id, &windows, now).unwrap();
        let id = &created[0].id;

        let done = db.complete_advanced_prep_step(id, true, Some("made it"), now).unwrap();
        assert_eq!(done.completed_at, Some(now));
        let visible: AdvancedPrepStep = db.get(id, &visible_scope(&guest)).unwrap();
        assert_eq!(visible.notes, "made it");

        let undone = db.complete_advanced_prep_step(id, false, None, now).unwrap();
        assert!(undone.completed_at.is_none());
        assert_eq!(undone.notes, "made it");

        let hidden = DataManager::<AdvancedPrepStep>::get(&db, id, &visible_scope("elsewhere"));
        assert!(matches!(hidden, Err(DbError::NotFound)));
    }
}
