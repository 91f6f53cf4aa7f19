//! Derives advanced prep windows from a finalized plan's chosen options.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use supper_types::models::{DEFAULT_PREP_HORIZON_SECONDS, MealPlan, RecipeStep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepWindow {
    pub meal_plan_option: String,
    pub recipe_step: String,
    pub cannot_complete_before: DateTime<Utc>,
    pub cannot_complete_after: DateTime<Utc>,
}

/// One window per storable step of every chosen option's meal.
///
/// `steps_by_meal` maps a meal ID to the steps of all its recipes;
/// `storable_preparations` holds the IDs of preparations flagged
/// `yieldsStorableOutput`. Steps whose window would be empty are skipped.
pub fn derive_prep_windows(
    plan: &MealPlan,
    steps_by_meal: &HashMap<String, Vec<RecipeStep>>,
    storable_preparations: &HashSet<String>,
    now: DateTime<Utc>,
) -> Vec<PrepWindow> {
    let mut windows = Vec::new();
    for event in plan.events.iter().filter(|e| e.archived_at.is_none()) {
        let Some(chosen) = event.options.iter().find(|o| o.chosen) else {
            continue;
        };
        let Some(steps) = steps_by_meal.get(&chosen.meal_id) else {
            continue;
        };

        for step in steps.iter().filter(|s| storable_preparations.contains(&s.preparation_id)) {
            let horizon = step.maximum_prep_horizon_in_seconds.unwrap_or(DEFAULT_PREP_HORIZON_SECONDS);
            let buffer = step.minimum_cooking_buffer_in_seconds.unwrap_or(0);

            let before = now.max(event.starts_at - Duration::seconds(i64::from(horizon)));
            let after = event.starts_at - Duration::seconds(i64::from(buffer));
            if before >= after {
                continue;
            }
            windows.push(PrepWindow {
                meal_plan_option: chosen.id.clone(),
                recipe_step: step.id.clone(),
                cannot_complete_before: before,
                cannot_complete_after: after,
            });
        }
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use supper_types::models::{MealPlanEvent, MealPlanOption, MealPlanStatus};

    fn step(id: &str, preparation: &str, horizon: Option<u32>, buffer: Option<u32>) -> RecipeStep {
        RecipeStep {
            id: id.into(),
            preparation_id: preparation.into(),
            maximum_prep_horizon_in_seconds: horizon,
            minimum_cooking_buffer_in_seconds: buffer,
            ..Default::default()
        }
    }

    fn finalized_plan(starts_at: DateTime<Utc>) -> MealPlan {
        MealPlan {
            id: "p1".into(),
            status: MealPlanStatus::Finalized,
            events: vec![MealPlanEvent {
                id: "e1".into(),
                starts_at,
                ends_at: starts_at + Duration::hours(1),
                options: vec![
                    MealPlanOption { id: "o1".into(), meal_id: "m1".into(), chosen: true, ..Default::default() },
                    MealPlanOption { id: "o2".into(), meal_id: "m2".into(), ..Default::default() },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn only_storable_steps_of_chosen_meals_get_windows() {
        let now = Utc::now();
        let starts = now + Duration::days(2);
        let steps = HashMap::from([
            ("m1".to_string(), vec![step("s1", "marinate", None, Some(3600)), step("s2", "sear", None, None)]),
            ("m2".to_string(), vec![step("s3", "marinate", None, None)]),
        ]);
        let storable = HashSet::from(["marinate".to_string()]);

        let windows = derive_prep_windows(&finalized_plan(starts), &steps, &storable, now);
        assert_eq!(windows.len(), 1);
        let w = &windows[0];
        assert_eq!((w.meal_plan_option.as_str(), w.recipe_step.as_str()), ("o1", "s1"));
        // the default seven day horizon reaches back past now
        assert_eq!(w.cannot_complete_before, now);
        assert_eq!(w.cannot_complete_after, starts - Duration::hours(1));
        assert!(w.cannot_complete_before < w.cannot_complete_after);
        assert!(w.cannot_complete_after <= starts);
    }

    #[test]
    fn short_horizon_starts_the_window_later() {
        let now = Utc::now();
        let starts = now + Duration::days(2);
        let steps = HashMap::from([("m1".to_string(), vec![step("s1", "p", Some(86_400), None)])]);
        let storable = HashSet::from(["p".to_string()]);
        let windows = derive_prep_windows(&finalized_plan(starts), &steps, &storable, now);
        assert_eq!(windows[0].cannot_complete_before, starts - Duration::days(1));
        assert_eq!(windows[0].cannot_complete_after, starts);
    }

    #[test]
    fn empty_windows_are_skipped() {
        let now = Utc::now();
        let starts = now + Duration::minutes(30);
        let steps = HashMap::from([("m1".to_string(), vec![step("s1", "p", None, Some(3600))])]);
        let storable = HashSet::from(["p".to_string()]);
        assert!(derive_prep_windows(&finalized_plan(starts), &steps, &storable, now).is_empty());
    }

    #[test]
    fn rerunning_yields_the_same_windows() {
        let now = Utc::now();
        let plan = finalized_plan(now + Duration::days(3));
        let steps = HashMap::from([("m1".to_string(), vec![step("s1", "p", None, None)])]);
        let storable = HashSet::from(["p".to_string()]);
        assert_eq!(
            derive_prep_windows(&plan, &steps, &storable, now),
            derive_prep_windows(&plan, &steps, &storable, now)
        );
    }
}
