//! Fixtures shared by the worker tests.

use chrono::Duration;
use supper_db::{DataManager, Database, DbConfig, UserDataManager};
use supper_types::models::{
    BallotEntry, Household, HouseholdUserMembership, Meal, MealCreationInput, MealName, MealPlan, MealPlanCreationInput,
    MealPlanEventCreationInput, MealPlanOptionCreationInput, Recipe, RecipeCreationInput, RecipeStepCreationInput, User,
    ValidPreparation,
};
use supper_types::{HouseholdRole, ServiceRole, ids, time};
use tempfile::TempDir;

pub fn open_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("supper.db"), &DbConfig::default()).unwrap();
    (dir, db)
}

pub fn household(db: &Database, username: &str) -> (User, Household) {
    let now = time::now();
    let user = User {
        id: ids::new_id(),
        username: username.into(),
        hashed_password: "hash".into(),
        service_roles: vec![ServiceRole::ServiceUser],
        created_at: now,
        ..Default::default()
    };
    let household_id = ids::new_id();
    let household = Household {
        id: household_id.clone(),
        name: format!("{}'s household", username),
        belongs_to_user: user.id.clone(),
        members: vec![HouseholdUserMembership {
            id: ids::new_id(),
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
    db.create_user(&user, &household).unwrap();
    (user, household)
}

pub struct Fixture {
    /// (user, household) pairs.
    pub owner: (String, String),
    pub guest: (String, String),
    pub plan: MealPlan,
}

/// A plan shared by two households: one dinner, two meals, each a single
/// storable marinating step that may start two days early.
pub fn shared_plan(db: &Database) -> Fixture {
    let (owner, owner_household) = household(db, "alice");
    let (guest, guest_household) = household(db, "bob");

    let now = time::now();
    let marinate = ValidPreparation {
        id: ids::new_id(),
        name: "marinate".into(),
        yields_storable_output: true,
        created_at: now,
        ..Default::default()
    };
    db.create(&marinate).unwrap();
    let recipe: Recipe = RecipeCreationInput {
        name: "stew".into(),
        yields_portions: 4,
        steps: vec![RecipeStepCreationInput {
            index: 0,
            preparation_id: marinate.id.clone(),
            maximum_prep_horizon_in_seconds: Some(2 * 86_400),
            minimum_cooking_buffer_in_seconds: Some(3_600),
            ..Default::default()
        }],
        ..Default::default()
    }
    .into_entity(&mut ids::new_id, &owner.id, now);
    db.create(&recipe).unwrap();

    let meal = |name: &str| {
        let meal: Meal = MealCreationInput { name: name.into(), recipes: vec![recipe.id.clone()], ..Default::default() }
            .into_entity(ids::new_id(), &owner.id, now);
        db.create(&meal).unwrap();
        meal.id
    };
    let (m1, m2) = (meal("stew night"), meal("stew again"));

    let start = now + Duration::days(3);
    let plan = MealPlanCreationInput {
        notes: "wk1".into(),
        voting_deadline: now + Duration::days(1),
        shared_with_households: vec![guest_household.id.clone()],
        events: vec![MealPlanEventCreationInput {
            meal_type: MealName::Dinner,
            starts_at: start,
            ends_at: start + Duration::hours(1),
            options: vec![
                MealPlanOptionCreationInput { meal_id: m1, ..Default::default() },
                MealPlanOptionCreationInput { meal_id: m2, ..Default::default() },
            ],
            ..Default::default()
        }],
    }
    .into_entity(&mut ids::new_id, &owner_household.id, now);
    db.create(&plan).unwrap();
    Fixture {
        owner: (owner.id, owner_household.id),
        guest: (guest.id, guest_household.id),
        plan,
    }
}

/// Ranks option `first` of the only event above the rest.
pub fn ballot(plan: &MealPlan, first: usize) -> Vec<BallotEntry> {
    plan.events[0]
        .options
        .iter()
        .enumerate()
        .map(|(i, o)| BallotEntry {
            belongs_to_meal_plan_option: o.id.clone(),
            rank: if i == first { 0 } else { 1 },
            ..Default::default()
        })
        .collect()
}
