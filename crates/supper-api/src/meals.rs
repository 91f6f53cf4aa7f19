//! Meals: named, ordered bundles of recipes. Readable by all, changed only
//! by their creator.

use supper_db::{DataManager, Database, Scope};
use supper_types::models::{Meal, MealCreationInput, Recipe};
use supper_types::{SessionContext, ids, time};

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::params::{self, RouteBinder};
use crate::service::{Operation, ResourceService, bind_crud};

pub fn bind<R: RouteBinder>(router: R, state: &AppState) -> R {
    bind_crud(
        router,
        "/meals",
        params::MEAL_ID,
        ResourceService::new("meal", state, params::MEAL_ID, prepare).scope(scope),
    )
}

fn scope(session: &SessionContext, _: &[String], op: Operation) -> Scope {
    if op.mutates() {
        Scope::all().eq("created_by_user", session.user_id())
    } else {
        Scope::all()
    }
}

fn prepare(db: &Database, input: MealCreationInput, session: &SessionContext, _: &[String]) -> ApiResult<Meal> {
    for (i, recipe_id) in input.recipes.iter().enumerate() {
        if !DataManager::<Recipe>::exists(db, recipe_id, &Scope::all())? {
            return Err(ApiError::invalid(format!("recipes[{}]", i), "recipe does not exist"));
        }
    }
    Ok(input.into_entity(ids::new_id(), session.user_id(), time::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use supper_types::{AccountStatus, Requester};

    #[test]
    fn unknown_recipes_are_rejected_by_position() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db"), &Default::default()).unwrap();
        let session = SessionContext {
            requester: Requester { user_id: "u1".into(), account_status: AccountStatus::Good, service_roles: Vec::new() },
            active_household_id: "h1".into(),
            household_permissions: HashMap::new(),
        };
        let input = MealCreationInput { name: "supper".into(), recipes: vec!["nope".into()], ..Default::default() };
        let err = prepare(&db, input, &session, &[]).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT.recipes[0]");
    }
}
