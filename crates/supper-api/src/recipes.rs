//! Recipes and their nested steps, ingredients, instruments and products.
//! Every recipe is readable by everyone; only its creator may change it or
//! anything beneath it.

use supper_db::recipes::{owner_scope, part_scope, step_scope};
use supper_db::{DataManager, Database, Scope};
use supper_types::models::*;
use supper_types::{SessionContext, ids, time};

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::params::{self, RouteBinder};
use crate::service::{Operation, ResourceService, bind_crud};

const OWNED_RECIPES: &str = "SELECT id FROM recipes WHERE created_by_user = ? AND archived_at IS NULL";

pub fn bind<R: RouteBinder>(router: R, state: &AppState) -> R {
    let recipe = format!("/recipes/{}", params::RECIPE_ID.placeholder());
    let step = format!("{}/steps/{}", recipe, params::RECIPE_STEP_ID.placeholder());
    let step_parents = [params::RECIPE_ID, params::RECIPE_STEP_ID];

    let router = bind_crud(
        router,
        "/recipes",
        params::RECIPE_ID,
        ResourceService::new("recipe", state, params::RECIPE_ID, prepare_recipe).scope(recipe_scope),
    );
    let router = bind_crud(
        router,
        &format!("{}/steps", recipe),
        params::RECIPE_STEP_ID,
        ResourceService::new("recipe_step", state, params::RECIPE_STEP_ID, prepare_step)
            .parents(&[params::RECIPE_ID])
            .scope(steps_scope)
            .check(RecipeStep::check),
    );
    let router = bind_crud(
        router,
        &format!("{}/ingredients", step),
        params::RECIPE_STEP_INGREDIENT_ID,
        ResourceService::new("recipe_step_ingredient", state, params::RECIPE_STEP_INGREDIENT_ID, prepare_ingredient)
            .parents(&step_parents)
            .scope(parts_scope)
            .check(RecipeStepIngredient::check),
    );
    let router = bind_crud(
        router,
        &format!("{}/instruments", step),
        params::RECIPE_STEP_INSTRUMENT_ID,
        ResourceService::new("recipe_step_instrument", state, params::RECIPE_STEP_INSTRUMENT_ID, prepare_instrument)
            .parents(&step_parents)
            .scope(parts_scope)
            .check(RecipeStepInstrument::check),
    );
    bind_crud(
        router,
        &format!("{}/products", step),
        params::RECIPE_STEP_PRODUCT_ID,
        ResourceService::new("recipe_step_product", state, params::RECIPE_STEP_PRODUCT_ID, prepare_product)
            .parents(&step_parents)
            .scope(parts_scope),
    )
}

fn recipe_scope(session: &SessionContext, _: &[String], op: Operation) -> Scope {
    if op.mutates() { owner_scope(session.user_id()) } else { Scope::all() }
}

fn steps_scope(session: &SessionContext, parents: &[String], op: Operation) -> Scope {
    let scope = step_scope(&parents[0]);
    if op.mutates() {
        scope.raw(&format!("belongs_to_recipe IN ({})", OWNED_RECIPES), [session.user_id().to_string()])
    } else {
        scope
    }
}

/// Parts are addressed through their recipe and step; a step ID paired with
/// the wrong recipe matches nothing.
fn parts_scope(session: &SessionContext, parents: &[String], op: Operation) -> Scope {
    let scope = part_scope(&parents[1]).raw(
        "belongs_to_recipe_step IN (SELECT id FROM recipe_steps WHERE belongs_to_recipe = ? AND archived_at IS NULL)",
        [parents[0].clone()],
    );
    if op.mutates() {
        scope.raw(
            &format!(
                "belongs_to_recipe_step IN (SELECT id FROM recipe_steps WHERE belongs_to_recipe IN ({}))",
                OWNED_RECIPES
            ),
            [session.user_id().to_string()],
        )
    } else {
        scope
    }
}

fn prepare_recipe(_: &Database, input: RecipeCreationInput, session: &SessionContext, _: &[String]) -> ApiResult<Recipe> {
    let recipe = input.into_entity(&mut ids::new_id, session.user_id(), time::now());
    for step in &recipe.steps {
        step.check()?;
        for ingredient in &step.ingredients {
            ingredient.check()?;
        }
        for instrument in &step.instruments {
            instrument.check()?;
        }
    }
    Ok(recipe)
}

/// The parent recipe must exist and belong to the caller.
fn owned_recipe(db: &Database, session: &SessionContext, recipe_id: &str) -> ApiResult<()> {
    if DataManager::<Recipe>::exists(db, recipe_id, &owner_scope(session.user_id()))? {
        Ok(())
    } else {
        Err(ApiError::NotFound)
    }
}

fn owned_step(db: &Database, session: &SessionContext, parents: &[String]) -> ApiResult<()> {
    owned_recipe(db, session, &parents[0])?;
    if DataManager::<RecipeStep>::exists(db, &parents[1], &step_scope(&parents[0]))? {
        Ok(())
    } else {
        Err(ApiError::NotFound)
    }
}

fn prepare_step(db: &Database, input: RecipeStepCreationInput, session: &SessionContext, parents: &[String]) -> ApiResult<RecipeStep> {
    owned_recipe(db, session, &parents[0])?;
    Ok(input.into_entity(&mut ids::new_id, &parents[0], time::now()))
}

fn prepare_ingredient(
    db: &Database,
    input: RecipeStepIngredientCreationInput,
    session: &SessionContext,
    parents: &[String],
) -> ApiResult<RecipeStepIngredient> {
    owned_step(db, session, parents)?;
    Ok(input.into_entity(ids::new_id(), &parents[1], time::now()))
}

fn prepare_instrument(
    db: &Database,
    input: RecipeStepInstrumentCreationInput,
    session: &SessionContext,
    parents: &[String],
) -> ApiResult<RecipeStepInstrument> {
    owned_step(db, session, parents)?;
    Ok(input.into_entity(ids::new_id(), &parents[1], time::now()))
}

fn prepare_product(
    db: &Database,
    input: RecipeStepProductCreationInput,
    session: &SessionContext,
    parents: &[String],
) -> ApiResult<RecipeStepProduct> {
    owned_step(db, session, parents)?;
    Ok(input.into_entity(ids::new_id(), &parents[1], time::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use supper_types::{AccountStatus, Requester};

    fn session(user_id: &str) -> SessionContext {
        SessionContext {
            requester: Requester { user_id: user_id.into(), account_status: AccountStatus::Good, service_roles: Vec::new() },
            active_household_id: "h1".into(),
            household_permissions: HashMap::new(),
        }
    }

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db"), &Default::default()).unwrap();
        (dir, db)
    }

    #[test]
    fn only_the_creator_may_add_steps() {
        let (_dir, db) = open_db();
        let input = RecipeCreationInput { name: "bread".into(), yields_portions: 2, ..Default::default() };
        let recipe = prepare_recipe(&db, input, &session("baker"), &[]).unwrap();
        db.create(&recipe).unwrap();

        assert!(owned_recipe(&db, &session("baker"), &recipe.id).is_ok());
        let err = owned_recipe(&db, &session("stranger"), &recipe.id).unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[test]
    fn mutations_are_scoped_to_the_owner() {
        let parents = vec!["r1".to_string()];
        let read = steps_scope(&session("u1"), &parents, Operation::Read);
        let update = steps_scope(&session("u1"), &parents, Operation::Update);
        assert!(format!("{:?}", update).contains("created_by_user"));
        assert!(!format!("{:?}", read).contains("created_by_user"));
    }
}
