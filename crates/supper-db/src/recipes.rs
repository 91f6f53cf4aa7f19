//! Recipes and their nested steps, step ingredients, instruments and
//! products. A recipe is stored as one aggregate: reading it loads every
//! live step with its parts, creating it inserts them all in one transaction.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use supper_types::models::{Recipe, RecipeStep, RecipeStepIngredient, RecipeStepInstrument, RecipeStepProduct};

use crate::error::DbResult;
use crate::record::{
    self, Record, Scope, flag, int, opt_int, opt_real, opt_text, read_enum, read_f32, read_ms, read_opt_f32,
    read_opt_ms, real, text,
};

impl Record for Recipe {
    const TABLE: &'static str = "recipes";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "source",
        "description",
        "inspired_by_recipe_id",
        "yields_portions",
        "created_by_user",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Recipe {
            id: row.get("id")?,
            name: row.get("name")?,
            source: row.get("source")?,
            description: row.get("description")?,
            inspired_by_recipe_id: row.get("inspired_by_recipe_id")?,
            yields_portions: row.get("yields_portions")?,
            created_by_user: row.get("created_by_user")?,
            steps: Vec::new(),
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            text(&self.source),
            text(&self.description),
            opt_text(self.inspired_by_recipe_id.as_deref()),
            int(self.yields_portions),
            text(&self.created_by_user),
        ]
    }

    fn load_children(&mut self, conn: &Connection) -> DbResult<()> {
        self.steps = record::fetch_where(conn, &step_scope(&self.id))?;
        Ok(())
    }

    fn insert_children(&self, conn: &Connection) -> DbResult<()> {
        // Products of earlier steps must exist before later steps consume them.
        let mut steps: Vec<&RecipeStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.index);
        for step in steps {
            record::insert(conn, step)?;
        }
        Ok(())
    }
}

impl Record for RecipeStep {
    const TABLE: &'static str = "recipe_steps";
    const COLUMNS: &'static [&'static str] = &[
        "step_index",
        "preparation_id",
        "prerequisite_step_id",
        "minimum_estimated_time_in_seconds",
        "maximum_estimated_time_in_seconds",
        "maximum_prep_horizon_in_seconds",
        "minimum_cooking_buffer_in_seconds",
        "notes",
        "optional",
        "belongs_to_recipe",
    ];
    const CHILD_ORDER: &'static str = "step_index, id";

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecipeStep {
            id: row.get("id")?,
            index: row.get("step_index")?,
            preparation_id: row.get("preparation_id")?,
            prerequisite_step_id: row.get("prerequisite_step_id")?,
            minimum_estimated_time_in_seconds: row.get("minimum_estimated_time_in_seconds")?,
            maximum_estimated_time_in_seconds: row.get("maximum_estimated_time_in_seconds")?,
            maximum_prep_horizon_in_seconds: row.get("maximum_prep_horizon_in_seconds")?,
            minimum_cooking_buffer_in_seconds: row.get("minimum_cooking_buffer_in_seconds")?,
            notes: row.get("notes")?,
            optional: row.get("optional")?,
            belongs_to_recipe: row.get("belongs_to_recipe")?,
            ingredients: Vec::new(),
            instruments: Vec::new(),
            products: Vec::new(),
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            int(self.index),
            text(&self.preparation_id),
            opt_text(self.prerequisite_step_id.as_deref()),
            opt_int(self.minimum_estimated_time_in_seconds),
            opt_int(self.maximum_estimated_time_in_seconds),
            opt_int(self.maximum_prep_horizon_in_seconds),
            opt_int(self.minimum_cooking_buffer_in_seconds),
            text(&self.notes),
            flag(self.optional),
            text(&self.belongs_to_recipe),
        ]
    }

    fn load_children(&mut self, conn: &Connection) -> DbResult<()> {
        let scope = part_scope(&self.id);
        self.products = record::fetch_where(conn, &scope)?;
        self.ingredients = record::fetch_where(conn, &scope)?;
        self.instruments = record::fetch_where(conn, &scope)?;
        Ok(())
    }

    fn insert_children(&self, conn: &Connection) -> DbResult<()> {
        for p in &self.products {
            record::insert(conn, p)?;
        }
        for i in &self.ingredients {
            record::insert(conn, i)?;
        }
        for i in &self.instruments {
            record::insert(conn, i)?;
        }
        Ok(())
    }
}

impl Record for RecipeStepProduct {
    const TABLE: &'static str = "recipe_step_products";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "kind",
        "measurement_unit_id",
        "quantity_notes",
        "minimum_quantity",
        "maximum_quantity",
        "compostable",
        "maximum_storage_duration_in_seconds",
        "storage_instructions",
        "belongs_to_recipe_step",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecipeStepProduct {
            id: row.get("id")?,
            name: row.get("name")?,
            kind: read_enum(row, "kind")?,
            measurement_unit_id: row.get("measurement_unit_id")?,
            quantity_notes: row.get("quantity_notes")?,
            minimum_quantity: read_opt_f32(row, "minimum_quantity")?,
            maximum_quantity: read_opt_f32(row, "maximum_quantity")?,
            compostable: row.get("compostable")?,
            maximum_storage_duration_in_seconds: row.get("maximum_storage_duration_in_seconds")?,
            storage_instructions: row.get("storage_instructions")?,
            belongs_to_recipe_step: row.get("belongs_to_recipe_step")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            text(self.kind.as_str()),
            opt_text(self.measurement_unit_id.as_deref()),
            text(&self.quantity_notes),
            opt_real(self.minimum_quantity),
            opt_real(self.maximum_quantity),
            flag(self.compostable),
            opt_int(self.maximum_storage_duration_in_seconds),
            text(&self.storage_instructions),
            text(&self.belongs_to_recipe_step),
        ]
    }
}

impl Record for RecipeStepIngredient {
    const TABLE: &'static str = "recipe_step_ingredients";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "ingredient_id",
        "recipe_step_product_id",
        "measurement_unit_id",
        "minimum_quantity",
        "maximum_quantity",
        "quantity_notes",
        "ingredient_notes",
        "optional",
        "belongs_to_recipe_step",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecipeStepIngredient {
            id: row.get("id")?,
            name: row.get("name")?,
            ingredient_id: row.get("ingredient_id")?,
            recipe_step_product_id: row.get("recipe_step_product_id")?,
            measurement_unit_id: row.get("measurement_unit_id")?,
            minimum_quantity: read_f32(row, "minimum_quantity")?,
            maximum_quantity: read_opt_f32(row, "maximum_quantity")?,
            quantity_notes: row.get("quantity_notes")?,
            ingredient_notes: row.get("ingredient_notes")?,
            optional: row.get("optional")?,
            belongs_to_recipe_step: row.get("belongs_to_recipe_step")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            opt_text(self.ingredient_id.as_deref()),
            opt_text(self.recipe_step_product_id.as_deref()),
            text(&self.measurement_unit_id),
            real(self.minimum_quantity),
            opt_real(self.maximum_quantity),
            text(&self.quantity_notes),
            text(&self.ingredient_notes),
            flag(self.optional),
            text(&self.belongs_to_recipe_step),
        ]
    }
}

impl Record for RecipeStepInstrument {
    const TABLE: &'static str = "recipe_step_instruments";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "instrument_id",
        "recipe_step_product_id",
        "notes",
        "preference_rank",
        "optional",
        "minimum_quantity",
        "maximum_quantity",
        "belongs_to_recipe_step",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RecipeStepInstrument {
            id: row.get("id")?,
            name: row.get("name")?,
            instrument_id: row.get("instrument_id")?,
            recipe_step_product_id: row.get("recipe_step_product_id")?,
            notes: row.get("notes")?,
            preference_rank: row.get("preference_rank")?,
            optional: row.get("optional")?,
            minimum_quantity: row.get("minimum_quantity")?,
            maximum_quantity: row.get("maximum_quantity")?,
            belongs_to_recipe_step: row.get("belongs_to_recipe_step")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            opt_text(self.instrument_id.as_deref()),
            opt_text(self.recipe_step_product_id.as_deref()),
            text(&self.notes),
            int(self.preference_rank),
            flag(self.optional),
            int(self.minimum_quantity),
            opt_int(self.maximum_quantity),
            text(&self.belongs_to_recipe_step),
        ]
    }
}

/// Steps of a live recipe.
pub fn step_scope(recipe_id: &str) -> Scope {
    Scope::all().eq("belongs_to_recipe", recipe_id)
}

/// Ingredients, instruments or products of one step.
pub fn part_scope(step_id: &str) -> Scope {
    Scope::all().eq("belongs_to_recipe_step", step_id)
}

/// Recipes a user may modify.
pub fn owner_scope(user_id: &str) -> Scope {
    Scope::all().eq("created_by_user", user_id)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::DataManager;
    use crate::testing::open_temp;
    use crate::users::tests::user_with_household;
    use crate::{Database, UserDataManager};
    use supper_types::models::{
        ProductKind, ProductReference, RecipeCreationInput, RecipeStepCreationInput,
        RecipeStepIngredientCreationInput, RecipeStepProductCreationInput, ValidIngredient, ValidMeasurementUnit,
        ValidPreparation,
    };
    use supper_types::{ids, time};

    pub struct Taxonomy {
        pub ingredient: String,
        pub unit: String,
        pub storable: String,
        pub perishable: String,
    }

    pub fn seed_taxonomy(db: &Database) -> Taxonomy {
        let now = time::now();
        let ingredient = ValidIngredient { id: ids::new_id(), name: "flour".into(), created_at: now, ..Default::default() };
        let unit = ValidMeasurementUnit { id: ids::new_id(), name: "gram".into(), created_at: now, ..Default::default() };
        let storable = ValidPreparation {
            id: ids::new_id(),
            name: "ferment".into(),
            yields_storable_output: true,
            created_at: now,
            ..Default::default()
        };
        let perishable = ValidPreparation { id: ids::new_id(), name: "sear".into(), created_at: now, ..Default::default() };
        db.create(&ingredient).unwrap();
        db.create(&unit).unwrap();
        db.create(&storable).unwrap();
        db.create(&perishable).unwrap();
        Taxonomy { ingredient: ingredient.id, unit: unit.id, storable: storable.id, perishable: perishable.id }
    }

    /// Two-step recipe: a storable dough step whose product feeds a
    /// perishable baking step.
    pub fn two_step_recipe(db: &Database, tax: &Taxonomy, user_id: &str) -> Recipe {
        let input = RecipeCreationInput {
            name: "bread".into(),
            yields_portions: 2,
            steps: vec![
                RecipeStepCreationInput {
                    index: 1,
                    preparation_id: tax.perishable.clone(),
                    minimum_cooking_buffer_in_seconds: Some(600),
                    ingredients: vec![RecipeStepIngredientCreationInput {
                        measurement_unit_id: tax.unit.clone(),
                        minimum_quantity: 1.0,
                        product_of_recipe_step: Some(ProductReference { step_index: 0, product_index: 0 }),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                RecipeStepCreationInput {
                    index: 0,
                    preparation_id: tax.storable.clone(),
                    maximum_prep_horizon_in_seconds: Some(2 * 86_400),
                    minimum_cooking_buffer_in_seconds: Some(3_600),
                    ingredients: vec![RecipeStepIngredientCreationInput {
                        ingredient_id: Some(tax.ingredient.clone()),
                        measurement_unit_id: tax.unit.clone(),
                        minimum_quantity: 500.0,
                        ..Default::default()
                    }],
                    products: vec![RecipeStepProductCreationInput {
                        name: "dough".into(),
                        kind: ProductKind::Ingredient,
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let recipe = input.into_entity(&mut ids::new_id, user_id, time::now());
        db.create(&recipe).unwrap();
        recipe
    }

    #[test]
    fn recipe_aggregate_round_trips() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("baker");
        db.create_user(&user, &household).unwrap();
        let tax = seed_taxonomy(&db);
        let recipe = two_step_recipe(&db, &tax, &user.id);

        let stored: Recipe = db.get(&recipe.id, &Scope::all()).unwrap();
        assert_eq!(stored.steps.len(), 2);
        assert_eq!(stored.steps[0].index, 0);
        assert_eq!(stored.steps[0].products.len(), 1);
        let consumed = stored.steps[1].ingredients[0].recipe_step_product_id.as_deref();
        assert_eq!(consumed, Some(stored.steps[0].products[0].id.as_str()));
    }

    #[test]
    fn archived_steps_disappear_from_the_aggregate() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("baker");
        db.create_user(&user, &household).unwrap();
        let tax = seed_taxonomy(&db);
        let recipe = two_step_recipe(&db, &tax, &user.id);
        let last = recipe.steps.iter().find(|s| s.index == 1).unwrap();

        DataManager::<RecipeStep>::archive(&db, &last.id, &step_scope(&recipe.id)).unwrap();
        let stored: Recipe = db.get(&recipe.id, &Scope::all()).unwrap();
        assert_eq!(stored.steps.len(), 1);
    }

    #[test]
    fn only_the_author_may_archive() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("baker");
        db.create_user(&user, &household).unwrap();
        let tax = seed_taxonomy(&db);
        let recipe = two_step_recipe(&db, &tax, &user.id);

        let other = DataManager::<Recipe>::archive(&db, &recipe.id, &owner_scope("someone-else"));
        assert!(matches!(other, Err(crate::DbError::NotFound)));
        DataManager::<Recipe>::archive(&db, &recipe.id, &owner_scope(&user.id)).unwrap();
    }

    #[test]
    fn ingredient_needs_exactly_one_source() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("baker");
        db.create_user(&user, &household).unwrap();
        let tax = seed_taxonomy(&db);
        let recipe = two_step_recipe(&db, &tax, &user.id);

        let bad = RecipeStepIngredient {
            id: ids::new_id(),
            measurement_unit_id: tax.unit.clone(),
            belongs_to_recipe_step: recipe.steps[0].id.clone(),
            created_at: time::now(),
            ..Default::default()
        };
        assert!(db.create(&bad).is_err());
    }
}
