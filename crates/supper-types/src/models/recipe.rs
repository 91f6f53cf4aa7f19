//! Recipes and their nested components.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::{self, Updatable};
use crate::string_enum;
use crate::validation::{self, Validate, ValidationError};

const MAX_NAME: usize = 256;
const MAX_TEXT: usize = 8192;

/// Upper bound accepted for a step's prep horizon.
pub const MAX_PREP_HORIZON_SECONDS: u32 = 30 * 24 * 60 * 60;

// -- Recipes --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub source: String,
    pub description: String,
    #[serde(default, rename = "inspiredByRecipeID")]
    pub inspired_by_recipe_id: Option<String>,
    pub yields_portions: u32,
    pub created_by_user: String,
    #[serde(default)]
    pub steps: Vec<RecipeStep>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeCreationInput {
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inspiredByRecipeID")]
    pub inspired_by_recipe_id: Option<String>,
    #[serde(default = "default_portions")]
    pub yields_portions: u32,
    #[serde(default)]
    pub steps: Vec<RecipeStepCreationInput>,
}

fn default_portions() -> u32 {
    1
}

impl Validate for RecipeCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, MAX_NAME)?;
        validation::max_length("source", &self.source, MAX_NAME)?;
        validation::max_length("description", &self.description, MAX_TEXT)?;
        validation::optional_id_ref("inspiredByRecipeID", self.inspired_by_recipe_id.as_deref())?;
        validation::range("yieldsPortions", self.yields_portions, 1, 1000)?;
        self.steps.validate().map_err(|e| e.nested("steps"))?;

        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if !seen.insert(step.index) {
                return Err(ValidationError::new(format!("steps[{}].index", i), "step indices must be unique"));
            }
        }

        // product references must point at earlier steps' products
        for (i, step) in self.steps.iter().enumerate() {
            let refs = step
                .ingredients
                .iter()
                .filter_map(|ing| ing.product_of_recipe_step.as_ref())
                .chain(step.instruments.iter().filter_map(|ins| ins.product_of_recipe_step.as_ref()));
            for product_ref in refs {
                let target = self
                    .steps
                    .iter()
                    .find(|s| s.index == product_ref.step_index)
                    .ok_or_else(|| {
                        ValidationError::new(format!("steps[{}].productOfRecipeStep", i), "references an unknown step")
                    })?;
                if target.index >= step.index || product_ref.product_index as usize >= target.products.len() {
                    return Err(ValidationError::new(
                        format!("steps[{}].productOfRecipeStep", i),
                        "must reference a product of an earlier step",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl RecipeCreationInput {
    /// Builds the recipe aggregate, assigning identifiers with `next_id` and
    /// resolving index-based product references to the generated product IDs.
    pub fn into_entity(
        self,
        next_id: &mut impl FnMut() -> String,
        created_by_user: &str,
        now: DateTime<Utc>,
    ) -> Recipe {
        let recipe_id = next_id();
        let mut steps: Vec<RecipeStep> = Vec::with_capacity(self.steps.len());
        let mut product_ids: Vec<(u32, Vec<String>)> = Vec::new();

        let mut inputs = self.steps;
        inputs.sort_by_key(|s| s.index);

        for input in inputs {
            let step_index = input.index;
            let resolve = |reference: &Option<ProductReference>, ids: &Vec<(u32, Vec<String>)>| {
                reference.as_ref().and_then(|r| {
                    ids.iter()
                        .find(|(idx, _)| *idx == r.step_index)
                        .and_then(|(_, products)| products.get(r.product_index as usize).cloned())
                })
            };
            let mut step = input.into_entity_with(next_id, &recipe_id, now, |r| resolve(r, &product_ids));
            product_ids.push((step_index, step.products.iter().map(|p| p.id.clone()).collect()));
            step.belongs_to_recipe = recipe_id.clone();
            steps.push(step);
        }

        Recipe {
            id: recipe_id,
            name: self.name,
            source: self.source,
            description: self.description,
            inspired_by_recipe_id: self.inspired_by_recipe_id,
            yields_portions: self.yields_portions,
            created_by_user: created_by_user.to_string(),
            steps,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        rename = "inspiredByRecipeID",
        deserialize_with = "crate::nullable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub inspired_by_recipe_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yields_portions: Option<u32>,
}

impl Validate for RecipeUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 1, MAX_NAME)?;
        validation::optional_length("description", self.description.as_deref(), 0, MAX_TEXT)?;
        if let Some(Some(id)) = &self.inspired_by_recipe_id {
            validation::id_ref("inspiredByRecipeID", id)?;
        }
        if let Some(portions) = self.yields_portions {
            validation::range("yieldsPortions", portions, 1, 1000)?;
        }
        Ok(())
    }
}

impl Updatable for Recipe {
    type Input = RecipeUpdateInput;

    fn apply(&mut self, input: RecipeUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::string(&mut self.source, input.source);
        merge::string(&mut self.description, input.description);
        merge::nullable(&mut self.inspired_by_recipe_id, input.inspired_by_recipe_id);
        merge::value(&mut self.yields_portions, input.yields_portions);
    }

    fn to_update_input(&self) -> RecipeUpdateInput {
        RecipeUpdateInput {
            name: Some(self.name.clone()),
            source: Some(self.source.clone()),
            description: Some(self.description.clone()),
            inspired_by_recipe_id: Some(self.inspired_by_recipe_id.clone()),
            yields_portions: Some(self.yields_portions),
        }
    }
}

/// Points at the `product_index`-th product of the step with `step_index`
/// inside the same creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductReference {
    pub step_index: u32,
    pub product_index: u32,
}

// -- Recipe steps --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStep {
    pub id: String,
    pub index: u32,
    #[serde(rename = "preparationID")]
    pub preparation_id: String,
    #[serde(default, rename = "prerequisiteStepID")]
    pub prerequisite_step_id: Option<String>,
    #[serde(default)]
    pub minimum_estimated_time_in_seconds: Option<u32>,
    #[serde(default)]
    pub maximum_estimated_time_in_seconds: Option<u32>,
    /// How far ahead of the meal this step may be done. Defaults to seven days.
    #[serde(default)]
    pub maximum_prep_horizon_in_seconds: Option<u32>,
    /// How close to the meal this step must be finished.
    #[serde(default)]
    pub minimum_cooking_buffer_in_seconds: Option<u32>,
    pub notes: String,
    pub optional: bool,
    pub belongs_to_recipe: String,
    #[serde(default)]
    pub ingredients: Vec<RecipeStepIngredient>,
    #[serde(default)]
    pub instruments: Vec<RecipeStepInstrument>,
    #[serde(default)]
    pub products: Vec<RecipeStepProduct>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepCreationInput {
    #[serde(default)]
    pub index: u32,
    #[serde(rename = "preparationID")]
    pub preparation_id: String,
    #[serde(default, rename = "prerequisiteStepID")]
    pub prerequisite_step_id: Option<String>,
    #[serde(default)]
    pub minimum_estimated_time_in_seconds: Option<u32>,
    #[serde(default)]
    pub maximum_estimated_time_in_seconds: Option<u32>,
    #[serde(default)]
    pub maximum_prep_horizon_in_seconds: Option<u32>,
    #[serde(default)]
    pub minimum_cooking_buffer_in_seconds: Option<u32>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub ingredients: Vec<RecipeStepIngredientCreationInput>,
    #[serde(default)]
    pub instruments: Vec<RecipeStepInstrumentCreationInput>,
    #[serde(default)]
    pub products: Vec<RecipeStepProductCreationInput>,
}

impl Validate for RecipeStepCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("preparationID", &self.preparation_id)?;
        validation::optional_id_ref("prerequisiteStepID", self.prerequisite_step_id.as_deref())?;
        validation::max_length("notes", &self.notes, MAX_TEXT)?;
        estimated_range(self.minimum_estimated_time_in_seconds, self.maximum_estimated_time_in_seconds)?;
        timing(self.maximum_prep_horizon_in_seconds, self.minimum_cooking_buffer_in_seconds)?;
        self.ingredients.validate().map_err(|e| e.nested("ingredients"))?;
        self.instruments.validate().map_err(|e| e.nested("instruments"))?;
        self.products.validate().map_err(|e| e.nested("products"))
    }
}

impl RecipeStepCreationInput {
    /// Builds a step for an existing recipe. Index-based product references
    /// cannot be resolved outside a recipe creation request and are dropped.
    pub fn into_entity(self, next_id: &mut impl FnMut() -> String, recipe_id: &str, now: DateTime<Utc>) -> RecipeStep {
        self.into_entity_with(next_id, recipe_id, now, |_| None)
    }

    fn into_entity_with(
        self,
        next_id: &mut impl FnMut() -> String,
        recipe_id: &str,
        now: DateTime<Utc>,
        resolve: impl Fn(&Option<ProductReference>) -> Option<String>,
    ) -> RecipeStep {
        let step_id = next_id();
        let products = self
            .products
            .into_iter()
            .map(|p| p.into_entity(next_id(), &step_id, now))
            .collect();
        let ingredients = self
            .ingredients
            .into_iter()
            .map(|i| {
                let product = i.recipe_step_product_id.clone().or_else(|| resolve(&i.product_of_recipe_step));
                let mut entity = i.into_entity(next_id(), &step_id, now);
                entity.recipe_step_product_id = product;
                entity
            })
            .collect();
        let instruments = self
            .instruments
            .into_iter()
            .map(|i| {
                let product = i.recipe_step_product_id.clone().or_else(|| resolve(&i.product_of_recipe_step));
                let mut entity = i.into_entity(next_id(), &step_id, now);
                entity.recipe_step_product_id = product;
                entity
            })
            .collect();

        RecipeStep {
            id: step_id,
            index: self.index,
            preparation_id: self.preparation_id,
            prerequisite_step_id: self.prerequisite_step_id,
            minimum_estimated_time_in_seconds: self.minimum_estimated_time_in_seconds,
            maximum_estimated_time_in_seconds: self.maximum_estimated_time_in_seconds,
            maximum_prep_horizon_in_seconds: self.maximum_prep_horizon_in_seconds,
            minimum_cooking_buffer_in_seconds: self.minimum_cooking_buffer_in_seconds,
            notes: self.notes,
            optional: self.optional,
            belongs_to_recipe: recipe_id.to_string(),
            ingredients,
            instruments,
            products,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, rename = "preparationID", skip_serializing_if = "Option::is_none")]
    pub preparation_id: Option<String>,
    #[serde(
        default,
        rename = "prerequisiteStepID",
        deserialize_with = "crate::nullable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub prerequisite_step_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub minimum_estimated_time_in_seconds: Option<Option<u32>>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub maximum_estimated_time_in_seconds: Option<Option<u32>>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub maximum_prep_horizon_in_seconds: Option<Option<u32>>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub minimum_cooking_buffer_in_seconds: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl Validate for RecipeStepUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(id) = &self.preparation_id {
            if !id.is_empty() {
                validation::id_ref("preparationID", id)?;
            }
        }
        validation::optional_length("notes", self.notes.as_deref(), 0, MAX_TEXT)?;
        timing(
            self.maximum_prep_horizon_in_seconds.flatten(),
            self.minimum_cooking_buffer_in_seconds.flatten(),
        )
    }
}

impl Updatable for RecipeStep {
    type Input = RecipeStepUpdateInput;

    fn apply(&mut self, input: RecipeStepUpdateInput) {
        merge::value(&mut self.index, input.index);
        merge::string(&mut self.preparation_id, input.preparation_id);
        merge::nullable(&mut self.prerequisite_step_id, input.prerequisite_step_id);
        merge::nullable(&mut self.minimum_estimated_time_in_seconds, input.minimum_estimated_time_in_seconds);
        merge::nullable(&mut self.maximum_estimated_time_in_seconds, input.maximum_estimated_time_in_seconds);
        merge::nullable(&mut self.maximum_prep_horizon_in_seconds, input.maximum_prep_horizon_in_seconds);
        merge::nullable(&mut self.minimum_cooking_buffer_in_seconds, input.minimum_cooking_buffer_in_seconds);
        merge::string(&mut self.notes, input.notes);
        merge::value(&mut self.optional, input.optional);
    }

    fn to_update_input(&self) -> RecipeStepUpdateInput {
        RecipeStepUpdateInput {
            index: Some(self.index),
            preparation_id: Some(self.preparation_id.clone()),
            prerequisite_step_id: Some(self.prerequisite_step_id.clone()),
            minimum_estimated_time_in_seconds: Some(self.minimum_estimated_time_in_seconds),
            maximum_estimated_time_in_seconds: Some(self.maximum_estimated_time_in_seconds),
            maximum_prep_horizon_in_seconds: Some(self.maximum_prep_horizon_in_seconds),
            minimum_cooking_buffer_in_seconds: Some(self.minimum_cooking_buffer_in_seconds),
            notes: Some(self.notes.clone()),
            optional: Some(self.optional),
        }
    }
}

impl RecipeStep {
    /// Post-merge consistency check.
    pub fn check(&self) -> Result<(), ValidationError> {
        estimated_range(self.minimum_estimated_time_in_seconds, self.maximum_estimated_time_in_seconds)?;
        timing(self.maximum_prep_horizon_in_seconds, self.minimum_cooking_buffer_in_seconds)
    }
}

fn estimated_range(min: Option<u32>, max: Option<u32>) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ValidationError::new(
                "maximumEstimatedTimeInSeconds",
                "must not be below the minimum",
            ));
        }
    }
    Ok(())
}

fn timing(horizon: Option<u32>, buffer: Option<u32>) -> Result<(), ValidationError> {
    if let Some(h) = horizon {
        validation::range("maximumPrepHorizonInSeconds", h, 0, MAX_PREP_HORIZON_SECONDS)?;
    }
    if let (Some(h), Some(b)) = (horizon, buffer) {
        if b > h {
            return Err(ValidationError::new(
                "minimumCookingBufferInSeconds",
                "must not exceed the prep horizon",
            ));
        }
    }
    Ok(())
}

// -- Step ingredients --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepIngredient {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "ingredientID")]
    pub ingredient_id: Option<String>,
    #[serde(default, rename = "recipeStepProductID")]
    pub recipe_step_product_id: Option<String>,
    #[serde(rename = "measurementUnitID")]
    pub measurement_unit_id: String,
    pub minimum_quantity: f32,
    #[serde(default)]
    pub maximum_quantity: Option<f32>,
    pub quantity_notes: String,
    pub ingredient_notes: String,
    pub optional: bool,
    pub belongs_to_recipe_step: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl RecipeStepIngredient {
    /// Exactly one of valid ingredient and earlier-step product is set.
    pub fn check(&self) -> Result<(), ValidationError> {
        exactly_one_source(
            "ingredientID",
            self.ingredient_id.is_some(),
            self.recipe_step_product_id.is_some(),
        )?;
        quantities(self.minimum_quantity, self.maximum_quantity)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepIngredientCreationInput {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "ingredientID")]
    pub ingredient_id: Option<String>,
    #[serde(default, rename = "recipeStepProductID")]
    pub recipe_step_product_id: Option<String>,
    #[serde(default)]
    pub product_of_recipe_step: Option<ProductReference>,
    #[serde(rename = "measurementUnitID")]
    pub measurement_unit_id: String,
    #[serde(default)]
    pub minimum_quantity: f32,
    #[serde(default)]
    pub maximum_quantity: Option<f32>,
    #[serde(default)]
    pub quantity_notes: String,
    #[serde(default)]
    pub ingredient_notes: String,
    #[serde(default)]
    pub optional: bool,
}

impl Validate for RecipeStepIngredientCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_id_ref("ingredientID", self.ingredient_id.as_deref())?;
        validation::optional_id_ref("recipeStepProductID", self.recipe_step_product_id.as_deref())?;
        validation::id_ref("measurementUnitID", &self.measurement_unit_id)?;
        let product = self.recipe_step_product_id.is_some() || self.product_of_recipe_step.is_some();
        if self.recipe_step_product_id.is_some() && self.product_of_recipe_step.is_some() {
            return Err(ValidationError::new("recipeStepProductID", "give either an ID or a step reference"));
        }
        exactly_one_source("ingredientID", self.ingredient_id.is_some(), product)?;
        validation::max_length("name", &self.name, MAX_NAME)?;
        quantities(self.minimum_quantity, self.maximum_quantity)
    }
}

impl RecipeStepIngredientCreationInput {
    pub fn into_entity(self, id: String, step_id: &str, now: DateTime<Utc>) -> RecipeStepIngredient {
        RecipeStepIngredient {
            id,
            name: self.name,
            ingredient_id: self.ingredient_id,
            recipe_step_product_id: self.recipe_step_product_id,
            measurement_unit_id: self.measurement_unit_id,
            minimum_quantity: self.minimum_quantity,
            maximum_quantity: self.maximum_quantity,
            quantity_notes: self.quantity_notes,
            ingredient_notes: self.ingredient_notes,
            optional: self.optional,
            belongs_to_recipe_step: step_id.to_string(),
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepIngredientUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        rename = "ingredientID",
        deserialize_with = "crate::nullable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub ingredient_id: Option<Option<String>>,
    #[serde(
        default,
        rename = "recipeStepProductID",
        deserialize_with = "crate::nullable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub recipe_step_product_id: Option<Option<String>>,
    #[serde(default, rename = "measurementUnitID", skip_serializing_if = "Option::is_none")]
    pub measurement_unit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_quantity: Option<f32>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub maximum_quantity: Option<Option<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredient_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl Validate for RecipeStepIngredientUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 0, MAX_NAME)?;
        if let Some(Some(id)) = &self.ingredient_id {
            validation::id_ref("ingredientID", id)?;
        }
        if let Some(Some(id)) = &self.recipe_step_product_id {
            validation::id_ref("recipeStepProductID", id)?;
        }
        Ok(())
    }
}

impl Updatable for RecipeStepIngredient {
    type Input = RecipeStepIngredientUpdateInput;

    fn apply(&mut self, input: RecipeStepIngredientUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::nullable(&mut self.ingredient_id, input.ingredient_id);
        merge::nullable(&mut self.recipe_step_product_id, input.recipe_step_product_id);
        merge::string(&mut self.measurement_unit_id, input.measurement_unit_id);
        merge::value(&mut self.minimum_quantity, input.minimum_quantity);
        merge::nullable(&mut self.maximum_quantity, input.maximum_quantity);
        merge::string(&mut self.quantity_notes, input.quantity_notes);
        merge::string(&mut self.ingredient_notes, input.ingredient_notes);
        merge::value(&mut self.optional, input.optional);
    }

    fn to_update_input(&self) -> RecipeStepIngredientUpdateInput {
        RecipeStepIngredientUpdateInput {
            name: Some(self.name.clone()),
            ingredient_id: Some(self.ingredient_id.clone()),
            recipe_step_product_id: Some(self.recipe_step_product_id.clone()),
            measurement_unit_id: Some(self.measurement_unit_id.clone()),
            minimum_quantity: Some(self.minimum_quantity),
            maximum_quantity: Some(self.maximum_quantity),
            quantity_notes: Some(self.quantity_notes.clone()),
            ingredient_notes: Some(self.ingredient_notes.clone()),
            optional: Some(self.optional),
        }
    }
}

// -- Step instruments --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepInstrument {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "instrumentID")]
    pub instrument_id: Option<String>,
    #[serde(default, rename = "recipeStepProductID")]
    pub recipe_step_product_id: Option<String>,
    pub notes: String,
    pub preference_rank: u8,
    pub optional: bool,
    pub minimum_quantity: u32,
    #[serde(default)]
    pub maximum_quantity: Option<u32>,
    pub belongs_to_recipe_step: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl RecipeStepInstrument {
    pub fn check(&self) -> Result<(), ValidationError> {
        exactly_one_source(
            "instrumentID",
            self.instrument_id.is_some(),
            self.recipe_step_product_id.is_some(),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepInstrumentCreationInput {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "instrumentID")]
    pub instrument_id: Option<String>,
    #[serde(default, rename = "recipeStepProductID")]
    pub recipe_step_product_id: Option<String>,
    #[serde(default)]
    pub product_of_recipe_step: Option<ProductReference>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub preference_rank: u8,
    #[serde(default)]
    pub optional: bool,
    #[serde(default = "default_instrument_quantity")]
    pub minimum_quantity: u32,
    #[serde(default)]
    pub maximum_quantity: Option<u32>,
}

fn default_instrument_quantity() -> u32 {
    1
}

impl Validate for RecipeStepInstrumentCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_id_ref("instrumentID", self.instrument_id.as_deref())?;
        validation::optional_id_ref("recipeStepProductID", self.recipe_step_product_id.as_deref())?;
        let product = self.recipe_step_product_id.is_some() || self.product_of_recipe_step.is_some();
        exactly_one_source("instrumentID", self.instrument_id.is_some(), product)?;
        validation::max_length("notes", &self.notes, MAX_TEXT)?;
        if let Some(max) = self.maximum_quantity {
            if max < self.minimum_quantity {
                return Err(ValidationError::new("maximumQuantity", "must not be below the minimum"));
            }
        }
        Ok(())
    }
}

impl RecipeStepInstrumentCreationInput {
    pub fn into_entity(self, id: String, step_id: &str, now: DateTime<Utc>) -> RecipeStepInstrument {
        RecipeStepInstrument {
            id,
            name: self.name,
            instrument_id: self.instrument_id,
            recipe_step_product_id: self.recipe_step_product_id,
            notes: self.notes,
            preference_rank: self.preference_rank,
            optional: self.optional,
            minimum_quantity: self.minimum_quantity,
            maximum_quantity: self.maximum_quantity,
            belongs_to_recipe_step: step_id.to_string(),
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepInstrumentUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        rename = "instrumentID",
        deserialize_with = "crate::nullable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub instrument_id: Option<Option<String>>,
    #[serde(
        default,
        rename = "recipeStepProductID",
        deserialize_with = "crate::nullable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub recipe_step_product_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference_rank: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_quantity: Option<u32>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub maximum_quantity: Option<Option<u32>>,
}

impl Validate for RecipeStepInstrumentUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("notes", self.notes.as_deref(), 0, MAX_TEXT)?;
        if let Some(Some(id)) = &self.instrument_id {
            validation::id_ref("instrumentID", id)?;
        }
        Ok(())
    }
}

impl Updatable for RecipeStepInstrument {
    type Input = RecipeStepInstrumentUpdateInput;

    fn apply(&mut self, input: RecipeStepInstrumentUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::nullable(&mut self.instrument_id, input.instrument_id);
        merge::nullable(&mut self.recipe_step_product_id, input.recipe_step_product_id);
        merge::string(&mut self.notes, input.notes);
        merge::value(&mut self.preference_rank, input.preference_rank);
        merge::value(&mut self.optional, input.optional);
        merge::value(&mut self.minimum_quantity, input.minimum_quantity);
        merge::nullable(&mut self.maximum_quantity, input.maximum_quantity);
    }

    fn to_update_input(&self) -> RecipeStepInstrumentUpdateInput {
        RecipeStepInstrumentUpdateInput {
            name: Some(self.name.clone()),
            instrument_id: Some(self.instrument_id.clone()),
            recipe_step_product_id: Some(self.recipe_step_product_id.clone()),
            notes: Some(self.notes.clone()),
            preference_rank: Some(self.preference_rank),
            optional: Some(self.optional),
            minimum_quantity: Some(self.minimum_quantity),
            maximum_quantity: Some(self.maximum_quantity),
        }
    }
}

// -- Step products --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    #[default]
    Ingredient,
    Instrument,
}

string_enum!(ProductKind {
    Ingredient => "ingredient",
    Instrument => "instrument",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepProduct {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProductKind,
    #[serde(default, rename = "measurementUnitID")]
    pub measurement_unit_id: Option<String>,
    pub quantity_notes: String,
    #[serde(default)]
    pub minimum_quantity: Option<f32>,
    #[serde(default)]
    pub maximum_quantity: Option<f32>,
    pub compostable: bool,
    #[serde(default)]
    pub maximum_storage_duration_in_seconds: Option<u32>,
    pub storage_instructions: String,
    pub belongs_to_recipe_step: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepProductCreationInput {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: ProductKind,
    #[serde(default, rename = "measurementUnitID")]
    pub measurement_unit_id: Option<String>,
    #[serde(default)]
    pub quantity_notes: String,
    #[serde(default)]
    pub minimum_quantity: Option<f32>,
    #[serde(default)]
    pub maximum_quantity: Option<f32>,
    #[serde(default)]
    pub compostable: bool,
    #[serde(default)]
    pub maximum_storage_duration_in_seconds: Option<u32>,
    #[serde(default)]
    pub storage_instructions: String,
}

impl Validate for RecipeStepProductCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, MAX_NAME)?;
        validation::optional_id_ref("measurementUnitID", self.measurement_unit_id.as_deref())?;
        if let (Some(min), Some(max)) = (self.minimum_quantity, self.maximum_quantity) {
            quantities(min, Some(max))?;
        }
        Ok(())
    }
}

impl RecipeStepProductCreationInput {
    pub fn into_entity(self, id: String, step_id: &str, now: DateTime<Utc>) -> RecipeStepProduct {
        RecipeStepProduct {
            id,
            name: self.name,
            kind: self.kind,
            measurement_unit_id: self.measurement_unit_id,
            quantity_notes: self.quantity_notes,
            minimum_quantity: self.minimum_quantity,
            maximum_quantity: self.maximum_quantity,
            compostable: self.compostable,
            maximum_storage_duration_in_seconds: self.maximum_storage_duration_in_seconds,
            storage_instructions: self.storage_instructions,
            belongs_to_recipe_step: step_id.to_string(),
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStepProductUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProductKind>,
    #[serde(
        default,
        rename = "measurementUnitID",
        deserialize_with = "crate::nullable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub measurement_unit_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_notes: Option<String>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub minimum_quantity: Option<Option<f32>>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub maximum_quantity: Option<Option<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compostable: Option<bool>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub maximum_storage_duration_in_seconds: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_instructions: Option<String>,
}

impl Validate for RecipeStepProductUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 1, MAX_NAME)?;
        if let Some(Some(id)) = &self.measurement_unit_id {
            validation::id_ref("measurementUnitID", id)?;
        }
        Ok(())
    }
}

impl Updatable for RecipeStepProduct {
    type Input = RecipeStepProductUpdateInput;

    fn apply(&mut self, input: RecipeStepProductUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::value(&mut self.kind, input.kind);
        merge::nullable(&mut self.measurement_unit_id, input.measurement_unit_id);
        merge::string(&mut self.quantity_notes, input.quantity_notes);
        merge::nullable(&mut self.minimum_quantity, input.minimum_quantity);
        merge::nullable(&mut self.maximum_quantity, input.maximum_quantity);
        merge::value(&mut self.compostable, input.compostable);
        merge::nullable(
            &mut self.maximum_storage_duration_in_seconds,
            input.maximum_storage_duration_in_seconds,
        );
        merge::string(&mut self.storage_instructions, input.storage_instructions);
    }

    fn to_update_input(&self) -> RecipeStepProductUpdateInput {
        RecipeStepProductUpdateInput {
            name: Some(self.name.clone()),
            kind: Some(self.kind),
            measurement_unit_id: Some(self.measurement_unit_id.clone()),
            quantity_notes: Some(self.quantity_notes.clone()),
            minimum_quantity: Some(self.minimum_quantity),
            maximum_quantity: Some(self.maximum_quantity),
            compostable: Some(self.compostable),
            maximum_storage_duration_in_seconds: Some(self.maximum_storage_duration_in_seconds),
            storage_instructions: Some(self.storage_instructions.clone()),
        }
    }
}

fn exactly_one_source(field: &str, direct: bool, product: bool) -> Result<(), ValidationError> {
    if direct == product {
        return Err(ValidationError::new(
            field,
            "exactly one of a valid entry or an earlier step's product is required",
        ));
    }
    Ok(())
}

fn quantities(min: f32, max: Option<f32>) -> Result<(), ValidationError> {
    if min < 0.0 {
        return Err(ValidationError::new("minimumQuantity", "must not be negative"));
    }
    if let Some(max) = max {
        if max < min {
            return Err(ValidationError::new("maximumQuantity", "must not be below the minimum"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> impl FnMut() -> String {
        let mut n = 0;
        move || {
            n += 1;
            format!("id{}", n)
        }
    }

    fn step(index: u32) -> RecipeStepCreationInput {
        RecipeStepCreationInput {
            index,
            preparation_id: "prep".into(),
            ..Default::default()
        }
    }

    fn ingredient_from(reference: Option<ProductReference>, ingredient: Option<&str>) -> RecipeStepIngredientCreationInput {
        RecipeStepIngredientCreationInput {
            ingredient_id: ingredient.map(String::from),
            product_of_recipe_step: reference,
            measurement_unit_id: "grams".into(),
            minimum_quantity: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn ingredient_needs_exactly_one_source() {
        assert!(ingredient_from(None, Some("flour")).validate().is_ok());
        assert!(ingredient_from(None, None).validate().is_err());
        let both = ingredient_from(Some(ProductReference { step_index: 0, product_index: 0 }), Some("flour"));
        assert!(both.validate().is_err());
    }

    #[test]
    fn product_references_resolve_to_generated_ids() {
        let mut first = step(0);
        first.products.push(RecipeStepProductCreationInput { name: "dough".into(), ..Default::default() });
        let mut second = step(1);
        second
            .ingredients
            .push(ingredient_from(Some(ProductReference { step_index: 0, product_index: 0 }), None));

        let input = RecipeCreationInput {
            name: "bread".into(),
            yields_portions: 1,
            steps: vec![second, first],
            ..Default::default()
        };
        input.validate().unwrap();

        let recipe = input.into_entity(&mut counter(), "u1", Utc::now());
        assert_eq!(recipe.steps.len(), 2);
        assert_eq!(recipe.steps[0].index, 0);
        let product_id = recipe.steps[0].products[0].id.clone();
        let consumed = &recipe.steps[1].ingredients[0];
        assert_eq!(consumed.recipe_step_product_id.as_deref(), Some(product_id.as_str()));
        assert!(consumed.check().is_ok());
        assert!(recipe.steps.iter().all(|s| s.belongs_to_recipe == recipe.id));
    }

    #[test]
    fn forward_product_references_are_rejected() {
        let mut first = step(0);
        first
            .ingredients
            .push(ingredient_from(Some(ProductReference { step_index: 1, product_index: 0 }), None));
        let mut second = step(1);
        second.products.push(RecipeStepProductCreationInput { name: "sauce".into(), ..Default::default() });
        let input = RecipeCreationInput {
            name: "x".into(),
            yields_portions: 1,
            steps: vec![first, second],
            ..Default::default()
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn duplicate_step_indices_are_rejected() {
        let input = RecipeCreationInput {
            name: "x".into(),
            yields_portions: 1,
            steps: vec![step(0), step(0)],
            ..Default::default()
        };
        assert_eq!(input.validate().unwrap_err().field, "steps[1].index");
    }

    #[test]
    fn buffer_cannot_exceed_horizon() {
        let mut s = step(0);
        s.maximum_prep_horizon_in_seconds = Some(3600);
        s.minimum_cooking_buffer_in_seconds = Some(7200);
        assert_eq!(s.validate().unwrap_err().field, "minimumCookingBufferInSeconds");
    }

    #[test]
    fn step_update_round_trip_is_a_no_op() {
        let mut s = step(2);
        s.maximum_prep_horizon_in_seconds = Some(86_400);
        let entity = s.into_entity(&mut counter(), "r1", Utc::now());
        let mut copy = entity.clone();
        copy.apply(entity.to_update_input());
        assert_eq!(copy, entity);
    }
}
