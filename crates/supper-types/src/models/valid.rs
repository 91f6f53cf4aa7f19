//! Curated taxonomy entries referenced by ID from recipes, and the join
//! entities relating them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::{self, Updatable};
use crate::validation::{self, Validate, ValidationError};

const MAX_NAME: usize = 128;
const MAX_TEXT: usize = 4096;

// -- Valid ingredients --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIngredient {
    pub id: String,
    pub name: String,
    pub plural_name: String,
    pub description: String,
    pub warning: String,
    pub icon_path: String,
    pub storage_instructions: String,
    pub contains_dairy: bool,
    pub contains_peanut: bool,
    pub contains_tree_nut: bool,
    pub contains_egg: bool,
    pub contains_wheat: bool,
    pub contains_shellfish: bool,
    pub contains_sesame: bool,
    pub contains_fish: bool,
    pub contains_gluten: bool,
    pub contains_soy: bool,
    pub contains_alcohol: bool,
    pub animal_flesh: bool,
    pub animal_derived: bool,
    pub is_liquid: bool,
    pub volumetric: bool,
    pub restrict_to_preparations: bool,
    #[serde(default)]
    pub minimum_ideal_storage_temperature_in_celsius: Option<f32>,
    #[serde(default)]
    pub maximum_ideal_storage_temperature_in_celsius: Option<f32>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidIngredientCreationInput {
    pub name: String,
    pub plural_name: String,
    pub description: String,
    pub warning: String,
    pub icon_path: String,
    pub storage_instructions: String,
    pub contains_dairy: bool,
    pub contains_peanut: bool,
    pub contains_tree_nut: bool,
    pub contains_egg: bool,
    pub contains_wheat: bool,
    pub contains_shellfish: bool,
    pub contains_sesame: bool,
    pub contains_fish: bool,
    pub contains_gluten: bool,
    pub contains_soy: bool,
    pub contains_alcohol: bool,
    pub animal_flesh: bool,
    pub animal_derived: bool,
    pub is_liquid: bool,
    pub volumetric: bool,
    pub restrict_to_preparations: bool,
    pub minimum_ideal_storage_temperature_in_celsius: Option<f32>,
    pub maximum_ideal_storage_temperature_in_celsius: Option<f32>,
}

impl Validate for ValidIngredientCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, MAX_NAME)?;
        validation::max_length("pluralName", &self.plural_name, MAX_NAME)?;
        validation::max_length("description", &self.description, MAX_TEXT)?;
        storage_range(
            self.minimum_ideal_storage_temperature_in_celsius,
            self.maximum_ideal_storage_temperature_in_celsius,
        )
    }
}

impl ValidIngredientCreationInput {
    pub fn into_entity(self, id: String, now: DateTime<Utc>) -> ValidIngredient {
        ValidIngredient {
            id,
            name: self.name,
            plural_name: self.plural_name,
            description: self.description,
            warning: self.warning,
            icon_path: self.icon_path,
            storage_instructions: self.storage_instructions,
            contains_dairy: self.contains_dairy,
            contains_peanut: self.contains_peanut,
            contains_tree_nut: self.contains_tree_nut,
            contains_egg: self.contains_egg,
            contains_wheat: self.contains_wheat,
            contains_shellfish: self.contains_shellfish,
            contains_sesame: self.contains_sesame,
            contains_fish: self.contains_fish,
            contains_gluten: self.contains_gluten,
            contains_soy: self.contains_soy,
            contains_alcohol: self.contains_alcohol,
            animal_flesh: self.animal_flesh,
            animal_derived: self.animal_derived,
            is_liquid: self.is_liquid,
            volumetric: self.volumetric,
            restrict_to_preparations: self.restrict_to_preparations,
            minimum_ideal_storage_temperature_in_celsius: self.minimum_ideal_storage_temperature_in_celsius,
            maximum_ideal_storage_temperature_in_celsius: self.maximum_ideal_storage_temperature_in_celsius,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIngredientUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_dairy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_peanut: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_tree_nut: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_egg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_wheat: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_shellfish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_sesame: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_fish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_gluten: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_soy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_alcohol: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_flesh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_derived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_liquid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumetric: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict_to_preparations: Option<bool>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub minimum_ideal_storage_temperature_in_celsius: Option<Option<f32>>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub maximum_ideal_storage_temperature_in_celsius: Option<Option<f32>>,
}

impl Validate for ValidIngredientUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 1, MAX_NAME)?;
        validation::optional_length("pluralName", self.plural_name.as_deref(), 0, MAX_NAME)?;
        validation::optional_length("description", self.description.as_deref(), 0, MAX_TEXT)
    }
}

impl Updatable for ValidIngredient {
    type Input = ValidIngredientUpdateInput;

    fn apply(&mut self, input: ValidIngredientUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::string(&mut self.plural_name, input.plural_name);
        merge::string(&mut self.description, input.description);
        merge::string(&mut self.warning, input.warning);
        merge::string(&mut self.icon_path, input.icon_path);
        merge::string(&mut self.storage_instructions, input.storage_instructions);
        merge::value(&mut self.contains_dairy, input.contains_dairy);
        merge::value(&mut self.contains_peanut, input.contains_peanut);
        merge::value(&mut self.contains_tree_nut, input.contains_tree_nut);
        merge::value(&mut self.contains_egg, input.contains_egg);
        merge::value(&mut self.contains_wheat, input.contains_wheat);
        merge::value(&mut self.contains_shellfish, input.contains_shellfish);
        merge::value(&mut self.contains_sesame, input.contains_sesame);
        merge::value(&mut self.contains_fish, input.contains_fish);
        merge::value(&mut self.contains_gluten, input.contains_gluten);
        merge::value(&mut self.contains_soy, input.contains_soy);
        merge::value(&mut self.contains_alcohol, input.contains_alcohol);
        merge::value(&mut self.animal_flesh, input.animal_flesh);
        merge::value(&mut self.animal_derived, input.animal_derived);
        merge::value(&mut self.is_liquid, input.is_liquid);
        merge::value(&mut self.volumetric, input.volumetric);
        merge::value(&mut self.restrict_to_preparations, input.restrict_to_preparations);
        merge::nullable(
            &mut self.minimum_ideal_storage_temperature_in_celsius,
            input.minimum_ideal_storage_temperature_in_celsius,
        );
        merge::nullable(
            &mut self.maximum_ideal_storage_temperature_in_celsius,
            input.maximum_ideal_storage_temperature_in_celsius,
        );
    }

    fn to_update_input(&self) -> ValidIngredientUpdateInput {
        ValidIngredientUpdateInput {
            name: Some(self.name.clone()),
            plural_name: Some(self.plural_name.clone()),
            description: Some(self.description.clone()),
            warning: Some(self.warning.clone()),
            icon_path: Some(self.icon_path.clone()),
            storage_instructions: Some(self.storage_instructions.clone()),
            contains_dairy: Some(self.contains_dairy),
            contains_peanut: Some(self.contains_peanut),
            contains_tree_nut: Some(self.contains_tree_nut),
            contains_egg: Some(self.contains_egg),
            contains_wheat: Some(self.contains_wheat),
            contains_shellfish: Some(self.contains_shellfish),
            contains_sesame: Some(self.contains_sesame),
            contains_fish: Some(self.contains_fish),
            contains_gluten: Some(self.contains_gluten),
            contains_soy: Some(self.contains_soy),
            contains_alcohol: Some(self.contains_alcohol),
            animal_flesh: Some(self.animal_flesh),
            animal_derived: Some(self.animal_derived),
            is_liquid: Some(self.is_liquid),
            volumetric: Some(self.volumetric),
            restrict_to_preparations: Some(self.restrict_to_preparations),
            minimum_ideal_storage_temperature_in_celsius: Some(self.minimum_ideal_storage_temperature_in_celsius),
            maximum_ideal_storage_temperature_in_celsius: Some(self.maximum_ideal_storage_temperature_in_celsius),
        }
    }
}

fn storage_range(min: Option<f32>, max: Option<f32>) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ValidationError::new(
                "maximumIdealStorageTemperatureInCelsius",
                "must not be below the minimum",
            ));
        }
    }
    Ok(())
}

// -- Valid preparations --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidPreparation {
    pub id: String,
    pub name: String,
    pub past_tense: String,
    pub description: String,
    pub icon_path: String,
    pub yields_nothing: bool,
    pub restrict_to_ingredients: bool,
    /// Steps using this preparation produce output that keeps, which makes
    /// them candidates for advance preparation.
    pub yields_storable_output: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidPreparationCreationInput {
    pub name: String,
    pub past_tense: String,
    pub description: String,
    pub icon_path: String,
    pub yields_nothing: bool,
    pub restrict_to_ingredients: bool,
    pub yields_storable_output: bool,
}

impl Validate for ValidPreparationCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, MAX_NAME)?;
        validation::max_length("pastTense", &self.past_tense, MAX_NAME)?;
        validation::max_length("description", &self.description, MAX_TEXT)
    }
}

impl ValidPreparationCreationInput {
    pub fn into_entity(self, id: String, now: DateTime<Utc>) -> ValidPreparation {
        ValidPreparation {
            id,
            name: self.name,
            past_tense: self.past_tense,
            description: self.description,
            icon_path: self.icon_path,
            yields_nothing: self.yields_nothing,
            restrict_to_ingredients: self.restrict_to_ingredients,
            yields_storable_output: self.yields_storable_output,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidPreparationUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub past_tense: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yields_nothing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict_to_ingredients: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yields_storable_output: Option<bool>,
}

impl Validate for ValidPreparationUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 1, MAX_NAME)?;
        validation::optional_length("description", self.description.as_deref(), 0, MAX_TEXT)
    }
}

impl Updatable for ValidPreparation {
    type Input = ValidPreparationUpdateInput;

    fn apply(&mut self, input: ValidPreparationUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::string(&mut self.past_tense, input.past_tense);
        merge::string(&mut self.description, input.description);
        merge::string(&mut self.icon_path, input.icon_path);
        merge::value(&mut self.yields_nothing, input.yields_nothing);
        merge::value(&mut self.restrict_to_ingredients, input.restrict_to_ingredients);
        merge::value(&mut self.yields_storable_output, input.yields_storable_output);
    }

    fn to_update_input(&self) -> ValidPreparationUpdateInput {
        ValidPreparationUpdateInput {
            name: Some(self.name.clone()),
            past_tense: Some(self.past_tense.clone()),
            description: Some(self.description.clone()),
            icon_path: Some(self.icon_path.clone()),
            yields_nothing: Some(self.yields_nothing),
            restrict_to_ingredients: Some(self.restrict_to_ingredients),
            yields_storable_output: Some(self.yields_storable_output),
        }
    }
}

// -- Valid instruments --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidInstrument {
    pub id: String,
    pub name: String,
    pub plural_name: String,
    pub description: String,
    pub icon_path: String,
    pub usable_for_storage: bool,
    pub display_in_summary_lists: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidInstrumentCreationInput {
    pub name: String,
    pub plural_name: String,
    pub description: String,
    pub icon_path: String,
    pub usable_for_storage: bool,
    pub display_in_summary_lists: bool,
}

impl Validate for ValidInstrumentCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, MAX_NAME)?;
        validation::max_length("description", &self.description, MAX_TEXT)
    }
}

impl ValidInstrumentCreationInput {
    pub fn into_entity(self, id: String, now: DateTime<Utc>) -> ValidInstrument {
        ValidInstrument {
            id,
            name: self.name,
            plural_name: self.plural_name,
            description: self.description,
            icon_path: self.icon_path,
            usable_for_storage: self.usable_for_storage,
            display_in_summary_lists: self.display_in_summary_lists,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidInstrumentUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usable_for_storage: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_in_summary_lists: Option<bool>,
}

impl Validate for ValidInstrumentUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 1, MAX_NAME)?;
        validation::optional_length("description", self.description.as_deref(), 0, MAX_TEXT)
    }
}

impl Updatable for ValidInstrument {
    type Input = ValidInstrumentUpdateInput;

    fn apply(&mut self, input: ValidInstrumentUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::string(&mut self.plural_name, input.plural_name);
        merge::string(&mut self.description, input.description);
        merge::string(&mut self.icon_path, input.icon_path);
        merge::value(&mut self.usable_for_storage, input.usable_for_storage);
        merge::value(&mut self.display_in_summary_lists, input.display_in_summary_lists);
    }

    fn to_update_input(&self) -> ValidInstrumentUpdateInput {
        ValidInstrumentUpdateInput {
            name: Some(self.name.clone()),
            plural_name: Some(self.plural_name.clone()),
            description: Some(self.description.clone()),
            icon_path: Some(self.icon_path.clone()),
            usable_for_storage: Some(self.usable_for_storage),
            display_in_summary_lists: Some(self.display_in_summary_lists),
        }
    }
}

// -- Valid measurement units --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidMeasurementUnit {
    pub id: String,
    pub name: String,
    pub plural_name: String,
    pub description: String,
    pub icon_path: String,
    pub volumetric: bool,
    pub universal: bool,
    pub metric: bool,
    pub imperial: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidMeasurementUnitCreationInput {
    pub name: String,
    pub plural_name: String,
    pub description: String,
    pub icon_path: String,
    pub volumetric: bool,
    pub universal: bool,
    pub metric: bool,
    pub imperial: bool,
}

impl Validate for ValidMeasurementUnitCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, MAX_NAME)?;
        if self.metric && self.imperial {
            return Err(ValidationError::new("imperial", "a unit cannot be both metric and imperial"));
        }
        Ok(())
    }
}

impl ValidMeasurementUnitCreationInput {
    pub fn into_entity(self, id: String, now: DateTime<Utc>) -> ValidMeasurementUnit {
        ValidMeasurementUnit {
            id,
            name: self.name,
            plural_name: self.plural_name,
            description: self.description,
            icon_path: self.icon_path,
            volumetric: self.volumetric,
            universal: self.universal,
            metric: self.metric,
            imperial: self.imperial,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidMeasurementUnitUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumetric: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imperial: Option<bool>,
}

impl Validate for ValidMeasurementUnitUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 1, MAX_NAME)?;
        if self.metric == Some(true) && self.imperial == Some(true) {
            return Err(ValidationError::new("imperial", "a unit cannot be both metric and imperial"));
        }
        Ok(())
    }
}

impl Updatable for ValidMeasurementUnit {
    type Input = ValidMeasurementUnitUpdateInput;

    fn apply(&mut self, input: ValidMeasurementUnitUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::string(&mut self.plural_name, input.plural_name);
        merge::string(&mut self.description, input.description);
        merge::string(&mut self.icon_path, input.icon_path);
        merge::value(&mut self.volumetric, input.volumetric);
        merge::value(&mut self.universal, input.universal);
        merge::value(&mut self.metric, input.metric);
        merge::value(&mut self.imperial, input.imperial);
    }

    fn to_update_input(&self) -> ValidMeasurementUnitUpdateInput {
        ValidMeasurementUnitUpdateInput {
            name: Some(self.name.clone()),
            plural_name: Some(self.plural_name.clone()),
            description: Some(self.description.clone()),
            icon_path: Some(self.icon_path.clone()),
            volumetric: Some(self.volumetric),
            universal: Some(self.universal),
            metric: Some(self.metric),
            imperial: Some(self.imperial),
        }
    }
}

// -- Join entities --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIngredientPreparation {
    pub id: String,
    pub notes: String,
    #[serde(rename = "validIngredientID")]
    pub valid_ingredient_id: String,
    #[serde(rename = "validPreparationID")]
    pub valid_preparation_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIngredientPreparationCreationInput {
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "validIngredientID")]
    pub valid_ingredient_id: String,
    #[serde(rename = "validPreparationID")]
    pub valid_preparation_id: String,
}

impl Validate for ValidIngredientPreparationCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("validIngredientID", &self.valid_ingredient_id)?;
        validation::id_ref("validPreparationID", &self.valid_preparation_id)?;
        validation::max_length("notes", &self.notes, MAX_TEXT)
    }
}

impl ValidIngredientPreparationCreationInput {
    pub fn into_entity(self, id: String, now: DateTime<Utc>) -> ValidIngredientPreparation {
        ValidIngredientPreparation {
            id,
            notes: self.notes,
            valid_ingredient_id: self.valid_ingredient_id,
            valid_preparation_id: self.valid_preparation_id,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIngredientPreparationUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, rename = "validIngredientID", skip_serializing_if = "Option::is_none")]
    pub valid_ingredient_id: Option<String>,
    #[serde(default, rename = "validPreparationID", skip_serializing_if = "Option::is_none")]
    pub valid_preparation_id: Option<String>,
}

impl Validate for ValidIngredientPreparationUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("notes", self.notes.as_deref(), 0, MAX_TEXT)
    }
}

impl Updatable for ValidIngredientPreparation {
    type Input = ValidIngredientPreparationUpdateInput;

    fn apply(&mut self, input: ValidIngredientPreparationUpdateInput) {
        merge::string(&mut self.notes, input.notes);
        merge::string(&mut self.valid_ingredient_id, input.valid_ingredient_id);
        merge::string(&mut self.valid_preparation_id, input.valid_preparation_id);
    }

    fn to_update_input(&self) -> ValidIngredientPreparationUpdateInput {
        ValidIngredientPreparationUpdateInput {
            notes: Some(self.notes.clone()),
            valid_ingredient_id: Some(self.valid_ingredient_id.clone()),
            valid_preparation_id: Some(self.valid_preparation_id.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidPreparationInstrument {
    pub id: String,
    pub notes: String,
    #[serde(rename = "validPreparationID")]
    pub valid_preparation_id: String,
    #[serde(rename = "validInstrumentID")]
    pub valid_instrument_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidPreparationInstrumentCreationInput {
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "validPreparationID")]
    pub valid_preparation_id: String,
    #[serde(rename = "validInstrumentID")]
    pub valid_instrument_id: String,
}

impl Validate for ValidPreparationInstrumentCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("validPreparationID", &self.valid_preparation_id)?;
        validation::id_ref("validInstrumentID", &self.valid_instrument_id)?;
        validation::max_length("notes", &self.notes, MAX_TEXT)
    }
}

impl ValidPreparationInstrumentCreationInput {
    pub fn into_entity(self, id: String, now: DateTime<Utc>) -> ValidPreparationInstrument {
        ValidPreparationInstrument {
            id,
            notes: self.notes,
            valid_preparation_id: self.valid_preparation_id,
            valid_instrument_id: self.valid_instrument_id,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidPreparationInstrumentUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, rename = "validPreparationID", skip_serializing_if = "Option::is_none")]
    pub valid_preparation_id: Option<String>,
    #[serde(default, rename = "validInstrumentID", skip_serializing_if = "Option::is_none")]
    pub valid_instrument_id: Option<String>,
}

impl Validate for ValidPreparationInstrumentUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("notes", self.notes.as_deref(), 0, MAX_TEXT)
    }
}

impl Updatable for ValidPreparationInstrument {
    type Input = ValidPreparationInstrumentUpdateInput;

    fn apply(&mut self, input: ValidPreparationInstrumentUpdateInput) {
        merge::string(&mut self.notes, input.notes);
        merge::string(&mut self.valid_preparation_id, input.valid_preparation_id);
        merge::string(&mut self.valid_instrument_id, input.valid_instrument_id);
    }

    fn to_update_input(&self) -> ValidPreparationInstrumentUpdateInput {
        ValidPreparationInstrumentUpdateInput {
            notes: Some(self.notes.clone()),
            valid_preparation_id: Some(self.valid_preparation_id.clone()),
            valid_instrument_id: Some(self.valid_instrument_id.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIngredientMeasurementUnit {
    pub id: String,
    pub notes: String,
    #[serde(rename = "validIngredientID")]
    pub valid_ingredient_id: String,
    #[serde(rename = "validMeasurementUnitID")]
    pub valid_measurement_unit_id: String,
    pub minimum_allowable_quantity: f32,
    #[serde(default)]
    pub maximum_allowable_quantity: Option<f32>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIngredientMeasurementUnitCreationInput {
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "validIngredientID")]
    pub valid_ingredient_id: String,
    #[serde(rename = "validMeasurementUnitID")]
    pub valid_measurement_unit_id: String,
    #[serde(default)]
    pub minimum_allowable_quantity: f32,
    #[serde(default)]
    pub maximum_allowable_quantity: Option<f32>,
}

impl Validate for ValidIngredientMeasurementUnitCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::id_ref("validIngredientID", &self.valid_ingredient_id)?;
        validation::id_ref("validMeasurementUnitID", &self.valid_measurement_unit_id)?;
        quantity_range(self.minimum_allowable_quantity, self.maximum_allowable_quantity)
    }
}

impl ValidIngredientMeasurementUnitCreationInput {
    pub fn into_entity(self, id: String, now: DateTime<Utc>) -> ValidIngredientMeasurementUnit {
        ValidIngredientMeasurementUnit {
            id,
            notes: self.notes,
            valid_ingredient_id: self.valid_ingredient_id,
            valid_measurement_unit_id: self.valid_measurement_unit_id,
            minimum_allowable_quantity: self.minimum_allowable_quantity,
            maximum_allowable_quantity: self.maximum_allowable_quantity,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidIngredientMeasurementUnitUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, rename = "validIngredientID", skip_serializing_if = "Option::is_none")]
    pub valid_ingredient_id: Option<String>,
    #[serde(default, rename = "validMeasurementUnitID", skip_serializing_if = "Option::is_none")]
    pub valid_measurement_unit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_allowable_quantity: Option<f32>,
    #[serde(default, deserialize_with = "crate::nullable::deserialize", skip_serializing_if = "Option::is_none")]
    pub maximum_allowable_quantity: Option<Option<f32>>,
}

impl Validate for ValidIngredientMeasurementUnitUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("notes", self.notes.as_deref(), 0, MAX_TEXT)?;
        if let Some(min) = self.minimum_allowable_quantity {
            quantity_range(min, self.maximum_allowable_quantity.flatten())?;
        }
        Ok(())
    }
}

impl Updatable for ValidIngredientMeasurementUnit {
    type Input = ValidIngredientMeasurementUnitUpdateInput;

    fn apply(&mut self, input: ValidIngredientMeasurementUnitUpdateInput) {
        merge::string(&mut self.notes, input.notes);
        merge::string(&mut self.valid_ingredient_id, input.valid_ingredient_id);
        merge::string(&mut self.valid_measurement_unit_id, input.valid_measurement_unit_id);
        merge::value(&mut self.minimum_allowable_quantity, input.minimum_allowable_quantity);
        merge::nullable(&mut self.maximum_allowable_quantity, input.maximum_allowable_quantity);
    }

    fn to_update_input(&self) -> ValidIngredientMeasurementUnitUpdateInput {
        ValidIngredientMeasurementUnitUpdateInput {
            notes: Some(self.notes.clone()),
            valid_ingredient_id: Some(self.valid_ingredient_id.clone()),
            valid_measurement_unit_id: Some(self.valid_measurement_unit_id.clone()),
            minimum_allowable_quantity: Some(self.minimum_allowable_quantity),
            maximum_allowable_quantity: Some(self.maximum_allowable_quantity),
        }
    }
}

fn quantity_range(min: f32, max: Option<f32>) -> Result<(), ValidationError> {
    if min < 0.0 {
        return Err(ValidationError::new("minimumAllowableQuantity", "must not be negative"));
    }
    if let Some(max) = max {
        if max < min {
            return Err(ValidationError::new("maximumAllowableQuantity", "must not be below the minimum"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingredient_update_round_trip_is_a_no_op() {
        let ingredient = ValidIngredientCreationInput {
            name: "flour".into(),
            contains_wheat: true,
            contains_gluten: true,
            minimum_ideal_storage_temperature_in_celsius: Some(10.0),
            ..Default::default()
        }
        .into_entity("i1".into(), Utc::now());

        let mut copy = ingredient.clone();
        copy.apply(ingredient.to_update_input());
        assert_eq!(copy, ingredient);
    }

    #[test]
    fn all_absent_update_leaves_entity_unchanged() {
        let prep = ValidPreparationCreationInput {
            name: "braise".into(),
            yields_storable_output: true,
            ..Default::default()
        }
        .into_entity("p1".into(), Utc::now());

        let mut copy = prep.clone();
        copy.apply(serde_json::from_str("{}").unwrap());
        assert_eq!(copy, prep);
    }

    #[test]
    fn storage_temperatures_must_be_ordered() {
        let input = ValidIngredientCreationInput {
            name: "milk".into(),
            minimum_ideal_storage_temperature_in_celsius: Some(8.0),
            maximum_ideal_storage_temperature_in_celsius: Some(2.0),
            ..Default::default()
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn unit_cannot_be_metric_and_imperial() {
        let input = ValidMeasurementUnitCreationInput {
            name: "cup".into(),
            metric: true,
            imperial: true,
            ..Default::default()
        };
        assert_eq!(input.validate().unwrap_err().field, "imperial");
    }

    #[test]
    fn join_inputs_need_both_references() {
        let input = ValidIngredientPreparationCreationInput {
            valid_ingredient_id: "i1".into(),
            ..Default::default()
        };
        assert_eq!(input.validate().unwrap_err().field, "validPreparationID");
    }
}
