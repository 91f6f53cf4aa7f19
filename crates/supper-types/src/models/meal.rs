use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::{self, Updatable};
use crate::validation::{self, Validate, ValidationError};

/// A named grouping of recipes; meal plan options refer to meals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meal {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_by_user: String,
    #[serde(default)]
    pub recipes: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealCreationInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub recipes: Vec<String>,
}

impl Validate for MealCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, 256)?;
        validation::max_length("description", &self.description, 4096)?;
        recipe_list(&self.recipes)
    }
}

impl MealCreationInput {
    pub fn into_entity(self, id: String, created_by_user: &str, now: DateTime<Utc>) -> Meal {
        Meal {
            id,
            name: self.name,
            description: self.description,
            created_by_user: created_by_user.to_string(),
            recipes: self.recipes,
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealUpdateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipes: Option<Vec<String>>,
}

impl Validate for MealUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::optional_length("name", self.name.as_deref(), 1, 256)?;
        match &self.recipes {
            Some(recipes) if !recipes.is_empty() => recipe_list(recipes),
            _ => Ok(()),
        }
    }
}

impl Updatable for Meal {
    type Input = MealUpdateInput;

    fn apply(&mut self, input: MealUpdateInput) {
        merge::string(&mut self.name, input.name);
        merge::string(&mut self.description, input.description);
        merge::list(&mut self.recipes, input.recipes);
    }

    fn to_update_input(&self) -> MealUpdateInput {
        MealUpdateInput {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            recipes: Some(self.recipes.clone()),
        }
    }
}

fn recipe_list(recipes: &[String]) -> Result<(), ValidationError> {
    if recipes.is_empty() {
        return Err(ValidationError::new("recipes", "a meal needs at least one recipe"));
    }
    let mut seen = HashSet::new();
    for (i, id) in recipes.iter().enumerate() {
        validation::id_ref(&format!("recipes[{}]", i), id)?;
        if !seen.insert(id) {
            return Err(ValidationError::new(format!("recipes[{}]", i), "duplicate recipe"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meals_need_distinct_recipes() {
        let input = MealCreationInput { name: "dinner".into(), description: String::new(), recipes: vec![] };
        assert_eq!(input.validate().unwrap_err().field, "recipes");

        let input = MealCreationInput {
            name: "dinner".into(),
            description: String::new(),
            recipes: vec!["r1".into(), "r1".into()],
        };
        assert_eq!(input.validate().unwrap_err().field, "recipes[1]");
    }

    #[test]
    fn empty_recipe_list_update_is_ignored() {
        let mut meal = MealCreationInput { name: "m".into(), description: String::new(), recipes: vec!["r1".into()] }
            .into_entity("m1".into(), "u1", Utc::now());
        meal.apply(MealUpdateInput { recipes: Some(vec![]), ..Default::default() });
        assert_eq!(meal.recipes, vec!["r1".to_string()]);
    }
}
