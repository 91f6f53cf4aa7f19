use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default look-ahead when a recipe step sets no prep horizon.
pub const DEFAULT_PREP_HORIZON_SECONDS: u32 = 7 * 24 * 60 * 60;

/// A preparation task derived from a finalized meal plan: a storable recipe
/// step that can be done ahead of the event it feeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedPrepStep {
    pub id: String,
    pub meal_plan_option: String,
    pub recipe_step: String,
    pub belongs_to_meal_plan: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub cannot_complete_before: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub cannot_complete_after: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

/// Marks a prep step done, or undone with `completed: false`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedPrepStepStatusInput {
    pub completed: bool,
    #[serde(default)]
    pub notes: Option<String>,
}
