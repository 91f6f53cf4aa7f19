use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{DataType, EventType};
use crate::validation::{self, Validate, ValidationError};

pub const ALLOWED_METHODS: &[&str] = &["POST", "PUT", "PATCH"];
pub const ALLOWED_CONTENT_TYPES: &[&str] = &["application/json"];
const WILDCARD: &str = "*";

/// A household's subscription to data-change events, delivered over HTTP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub url: String,
    pub method: String,
    /// Event types to deliver. Empty or `"*"` matches every event type.
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub data_types: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub belongs_to_household: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Webhook {
    pub fn wants(&self, event_type: EventType, data_type: DataType, topic: &str) -> bool {
        matches(&self.events, event_type.as_str())
            && matches(&self.data_types, data_type.as_str())
            && matches(&self.topics, topic)
    }
}

fn matches(filter: &[String], value: &str) -> bool {
    filter.is_empty() || filter.iter().any(|f| f == WILDCARD || f == value)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookCreationInput {
    pub name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub data_types: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_method() -> String {
    "POST".to_string()
}

impl Validate for WebhookCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("name", &self.name)?;
        validation::max_length("name", &self.name, 128)?;
        validation::url("url", &self.url)?;
        if !ALLOWED_METHODS.contains(&self.method.to_ascii_uppercase().as_str()) {
            return Err(ValidationError::new("method", "must be one of POST, PUT, PATCH"));
        }
        if !ALLOWED_CONTENT_TYPES.contains(&self.content_type.as_str()) {
            return Err(ValidationError::new("contentType", "must be application/json"));
        }
        for (i, e) in self.events.iter().enumerate() {
            if e != WILDCARD && e.parse::<EventType>().is_err() {
                return Err(ValidationError::new(format!("events[{}]", i), "unknown event type"));
            }
        }
        for (i, d) in self.data_types.iter().enumerate() {
            if d != WILDCARD && d.parse::<DataType>().is_err() {
                return Err(ValidationError::new(format!("dataTypes[{}]", i), "unknown data type"));
            }
        }
        Ok(())
    }
}

impl WebhookCreationInput {
    pub fn into_entity(self, id: String, household_id: &str, now: DateTime<Utc>) -> Webhook {
        Webhook {
            id,
            name: self.name,
            content_type: self.content_type,
            url: self.url,
            method: self.method.to_ascii_uppercase(),
            events: self.events,
            data_types: self.data_types,
            topics: self.topics,
            belongs_to_household: household_id.to_string(),
            created_at: now,
            last_updated_at: None,
            archived_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> WebhookCreationInput {
        serde_json::from_value(serde_json::json!({
            "name": "notify",
            "url": "https://example.org/hook",
            "events": ["finalized"],
        }))
        .unwrap()
    }

    #[test]
    fn defaults_fill_method_and_content_type() {
        let input = input();
        assert_eq!(input.method, "POST");
        assert_eq!(input.content_type, "application/json");
        assert!(input.validate().is_ok());
    }

    #[test]
    fn rejects_get_and_non_json() {
        let mut bad = input();
        bad.method = "GET".into();
        assert_eq!(bad.validate().unwrap_err().field, "method");

        let mut bad = input();
        bad.content_type = "text/xml".into();
        assert_eq!(bad.validate().unwrap_err().field, "contentType");
    }

    #[test]
    fn empty_filters_match_everything() {
        let mut hook = input().into_entity("w1".into(), "h1", Utc::now());
        assert!(hook.wants(EventType::Finalized, DataType::MealPlan, "data_changes"));
        assert!(!hook.wants(EventType::Created, DataType::MealPlan, "data_changes"));
        hook.events.clear();
        assert!(hook.wants(EventType::Created, DataType::Recipe, "data_changes"));
        hook.data_types = vec!["*".into()];
        hook.topics = vec!["other".into()];
        assert!(!hook.wants(EventType::Created, DataType::Recipe, "data_changes"));
    }

    #[test]
    fn unknown_filter_entries_are_rejected() {
        let mut bad = input();
        bad.data_types = vec!["meal_plan".into(), "casserole".into()];
        assert_eq!(bad.validate().unwrap_err().field, "dataTypes[1]");
    }
}
