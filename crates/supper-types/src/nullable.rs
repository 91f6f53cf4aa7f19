//! Serde helpers for update inputs whose fields may be explicitly cleared.
//!
//! An update field typed `Option<Option<T>>` distinguishes three states:
//! absent (`None`, leave untouched), `null` (`Some(None)`, clear) and a value
//! (`Some(Some(v))`, overwrite). Use with
//! `#[serde(default, deserialize_with = "nullable::deserialize")]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Millisecond-timestamp variant of the nullable helper.
pub mod millis {
    use super::*;

    pub fn serialize<S>(value: &Option<Option<DateTime<Utc>>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(Some(ts)) => serializer.serialize_i64(ts.timestamp_millis()),
            _ => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<i64>::deserialize(deserializer)? {
            None => Ok(Some(None)),
            Some(ms) => DateTime::from_timestamp_millis(ms)
                .map(|ts| Some(Some(ts)))
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "super::deserialize", skip_serializing_if = "Option::is_none")]
        notes: Option<Option<String>>,
    }

    #[test]
    fn distinguishes_absent_null_and_value() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.notes, None);

        let null: Patch = serde_json::from_str(r#"{"notes":null}"#).unwrap();
        assert_eq!(null.notes, Some(None));

        let set: Patch = serde_json::from_str(r#"{"notes":"x"}"#).unwrap();
        assert_eq!(set.notes, Some(Some("x".to_string())));
    }

    #[test]
    fn absent_fields_are_not_serialized() {
        let json = serde_json::to_string(&Patch::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
