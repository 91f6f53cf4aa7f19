use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Row, params};
use serde::Serialize;
use supper_types::ids;
use supper_types::models::Webhook;

use crate::error::DbResult;
use crate::record::{self, Record, Scope, read_json, read_ms, read_opt_ms, text};
use crate::Database;

impl Record for Webhook {
    const TABLE: &'static str = "webhooks";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "content_type",
        "url",
        "method",
        "events",
        "data_types",
        "topics",
        "belongs_to_household",
    ];

    record::record_timestamps!();

    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Webhook {
            id: row.get("id")?,
            name: row.get("name")?,
            content_type: row.get("content_type")?,
            url: row.get("url")?,
            method: row.get("method")?,
            events: read_json(row, "events")?,
            data_types: read_json(row, "data_types")?,
            topics: read_json(row, "topics")?,
            belongs_to_household: row.get("belongs_to_household")?,
            created_at: read_ms(row, "created_at")?,
            last_updated_at: read_opt_ms(row, "last_updated_at")?,
            archived_at: read_opt_ms(row, "archived_at")?,
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.name),
            text(&self.content_type),
            text(&self.url),
            text(&self.method),
            json_list(&self.events),
            json_list(&self.data_types),
            json_list(&self.topics),
            text(&self.belongs_to_household),
        ]
    }
}

// A list of strings always serializes.
fn json_list(items: &[String]) -> Value {
    Value::Text(serde_json::to_string(items).unwrap_or_else(|_| "[]".into()))
}

/// A delivery that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub id: String,
    #[serde(rename = "webhookID")]
    pub webhook_id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    pub attempts: u32,
    pub last_error: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub failed_at: DateTime<Utc>,
}

pub fn household_scope(household_id: &str) -> Scope {
    Scope::all().eq("belongs_to_household", household_id)
}

pub trait WebhookDataManager {
    /// Every live webhook of a household, oldest first.
    fn webhooks_for_household(&self, household_id: &str) -> DbResult<Vec<Webhook>>;
    fn record_delivery_failure(
        &self,
        webhook_id: &str,
        message_id: &str,
        attempts: u32,
        last_error: &str,
        failed_at: DateTime<Utc>,
    ) -> DbResult<()>;
    fn delivery_failures(&self, webhook_id: &str) -> DbResult<Vec<DeliveryFailure>>;
}

impl WebhookDataManager for Database {
    fn webhooks_for_household(&self, household_id: &str) -> DbResult<Vec<Webhook>> {
        self.with_conn(|conn| record::fetch_where(conn, &household_scope(household_id)))
    }

    fn record_delivery_failure(
        &self,
        webhook_id: &str,
        message_id: &str,
        attempts: u32,
        last_error: &str,
        failed_at: DateTime<Utc>,
    ) -> DbResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO webhook_delivery_failures (id, webhook_id, message_id, attempts, last_error, failed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ids::new_id(), webhook_id, message_id, attempts, last_error, failed_at.timestamp_millis()],
            )?;
            Ok(())
        })
    }

    fn delivery_failures(&self, webhook_id: &str) -> DbResult<Vec<DeliveryFailure>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, webhook_id, message_id, attempts, last_error, failed_at
                 FROM webhook_delivery_failures WHERE webhook_id = ?1 ORDER BY failed_at, id",
            )?;
            let failures = stmt
                .query_map(params![webhook_id], |r| {
                    Ok(DeliveryFailure {
                        id: r.get("id")?,
                        webhook_id: r.get("webhook_id")?,
                        message_id: r.get("message_id")?,
                        attempts: r.get("attempts")?,
                        last_error: r.get("last_error")?,
                        failed_at: read_ms(r, "failed_at")?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(failures)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DataManager;
    use crate::testing::open_temp;
    use crate::users::tests::user_with_household;
    use crate::{DbError, UserDataManager};
    use supper_types::models::WebhookCreationInput;
    use supper_types::time;

    fn hook(household_id: &str, url: &str) -> Webhook {
        WebhookCreationInput {
            name: "notify".into(),
            url: url.into(),
            events: vec!["created".into()],
            data_types: vec!["*".into()],
            ..Default::default()
        }
        .into_entity(ids::new_id(), household_id, time::now())
    }

    #[test]
    fn filters_round_trip_as_json() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("hooked");
        db.create_user(&user, &household).unwrap();
        let webhook = hook(&household.id, "https://example.com/a");
        db.create(&webhook).unwrap();

        let stored = db.webhooks_for_household(&household.id).unwrap();
        assert_eq!(stored, vec![webhook]);
    }

    #[test]
    fn url_is_unique_per_household() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("hooked");
        db.create_user(&user, &household).unwrap();
        db.create(&hook(&household.id, "https://example.com/a")).unwrap();
        let dup = db.create(&hook(&household.id, "https://example.com/a"));
        assert!(matches!(dup, Err(DbError::Conflict(_))));
    }

    #[test]
    fn failures_are_recorded() {
        let (_dir, db) = open_temp();
        let (user, household) = user_with_household("hooked");
        db.create_user(&user, &household).unwrap();
        let webhook = hook(&household.id, "https://example.com/a");
        db.create(&webhook).unwrap();

        db.record_delivery_failure(&webhook.id, "m1", 5, "connection refused", time::now()).unwrap();
        let failures = db.delivery_failures(&webhook.id).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 5);
        assert_eq!(failures[0].last_error, "connection refused");
    }
}
