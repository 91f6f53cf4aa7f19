use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::string_enum;
use crate::validation::{self, Validate, ValidationError};

/// Invitations are valid for this long after creation.
pub const INVITATION_LIFETIME_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Expired,
}

string_enum!(InvitationStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Expired => "expired",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdInvitation {
    pub id: String,
    pub from_user: String,
    #[serde(default)]
    pub to_user: Option<String>,
    pub to_email: String,
    #[serde(default)]
    pub to_name: String,
    pub destination_household: String,
    pub status: InvitationStatus,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub status_note: String,
    pub token: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl HouseholdInvitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Expired || self.expires_at <= now
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdInvitationCreationInput {
    pub to_email: String,
    #[serde(default)]
    pub to_name: String,
    #[serde(default)]
    pub note: String,
}

impl Validate for HouseholdInvitationCreationInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::email("toEmail", &self.to_email)?;
        validation::max_length("toName", &self.to_name, 128)?;
        validation::max_length("note", &self.note, 1024)
    }
}

/// Body for accept, reject and cancel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdInvitationUpdateInput {
    pub token: String,
    #[serde(default)]
    pub note: String,
}

impl Validate for HouseholdInvitationUpdateInput {
    fn validate(&self) -> Result<(), ValidationError> {
        validation::required("token", &self.token)?;
        validation::max_length("note", &self.note, 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_uses_deadline_and_status() {
        let now = Utc::now();
        let mut inv = HouseholdInvitation { expires_at: now + Duration::days(1), ..Default::default() };
        assert!(!inv.is_expired(now));
        assert!(inv.is_expired(now + Duration::days(2)));
        inv.status = InvitationStatus::Expired;
        assert!(inv.is_expired(now));
    }

    #[test]
    fn creation_requires_email() {
        let input = HouseholdInvitationCreationInput { to_email: "bob".into(), ..Default::default() };
        assert_eq!(input.validate().unwrap_err().field, "toEmail");
    }
}
